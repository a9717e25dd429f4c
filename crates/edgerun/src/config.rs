//! Static module descriptions supplied by deployment configuration.

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// A machine-learning model bound to a module.
///
/// Equality is the model's identity: two descriptors with the same file and
/// guest functions describe the same upload.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Deserialize, Serialize)]
pub struct MlModel {
    pub path: PathBuf,
    #[serde(default = "MlModel::default_alloc")]
    pub alloc_function: String,
    #[serde(default = "MlModel::default_infer")]
    pub infer_function: String,
}

impl MlModel {
    /// Describes a model using the conventional `alloc` and `infer_from_ptrs`
    /// guest functions.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            alloc_function: Self::default_alloc(),
            infer_function: Self::default_infer(),
        }
    }

    pub fn with_functions(mut self, alloc: impl Into<String>, infer: impl Into<String>) -> Self {
        self.alloc_function = alloc.into();
        self.infer_function = infer.into();
        self
    }

    fn default_alloc() -> String {
        "alloc".to_string()
    }

    fn default_infer() -> String {
        "infer_from_ptrs".to_string()
    }
}

/// Static description of a module.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModuleConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub size: u64,
    #[serde(default, alias = "paramPath")]
    pub params_path: Option<PathBuf>,
    #[serde(default)]
    pub ml_model: Option<MlModel>,
}

impl ModuleConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size: 0,
            params_path: None,
            ml_model: None,
        }
    }

    pub fn with_params(mut self, path: impl Into<PathBuf>) -> Self {
        self.params_path = Some(path.into());
        self
    }

    pub fn with_ml_model(mut self, model: MlModel) -> Self {
        self.ml_model = Some(model);
        self
    }
}
