//! # Configuration
//!
//! Process configuration is read from `EDGEVISOR_*` environment variables
//! once at startup. An optional JSON device file adds the modules to load at
//! boot and the remote functions guests may call:
//!
//! ```json
//! {
//!   "modules": {
//!     "camera": { "path": "modules/camera.wasm", "paramPath": "params/camera.json" }
//!   },
//!   "remote_functions": {
//!     "classify": { "host": "http://ml.local:5000/img", "token": "secret" }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use edgerun::host::RpcRegistry;
use edgerun::BackendKind;
use edgerun::MlModel;
use edgerun::ModuleConfig;

pub const RUNTIME_VAR: &str = "EDGEVISOR_RUNTIME";
pub const NAME_VAR: &str = "EDGEVISOR_NAME";
pub const HOST_VAR: &str = "EDGEVISOR_HOST";
pub const PORT_VAR: &str = "EDGEVISOR_PORT";
pub const MODULE_DIR_VAR: &str = "EDGEVISOR_MODULE_DIR";
pub const PARAMS_DIR_VAR: &str = "EDGEVISOR_PARAMS_DIR";
pub const CONFIG_VAR: &str = "EDGEVISOR_CONFIG";

#[derive(Debug)]
pub enum Error {
    InvalidVar { name: &'static str, value: String, message: String },
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, message: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidVar { name, value, message } => {
                write!(f, "Invalid {}={:?}: {}", name, value, message)
            }
            Self::Io { path, source } => write!(f, "Cannot read {}: {}", path.display(), source),
            Self::Parse { path, message } => write!(f, "Cannot parse {}: {}", path.display(), message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub runtime: BackendKind,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub module_dir: PathBuf,
    pub params_dir: PathBuf,
    pub device_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: BackendKind::default(),
            name: "edgevisor".to_string(),
            host: "0.0.0.0".to_string(),
            port: 5000,
            module_dir: PathBuf::from("./modules"),
            params_dir: PathBuf::from("./params"),
            device_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from any variable source, falling back to the
    /// defaults for unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = lookup(RUNTIME_VAR) {
            config.runtime = value.parse().map_err(|message| Error::InvalidVar {
                name: RUNTIME_VAR,
                value: value.clone(),
                message,
            })?;
        }
        if let Some(value) = lookup(PORT_VAR) {
            config.port = value.trim().parse().map_err(|e: std::num::ParseIntError| Error::InvalidVar {
                name: PORT_VAR,
                value: value.clone(),
                message: e.to_string(),
            })?;
        }
        if let Some(value) = lookup(NAME_VAR) {
            config.name = value;
        }
        if let Some(value) = lookup(HOST_VAR) {
            config.host = value;
        }
        if let Some(value) = lookup(MODULE_DIR_VAR) {
            config.module_dir = value.into();
        }
        if let Some(value) = lookup(PARAMS_DIR_VAR) {
            config.params_dir = value.into();
        }
        config.device_file = lookup(CONFIG_VAR).map(PathBuf::from);
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reads the device file, or an empty one if none is configured.
    pub fn device(&self) -> Result<DeviceConfig> {
        match &self.device_file {
            Some(path) => DeviceConfig::load(path),
            None => Ok(DeviceConfig::default()),
        }
    }
}

/// A module entry in the device file. The module's name is its key.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ModuleEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub size: u64,
    #[serde(default, alias = "paramPath")]
    pub params_path: Option<PathBuf>,
    #[serde(default)]
    pub ml_model: Option<MlModel>,
}

impl ModuleEntry {
    pub fn into_config(self, name: &str) -> ModuleConfig {
        ModuleConfig {
            name: name.to_string(),
            path: self.path,
            size: self.size,
            params_path: self.params_path,
            ml_model: self.ml_model,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleEntry>,
    #[serde(default)]
    pub remote_functions: RpcRegistry,
}

impl DeviceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Module configurations in name order.
    pub fn module_configs(&self) -> Vec<ModuleConfig> {
        self.modules
            .iter()
            .map(|(name, entry)| entry.clone().into_config(name))
            .collect()
    }
}
