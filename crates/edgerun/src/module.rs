//! # Module
//!
//! A [`WasmModule`] is one loaded module: its static configuration, its live
//! engine instance, and the bookkeeping for data and model uploads.
//!
//! Uploads follow a fixed protocol. The guest exports an allocator taking a
//! byte length and returning a pointer; the host calls it, then writes the
//! bytes at that pointer. If the write fails after a successful allocation,
//! the allocated region is considered lost.

use std::path::Path;
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::debug;
use tracing::warn;

use crate::backend::CallError;
use crate::backend::ModuleInstance;
use crate::config::MlModel;
use crate::config::ModuleConfig;
use crate::memory;
use crate::memory::LinearMemory;
use crate::value::ArgType;
use crate::value::Signature;
use crate::value::Value;

#[derive(Debug)]
pub enum Error {
    /// Invocation failed: missing function, argument mismatch or trap.
    Call(CallError),
    /// The guest allocator failed or returned something that is not a pointer.
    Allocation { function: String, message: String },
    /// Writing uploaded bytes into guest memory failed.
    Write(memory::Error),
    /// Reading guest memory failed.
    Read(memory::Error),
    Io { path: PathBuf, source: std::io::Error },
    /// Inference was requested on a module with no bound model.
    NoModel { module: String },
    /// Model upload, data upload or the inference call failed.
    Inference { module: String, source: Box<Error> },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call(e) => write!(f, "{}", e),
            Self::Allocation { function, message } => {
                write!(f, "Allocation via '{}' failed: {}", function, message)
            }
            Self::Write(e) => write!(f, "Write failed: {}", e),
            Self::Read(e) => write!(f, "Read failed: {}", e),
            Self::Io { path, source } => write!(f, "Cannot read {}: {}", path.display(), source),
            Self::NoModel { module } => write!(f, "Module '{}' has no ML model", module),
            Self::Inference { module, source } => {
                write!(f, "Inference in module '{}' failed: {}", module, source)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Call(e) => Some(e),
            Self::Write(e) | Self::Read(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            Self::Inference { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<CallError> for Error {
    fn from(e: CallError) -> Self {
        Self::Call(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A region of guest memory holding uploaded bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WasmPtr {
    pub ptr: u32,
    pub size: u32,
}

/// One loaded module and its live instance.
pub struct WasmModule {
    config: ModuleConfig,
    instance: Box<dyn ModuleInstance>,
    functions: OnceLock<Vec<String>>,
    uploaded_model: Option<(MlModel, WasmPtr)>,
}

impl WasmModule {
    pub(crate) fn new(config: ModuleConfig, instance: Box<dyn ModuleInstance>) -> Self {
        Self {
            config,
            instance,
            functions: OnceLock::new(),
            uploaded_model: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Exported function names, computed on first use.
    pub fn function_names(&self) -> &[String] {
        self.functions.get_or_init(|| {
            self.instance
                .functions()
                .iter()
                .map(|f| f.name.clone())
                .collect()
        })
    }

    /// Looks up an exported function. Absence is not an error.
    pub fn get_function(&self, name: &str) -> Option<Signature> {
        self.instance.signature(name).ok()
    }

    /// Semantic argument types of `name` in declaration order.
    pub fn arg_types(&self, name: &str) -> Result<Vec<ArgType>> {
        Ok(self.instance.signature(name)?.arg_types())
    }

    /// Invokes `name`. An empty argument list takes the nullary call path.
    pub fn run_function(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>> {
        debug!(module = %self.config.name, function = name, args = args.len(), "run");
        let result = if args.is_empty() {
            self.instance.call_nullary(name)
        } else {
            self.instance.call(name, args)
        };
        Ok(result?)
    }

    /// Allocates `data.len()` bytes via `alloc_function` and writes `data` there.
    pub fn upload_data(&mut self, data: &[u8], alloc_function: &str) -> Result<WasmPtr> {
        let size = u32::try_from(data.len()).map_err(|_| Error::Allocation {
            function: alloc_function.to_string(),
            message: format!("{} bytes do not fit in guest memory", data.len()),
        })?;

        let allocation = self
            .instance
            .call(alloc_function, &[Value::I32(size as i32)])
            .map_err(|e| Error::Allocation {
                function: alloc_function.to_string(),
                message: e.to_string(),
            })?;
        let ptr = allocation
            .and_then(|v| v.as_ptr())
            .ok_or_else(|| Error::Allocation {
                function: alloc_function.to_string(),
                message: "allocator returned no pointer".to_string(),
            })?;

        self.instance.write(ptr, data).map_err(Error::Write)?;
        debug!(module = %self.config.name, ptr, size, "uploaded data");
        Ok(WasmPtr { ptr, size })
    }

    /// Reads `path` and uploads its contents via `alloc_function`.
    pub fn upload_data_file(&mut self, path: &Path, alloc_function: &str) -> Result<WasmPtr> {
        let data = std::fs::read(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.upload_data(&data, alloc_function)
    }

    /// Uploads `model` unless that exact model is already resident.
    pub fn upload_ml_model(&mut self, model: &MlModel) -> Result<WasmPtr> {
        if let Some((cached, location)) = &self.uploaded_model {
            if cached == model {
                return Ok(*location);
            }
        }
        let location = self.upload_data_file(&model.path, &model.alloc_function)?;
        self.uploaded_model = Some((model.clone(), location));
        Ok(location)
    }

    /// Runs the bound model's inference function over `data`.
    pub fn run_ml_inference(&mut self, data: &[u8]) -> Result<Option<Value>> {
        let model = self.config.ml_model.clone().ok_or_else(|| Error::NoModel {
            module: self.config.name.clone(),
        })?;
        self.try_inference(&model, data).map_err(|e| {
            warn!(module = %self.config.name, error = %e, "inference failed");
            Error::Inference {
                module: self.config.name.clone(),
                source: Box::new(e),
            }
        })
    }

    fn try_inference(&mut self, model: &MlModel, data: &[u8]) -> Result<Option<Value>> {
        let model_at = self.upload_ml_model(model)?;
        let data_at = self.upload_data(data, &model.alloc_function)?;
        let args = [
            Value::I32(model_at.ptr as i32),
            Value::I32(model_at.size as i32),
            Value::I32(data_at.ptr as i32),
            Value::I32(data_at.size as i32),
        ];
        Ok(self.instance.call(&model.infer_function, &args)?)
    }

    /// Runs `function` over `data` in place.
    ///
    /// The nullary `data_ptr_function` names a guest buffer. `data` is copied
    /// there, the nullary `function` runs, and the same number of bytes is
    /// read back from the buffer.
    pub fn run_data_function(
        &mut self,
        function: &str,
        data_ptr_function: &str,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let ptr = self
            .instance
            .call_nullary(data_ptr_function)?
            .and_then(|v| v.as_ptr())
            .ok_or_else(|| Error::Allocation {
                function: data_ptr_function.to_string(),
                message: "no buffer pointer returned".to_string(),
            })?;
        self.instance.write(ptr, data).map_err(Error::Write)?;
        self.instance.call_nullary(function)?;
        self.instance
            .read(ptr, data.len() as u32)
            .map_err(Error::Read)
    }

    pub fn read_memory(&mut self, address: u32, length: u32) -> Result<Vec<u8>> {
        self.instance.read(address, length).map_err(Error::Read)
    }

    pub fn write_memory(&mut self, address: u32, bytes: &[u8]) -> Result<()> {
        self.instance.write(address, bytes).map_err(Error::Write)
    }

    /// The currently resident model and its location, if any.
    pub fn uploaded_model(&self) -> Option<(&MlModel, WasmPtr)> {
        self.uploaded_model.as_ref().map(|(m, at)| (m, *at))
    }
}
