//! # Runtime
//!
//! The process-wide owner of the backend and every loaded module.
//!
//! Modules are keyed by name and loaded at most once. Functions are addressed
//! globally by name through a derived index that maps each exported function
//! to the module owning it. The index is rebuilt from scratch after the module
//! set changes and swapped in whole, so a reader never sees it half-built.
//!
//! When two modules export the same name, the module loaded first keeps it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::backend;
use crate::backend::Backend;
use crate::backend::BackendKind;
use crate::backend::LoadError;
use crate::config::ModuleConfig;
use crate::host::HostEnv;
use crate::module;
use crate::module::WasmModule;
use crate::value::ArgType;
use crate::value::Value;

#[derive(Debug)]
pub enum Error {
    Load(LoadError),
    ModuleNotFound(String),
    FunctionNotFound(String),
    /// A memory access was attempted before any function ran.
    NoActiveModule,
    Module(module::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load(e) => write!(f, "{}", e),
            Self::ModuleNotFound(name) => write!(f, "Module not found: {}", name),
            Self::FunctionNotFound(name) => write!(f, "Function not found: {}", name),
            Self::NoActiveModule => write!(f, "No active module"),
            Self::Module(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Load(e) => Some(e),
            Self::Module(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LoadError> for Error {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}

impl From<module::Error> for Error {
    fn from(e: module::Error) -> Self {
        Self::Module(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Exported function name to owning module name.
pub type FunctionIndex = HashMap<String, String>;

/// A runtime shared between request handlers. Holding the lock is what
/// serializes guest execution and memory access.
pub type SharedRuntime = Arc<tokio::sync::Mutex<Runtime>>;

pub struct Runtime {
    backend: Box<dyn Backend>,
    env: Arc<HostEnv>,
    modules: HashMap<String, WasmModule>,
    // Load order, used to resolve duplicate exports.
    order: Vec<String>,
    functions: OnceLock<Arc<FunctionIndex>>,
    active: Option<String>,
}

impl Runtime {
    pub fn new(kind: BackendKind, env: Arc<HostEnv>) -> Result<Self> {
        let backend = backend::create(kind, env.clone())?;
        info!(backend = %kind, "runtime created");
        Ok(Self {
            backend,
            env,
            modules: HashMap::new(),
            order: Vec::new(),
            functions: OnceLock::new(),
            active: None,
        })
    }

    pub fn into_shared(self) -> SharedRuntime {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn env(&self) -> &Arc<HostEnv> {
        &self.env
    }

    /// Loads and instantiates a module.
    ///
    /// Returns `Ok(None)` without touching anything if a module with the same
    /// name is already loaded.
    pub fn load_module(&mut self, config: ModuleConfig) -> Result<Option<&mut WasmModule>> {
        if self.modules.contains_key(&config.name) {
            debug!(module = %config.name, "module already loaded");
            return Ok(None);
        }
        let instance = self.backend.instantiate(&config)?;
        let name = config.name.clone();
        info!(module = %name, backend = %self.backend.kind(), "module loaded");

        self.order.push(name.clone());
        self.invalidate();
        let module = self
            .modules
            .entry(name)
            .or_insert_with(|| WasmModule::new(config, instance));
        Ok(Some(module))
    }

    /// Drops a module and its instance. Returns its configuration.
    pub fn unload_module(&mut self, name: &str) -> Option<ModuleConfig> {
        let module = self.modules.remove(name)?;
        self.order.retain(|n| n != name);
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
        self.invalidate();
        info!(module = name, "module unloaded");
        Some(module.config().clone())
    }

    pub fn module(&self, name: &str) -> Option<&WasmModule> {
        self.modules.get(name)
    }

    pub fn module_mut(&mut self, name: &str) -> Option<&mut WasmModule> {
        self.modules.get_mut(name)
    }

    /// Module names in load order.
    pub fn module_names(&self) -> &[String] {
        &self.order
    }

    /// The function index, rebuilt if the module set changed since last use.
    pub fn functions(&self) -> Arc<FunctionIndex> {
        self.functions
            .get_or_init(|| Arc::new(self.build_index()))
            .clone()
    }

    /// Name of the module exporting `function`.
    pub fn owner_of(&self, function: &str) -> Option<String> {
        self.functions().get(function).cloned()
    }

    pub fn arg_types(&self, function: &str) -> Result<Vec<ArgType>> {
        let owner = self
            .owner_of(function)
            .ok_or_else(|| Error::FunctionNotFound(function.to_string()))?;
        let module = self
            .modules
            .get(&owner)
            .ok_or(Error::ModuleNotFound(owner))?;
        Ok(module.arg_types(function)?)
    }

    /// Runs a function by its global name and makes its module the active one.
    pub fn run_function(&mut self, function: &str, args: &[Value]) -> Result<Option<Value>> {
        let module = self.activate(function)?;
        Ok(module.run_function(function, args)?)
    }

    /// Resolves `function` to its module and makes that module active.
    pub fn activate(&mut self, function: &str) -> Result<&mut WasmModule> {
        let owner = self
            .owner_of(function)
            .ok_or_else(|| Error::FunctionNotFound(function.to_string()))?;
        self.active = Some(owner.clone());
        self.modules.get_mut(&owner).ok_or(Error::ModuleNotFound(owner))
    }

    /// The module whose function ran most recently.
    pub fn active_module(&mut self) -> Result<&mut WasmModule> {
        let name = self.active.as_deref().ok_or(Error::NoActiveModule)?;
        self.modules
            .get_mut(name)
            .ok_or_else(|| Error::ModuleNotFound(name.to_string()))
    }

    /// Reads from the active module's memory.
    pub fn read_memory(&mut self, address: u32, length: u32) -> Result<Vec<u8>> {
        Ok(self.active_module()?.read_memory(address, length)?)
    }

    /// Writes into the active module's memory.
    pub fn write_memory(&mut self, address: u32, bytes: &[u8]) -> Result<()> {
        Ok(self.active_module()?.write_memory(address, bytes)?)
    }

    fn invalidate(&mut self) {
        self.functions = OnceLock::new();
    }

    fn build_index(&self) -> FunctionIndex {
        let mut index = FunctionIndex::new();
        for name in &self.order {
            let Some(module) = self.modules.get(name) else {
                continue;
            };
            for function in module.function_names() {
                match index.get(function) {
                    Some(owner) => warn!(
                        function = %function,
                        owner = %owner,
                        shadowed = %name,
                        "duplicate export ignored"
                    ),
                    None => {
                        index.insert(function.clone(), name.clone());
                    }
                }
            }
        }
        index
    }
}
