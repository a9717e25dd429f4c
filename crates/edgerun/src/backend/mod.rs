//! # Backends
//!
//! A backend wraps one embedded Wasm engine. It turns a [`ModuleConfig`] into a
//! live [`ModuleInstance`]: bytecode parsed, host bindings linked, start
//! function run. Everything above this layer is engine-agnostic.
//!
//! The two engines differ in where linking happens. [`wasmtime`] builds one
//! linker per runtime and instantiates every module against it; [`wasmi`]
//! builds a fresh linker per module.

pub mod wasmi;
pub mod wasmtime;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::ModuleConfig;
use crate::host::HostEnv;
use crate::memory::LinearMemory;
use crate::value::NumKind;
use crate::value::Signature;
use crate::value::Value;

/// Which engine a runtime is built on. Chosen once at boot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum BackendKind {
    #[default]
    Wasmtime,
    Wasmi,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wasmtime" => Ok(Self::Wasmtime),
            "wasmi" => Ok(Self::Wasmi),
            other => Err(format!("Unknown runtime backend: {}", other)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wasmtime => write!(f, "wasmtime"),
            Self::Wasmi => write!(f, "wasmi"),
        }
    }
}

/// Failure to bring a module up. Other loaded modules are unaffected.
#[derive(Debug)]
pub enum LoadError {
    Io { path: PathBuf, source: std::io::Error },
    Compile { module: String, message: String },
    Link { module: String, message: String },
    Engine(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "Cannot read {}: {}", path.display(), source),
            Self::Compile { module, message } => {
                write!(f, "Module '{}' failed to compile: {}", module, message)
            }
            Self::Link { module, message } => {
                write!(f, "Module '{}' failed to link: {}", module, message)
            }
            Self::Engine(msg) => write!(f, "Engine error: {}", msg),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Failure of a single guest invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    FunctionNotFound(String),
    ArgumentCount { function: String, expected: usize, actual: usize },
    ArgumentType { function: String, index: usize, expected: NumKind, actual: NumKind },
    /// The function uses a type outside the four numeric kinds.
    UnsupportedType { function: String },
    Trap { function: String, message: String },
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FunctionNotFound(name) => write!(f, "Function not found: {}", name),
            Self::ArgumentCount { function, expected, actual } => write!(
                f,
                "Function '{}' takes {} arguments, got {}",
                function, expected, actual
            ),
            Self::ArgumentType { function, index, expected, actual } => write!(
                f,
                "Function '{}' argument {} expects {}, got {}",
                function, index, expected, actual
            ),
            Self::UnsupportedType { function } => {
                write!(f, "Function '{}' has a non-numeric signature", function)
            }
            Self::Trap { function, message } => {
                write!(f, "Function '{}' trapped: {}", function, message)
            }
        }
    }
}

impl std::error::Error for CallError {}

/// An exported function and its signature, if the signature is purely numeric.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub signature: Option<Signature>,
}

/// One instantiated module, bound to its own store.
pub trait ModuleInstance: LinearMemory + Send {
    /// Exported functions in export order.
    fn functions(&self) -> &[FunctionInfo];

    /// Invokes `name` with exactly the declared number of arguments.
    ///
    /// Arguments are coerced to the declared parameter types first. Only the
    /// first result, if any, is returned.
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, CallError>;

    /// Invokes `name` without arguments. Fails if the function takes any.
    fn call_nullary(&mut self, name: &str) -> Result<Option<Value>, CallError> {
        let signature = self.signature(name)?;
        if !signature.params.is_empty() {
            return Err(CallError::ArgumentCount {
                function: name.to_string(),
                expected: signature.params.len(),
                actual: 0,
            });
        }
        self.call(name, &[])
    }

    fn signature(&self, name: &str) -> Result<Signature, CallError> {
        let info = self
            .functions()
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| CallError::FunctionNotFound(name.to_string()))?;
        info.signature
            .clone()
            .ok_or_else(|| CallError::UnsupportedType { function: name.to_string() })
    }
}

/// A Wasm engine able to instantiate modules with the host bindings linked.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    fn instantiate(&mut self, config: &ModuleConfig) -> Result<Box<dyn ModuleInstance>, LoadError>;
}

/// Builds the backend selected by `kind`.
pub fn create(kind: BackendKind, env: Arc<HostEnv>) -> Result<Box<dyn Backend>, LoadError> {
    match kind {
        BackendKind::Wasmtime => Ok(Box::new(wasmtime::WasmtimeBackend::new(env)?)),
        BackendKind::Wasmi => Ok(Box::new(wasmi::WasmiBackend::new(env))),
    }
}

/// Coerces positional arguments to the declared parameter kinds.
pub(crate) fn prepare_args(
    function: &str,
    signature: &Signature,
    args: &[Value],
) -> Result<Vec<Value>, CallError> {
    if signature.params.len() != args.len() {
        return Err(CallError::ArgumentCount {
            function: function.to_string(),
            expected: signature.params.len(),
            actual: args.len(),
        });
    }
    signature
        .params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (kind, arg))| {
            arg.coerce(*kind).ok_or(CallError::ArgumentType {
                function: function.to_string(),
                index,
                expected: *kind,
                actual: arg.kind(),
            })
        })
        .collect()
}

/// Builds a [`Signature`] from engine type tags, `None` if any tag is not one
/// of the four numeric kinds.
pub(crate) fn signature_from<P, R, T>(params: P, results: R, kind_of: impl Fn(T) -> Option<NumKind>) -> Option<Signature>
where
    P: IntoIterator<Item = T>,
    R: IntoIterator<Item = T>,
{
    let params = params.into_iter().map(&kind_of).collect::<Option<Vec<_>>>()?;
    let results = results.into_iter().map(&kind_of).collect::<Option<Vec<_>>>()?;
    Some(Signature { params, results })
}
