//! # edgerun
//!
//! A pluggable WebAssembly runtime for edge devices.
//!
//! ## Architecture
//!
//! edgerun hides the embedded Wasm engine behind a small contract so the
//! supervisor can pick an engine at boot and never think about it again:
//!
//! - **Backend**: parses and instantiates modules, links host bindings. Two
//!   implementations ship: [`backend::wasmtime`] and [`backend::wasmi`].
//! - **WasmModule**: one loaded module. Function lookup, argument
//!   introspection, invocation, data and ML model uploads.
//! - **Runtime**: owns the backend and every loaded module, and keeps a derived
//!   index from exported function name to the module that owns it.
//! - **Host bindings**: the `sys`, `communication`, `dht`, `camera` and
//!   `wasi_snapshot_preview1` imports offered to guests.
//!
//! ## Example
//!
//! ```rust,no_run
//! use edgerun::{BackendKind, HostEnv, ModuleConfig, Runtime, Value};
//!
//! # fn example() -> edgerun::runtime::Result<()> {
//! let mut rt = Runtime::new(BackendKind::Wasmtime, HostEnv::builder().build())?;
//! rt.load_module(ModuleConfig::new("fibo", "modules/fibo.wasm"))?;
//! let result = rt.run_function("fibo", &[Value::I32(10)])?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! A [`Runtime`] is plain mutable state. Share it as a [`SharedRuntime`] so
//! that exactly one invocation or memory access is in flight at a time.

pub mod backend;
pub mod config;
pub mod host;
pub mod memory;
pub mod module;
pub mod runtime;
pub mod value;

pub use backend::Backend;
pub use backend::BackendKind;
pub use backend::FunctionInfo;
pub use backend::ModuleInstance;
pub use config::MlModel;
pub use config::ModuleConfig;
pub use host::HostEnv;
pub use memory::LinearMemory;
pub use module::WasmModule;
pub use module::WasmPtr;
pub use runtime::Runtime;
pub use runtime::SharedRuntime;
pub use value::ArgType;
pub use value::NumKind;
pub use value::Signature;
pub use value::Value;
