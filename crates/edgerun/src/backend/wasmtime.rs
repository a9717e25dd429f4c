//! Backend on the wasmtime engine.
//!
//! Host bindings are registered once, on a linker shared by every module of
//! the runtime. Linear memory is accessed through wasmtime's checked
//! `Memory::read`/`Memory::write`, which validate the full range before
//! copying.

use std::sync::Arc;

use tracing::debug;
use tracing::warn;
use wasmtime::Caller;
use wasmtime::Engine;
use wasmtime::ExternType;
use wasmtime::Instance;
use wasmtime::Linker;
use wasmtime::Memory;
use wasmtime::Module;
use wasmtime::Store;
use wasmtime::Val;
use wasmtime::ValType;

use crate::backend::prepare_args;
use crate::backend::signature_from;
use crate::backend::Backend;
use crate::backend::BackendKind;
use crate::backend::CallError;
use crate::backend::FunctionInfo;
use crate::backend::LoadError;
use crate::backend::ModuleInstance;
use crate::config::ModuleConfig;
use crate::host;
use crate::host::HostEnv;
use crate::host::HostState;
use crate::memory;
use crate::memory::LinearMemory;
use crate::value::NumKind;
use crate::value::Value;

pub struct WasmtimeBackend {
    engine: Engine,
    linker: Linker<HostState>,
    env: Arc<HostEnv>,
}

impl WasmtimeBackend {
    pub fn new(env: Arc<HostEnv>) -> Result<Self, LoadError> {
        let engine = Engine::new(&wasmtime::Config::new()).map_err(|e| LoadError::Engine(e.to_string()))?;
        let mut linker = Linker::new(&engine);
        link_host(&mut linker).map_err(|e| LoadError::Engine(e.to_string()))?;
        Ok(Self { engine, linker, env })
    }
}

impl Backend for WasmtimeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Wasmtime
    }

    fn instantiate(&mut self, config: &ModuleConfig) -> Result<Box<dyn ModuleInstance>, LoadError> {
        let bytes = std::fs::read(&config.path).map_err(|source| LoadError::Io {
            path: config.path.clone(),
            source,
        })?;
        let module = Module::new(&self.engine, &bytes).map_err(|e| LoadError::Compile {
            module: config.name.clone(),
            message: format!("{:#}", e),
        })?;

        let functions = module
            .exports()
            .filter_map(|export| match export.ty() {
                ExternType::Func(ty) => Some(FunctionInfo {
                    name: export.name().to_string(),
                    signature: signature_from(ty.params(), ty.results(), |t| num_kind(&t)),
                }),
                _ => None,
            })
            .collect();

        let mut store = Store::new(&self.engine, HostState::new(self.env.clone(), &config.name));
        let instance = self
            .linker
            .instantiate(&mut store, &module)
            .map_err(|e| LoadError::Link {
                module: config.name.clone(),
                message: format!("{:#}", e),
            })?;
        let memory = instance.get_memory(&mut store, "memory");

        debug!(module = %config.name, path = %config.path.display(), "instantiated on wasmtime");
        Ok(Box::new(WasmtimeInstance {
            store,
            instance,
            memory,
            functions,
        }))
    }
}

pub struct WasmtimeInstance {
    store: Store<HostState>,
    instance: Instance,
    memory: Option<Memory>,
    functions: Vec<FunctionInfo>,
}

impl WasmtimeInstance {
    fn memory(&self) -> memory::Result<Memory> {
        self.memory.ok_or_else(|| memory::Error::NoMemory {
            module: self.store.data().module.clone(),
        })
    }
}

impl LinearMemory for WasmtimeInstance {
    fn read(&mut self, address: u32, length: u32) -> memory::Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let memory = self.memory()?;
        let mut buf = vec![0u8; length as usize];
        memory
            .read(&self.store, address as usize, &mut buf)
            .map_err(|e| memory::Error::Engine {
                address,
                length,
                message: e.to_string(),
            })?;
        Ok(buf)
    }

    fn write(&mut self, address: u32, bytes: &[u8]) -> memory::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let memory = self.memory()?;
        memory
            .write(&mut self.store, address as usize, bytes)
            .map_err(|e| memory::Error::Engine {
                address,
                length: bytes.len() as u32,
                message: e.to_string(),
            })
    }
}

impl ModuleInstance for WasmtimeInstance {
    fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    fn call(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, CallError> {
        let signature = self.signature(name)?;
        let args = prepare_args(name, &signature, args)?;
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| CallError::FunctionNotFound(name.to_string()))?;

        let params: Vec<Val> = args.iter().map(|v| to_val(*v)).collect();
        let mut results: Vec<Val> = signature.results.iter().map(|k| to_val(zero(*k))).collect();
        func.call(&mut self.store, &params, &mut results)
            .map_err(|e| CallError::Trap {
                function: name.to_string(),
                message: format!("{:#}", e),
            })?;

        results
            .first()
            .map(|v| {
                from_val(v).ok_or_else(|| CallError::UnsupportedType {
                    function: name.to_string(),
                })
            })
            .transpose()
    }
}

fn num_kind(ty: &ValType) -> Option<NumKind> {
    match ty {
        ValType::I32 => Some(NumKind::I32),
        ValType::I64 => Some(NumKind::I64),
        ValType::F32 => Some(NumKind::F32),
        ValType::F64 => Some(NumKind::F64),
        _ => None,
    }
}

fn zero(kind: NumKind) -> Value {
    match kind {
        NumKind::I32 => Value::I32(0),
        NumKind::I64 => Value::I64(0),
        NumKind::F32 => Value::F32(0.0),
        NumKind::F64 => Value::F64(0.0),
    }
}

fn to_val(value: Value) -> Val {
    match value {
        Value::I32(v) => Val::I32(v),
        Value::I64(v) => Val::I64(v),
        Value::F32(v) => Val::F32(v.to_bits()),
        Value::F64(v) => Val::F64(v.to_bits()),
    }
}

fn from_val(val: &Val) -> Option<Value> {
    match val {
        Val::I32(v) => Some(Value::I32(*v)),
        Val::I64(v) => Some(Value::I64(*v)),
        Val::F32(bits) => Some(Value::F32(f32::from_bits(*bits))),
        Val::F64(bits) => Some(Value::F64(f64::from_bits(*bits))),
        _ => None,
    }
}

fn caller_memory(caller: &mut Caller<'_, HostState>) -> Option<Memory> {
    let memory = caller.get_export("memory").and_then(|e| e.into_memory());
    if memory.is_none() {
        warn!(module = %caller.data().module, "host call from a module without memory");
    }
    memory
}

fn link_host(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(host::SYS, "millis", |caller: Caller<'_, HostState>| -> i32 {
        host::sys::millis(caller.data())
    })?;
    linker.func_wrap(host::SYS, "delay", |_caller: Caller<'_, HostState>, ms: i32| {
        host::sys::delay(ms)
    })?;
    linker.func_wrap(
        host::SYS,
        "print",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
            if let Some(memory) = caller_memory(&mut caller) {
                let (data, state) = memory.data_and_store_mut(&mut caller);
                host::sys::print(state, data, ptr, len);
            }
        },
    )?;
    linker.func_wrap(host::SYS, "println", |mut caller: Caller<'_, HostState>, ptr: i32| {
        if let Some(memory) = caller_memory(&mut caller) {
            let (data, state) = memory.data_and_store_mut(&mut caller);
            host::sys::println(state, data, ptr);
        }
    })?;
    linker.func_wrap(host::SYS, "printInt", |caller: Caller<'_, HostState>, n: i32| {
        host::sys::print_int(caller.data(), n)
    })?;

    linker.func_wrap(
        host::COMMUNICATION,
        "rpcCall",
        |mut caller: Caller<'_, HostState>, name_ptr: i32, name_len: i32, data_ptr: i32, data_len: i32| {
            if let Some(memory) = caller_memory(&mut caller) {
                let (data, state) = memory.data_and_store_mut(&mut caller);
                host::rpc::rpc_call(state, data, name_ptr, name_len, data_ptr, data_len);
            }
        },
    )?;

    linker.func_wrap(host::DHT, "getTemperature", |caller: Caller<'_, HostState>| -> f32 {
        host::peripheral::temperature(caller.data())
    })?;
    linker.func_wrap(host::DHT, "getHumidity", |caller: Caller<'_, HostState>| -> f32 {
        host::peripheral::humidity(caller.data())
    })?;

    linker.func_wrap(host::CAMERA, "takeImage", |mut caller: Caller<'_, HostState>, dst: i32| {
        let state = caller.data().clone();
        let Some(frame) = host::peripheral::capture(&state) else {
            return;
        };
        if let Some(memory) = caller_memory(&mut caller) {
            host::peripheral::store_frame(&state, memory.data_mut(&mut caller), dst, &frame);
        }
    })?;

    linker.func_wrap(
        host::WASI,
        "random_get",
        |mut caller: Caller<'_, HostState>, buf: i32, size: i32| -> i32 {
            match caller_memory(&mut caller) {
                Some(memory) => {
                    let (data, state) = memory.data_and_store_mut(&mut caller);
                    host::wasi::random_get(state, data, buf, size)
                }
                None => host::wasi::Errno::Badf as i32,
            }
        },
    )?;
    Ok(())
}
