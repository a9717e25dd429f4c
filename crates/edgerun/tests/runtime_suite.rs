//! Integration tests for edgerun, run against both backends.

use std::sync::Arc;
use std::sync::Mutex;

use tempfile::TempDir;

use edgerun::backend::CallError;
use edgerun::backend::LoadError;
use edgerun::host::rpc;
use edgerun::host::Camera;
use edgerun::host::PeripheralError;
use edgerun::host::RpcDispatcher;
use edgerun::host::RpcEndpoint;
use edgerun::host::RpcRegistry;
use edgerun::host::IMAGE_BYTES;
use edgerun::module;
use edgerun::runtime;
use edgerun::ArgType;
use edgerun::BackendKind;
use edgerun::HostEnv;
use edgerun::MlModel;
use edgerun::ModuleConfig;
use edgerun::Runtime;
use edgerun::Value;

const BACKENDS: [BackendKind; 2] = [BackendKind::Wasmtime, BackendKind::Wasmi];

const MATH: &str = r#"
(module
  (memory (export "memory") 1)
  (global $next (mut i32) (i32.const 1024))
  (global $allocs (mut i32) (i32.const 0))

  (func (export "alloc") (param $len i32) (result i32)
    (local $p i32)
    global.get $next
    local.set $p
    global.get $next
    local.get $len
    i32.add
    global.set $next
    global.get $allocs
    i32.const 1
    i32.add
    global.set $allocs
    local.get $p)

  (func (export "alloc_count") (result i32)
    global.get $allocs)

  (func (export "answer") (result i32)
    i32.const 42)

  (func (export "add") (param i32 i32) (result i32)
    local.get 0
    local.get 1
    i32.add)

  (func (export "mixed") (param i32 f64) (result i32)
    local.get 0)

  (func (export "sum_bytes") (param $ptr i32) (param $len i32) (result i32)
    (local $acc i32)
    (block $done
      (loop $again
        local.get $len
        i32.eqz
        br_if $done
        local.get $acc
        local.get $ptr
        i32.load8_u
        i32.add
        local.set $acc
        local.get $ptr
        i32.const 1
        i32.add
        local.set $ptr
        local.get $len
        i32.const 1
        i32.sub
        local.set $len
        br $again))
    local.get $acc)

  (func (export "infer_from_ptrs") (param i32 i32 i32 i32) (result i32)
    local.get 1
    local.get 3
    i32.add)

  (func (export "buffer") (result i32)
    i32.const 512)

  ;; Increments every byte of the 4-byte buffer at 512.
  (func (export "bump")
    (local $i i32)
    (block $done
      (loop $again
        local.get $i
        i32.const 4
        i32.eq
        br_if $done
        local.get $i
        i32.const 512
        i32.add
        local.get $i
        i32.const 512
        i32.add
        i32.load8_u
        i32.const 1
        i32.add
        i32.store8
        local.get $i
        i32.const 1
        i32.add
        local.set $i
        br $again)))

  (func (export "boom")
    unreachable))
"#;

const PERIPHERALS: &str = r#"
(module
  (import "sys" "millis" (func $millis (result i32)))
  (import "sys" "print" (func $print (param i32 i32)))
  (import "sys" "println" (func $println (param i32)))
  (import "sys" "printInt" (func $print_int (param i32)))
  (import "sys" "delay" (func $delay (param i32)))
  (import "communication" "rpcCall" (func $rpc (param i32 i32 i32 i32)))
  (import "camera" "takeImage" (func $take (param i32)))
  (import "dht" "getTemperature" (func $temp (result f32)))
  (import "dht" "getHumidity" (func $humidity (result f32)))
  (import "wasi_snapshot_preview1" "random_get" (func $random (param i32 i32) (result i32)))
  (memory (export "memory") 16)
  (data (i32.const 0) "notify")
  (data (i32.const 16) "\01\02\03")
  (data (i32.const 32) "hello\00")

  (func (export "notify")
    (call $rpc (i32.const 0) (i32.const 6) (i32.const 16) (i32.const 3)))
  (func (export "notify_unknown")
    (call $rpc (i32.const 0) (i32.const 3) (i32.const 16) (i32.const 3)))
  (func (export "greet")
    (call $print (i32.const 32) (i32.const 5))
    (call $println (i32.const 32))
    (call $print_int (i32.const 7))
    (call $delay (i32.const 1)))
  (func (export "uptime") (result i32)
    (call $millis))
  (func (export "snap")
    (call $take (i32.const 4096)))
  (func (export "temperature") (result f32)
    (call $temp))
  (func (export "humidity") (result f32)
    (call $humidity))
  (func (export "fill_random") (result i32)
    (call $random (i32.const 64) (i32.const 8)))
  (func (export "random_oob") (result i32)
    (call $random (i32.const 0x7fffffff) (i32.const 8))))
"#;

fn fixture(dir: &TempDir, name: &str, source: &str) -> ModuleConfig {
    let bytes = wat::parse_str(source).expect("Invalid WAT");
    let path = dir.path().join(format!("{}.wasm", name));
    std::fs::write(&path, bytes).expect("Could not write fixture");
    ModuleConfig::new(name, path)
}

fn answer_module(value: i32) -> String {
    format!(
        r#"(module (memory (export "memory") 1) (func (export "answer") (result i32) i32.const {}))"#,
        value
    )
}

fn runtime(kind: BackendKind) -> Runtime {
    Runtime::new(kind, HostEnv::builder().build()).expect("Failed to create runtime")
}

// --- Loading ---

#[test]
fn test_load_is_idempotent_by_name() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = runtime(kind);

        assert!(rt.load_module(fixture(&dir, "math", MATH)).unwrap().is_some());
        assert!(rt.load_module(fixture(&dir, "math", MATH)).unwrap().is_none());
        assert_eq!(rt.module_names(), ["math".to_string()]);

        let index = rt.functions();
        assert_eq!(index.get("answer").map(String::as_str), Some("math"));
        assert_eq!(index.values().filter(|m| *m == "math").count(), index.len());
    }
}

#[test]
fn test_duplicate_export_first_loaded_wins() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = runtime(kind);
        rt.load_module(fixture(&dir, "first", &answer_module(1))).unwrap();
        rt.load_module(fixture(&dir, "second", &answer_module(2))).unwrap();

        assert_eq!(rt.owner_of("answer").as_deref(), Some("first"));
        assert_eq!(rt.run_function("answer", &[]).unwrap(), Some(Value::I32(1)));

        // Removing the owner hands the name to the next module.
        assert!(rt.unload_module("first").is_some());
        assert_eq!(rt.owner_of("answer").as_deref(), Some("second"));
        assert_eq!(rt.run_function("answer", &[]).unwrap(), Some(Value::I32(2)));
    }
}

#[test]
fn test_load_errors() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = runtime(kind);

        let garbage = dir.path().join("garbage.wasm");
        std::fs::write(&garbage, b"not wasm").unwrap();
        match rt.load_module(ModuleConfig::new("garbage", &garbage)) {
            Err(runtime::Error::Load(LoadError::Compile { .. })) => {}
            other => panic!("Expected compile error, got {:?}", other.map(|m| m.is_some())),
        }

        let unresolved = r#"(module (import "sys" "teleport" (func)))"#;
        match rt.load_module(fixture(&dir, "unresolved", unresolved)) {
            Err(runtime::Error::Load(LoadError::Link { .. })) => {}
            other => panic!("Expected link error, got {:?}", other.map(|m| m.is_some())),
        }

        match rt.load_module(ModuleConfig::new("missing", dir.path().join("missing.wasm"))) {
            Err(runtime::Error::Load(LoadError::Io { .. })) => {}
            other => panic!("Expected io error, got {:?}", other.map(|m| m.is_some())),
        }

        // A failed load leaves the runtime usable.
        assert!(rt.module_names().is_empty());
        assert!(rt.load_module(fixture(&dir, "math", MATH)).unwrap().is_some());
    }
}

// --- Invocation ---

#[test]
fn test_arg_types_in_declaration_order() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = runtime(kind);
        rt.load_module(fixture(&dir, "math", MATH)).unwrap();

        assert_eq!(rt.arg_types("mixed").unwrap(), vec![ArgType::Int, ArgType::Float]);
        assert!(rt.arg_types("answer").unwrap().is_empty());

        let module = rt.module("math").unwrap();
        assert!(module.get_function("add").is_some());
        assert!(module.get_function("nope").is_none());
        assert!(module.function_names().iter().any(|f| f == "sum_bytes"));
    }
}

#[test]
fn test_run_function() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = runtime(kind);
        rt.load_module(fixture(&dir, "math", MATH)).unwrap();

        assert_eq!(rt.run_function("answer", &[]).unwrap(), Some(Value::I32(42)));
        assert_eq!(
            rt.run_function("add", &[Value::I64(40), Value::I64(2)]).unwrap(),
            Some(Value::I32(42))
        );
        assert_eq!(
            rt.run_function("mixed", &[Value::I64(5), Value::F64(0.5)]).unwrap(),
            Some(Value::I32(5))
        );
    }
}

#[test]
fn test_invocation_errors() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = runtime(kind);
        rt.load_module(fixture(&dir, "math", MATH)).unwrap();

        match rt.run_function("nope", &[]) {
            Err(runtime::Error::FunctionNotFound(name)) => assert_eq!(name, "nope"),
            other => panic!("Expected missing function, got {:?}", other),
        }
        match rt.run_function("add", &[]) {
            Err(runtime::Error::Module(module::Error::Call(CallError::ArgumentCount {
                expected: 2,
                actual: 0,
                ..
            }))) => {}
            other => panic!("Expected argument count error, got {:?}", other),
        }
        match rt.run_function("boom", &[]) {
            Err(runtime::Error::Module(module::Error::Call(CallError::Trap { .. }))) => {}
            other => panic!("Expected trap, got {:?}", other),
        }

        // A trap does not poison the module.
        assert_eq!(rt.run_function("answer", &[]).unwrap(), Some(Value::I32(42)));
    }
}

// --- Memory ---

#[test]
fn test_memory_round_trip() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = runtime(kind);
        rt.load_module(fixture(&dir, "math", MATH)).unwrap();

        match rt.read_memory(0, 4) {
            Err(runtime::Error::NoActiveModule) => {}
            other => panic!("Expected no active module, got {:?}", other),
        }

        rt.run_function("answer", &[]).unwrap();
        rt.write_memory(100, b"edge").unwrap();
        assert_eq!(rt.read_memory(100, 4).unwrap(), b"edge");

        assert!(rt.read_memory(1 << 20, 0).unwrap().is_empty());
        rt.write_memory(1 << 20, &[]).unwrap();
    }
}

#[test]
fn test_out_of_bounds_write_leaves_memory_untouched() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = runtime(kind);
        rt.load_module(fixture(&dir, "math", MATH)).unwrap();
        rt.run_function("answer", &[]).unwrap();

        let end = 65536 - 2;
        assert!(rt.write_memory(end, &[9, 9, 9, 9]).is_err());
        assert_eq!(rt.read_memory(end, 2).unwrap(), vec![0, 0]);
        assert!(rt.read_memory(end, 4).is_err());
    }
}

// --- Uploads ---

#[test]
fn test_upload_data_and_run_data_function() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = runtime(kind);
        rt.load_module(fixture(&dir, "math", MATH)).unwrap();
        let module = rt.module_mut("math").unwrap();

        let at = module.upload_data(&[5, 6, 7], "alloc").unwrap();
        assert_eq!(at.size, 3);
        assert_eq!(module.read_memory(at.ptr, at.size).unwrap(), vec![5, 6, 7]);

        let sum = module
            .run_function("sum_bytes", &[Value::I32(at.ptr as i32), Value::I32(3)])
            .unwrap();
        assert_eq!(sum, Some(Value::I32(18)));

        let bumped = module.run_data_function("bump", "buffer", &[1, 2, 3, 4]).unwrap();
        assert_eq!(bumped, vec![2, 3, 4, 5]);

        match module.upload_data(&[1], "no_such_alloc") {
            Err(module::Error::Allocation { function, .. }) => assert_eq!(function, "no_such_alloc"),
            other => panic!("Expected allocation error, got {:?}", other),
        }

        let missing = dir.path().join("missing.bin");
        match module.upload_data_file(&missing, "alloc") {
            Err(module::Error::Io { .. }) => {}
            other => panic!("Expected io error, got {:?}", other),
        }
    }
}

#[test]
fn test_ml_model_uploads_once() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let model_path = dir.path().join("model.bin");
        std::fs::write(&model_path, [1u8; 10]).unwrap();
        let model = MlModel::new(&model_path);

        let mut rt = runtime(kind);
        let config = fixture(&dir, "math", MATH).with_ml_model(model.clone());
        rt.load_module(config).unwrap();
        let module = rt.module_mut("math").unwrap();

        let first = module.upload_ml_model(&model).unwrap();
        let second = module.upload_ml_model(&model).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.size, 10);
        assert_eq!(module.run_function("alloc_count", &[]).unwrap(), Some(Value::I32(1)));

        // Inference reuses the resident model and uploads only the data.
        let result = module.run_ml_inference(&[0, 0, 0]).unwrap();
        assert_eq!(result, Some(Value::I32(13)));
        assert_eq!(module.run_function("alloc_count", &[]).unwrap(), Some(Value::I32(2)));
    }
}

#[test]
fn test_inference_failure_is_reported() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let model = MlModel::new(dir.path().join("absent.bin"));

        let mut rt = runtime(kind);
        rt.load_module(fixture(&dir, "math", MATH).with_ml_model(model)).unwrap();
        rt.load_module(fixture(&dir, "plain", &answer_module(0))).unwrap();

        match rt.module_mut("math").unwrap().run_ml_inference(&[1]) {
            Err(module::Error::Inference { module, source }) => {
                assert_eq!(module, "math");
                assert!(matches!(*source, module::Error::Io { .. }));
            }
            other => panic!("Expected inference error, got {:?}", other),
        }
        match rt.module_mut("plain").unwrap().run_ml_inference(&[1]) {
            Err(module::Error::NoModel { .. }) => {}
            other => panic!("Expected missing model, got {:?}", other),
        }
    }
}

// --- Host bindings ---

#[derive(Clone, Default)]
struct RecordingDispatcher {
    calls: Arc<Mutex<Vec<(String, String, Vec<u8>)>>>,
}

impl RpcDispatcher for RecordingDispatcher {
    fn dispatch(&self, function: &str, endpoint: &RpcEndpoint, data: Vec<u8>) -> rpc::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((function.to_string(), endpoint.host.clone(), data));
        Ok(())
    }
}

struct FlatCamera(u8);

impl Camera for FlatCamera {
    fn capture(&mut self) -> Result<Vec<u8>, PeripheralError> {
        Ok(vec![self.0; IMAGE_BYTES])
    }
}

fn peripheral_runtime(kind: BackendKind, dir: &TempDir, dispatcher: RecordingDispatcher) -> Runtime {
    let mut registry = RpcRegistry::new();
    registry.insert(
        "notify",
        RpcEndpoint {
            host: "http://peer.local/notify".to_string(),
            token: None,
        },
    );
    let env = HostEnv::builder()
        .camera(FlatCamera(7))
        .registry(registry)
        .dispatcher(Arc::new(dispatcher))
        .build();
    let mut rt = Runtime::new(kind, env).expect("Failed to create runtime");
    rt.load_module(fixture(dir, "peripherals", PERIPHERALS)).unwrap();
    rt
}

#[test]
fn test_rpc_call_dispatches_guest_payload() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let dispatcher = RecordingDispatcher::default();
        let mut rt = peripheral_runtime(kind, &dir, dispatcher.clone());

        rt.run_function("notify", &[]).unwrap();
        // "not" is not registered; the guest never sees the failure.
        rt.run_function("notify_unknown", &[]).unwrap();

        let calls = dispatcher.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(
                "notify".to_string(),
                "http://peer.local/notify".to_string(),
                vec![1, 2, 3]
            )]
        );
    }
}

#[test]
fn test_take_image_writes_frame() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = peripheral_runtime(kind, &dir, RecordingDispatcher::default());

        rt.run_function("snap", &[]).unwrap();
        let frame = rt.read_memory(4096, IMAGE_BYTES as u32).unwrap();
        assert!(frame.iter().all(|b| *b == 7));
        assert_eq!(rt.read_memory(4095, 1).unwrap(), vec![0]);
    }
}

#[test]
fn test_missing_sensor_returns_nan() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = peripheral_runtime(kind, &dir, RecordingDispatcher::default());

        for function in ["temperature", "humidity"] {
            match rt.run_function(function, &[]).unwrap() {
                Some(Value::F32(v)) => assert!(v.is_nan()),
                other => panic!("Expected NaN, got {:?}", other),
            }
        }
    }
}

#[test]
fn test_random_get() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = peripheral_runtime(kind, &dir, RecordingDispatcher::default());

        assert_eq!(rt.run_function("fill_random", &[]).unwrap(), Some(Value::I32(0)));
        assert_eq!(rt.run_function("random_oob", &[]).unwrap(), Some(Value::I32(28)));
    }
}

#[test]
fn test_sys_bindings() {
    for kind in BACKENDS {
        let dir = TempDir::new().unwrap();
        let mut rt = peripheral_runtime(kind, &dir, RecordingDispatcher::default());

        rt.run_function("greet", &[]).unwrap();
        match rt.run_function("uptime", &[]).unwrap() {
            Some(Value::I32(ms)) => assert!(ms >= 0),
            other => panic!("Expected millis, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_shared_runtime_serializes_access() {
    let dir = TempDir::new().unwrap();
    let mut rt = runtime(BackendKind::Wasmtime);
    rt.load_module(fixture(&dir, "math", MATH)).unwrap();
    let shared = rt.into_shared();

    let mut handles = Vec::new();
    for i in 0..8i64 {
        let shared = shared.clone();
        handles.push(tokio::spawn(async move {
            let mut rt = shared.lock().await;
            rt.run_function("add", &[Value::I64(i), Value::I64(1)]).unwrap()
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), Some(Value::I32(i as i32 + 1)));
    }
}
