//! # Host bindings
//!
//! The fixed set of functions offered to guests at link time, grouped by the
//! import namespace they live in:
//!
//! | namespace                | functions                                   |
//! |--------------------------|---------------------------------------------|
//! | `sys`                    | `millis`, `delay`, `print`, `println`, `printInt` |
//! | `communication`          | `rpcCall`                                   |
//! | `dht`                    | `getTemperature`, `getHumidity`             |
//! | `camera`                 | `takeImage`                                 |
//! | `wasi_snapshot_preview1` | `random_get`                                |
//!
//! The functions here are engine-agnostic: they receive the calling module's
//! [`HostState`] and a raw view of its linear memory. Each backend resolves
//! both from the engine's caller handle and forwards to them, so no binding
//! ever looks up "the current module" through ambient state.
//!
//! Bindings never trap. Peripheral, memory and network failures are logged and
//! turned into sentinel results.

pub mod peripheral;
pub mod rpc;
pub mod sys;
pub mod wasi;

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

pub use peripheral::Camera;
pub use peripheral::PeripheralError;
pub use peripheral::Sensor;
pub use peripheral::Unavailable;
pub use peripheral::IMAGE_BYTES;
pub use peripheral::IMAGE_SHAPE;
pub use peripheral::swap_red_blue;
pub use rpc::HttpDispatcher;
pub use rpc::RpcDispatcher;
pub use rpc::RpcEndpoint;
pub use rpc::RpcRegistry;

pub const SYS: &str = "sys";
pub const COMMUNICATION: &str = "communication";
pub const DHT: &str = "dht";
pub const CAMERA: &str = "camera";
pub const WASI: &str = "wasi_snapshot_preview1";

/// Host-side collaborators shared by every module of a runtime.
///
/// Peripherals each sit behind their own mutex: a camera capture and a sensor
/// read may overlap, two captures may not.
pub struct HostEnv {
    started: Instant,
    pub(crate) camera: Mutex<Box<dyn Camera>>,
    pub(crate) sensor: Mutex<Box<dyn Sensor>>,
    pub(crate) registry: RpcRegistry,
    pub(crate) dispatcher: Arc<dyn RpcDispatcher>,
}

impl HostEnv {
    pub fn builder() -> HostEnvBuilder {
        HostEnvBuilder::new()
    }

    /// Milliseconds since this environment was created.
    pub fn elapsed_millis(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    pub fn registry(&self) -> &RpcRegistry {
        &self.registry
    }
}

/// A staging area for the collaborators baked into a [`HostEnv`].
pub struct HostEnvBuilder {
    camera: Box<dyn Camera>,
    sensor: Box<dyn Sensor>,
    registry: RpcRegistry,
    dispatcher: Option<Arc<dyn RpcDispatcher>>,
}

impl HostEnvBuilder {
    pub fn new() -> Self {
        Self {
            camera: Box::new(Unavailable),
            sensor: Box::new(Unavailable),
            registry: RpcRegistry::default(),
            dispatcher: None,
        }
    }

    pub fn camera(mut self, camera: impl Camera) -> Self {
        self.camera = Box::new(camera);
        self
    }

    pub fn sensor(mut self, sensor: impl Sensor) -> Self {
        self.sensor = Box::new(sensor);
        self
    }

    pub fn registry(mut self, registry: RpcRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn RpcDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Arc<HostEnv> {
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(HttpDispatcher::new()));
        Arc::new(HostEnv {
            started: Instant::now(),
            camera: Mutex::new(self.camera),
            sensor: Mutex::new(self.sensor),
            registry: self.registry,
            dispatcher,
        })
    }
}

impl Default for HostEnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-module state stored in the engine's store.
///
/// This is the explicit context every binding receives: which module is
/// calling, and the environment it runs in.
#[derive(Clone)]
pub struct HostState {
    pub(crate) env: Arc<HostEnv>,
    pub(crate) module: String,
}

impl HostState {
    pub fn new(env: Arc<HostEnv>, module: impl Into<String>) -> Self {
        Self {
            env,
            module: module.into(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn env(&self) -> &HostEnv {
        &self.env
    }
}
