//! # edgevisor
//!
//! The supervisor process: reads its configuration, loads the boot modules
//! into one shared [`edgerun::Runtime`], and serves the HTTP surface that
//! feeds invocations into [`edgechain::Deployment::step`].

pub mod config;
pub mod logging;
pub mod server;
pub mod state;
pub mod store;

pub use config::Config;
pub use config::DeviceConfig;
pub use server::router;
pub use state::AppState;
pub use store::Storage;
