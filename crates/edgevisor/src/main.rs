use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing::warn;

use edgechain::HttpClient;
use edgerun::HostEnv;
use edgerun::Runtime;
use edgevisor::logging;
use edgevisor::AppState;
use edgevisor::Config;
use edgevisor::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = Config::from_env().context("Failed to read configuration")?;
    let device = config.device().context("Failed to read device file")?;
    info!(backend = %config.runtime, addr = %config.addr(), "starting {}", config.name);

    let env = HostEnv::builder()
        .registry(device.remote_functions.clone())
        .build();
    let mut runtime = Runtime::new(config.runtime, env).context("Failed to create runtime")?;
    for module in device.module_configs() {
        let name = module.name.clone();
        if let Err(e) = runtime.load_module(module) {
            warn!(module = %name, error = %e, "skipping module");
        }
    }
    info!(modules = runtime.module_names().len(), "boot modules loaded");

    let client = HttpClient::new().context("Failed to build HTTP client")?;
    let state = AppState::new(
        runtime.into_shared(),
        Arc::new(client),
        Storage::new(&config.module_dir, &config.params_dir),
        config.name.clone(),
        config.addr(),
    );

    let listener = tokio::net::TcpListener::bind(config.addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.addr()))?;
    info!(addr = %config.addr(), "listening");
    axum::serve(listener, edgevisor::router(state))
        .await
        .context("Server error")?;
    Ok(())
}
