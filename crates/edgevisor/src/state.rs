//! Shared state behind every request handler.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;

use edgechain::ChainClient;
use edgechain::Deployment;
use edgechain::MediaType;
use edgerun::SharedRuntime;

use crate::store::Storage;

/// How the first function of a deployment declares its output.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct OutputSpec {
    pub media_type: MediaType,
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
}

/// A registered deployment and the output declaration it is invoked with.
#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentEntry {
    pub deployment: Deployment,
    pub output: OutputSpec,
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) inner: Arc<AppStateInner>,
}

pub(crate) struct AppStateInner {
    pub(crate) runtime: SharedRuntime,
    // One lock per deployment, held while a step is taken and released before
    // it is forwarded.
    pub(crate) deployments: DashMap<String, Arc<Mutex<DeploymentEntry>>>,
    pub(crate) client: Arc<dyn ChainClient>,
    pub(crate) storage: Storage,
    pub(crate) name: String,
    pub(crate) addr: String,
}

impl AppState {
    pub fn new(
        runtime: SharedRuntime,
        client: Arc<dyn ChainClient>,
        storage: Storage,
        name: impl Into<String>,
        addr: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                runtime,
                deployments: DashMap::new(),
                client,
                storage,
                name: name.into(),
                addr: addr.into(),
            }),
        }
    }

    pub fn runtime(&self) -> &SharedRuntime {
        &self.inner.runtime
    }

    /// Registers a deployment, replacing any with the same id.
    pub fn register(&self, id: impl Into<String>, entry: DeploymentEntry) {
        self.inner
            .deployments
            .insert(id.into(), Arc::new(Mutex::new(entry)));
    }

    pub fn deployment(&self, id: &str) -> Option<Arc<Mutex<DeploymentEntry>>> {
        self.inner.deployments.get(id).map(|entry| entry.value().clone())
    }
}
