//! `communication` namespace: fire-and-forget calls to remote functions.
//!
//! A guest names a logical function; the [`RpcRegistry`] maps it to an
//! endpoint and an [`RpcDispatcher`] moves the bytes. Nothing is threaded back
//! to the guest.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::host::HostState;
use crate::memory;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Memory(memory::Error),
    UnknownFunction(String),
    Encoding(String),
    NoExecutor,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(e) => write!(f, "Memory error: {}", e),
            Self::UnknownFunction(name) => write!(f, "Unknown remote function: {}", name),
            Self::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            Self::NoExecutor => write!(f, "No async runtime available for dispatch"),
        }
    }
}

impl std::error::Error for Error {}

impl From<memory::Error> for Error {
    fn from(e: memory::Error) -> Self {
        Self::Memory(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where a remote function lives.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RpcEndpoint {
    pub host: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// Logical function name to remote endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RpcRegistry {
    endpoints: HashMap<String, RpcEndpoint>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, endpoint: RpcEndpoint) {
        self.endpoints.insert(name.into(), endpoint);
    }

    pub fn get(&self, name: &str) -> Option<&RpcEndpoint> {
        self.endpoints.get(name)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl FromIterator<(String, RpcEndpoint)> for RpcRegistry {
    fn from_iter<I: IntoIterator<Item = (String, RpcEndpoint)>>(iter: I) -> Self {
        Self {
            endpoints: iter.into_iter().collect(),
        }
    }
}

/// Moves an rpcCall payload to its endpoint.
///
/// Called on the thread executing the guest, so implementations must not
/// block for the duration of the request.
pub trait RpcDispatcher: Send + Sync + 'static {
    fn dispatch(&self, function: &str, endpoint: &RpcEndpoint, data: Vec<u8>) -> Result<()>;
}

/// Posts payloads as a multipart file field `img` on the ambient tokio runtime.
pub struct HttpDispatcher {
    client: reqwest::Client,
    handle: Option<tokio::runtime::Handle>,
}

impl HttpDispatcher {
    /// Creates a dispatcher bound to the tokio runtime of the calling thread,
    /// if there is one.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            handle: tokio::runtime::Handle::try_current().ok(),
        }
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self {
            client: reqwest::Client::new(),
            handle: Some(handle),
        }
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcDispatcher for HttpDispatcher {
    fn dispatch(&self, function: &str, endpoint: &RpcEndpoint, data: Vec<u8>) -> Result<()> {
        let handle = self
            .handle
            .clone()
            .or_else(|| tokio::runtime::Handle::try_current().ok())
            .ok_or(Error::NoExecutor)?;

        let part = reqwest::multipart::Part::bytes(data).file_name("img");
        let form = reqwest::multipart::Form::new().part("img", part);
        let mut request = self.client.post(&endpoint.host).multipart(form);
        if let Some(token) = &endpoint.token {
            request = request.bearer_auth(token);
        }

        let function = function.to_string();
        let url = endpoint.host.clone();
        handle.spawn(async move {
            match request.send().await {
                Ok(response) => {
                    debug!(%function, %url, status = response.status().as_u16(), "rpc call answered")
                }
                Err(e) => error!(%function, %url, error = %e, "rpc call failed"),
            }
        });
        Ok(())
    }
}

/// `communication.rpcCall(name_ptr, name_len, data_ptr, data_len)`
pub fn rpc_call(
    state: &HostState,
    memory: &[u8],
    name_ptr: i32,
    name_len: i32,
    data_ptr: i32,
    data_len: i32,
) {
    if let Err(e) = try_rpc_call(state, memory, name_ptr, name_len, data_ptr, data_len) {
        warn!(module = %state.module, error = %e, "rpcCall failed");
    }
}

fn try_rpc_call(
    state: &HostState,
    memory: &[u8],
    name_ptr: i32,
    name_len: i32,
    data_ptr: i32,
    data_len: i32,
) -> Result<()> {
    let name_bytes = memory::read_slice(memory, name_ptr as u32, name_len as u32)?;
    let name = String::from_utf8(name_bytes).map_err(|e| Error::Encoding(e.to_string()))?;
    let data = memory::read_slice(memory, data_ptr as u32, data_len as u32)?;

    let endpoint = state
        .env
        .registry
        .get(&name)
        .ok_or_else(|| Error::UnknownFunction(name.clone()))?;

    debug!(module = %state.module, function = %name, url = %endpoint.host, length = data.len(), "rpcCall");
    state.env.dispatcher.dispatch(&name, endpoint, data)
}
