//! The subset of an OpenAPI document used to address the next hop.
//!
//! ```json
//! {
//!   "servers": [{ "url": "http://camera.local:5000/" }],
//!   "paths": { "/deployments/1/take_image": { "post": { ... } } }
//! }
//! ```

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug)]
pub enum Error {
    NoServers,
    NoPaths,
    /// The path entry is not an object of methods.
    InvalidPath { path: String, message: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoServers => write!(f, "Description lists no servers"),
            Self::NoPaths => write!(f, "Description lists no paths"),
            Self::InvalidPath { path, message } => write!(f, "Invalid path '{}': {}", path, message),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Server {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ServiceDescription {
    #[serde(default)]
    pub servers: Vec<Server>,
    /// Path to path item, in document order.
    #[serde(default)]
    pub paths: serde_json::Map<String, serde_json::Value>,
}

/// The operations declared for one path.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct PathItem {
    pub get: Option<serde_json::Value>,
    pub post: Option<serde_json::Value>,
    pub put: Option<serde_json::Value>,
    pub delete: Option<serde_json::Value>,
    pub patch: Option<serde_json::Value>,
}

impl PathItem {
    pub fn supports_post(&self) -> bool {
        self.post.is_some()
    }

    /// Declared method names, lowercase.
    pub fn methods(&self) -> Vec<&'static str> {
        [
            ("get", &self.get),
            ("post", &self.post),
            ("put", &self.put),
            ("delete", &self.delete),
            ("patch", &self.patch),
        ]
        .into_iter()
        .filter(|(_, op)| op.is_some())
        .map(|(name, _)| name)
        .collect()
    }
}

/// A resolved hop: full URL plus what the path declares.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoint {
    pub url: String,
    pub item: PathItem,
}

impl ServiceDescription {
    /// Resolves the first server and the first declared path.
    pub fn first_endpoint(&self) -> Result<Endpoint> {
        let server = self.servers.first().ok_or(Error::NoServers)?;
        let (path, item) = self.paths.iter().next().ok_or(Error::NoPaths)?;
        let item = PathItem::deserialize(item).map_err(|e| Error::InvalidPath {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(Endpoint {
            url: join_url(&server.url, path),
            item,
        })
    }
}

/// Joins a base URL and a path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
