//! Media types the chain knows how to parse and encode.

use serde::Deserialize;
use serde::Serialize;

pub const JSON: &str = "application/json";
pub const JPEG: &str = "image/jpeg";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A declared input or output media type.
///
/// Every type the chain has no handling for lands in [`MediaType::Unsupported`],
/// so each dispatch site must decide what to do with it explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum MediaType {
    Json,
    Jpeg,
    OctetStream,
    Unsupported(String),
}

impl MediaType {
    /// Parses a media type, ignoring parameters such as `; charset=utf-8`.
    pub fn parse(s: &str) -> Self {
        let essence = s.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            JSON => Self::Json,
            JPEG => Self::Jpeg,
            OCTET_STREAM => Self::OctetStream,
            _ => Self::Unsupported(essence.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Json => JSON,
            Self::Jpeg => JPEG,
            Self::OctetStream => OCTET_STREAM,
            Self::Unsupported(s) => s,
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for MediaType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&str> for MediaType {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<MediaType> for String {
    fn from(m: MediaType) -> Self {
        m.as_str().to_string()
    }
}
