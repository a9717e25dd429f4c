//! Values travelling along a chain.

use edgerun::Value;

use crate::media::MediaType;

/// A parsed step result, ready to be forwarded or returned.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Null,
    Number(Value),
    Bytes(Vec<u8>),
    /// A structured reply from a downstream hop.
    Json(serde_json::Value),
}

impl Payload {
    pub fn from_result(result: Option<Value>) -> Self {
        result.map(Self::Number).unwrap_or(Self::Null)
    }

    /// Interprets a downstream reply body by its declared media type.
    ///
    /// Only `application/json` bodies are parsed, and a `{"result": ...}`
    /// envelope among them is unwrapped. Every other body stays raw bytes,
    /// even if it happens to be valid JSON text.
    pub fn from_reply(media: &MediaType, body: &[u8]) -> Self {
        if body.is_empty() {
            return Self::Null;
        }
        if *media != MediaType::Json {
            return Self::Bytes(body.to_vec());
        }
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(mut map)) if map.len() == 1 && map.contains_key("result") => {
                map.remove("result").map(Self::Json).unwrap_or(Self::Null)
            }
            Ok(value) => Self::Json(value),
            Err(_) => Self::Bytes(body.to_vec()),
        }
    }

    /// JSON view used in response envelopes. Non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Number(Value::I32(v)) => (*v).into(),
            Self::Number(Value::I64(v)) => (*v).into(),
            Self::Number(Value::F32(v)) => float_json(f64::from(*v)),
            Self::Number(Value::F64(v)) => float_json(*v),
            Self::Bytes(bytes) => bytes.iter().copied().map(serde_json::Value::from).collect(),
            Self::Json(value) => value.clone(),
        }
    }

    /// Body bytes for a raw (non-multipart) request.
    pub fn to_body(&self) -> Vec<u8> {
        match self {
            Self::Null => Vec::new(),
            Self::Bytes(bytes) => bytes.clone(),
            Self::Number(_) | Self::Json(_) => self.to_json().to_string().into_bytes(),
        }
    }
}

fn float_json(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}
