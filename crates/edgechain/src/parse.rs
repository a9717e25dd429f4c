//! Interpreting a Wasm function result by its declared output media type.

use edgerun::host::IMAGE_BYTES;
use edgerun::Runtime;
use edgerun::Value;

use crate::error::Error;
use crate::error::Result;
use crate::media::MediaType;
use crate::payload::Payload;

/// Guest function returning the address of the module's image buffer.
pub const IMAGE_POINTER_FUNCTION: &str = "get_img_ptr";

/// Parses `result` into the value the chain passes on.
///
/// - `application/json`: only a null schema is understood, giving [`Payload::Null`].
/// - `image/jpeg`: the frame is read out of guest memory at [`IMAGE_POINTER_FUNCTION`].
/// - `application/octet-stream`: the result passes through unchanged.
pub fn parse_func_result(
    runtime: &mut Runtime,
    result: Option<Value>,
    media: &MediaType,
    schema: Option<&serde_json::Value>,
) -> Result<Payload> {
    match media {
        MediaType::Json => match schema {
            None | Some(serde_json::Value::Null) => Ok(Payload::Null),
            Some(_) => Err(Error::NotImplemented(
                "parsing JSON results with a schema".to_string(),
            )),
        },
        MediaType::Jpeg => read_image(runtime).map(Payload::Bytes),
        MediaType::OctetStream => Ok(Payload::from_result(result)),
        MediaType::Unsupported(other) => Err(Error::NotImplemented(format!(
            "unsupported result media type {}",
            other
        ))),
    }
}

fn read_image(runtime: &mut Runtime) -> Result<Vec<u8>> {
    let ptr = runtime
        .run_function(IMAGE_POINTER_FUNCTION, &[])
        .map_err(|e| Error::Runtime(format!("Could not locate image: {}", e)))?
        .and_then(|v| v.as_ptr())
        .ok_or_else(|| Error::Runtime(format!("{} returned no pointer", IMAGE_POINTER_FUNCTION)))?;
    runtime
        .read_memory(ptr, IMAGE_BYTES as u32)
        .map_err(|e| Error::Runtime(format!("Could not read image from memory: {}", e)))
}
