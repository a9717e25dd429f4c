//! Outbound requests to the next hop.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use reqwest::header::CONTENT_TYPE;
use tempfile::TempPath;
use tracing::debug;

use edgerun::host::IMAGE_BYTES;
use edgerun::host::IMAGE_SHAPE;

use crate::media::MediaType;
use crate::payload::Payload;

/// Timeout for every chained request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Multipart field carrying an image.
pub const IMAGE_FIELD: &str = "data";
pub const IMAGE_FILE_NAME: &str = "temp_image.jpg";

#[derive(Debug)]
pub enum Error {
    Http(String),
    Io(std::io::Error),
    Encode(String),
    /// The media type has no request encoding.
    Unsupported(MediaType),
    /// An image payload does not have the fixed frame shape.
    ImageShape { expected: usize, actual: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(msg) => write!(f, "HTTP error: {}", msg),
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Encode(msg) => write!(f, "Encode error: {}", msg),
            Self::Unsupported(media) => write!(f, "Cannot encode a request as {}", media),
            Self::ImageShape { expected, actual } => {
                write!(f, "Image has {} bytes, expected {}", actual, expected)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The body of a chained POST.
#[derive(Debug)]
pub enum RequestBody {
    Raw {
        content_type: String,
        bytes: Vec<u8>,
    },
    /// A single file field. The file is removed when the body is dropped.
    Multipart {
        field: String,
        file_name: String,
        mime: String,
        path: TempPath,
    },
}

/// What a hop answered.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn post(&self, url: &str, body: RequestBody) -> Result<Reply>;
}

/// Builds the request body for `payload` sent as `media`.
pub fn build_request(media: &MediaType, payload: &Payload) -> Result<RequestBody> {
    match media {
        MediaType::Json | MediaType::OctetStream => Ok(RequestBody::Raw {
            content_type: media.to_string(),
            bytes: payload.to_body(),
        }),
        MediaType::Jpeg => {
            let Payload::Bytes(pixels) = payload else {
                return Err(Error::Encode(format!("expected raw image bytes, got {:?}", payload)));
            };
            Ok(RequestBody::Multipart {
                field: IMAGE_FIELD.to_string(),
                file_name: IMAGE_FILE_NAME.to_string(),
                mime: media.to_string(),
                path: encode_jpeg(pixels)?,
            })
        }
        MediaType::Unsupported(_) => Err(Error::Unsupported(media.clone())),
    }
}

/// Encodes a flattened RGB frame of [`IMAGE_SHAPE`] into a temporary JPEG file.
pub fn encode_jpeg(pixels: &[u8]) -> Result<TempPath> {
    if pixels.len() != IMAGE_BYTES {
        return Err(Error::ImageShape {
            expected: IMAGE_BYTES,
            actual: pixels.len(),
        });
    }
    let [height, width, _] = IMAGE_SHAPE;

    let mut file = tempfile::Builder::new().suffix(".jpg").tempfile()?;
    JpegEncoder::new(&mut file)
        .encode(pixels, width as u32, height as u32, ExtendedColorType::Rgb8)
        .map_err(|e| Error::Encode(e.to_string()))?;
    file.flush()?;
    Ok(file.into_temp_path())
}

/// reqwest-backed client.
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChainClient for HttpClient {
    async fn post(&self, url: &str, body: RequestBody) -> Result<Reply> {
        let request = match body {
            RequestBody::Raw { content_type, bytes } => {
                self.client.post(url).header(CONTENT_TYPE, content_type).body(bytes)
            }
            RequestBody::Multipart { field, file_name, mime, path } => {
                let bytes = tokio::fs::read(&path).await?;
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(&mime)?;
                self.client
                    .post(url)
                    .multipart(reqwest::multipart::Form::new().part(field, part))
            }
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        debug!(%url, status, length = body.len(), "chained request answered");

        Ok(Reply {
            status,
            content_type,
            body,
        })
    }
}
