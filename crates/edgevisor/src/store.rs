//! # Storage
//!
//! Uploaded modules and parameter files land in two flat directories. Names
//! come from clients, so they are reduced to a safe basename before use.

use std::path::Path;
use std::path::PathBuf;

use tracing::info;

pub const MODULE_EXTENSION: &str = "wasm";
pub const PARAMS_EXTENSION: &str = "json";

#[derive(Debug)]
pub enum Error {
    InvalidName(String),
    Extension { file_name: String, expected: &'static str },
    Io { path: PathBuf, source: std::io::Error },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "Invalid file name: {:?}", name),
            Self::Extension { file_name, expected } => {
                write!(f, "File '{}' is not a .{} file", file_name, expected)
            }
            Self::Io { path, source } => write!(f, "Cannot write {}: {}", path.display(), source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reduces a client-supplied file name to a safe basename.
pub fn sanitize(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(cleaned.to_string())
}

fn has_extension(file_name: &str, expected: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(expected))
}

#[derive(Clone, Debug)]
pub struct Storage {
    module_dir: PathBuf,
    params_dir: PathBuf,
}

impl Storage {
    pub fn new(module_dir: impl Into<PathBuf>, params_dir: impl Into<PathBuf>) -> Self {
        Self {
            module_dir: module_dir.into(),
            params_dir: params_dir.into(),
        }
    }

    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    pub fn params_dir(&self) -> &Path {
        &self.params_dir
    }

    /// Saves a `.wasm` upload. Returns where it was written.
    pub async fn save_module(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        save(&self.module_dir, file_name, MODULE_EXTENSION, bytes).await
    }

    /// Saves a `.json` upload. Returns where it was written.
    pub async fn save_params(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        save(&self.params_dir, file_name, PARAMS_EXTENSION, bytes).await
    }
}

async fn save(dir: &Path, file_name: &str, extension: &'static str, bytes: &[u8]) -> Result<PathBuf> {
    let safe = sanitize(file_name)?;
    if !has_extension(&safe, extension) {
        return Err(Error::Extension {
            file_name: safe,
            expected: extension,
        });
    }
    let io_error = |source| Error::Io {
        path: dir.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(io_error)?;
    let path = dir.join(&safe);
    tokio::fs::write(&path, bytes).await.map_err(|source| Error::Io {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), length = bytes.len(), "upload saved");
    Ok(path)
}
