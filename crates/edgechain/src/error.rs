use crate::client;
use crate::description;

#[derive(Debug)]
pub enum Error {
    /// The deployment has no instruction left at the current counter.
    ProgramCounterExceeded { counter: usize, len: usize },
    /// A method or media type combination that is not supported.
    NotImplemented(String),
    /// A chained hop answered with something other than 200.
    RequestFailed { status: u16, url: String },
    /// The local runtime could not produce the value to forward.
    Runtime(String),
    Description(description::Error),
    Client(client::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProgramCounterExceeded { counter, len } => write!(
                f,
                "Program counter {} exceeds deployment of {} instructions",
                counter, len
            ),
            Self::NotImplemented(what) => write!(f, "Not implemented: {}", what),
            Self::RequestFailed { status, url } => {
                write!(f, "Request to {} failed with status {}", url, status)
            }
            Self::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            Self::Description(e) => write!(f, "Bad target description: {}", e),
            Self::Client(e) => write!(f, "Client error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Description(e) => Some(e),
            Self::Client(e) => Some(e),
            _ => None,
        }
    }
}

impl From<description::Error> for Error {
    fn from(e: description::Error) -> Self {
        Self::Description(e)
    }
}

impl From<client::Error> for Error {
    fn from(e: client::Error) -> Self {
        Self::Client(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
