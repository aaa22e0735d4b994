use std::{fmt, io};

use tokio::time::error::Elapsed;

#[derive(Debug)]
pub enum Error {
    /// The socket failed: refused, reset, or closed early.
    Io(io::Error),
    /// The remote didn't answer within the configured timeout.
    TimedOut,
    /// A frame couldn't be decoded as JSON.
    Json(serde_json::Error),
    /// A frame announced a length beyond the configured ceiling.
    FrameTooLarge { len: u32, max: u32 },
    /// The remote replied with a well-formed message of the wrong kind.
    UnexpectedResponse(String),
    /// The remote replied with `{"error": ...}`.
    Remote(String),
    /// A request whose `type` this service doesn't implement.
    UnknownRequest(String),
    /// A request that decoded as JSON but isn't shaped like one.
    BadRequest(String),
    MalformedRecord(String),
    InvalidAddress(String),
    EmptyChain,
    /// The node's execution context went away before it could answer.
    NodeExited,
}

impl Error {
    /// True when the failure means the node couldn't be reached at all,
    /// rather than it answering with something we didn't like.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Io(_) | Error::TimedOut | Error::NodeExited)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "connection failed: {}", e),
            Error::TimedOut => write!(f, "timed out waiting for node"),
            Error::Json(e) => write!(f, "undecodable message: {}", e),
            Error::FrameTooLarge { len, max } => {
                write!(f, "frame of {} bytes exceeds limit of {}", len, max)
            }
            Error::UnexpectedResponse(what) => {
                write!(f, "unexpected response: {}", what)
            }
            Error::Remote(msg) => write!(f, "node replied with error: {}", msg),
            Error::UnknownRequest(kind) => {
                write!(f, "unknown request type: {}", kind)
            }
            Error::BadRequest(why) => write!(f, "{}", why),
            Error::MalformedRecord(why) => write!(f, "malformed record: {}", why),
            Error::InvalidAddress(addr) => {
                write!(f, "invalid address {:?}, expected host:port", addr)
            }
            Error::EmptyChain => write!(f, "a chain needs at least one value"),
            Error::NodeExited => write!(f, "node exited"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Self::TimedOut
    }
}
