use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure: DNS, refused connection, timeout.
    #[error("connection error: {0}")]
    Connection(#[from] reqwest::Error),

    /// The device answered with a non-2xx status unrelated to authorization.
    #[error("unexpected HTTP status {status} from {endpoint}")]
    Status { status: u16, endpoint: &'static str },

    /// The login exchange completed but produced no session.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A fetch failed after the permitted re-authentication, or the reply was unusable.
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("invalid value for {identifier}: {reason}")]
    InvalidValue { identifier: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by setup flows to pick a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Authentication,
    Fetch,
    InvalidValue,
    Config,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) | Error::Status { .. } => ErrorKind::Connection,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Fetch(_) => ErrorKind::Fetch,
            Error::InvalidValue { .. } => ErrorKind::InvalidValue,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Connection(e) if e.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
