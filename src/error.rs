use std::fmt;
use std::io;

/// Errors produced by the training and inference core.
#[derive(Debug)]
pub enum Error {
    /// A caller passed an argument outside the accepted domain.
    InvalidArgument(String),

    /// The training configuration can't produce a usable model.
    InvalidConfig(String),

    /// Reading or writing a corpus, model, or vector file failed.
    Io(io::Error),

    /// A model or vector file could not be encoded or decoded.
    Format(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Format(msg) => write!(f, "bad file format: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(err) => Error::Io(err),
            other => Error::Format(other.to_string()),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
