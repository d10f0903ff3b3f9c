//! Error taxonomy shared by the codecs and the UDP adapter.
//!
//! Errors are classified by what the caller should do with them, not by where
//! they were raised:
//! - **Structural**: malformed input. Drop the offending message or record.
//! - **Behavioral**: the protocol was followed but the outcome is unexpected.
//! - **Operational**: the environment failed (socket, queue).
//! - **NotSupported**: the capability is intentionally absent.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("structural error: {0}")]
    Structural(String),

    #[error("behavioral error: {0}")]
    Behavioral(String),

    #[error("operational error: {0}")]
    Operational(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    Behavioral,
    Operational,
    NotSupported,
}

impl Error {
    pub fn structural(msg: impl Into<String>) -> Self {
        Error::Structural(msg.into())
    }

    pub fn behavioral(msg: impl Into<String>) -> Self {
        Error::Behavioral(msg.into())
    }

    pub fn operational(msg: impl Into<String>) -> Self {
        Error::Operational(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Error::NotSupported(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Structural(_) | Error::Json(_) => ErrorKind::Structural,
            Error::Behavioral(_) => ErrorKind::Behavioral,
            Error::Operational(_) | Error::Io(_) => ErrorKind::Operational,
            Error::NotSupported(_) => ErrorKind::NotSupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::structural("bad").kind(), ErrorKind::Structural);
        assert_eq!(Error::behavioral("twice").kind(), ErrorKind::Behavioral);
        assert_eq!(Error::not_supported("send").kind(), ErrorKind::NotSupported);

        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken");
        assert_eq!(Error::from(io).kind(), ErrorKind::Operational);

        let json = serde_json::from_str::<u32>("nope").unwrap_err();
        assert_eq!(Error::from(json).kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_display_carries_context() {
        let err = Error::structural("wrong version 0x07");
        assert_eq!(err.to_string(), "structural error: wrong version 0x07");
    }
}
