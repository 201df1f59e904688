//! Client error types

use serde_json::Value;
use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service answered with a failure value (forwarded verbatim)
    #[error("Rejected by service: {0}")]
    Rejected(Value),

    /// The bridge has no host end any more
    #[error("Bridge closed")]
    BridgeClosed,

    /// The host dropped the call without answering
    #[error("No reply for call")]
    NoReply,
}

impl ClientError {
    /// The opaque failure value, if the service produced one
    pub fn rejection(&self) -> Option<&Value> {
        match self {
            ClientError::Rejected(value) => Some(value),
            _ => None,
        }
    }
}

/// Method name that is not one of the printer service operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown method: {0}")]
pub struct UnknownMethod(pub String);

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
