//! Error types for the printer service
//!
//! `Display` output is what travels back over the bridge as the failure
//! value, so the messages are part of the wire contract.

use thiserror::Error;

/// Printer error types
#[derive(Debug, Error)]
pub enum PrintError {
    /// No registered printer (or no attached device) under that name
    #[error("No Printer of specified name is connected")]
    NotConnected,

    /// Paper status probe reported paper out
    #[error("Paper roll is empty")]
    PaperEmpty,

    /// Access to the device was refused
    #[error("Permission denied")]
    PermissionDenied,

    /// Missing or mistyped call argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Method name the service does not implement
    #[error("Invalid action: {0}")]
    UnknownAction(String),

    /// Call addressed to another service
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// USB transfer or device error
    #[error("USB error: {0}")]
    Usb(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for printer operations
pub type PrintResult<T> = Result<T, PrintError>;

#[cfg(feature = "usb")]
impl From<rusb::Error> for PrintError {
    fn from(e: rusb::Error) -> Self {
        PrintError::Usb(e.to_string())
    }
}
