//! Client configuration

use crate::call::SERVICE_NAME;

/// Client configuration
///
/// # Environment
///
/// | Variable | Default |
/// |----------|---------|
/// | USBPRINT_SERVICE_NAME | PrinterService |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Service name every call is addressed to
    pub service_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("USBPRINT_SERVICE_NAME")
                .unwrap_or_else(|_| SERVICE_NAME.to_string()),
        }
    }

    /// Set the service name
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }
}
