//! Service configuration

use usbprint_client::SERVICE_NAME;

/// Printer service configuration
///
/// # Environment
///
/// | Variable | Default | |
/// |----------|---------|---|
/// | USBPRINT_SERVICE_NAME | PrinterService | service name the host answers to |
/// | USBPRINT_CHARSET | GBK | encoding label for `print` text |
/// | USBPRINT_PAPER_OUT_STATUS | 56 (0x38) | status byte meaning paper out |
/// | USBPRINT_CUT_FEED_LINES | 0 | lines fed before `cutPaper` cuts |
/// | USBPRINT_EVENT_CAPACITY | 64 | printer event channel capacity |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub service_name: String,
    /// Any label `encoding_rs` knows; unknown labels print UTF-8
    pub charset: String,
    pub paper_out_status: u8,
    pub cut_feed_lines: u8,
    pub event_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME.to_string(),
            charset: "GBK".to_string(),
            paper_out_status: 0x38,
            cut_feed_lines: 0,
            event_capacity: 64,
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: std::env::var("USBPRINT_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            charset: std::env::var("USBPRINT_CHARSET").unwrap_or(defaults.charset),
            paper_out_status: std::env::var("USBPRINT_PAPER_OUT_STATUS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.paper_out_status),
            cut_feed_lines: std::env::var("USBPRINT_CUT_FEED_LINES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cut_feed_lines),
            event_capacity: std::env::var("USBPRINT_EVENT_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.event_capacity),
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn with_paper_out_status(mut self, status: u8) -> Self {
        self.paper_out_status = status;
        self
    }

    pub fn with_cut_feed_lines(mut self, lines: u8) -> Self {
        self.cut_feed_lines = lines;
        self
    }

    /// Capacity of the printer event channel (minimum 1)
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
