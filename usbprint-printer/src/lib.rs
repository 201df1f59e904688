//! # usbprint-printer
//!
//! Host side of the USB print bridge: answers `PrinterService` calls by
//! driving ESC/POS thermal printers over USB.
//!
//! ## Scope
//!
//! - Printer registry and connection lifecycle (`connect`, `disconnect`,
//!   permission handling, device detach)
//! - Paper status probing and paper cutting
//! - Text encoding (GBK by default) and raw command pass-through
//! - USB access through a pluggable backend (in-memory, or libusb with the
//!   `usb` feature)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use usbprint_client::{MemoryBridge, PrinterClient};
//! use usbprint_printer::{LibUsbBackend, PrinterService, ServiceConfig, ServiceHost};
//!
//! let service = PrinterService::new(Arc::new(LibUsbBackend::new()), ServiceConfig::from_env());
//! let (bridge, host) = MemoryBridge::channel();
//! ServiceHost::new(Arc::new(service)).spawn(host);
//!
//! let client = PrinterClient::new(bridge);
//! let printers = client.get_connected_printers().await?;
//! ```

mod config;
mod encoding;
mod error;
mod escpos;
mod host;
pub mod logger;
mod printer;
mod service;
pub mod usb;

// Re-exports
pub use config::ServiceConfig;
pub use encoding::{encode_text, resolve_charset};
pub use error::{PrintError, PrintResult};
pub use escpos::{CRLF, CutMode, EscPosBuilder};
pub use host::{ServiceHost, answer};
pub use printer::UsbPrinter;
pub use service::{PrinterEntry, PrinterEvent, PrinterService};
pub use usb::{MemoryUsbBackend, UsbBackend, UsbConnection, UsbDeviceInfo};

#[cfg(feature = "usb")]
pub use usb::libusb::LibUsbBackend;
