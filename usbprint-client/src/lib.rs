//! # usbprint-client
//!
//! Application-side client for the USB printer service.
//!
//! Every operation is a straight pass-through: it packages a method name and
//! an ordered argument list into a [`Call`], hands it to an injected
//! [`Bridge`], and resolves with whatever the service answered. Nothing is
//! validated, retried, cached or transformed on this side.
//!
//! ## Example
//!
//! ```ignore
//! use usbprint_client::{MemoryBridge, PrinterClient};
//!
//! let (bridge, host) = MemoryBridge::channel();
//! // hand `host` to the service side, keep the client
//! let client = PrinterClient::new(bridge);
//!
//! client.connect("1155_1002").await?;
//! client.print("1155_1002", "Hello").await?;
//! client.cut_paper("1155_1002").await?;
//! ```

pub mod bridge;
pub mod call;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;

pub use bridge::{Bridge, Outcome, Reply};
pub use call::{Call, Method, SERVICE_NAME};
pub use client::PrinterClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, UnknownMethod};
pub use memory::{BridgeHost, Envelope, MemoryBridge};
