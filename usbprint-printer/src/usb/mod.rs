//! USB device access
//!
//! The service never talks to libusb directly. It goes through
//! [`UsbBackend`] / [`UsbConnection`] so the same code drives real hardware
//! (`libusb` backend, feature `usb`) and the in-memory backend used in tests.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::PrintResult;

pub mod memory;
#[cfg(feature = "usb")]
pub mod libusb;

pub use memory::MemoryUsbBackend;

/// USB class code for printers
pub const USB_CLASS_PRINTER: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub transfer_type: TransferType,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub class_code: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// Snapshot of an attached USB device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Host-assigned id, unique while the device stays attached
    pub device_id: u32,
    pub interfaces: Vec<InterfaceInfo>,
}

impl UsbDeviceInfo {
    /// Printer name: `<vendorId>_<deviceId>`, both decimal
    pub fn printer_name(&self) -> String {
        format!("{}_{}", self.vendor_id, self.device_id)
    }

    /// Only the first interface decides whether a device is a printer
    pub fn is_printer(&self) -> bool {
        self.interfaces
            .first()
            .is_some_and(|iface| iface.class_code == USB_CLASS_PRINTER)
    }

    /// Last bulk endpoint on interface 0 that is not an IN endpoint
    pub fn bulk_out_endpoint(&self) -> Option<u8> {
        self.interfaces
            .first()?
            .endpoints
            .iter()
            .rev()
            .find(|ep| ep.transfer_type == TransferType::Bulk && ep.direction != Direction::In)
            .map(|ep| ep.address)
    }
}

/// Split a printer name back into `(vendor_id, device_id)`
pub fn parse_printer_name(name: &str) -> Option<(u16, u32)> {
    let mut parts = name.split('_');
    let vendor = parts.next()?.parse().ok()?;
    let device = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((vendor, device))
}

/// Source of USB devices and connections
#[async_trait]
pub trait UsbBackend: Send + Sync + std::fmt::Debug {
    /// Enumerate attached devices
    async fn devices(&self) -> PrintResult<Vec<UsbDeviceInfo>>;

    async fn has_permission(&self, device: &UsbDeviceInfo) -> bool;

    /// Ask for access to the device. Resolves once the answer is known.
    async fn request_permission(&self, device: &UsbDeviceInfo) -> bool;

    /// Open the device. Blocks; the connection is closed when dropped.
    fn open(&self, device: &UsbDeviceInfo) -> PrintResult<Box<dyn UsbConnection>>;

    /// Devices unplugged from now on. Only `vendor_id` and `device_id` are
    /// guaranteed to be filled in.
    fn watch_detach(&self) -> broadcast::Receiver<UsbDeviceInfo>;
}

/// An open device handle. Calls block until the transfer completes.
pub trait UsbConnection: Send + std::fmt::Debug {
    fn claim_interface(&mut self, interface: u8) -> PrintResult<()>;

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> PrintResult<usize>;

    fn write_bulk(&mut self, endpoint: u8, data: &[u8]) -> PrintResult<usize>;
}
