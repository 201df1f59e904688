//! libusb backend (feature `usb`)
//!
//! Desktop hosts have no permission prompt: a device is accessible when it
//! can be opened, so `request_permission` only re-checks.
//!
//! Unplug notifications come from libusb hotplug callbacks. Platforms without
//! hotplug support fall back to polling the device list.

use async_trait::async_trait;
use rusb::{Device, DeviceHandle, GlobalContext, Hotplug, HotplugBuilder, UsbContext};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::{
    Direction, EndpointInfo, InterfaceInfo, TransferType, UsbBackend, UsbConnection,
    UsbDeviceInfo,
};
use crate::error::{PrintError, PrintResult};

const DETACH_CAPACITY: usize = 16;
/// Event loop wake-up and polling interval of the detach watcher
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct LibUsbBackend {
    timeout: Duration,
    detached: broadcast::Sender<UsbDeviceInfo>,
    watching: Arc<AtomicBool>,
}

impl Default for LibUsbBackend {
    fn default() -> Self {
        let (detached, _) = broadcast::channel(DETACH_CAPACITY);
        Self {
            timeout: Duration::from_secs(5),
            detached,
            watching: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl LibUsbBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-transfer timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Host-assigned id: bus number in the high byte, address in the low byte
    fn device_id(device: &Device<GlobalContext>) -> u32 {
        (u32::from(device.bus_number()) << 8) | u32::from(device.address())
    }

    fn describe(device: &Device<GlobalContext>) -> PrintResult<UsbDeviceInfo> {
        let desc = device.device_descriptor()?;
        let config = device.config_descriptor(0)?;

        let mut interfaces = Vec::new();
        for interface in config.interfaces() {
            // alternate setting 0 only
            let Some(alt) = interface.descriptors().next() else {
                continue;
            };
            let endpoints = alt
                .endpoint_descriptors()
                .map(|ep| EndpointInfo {
                    address: ep.address(),
                    transfer_type: match ep.transfer_type() {
                        rusb::TransferType::Control => TransferType::Control,
                        rusb::TransferType::Isochronous => TransferType::Isochronous,
                        rusb::TransferType::Bulk => TransferType::Bulk,
                        rusb::TransferType::Interrupt => TransferType::Interrupt,
                    },
                    direction: match ep.direction() {
                        rusb::Direction::In => Direction::In,
                        rusb::Direction::Out => Direction::Out,
                    },
                })
                .collect();
            interfaces.push(InterfaceInfo {
                number: interface.number(),
                class_code: alt.class_code(),
                endpoints,
            });
        }

        Ok(UsbDeviceInfo {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            device_id: Self::device_id(device),
            interfaces,
        })
    }

    /// Identity only; descriptors beyond the device descriptor may be gone
    /// once a device has left
    fn identify(device: &Device<GlobalContext>) -> Option<UsbDeviceInfo> {
        let desc = device.device_descriptor().ok()?;
        Some(UsbDeviceInfo {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            device_id: Self::device_id(device),
            interfaces: Vec::new(),
        })
    }

    fn enumerate() -> PrintResult<Vec<UsbDeviceInfo>> {
        let list = rusb::devices()?;
        let mut devices = Vec::with_capacity(list.len());
        for device in list.iter() {
            match Self::describe(&device) {
                Ok(info) => devices.push(info),
                Err(e) => debug!(
                    bus = device.bus_number(),
                    address = device.address(),
                    error = %e,
                    "Skipping unreadable device"
                ),
            }
        }
        Ok(devices)
    }

    fn find(info: &UsbDeviceInfo) -> PrintResult<Device<GlobalContext>> {
        rusb::devices()?
            .iter()
            .find(|d| {
                Self::device_id(d) == info.device_id
                    && d.device_descriptor()
                        .is_ok_and(|desc| desc.vendor_id() == info.vendor_id)
            })
            .ok_or_else(|| PrintError::Usb(format!("device {} is gone", info.printer_name())))
    }

    fn can_open(info: &UsbDeviceInfo) -> bool {
        Self::find(info)
            .and_then(|d| d.open().map_err(PrintError::from))
            .is_ok()
    }

    /// Start the watcher thread unless one is running
    fn start_watcher(&self) {
        if self.watching.swap(true, Ordering::AcqRel) {
            return;
        }
        let detached = self.detached.clone();
        let watching = self.watching.clone();
        let spawned = std::thread::Builder::new()
            .name("usb-detach".to_string())
            .spawn(move || {
                let result = if rusb::has_hotplug() {
                    watch_hotplug(&detached)
                } else {
                    watch_polling(&detached)
                };
                if let Err(e) = result {
                    warn!(error = %e, "USB detach watcher stopped");
                }
                watching.store(false, Ordering::Release);
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to start USB detach watcher");
            self.watching.store(false, Ordering::Release);
        }
    }
}

/// Runs until every detach receiver is gone
fn watch_hotplug(detached: &broadcast::Sender<UsbDeviceInfo>) -> PrintResult<()> {
    info!("Watching USB detach via hotplug");
    let context = GlobalContext::default();
    let mut builder = HotplugBuilder::new();
    builder.enumerate(false);
    let _registration = builder.register::<GlobalContext, _>(
        context,
        Box::new(DetachCallback {
            detached: detached.clone(),
        }),
    )?;
    while detached.receiver_count() > 0 {
        context.handle_events(Some(WATCH_INTERVAL))?;
    }
    Ok(())
}

/// Same contract as [`watch_hotplug`], diffing the device list instead
fn watch_polling(detached: &broadcast::Sender<UsbDeviceInfo>) -> PrintResult<()> {
    info!("Watching USB detach by polling");
    let snapshot = || -> PrintResult<HashMap<u32, UsbDeviceInfo>> {
        Ok(rusb::devices()?
            .iter()
            .filter_map(|d| LibUsbBackend::identify(&d))
            .map(|info| (info.device_id, info))
            .collect())
    };
    let mut known = snapshot()?;
    while detached.receiver_count() > 0 {
        std::thread::sleep(WATCH_INTERVAL);
        let current = match snapshot() {
            Ok(current) => current,
            Err(e) => {
                debug!(error = %e, "USB enumeration failed, retrying");
                continue;
            }
        };
        for (id, info) in known {
            if !current.contains_key(&id) {
                debug!(device = %info.printer_name(), "USB device left");
                let _ = detached.send(info);
            }
        }
        known = current;
    }
    Ok(())
}

struct DetachCallback {
    detached: broadcast::Sender<UsbDeviceInfo>,
}

impl Hotplug<GlobalContext> for DetachCallback {
    fn device_arrived(&mut self, _device: Device<GlobalContext>) {}

    fn device_left(&mut self, device: Device<GlobalContext>) {
        let Some(info) = LibUsbBackend::identify(&device) else {
            debug!(
                bus = device.bus_number(),
                address = device.address(),
                "Unidentifiable USB device left"
            );
            return;
        };
        debug!(device = %info.printer_name(), "USB device left");
        let _ = self.detached.send(info);
    }
}

#[async_trait]
impl UsbBackend for LibUsbBackend {
    #[instrument(skip(self))]
    async fn devices(&self) -> PrintResult<Vec<UsbDeviceInfo>> {
        tokio::task::spawn_blocking(Self::enumerate)
            .await
            .map_err(|e| PrintError::Usb(format!("Task join failed: {}", e)))?
    }

    async fn has_permission(&self, device: &UsbDeviceInfo) -> bool {
        let device = device.clone();
        tokio::task::spawn_blocking(move || Self::can_open(&device))
            .await
            .unwrap_or(false)
    }

    async fn request_permission(&self, device: &UsbDeviceInfo) -> bool {
        self.has_permission(device).await
    }

    fn open(&self, device: &UsbDeviceInfo) -> PrintResult<Box<dyn UsbConnection>> {
        let mut handle = Self::find(device)?.open()?;
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            warn!(error = %e, "Kernel driver auto-detach unavailable");
        }
        Ok(Box::new(LibUsbConnection {
            handle,
            timeout: self.timeout,
        }))
    }

    fn watch_detach(&self) -> broadcast::Receiver<UsbDeviceInfo> {
        let rx = self.detached.subscribe();
        self.start_watcher();
        rx
    }
}

struct LibUsbConnection {
    handle: DeviceHandle<GlobalContext>,
    timeout: Duration,
}

impl std::fmt::Debug for LibUsbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibUsbConnection")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl UsbConnection for LibUsbConnection {
    fn claim_interface(&mut self, interface: u8) -> PrintResult<()> {
        Ok(self.handle.claim_interface(interface)?)
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> PrintResult<usize> {
        Ok(self
            .handle
            .read_control(request_type, request, value, index, buf, self.timeout)?)
    }

    fn write_bulk(&mut self, endpoint: u8, data: &[u8]) -> PrintResult<usize> {
        Ok(self.handle.write_bulk(endpoint, data, self.timeout)?)
    }
}
