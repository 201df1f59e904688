//! In-memory USB backend
//!
//! Simulated devices with scripted permission answers and paper status.
//! Everything written to a device is recorded for inspection.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use super::{
    Direction, EndpointInfo, InterfaceInfo, TransferType, USB_CLASS_PRINTER, UsbBackend,
    UsbConnection, UsbDeviceInfo,
};
use crate::error::{PrintError, PrintResult};

/// Build a typical thermal printer: one printer-class interface with a bulk
/// OUT (0x01) and a bulk IN (0x81) endpoint
pub fn thermal_printer(vendor_id: u16, device_id: u32) -> UsbDeviceInfo {
    UsbDeviceInfo {
        vendor_id,
        product_id: 0x5720,
        device_id,
        interfaces: vec![InterfaceInfo {
            number: 0,
            class_code: USB_CLASS_PRINTER,
            endpoints: vec![
                EndpointInfo {
                    address: 0x01,
                    transfer_type: TransferType::Bulk,
                    direction: Direction::Out,
                },
                EndpointInfo {
                    address: 0x81,
                    transfer_type: TransferType::Bulk,
                    direction: Direction::In,
                },
            ],
        }],
    }
}

#[derive(Debug, Default)]
struct State {
    devices: Vec<UsbDeviceInfo>,
    permitted: HashSet<u32>,
    grant_on_request: bool,
    permission_requests: usize,
    status: HashMap<u32, u8>,
    failing_control: HashSet<u32>,
    writes: HashMap<u32, Vec<(u8, Vec<u8>)>>,
    opened: HashMap<u32, usize>,
}

const DETACH_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct MemoryUsbBackend {
    state: Arc<Mutex<State>>,
    detached: broadcast::Sender<UsbDeviceInfo>,
}

impl Default for MemoryUsbBackend {
    fn default() -> Self {
        let (detached, _) = broadcast::channel(DETACH_CAPACITY);
        Self {
            state: Arc::default(),
            detached,
        }
    }
}

impl MemoryUsbBackend {
    /// Empty bus. Permission requests are granted unless told otherwise.
    pub fn new() -> Self {
        let backend = Self::default();
        backend.lock().grant_on_request = true;
        backend
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn attach(&self, device: UsbDeviceInfo) {
        self.lock().devices.push(device);
    }

    /// Unplug a device and notify detach watchers
    pub fn detach(&self, device_id: u32) -> Option<UsbDeviceInfo> {
        let device = {
            let mut state = self.lock();
            let idx = state.devices.iter().position(|d| d.device_id == device_id)?;
            state.devices.remove(idx)
        };
        // nobody watching is fine
        let _ = self.detached.send(device.clone());
        Some(device)
    }

    /// Grant access up front, no request needed
    pub fn grant(&self, device_id: u32) {
        self.lock().permitted.insert(device_id);
    }

    /// Withdraw access previously granted
    pub fn revoke(&self, device_id: u32) {
        self.lock().permitted.remove(&device_id);
    }

    /// Answer to give future permission requests
    pub fn set_grant_on_request(&self, grant: bool) {
        self.lock().grant_on_request = grant;
    }

    pub fn permission_requests(&self) -> usize {
        self.lock().permission_requests
    }

    /// First status byte the device reports
    pub fn set_status(&self, device_id: u32, status: u8) {
        self.lock().status.insert(device_id, status);
    }

    pub fn fail_control_transfers(&self, device_id: u32, fail: bool) {
        let mut state = self.lock();
        if fail {
            state.failing_control.insert(device_id);
        } else {
            state.failing_control.remove(&device_id);
        }
    }

    /// Every bulk transfer sent to the device, with its endpoint
    pub fn writes(&self, device_id: u32) -> Vec<(u8, Vec<u8>)> {
        self.lock().writes.get(&device_id).cloned().unwrap_or_default()
    }

    /// All bytes sent to the device, concatenated
    pub fn written(&self, device_id: u32) -> Vec<u8> {
        self.writes(device_id)
            .into_iter()
            .flat_map(|(_, data)| data)
            .collect()
    }

    /// How many times the device was opened
    pub fn open_count(&self, device_id: u32) -> usize {
        self.lock().opened.get(&device_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl UsbBackend for MemoryUsbBackend {
    async fn devices(&self) -> PrintResult<Vec<UsbDeviceInfo>> {
        Ok(self.lock().devices.clone())
    }

    async fn has_permission(&self, device: &UsbDeviceInfo) -> bool {
        self.lock().permitted.contains(&device.device_id)
    }

    async fn request_permission(&self, device: &UsbDeviceInfo) -> bool {
        let mut state = self.lock();
        state.permission_requests += 1;
        if state.grant_on_request {
            state.permitted.insert(device.device_id);
        }
        state.grant_on_request
    }

    fn open(&self, device: &UsbDeviceInfo) -> PrintResult<Box<dyn UsbConnection>> {
        let mut state = self.lock();
        if !state.devices.iter().any(|d| d.device_id == device.device_id) {
            return Err(PrintError::Usb(format!(
                "device {} is not attached",
                device.printer_name()
            )));
        }
        *state.opened.entry(device.device_id).or_default() += 1;
        Ok(Box::new(MemoryConnection {
            device_id: device.device_id,
            claimed: HashSet::new(),
            state: self.state.clone(),
        }))
    }

    fn watch_detach(&self) -> broadcast::Receiver<UsbDeviceInfo> {
        self.detached.subscribe()
    }
}

#[derive(Debug)]
struct MemoryConnection {
    device_id: u32,
    claimed: HashSet<u8>,
    state: Arc<Mutex<State>>,
}

impl MemoryConnection {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_attached(&self, state: &State) -> PrintResult<()> {
        if state.devices.iter().any(|d| d.device_id == self.device_id) {
            Ok(())
        } else {
            Err(PrintError::Usb("no such device".to_string()))
        }
    }
}

impl UsbConnection for MemoryConnection {
    fn claim_interface(&mut self, interface: u8) -> PrintResult<()> {
        self.claimed.insert(interface);
        Ok(())
    }

    fn read_control(
        &mut self,
        _request_type: u8,
        _request: u8,
        _value: u16,
        _index: u16,
        buf: &mut [u8],
    ) -> PrintResult<usize> {
        let state = self.lock();
        self.ensure_attached(&state)?;
        if state.failing_control.contains(&self.device_id) {
            return Err(PrintError::Usb("control transfer failed".to_string()));
        }
        let status = state.status.get(&self.device_id).copied().unwrap_or(0x12);
        match buf.first_mut() {
            Some(first) => {
                *first = status;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn write_bulk(&mut self, endpoint: u8, data: &[u8]) -> PrintResult<usize> {
        if self.claimed.is_empty() {
            return Err(PrintError::Usb("interface not claimed".to_string()));
        }
        let mut state = self.lock();
        self.ensure_attached(&state)?;
        state
            .writes
            .entry(self.device_id)
            .or_default()
            .push((endpoint, data.to_vec()));
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detach_notifies_watchers() {
        let usb = MemoryUsbBackend::new();
        usb.attach(thermal_printer(1155, 1002));
        let mut detached = usb.watch_detach();

        assert!(usb.detach(1002).is_some());
        assert!(usb.detach(1002).is_none());

        let device = detached.recv().await.unwrap();
        assert_eq!(device.printer_name(), "1155_1002");
        assert!(detached.try_recv().is_err());
        assert!(usb.devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_requires_attached_device() {
        let usb = MemoryUsbBackend::new();
        let device = thermal_printer(1155, 1002);
        assert!(usb.open(&device).is_err());

        usb.attach(device.clone());
        assert!(usb.open(&device).is_ok());
        assert_eq!(usb.open_count(1002), 1);
    }
}
