//! Printer service
//!
//! Owns the registry of connected printers and implements the seven bridge
//! operations on top of the USB backend.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, instrument, warn};
use usbprint_client::Method;

use crate::config::ServiceConfig;
use crate::error::{PrintError, PrintResult};
use crate::printer::UsbPrinter;
use crate::usb::{UsbBackend, UsbDeviceInfo, parse_printer_name};

/// Printer lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterEvent {
    Connected(String),
    Disconnected(String),
    /// Device unplugged while registered
    Detached(String),
    PermissionDenied(String),
}

/// One entry of `getConnectedPrinters`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterEntry {
    #[serde(rename = "printername")]
    pub printer_name: String,
    pub device_id: u32,
    pub vendor_id: u16,
}

impl From<&UsbDeviceInfo> for PrinterEntry {
    fn from(device: &UsbDeviceInfo) -> Self {
        Self {
            printer_name: device.printer_name(),
            device_id: device.device_id,
            vendor_id: device.vendor_id,
        }
    }
}

#[derive(Debug)]
pub struct PrinterService {
    backend: Arc<dyn UsbBackend>,
    config: ServiceConfig,
    printers: DashMap<String, Arc<UsbPrinter>>,
    events: broadcast::Sender<PrinterEvent>,
    /// Serializes connect/permission handling
    connecting: Mutex<()>,
}

impl PrinterService {
    pub fn new(backend: Arc<dyn UsbBackend>, config: ServiceConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        info!(service = %config.service_name, charset = %config.charset, "Initializing printer service");
        Self {
            backend,
            config,
            printers: DashMap::new(),
            events,
            connecting: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Subscribe to printer lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: PrinterEvent) {
        if let Err(e) = self.events.send(event) {
            debug!("No subscribers for printer event: {}", e);
        }
    }

    /// Names of the printers currently registered
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.printers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Registered printer by name
    pub fn printer(&self, name: &str) -> PrintResult<Arc<UsbPrinter>> {
        self.printers
            .get(name)
            .map(|p| p.value().clone())
            .ok_or(PrintError::NotConnected)
    }

    /// Route a bridge call by method name
    #[instrument(skip(self, args), fields(args = args.len()))]
    pub async fn execute(&self, method: &str, args: &[Value]) -> PrintResult<Value> {
        let method: Method = method
            .parse()
            .map_err(|_| PrintError::UnknownAction(method.to_string()))?;

        match method {
            Method::GetConnectedPrinters => {
                Ok(serde_json::to_value(self.get_connected_printers().await?)?)
            }
            Method::Connect => {
                self.connect(string_arg(args, 0)?).await?;
                Ok(Value::from("Connected"))
            }
            Method::Disconnect => {
                self.disconnect(string_arg(args, 0)?).await?;
                Ok(Value::from("DisConnected"))
            }
            Method::Print => {
                self.print(string_arg(args, 0)?, string_arg(args, 1)?).await?;
                Ok(Value::from("Printed"))
            }
            Method::SendCommand => {
                let name = string_arg(args, 0)?;
                let command = command_bytes(args.get(1))?;
                self.send_command(name, command).await?;
                Ok(Value::from("Send"))
            }
            Method::IsPaperAvailable => {
                let available = self.is_paper_available(string_arg(args, 0)?).await?;
                Ok(Value::from(available.to_string()))
            }
            Method::CutPaper => {
                self.cut_paper(string_arg(args, 0)?).await?;
                Ok(Value::from("true"))
            }
        }
    }

    /// Attached devices whose first interface is printer class
    pub async fn get_connected_printers(&self) -> PrintResult<Vec<PrinterEntry>> {
        let devices = self.backend.devices().await?;
        debug!("Found: {} devices", devices.len());

        let printers: Vec<PrinterEntry> = devices
            .iter()
            .filter(|d| d.is_printer())
            .map(PrinterEntry::from)
            .collect();
        if printers.is_empty() {
            debug!("No printers identified");
        }
        Ok(printers)
    }

    async fn find_device(&self, name: &str) -> PrintResult<Option<UsbDeviceInfo>> {
        let Some((vendor_id, device_id)) = parse_printer_name(name) else {
            return Ok(None);
        };
        Ok(self
            .backend
            .devices()
            .await?
            .into_iter()
            .find(|d| d.vendor_id == vendor_id && d.device_id == device_id))
    }

    fn register(&self, device: UsbDeviceInfo) {
        let printer = Arc::new(UsbPrinter::new(
            device,
            self.backend.clone(),
            self.config.paper_out_status,
        ));
        printer.mark_connected();
        let name = printer.name().to_string();
        self.printers.insert(name.clone(), printer);
        self.publish(PrinterEvent::Connected(name));
    }

    /// Connect to a printer, asking for device access when needed
    #[instrument(skip(self))]
    pub async fn connect(&self, name: &str) -> PrintResult<()> {
        let _guard = self.connecting.lock().await;

        let device = self.find_device(name).await?.ok_or(PrintError::NotConnected)?;
        let name = device.printer_name();

        // a registered printer already holds access; a transient access
        // failure must not tear it down
        if self.printers.contains_key(&name) {
            debug!("Already got permission for {}, returning Connected", name);
            return Ok(());
        }

        if self.backend.has_permission(&device).await {
            self.register(device);
            return Ok(());
        }

        info!(device_id = device.device_id, "Requesting permission for the device");
        if self.backend.request_permission(&device).await {
            info!("Got permission for USB printer: {}", name);
            self.register(device);
            Ok(())
        } else {
            warn!("Permission denied for USB printer: {}", name);
            self.publish(PrinterEvent::PermissionDenied(name));
            Err(PrintError::PermissionDenied)
        }
    }

    #[instrument(skip(self))]
    pub async fn disconnect(&self, name: &str) -> PrintResult<()> {
        let (_, printer) = self.printers.remove(name).ok_or(PrintError::NotConnected)?;
        printer.close().await;
        info!("Printer disconnected");
        self.publish(PrinterEvent::Disconnected(name.to_string()));
        Ok(())
    }

    /// Print a line of text after checking for paper
    #[instrument(skip(self, msg), fields(len = msg.len()))]
    pub async fn print(&self, name: &str, msg: &str) -> PrintResult<()> {
        let printer = self.printer(name)?;
        if !printer.is_paper_available().await {
            warn!(
                "Paper roll is empty in printer {}. Please place some paper before printing any data.",
                name
            );
            return Err(PrintError::PaperEmpty);
        }
        printer.send_message(msg, &self.config.charset).await
    }

    pub async fn send_command(&self, name: &str, command: Vec<u8>) -> PrintResult<()> {
        self.printer(name)?.send_bytes(command).await
    }

    pub async fn is_paper_available(&self, name: &str) -> PrintResult<bool> {
        Ok(self.printer(name)?.is_paper_available().await)
    }

    pub async fn cut_paper(&self, name: &str) -> PrintResult<()> {
        self.printer(name)?
            .cut_paper(self.config.cut_feed_lines)
            .await
    }

    /// Unplug notifications from the USB backend
    pub fn watch_detach(&self) -> broadcast::Receiver<UsbDeviceInfo> {
        self.backend.watch_detach()
    }

    /// Forget a device that was unplugged. Returns whether it was registered.
    #[instrument(skip(self, device), fields(printer = %device.printer_name()))]
    pub async fn handle_detach(&self, device: &UsbDeviceInfo) -> bool {
        let name = device.printer_name();
        let Some((_, printer)) = self.printers.remove(&name) else {
            return false;
        };
        printer.close().await;
        warn!("Printer {} got disconnected", name);
        self.publish(PrinterEvent::Detached(name));
        true
    }

    /// Detach every registered printer whose device is gone. Returns how
    /// many were dropped.
    pub async fn prune_detached(&self) -> PrintResult<usize> {
        let attached = self.backend.devices().await?;
        let gone: Vec<UsbDeviceInfo> = self
            .printers
            .iter()
            .map(|p| p.value().device().clone())
            .filter(|d| {
                !attached
                    .iter()
                    .any(|a| a.vendor_id == d.vendor_id && a.device_id == d.device_id)
            })
            .collect();

        let mut dropped = 0;
        for device in gone {
            if self.handle_detach(&device).await {
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    /// Close and forget every registered printer
    pub async fn shutdown(&self) {
        let names = self.registered();
        for name in names {
            if let Some((_, printer)) = self.printers.remove(&name) {
                printer.close().await;
            }
        }
        info!("Printer service shut down");
    }
}

fn string_arg(args: &[Value], index: usize) -> PrintResult<&str> {
    args.get(index).and_then(Value::as_str).ok_or_else(|| {
        PrintError::InvalidArgument(format!("expected a string at position {}", index))
    })
}

/// Command payload: a string (sent as its UTF-8 bytes) or an array of bytes
fn command_bytes(value: Option<&Value>) -> PrintResult<Vec<u8>> {
    match value {
        Some(Value::String(s)) => Ok(s.as_bytes().to_vec()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| {
                        PrintError::InvalidArgument("command bytes must be 0..=255".to_string())
                    })
            })
            .collect(),
        _ => Err(PrintError::InvalidArgument(
            "expected a command string or byte array at position 1".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::memory::{MemoryUsbBackend, thermal_printer};
    use crate::usb::{InterfaceInfo, UsbDeviceInfo};
    use serde_json::json;

    const NAME: &str = "1155_1002";

    fn setup() -> (MemoryUsbBackend, PrinterService) {
        let usb = MemoryUsbBackend::new();
        usb.attach(thermal_printer(1155, 1002));
        let service = PrinterService::new(Arc::new(usb.clone()), ServiceConfig::default());
        (usb, service)
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(command_bytes(Some(&json!("AB"))).unwrap(), vec![0x41, 0x42]);
        assert_eq!(command_bytes(Some(&json!([27, 64]))).unwrap(), vec![27, 64]);
        assert!(command_bytes(Some(&json!([256]))).is_err());
        assert!(command_bytes(Some(&json!([-1]))).is_err());
        assert!(command_bytes(Some(&json!(12))).is_err());
        assert!(command_bytes(None).is_err());
    }

    #[test]
    fn test_string_arg() {
        let args = vec![json!("P1"), json!(3)];
        assert_eq!(string_arg(&args, 0).unwrap(), "P1");
        assert!(matches!(string_arg(&args, 1), Err(PrintError::InvalidArgument(_))));
        assert!(matches!(string_arg(&args, 2), Err(PrintError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_get_connected_printers_filters_class() {
        let (usb, service) = setup();
        usb.attach(UsbDeviceInfo {
            vendor_id: 1133,
            product_id: 1,
            device_id: 1003,
            interfaces: vec![InterfaceInfo {
                number: 0,
                class_code: 3,
                endpoints: vec![],
            }],
        });

        let printers = service.get_connected_printers().await.unwrap();
        assert_eq!(
            printers,
            vec![PrinterEntry {
                printer_name: NAME.to_string(),
                device_id: 1002,
                vendor_id: 1155,
            }]
        );
        assert_eq!(
            serde_json::to_value(&printers).unwrap(),
            json!([{ "printername": NAME, "deviceId": 1002, "vendorId": 1155 }])
        );
    }

    #[tokio::test]
    async fn test_connect_with_permission_request() {
        let (usb, service) = setup();
        let mut events = service.subscribe();

        service.connect(NAME).await.unwrap();

        assert_eq!(usb.permission_requests(), 1);
        assert_eq!(service.registered(), vec![NAME.to_string()]);
        assert!(service.printer(NAME).unwrap().is_connected());
        assert_eq!(events.recv().await.unwrap(), PrinterEvent::Connected(NAME.to_string()));
    }

    #[tokio::test]
    async fn test_connect_twice_keeps_one_printer() {
        let (usb, service) = setup();
        service.connect(NAME).await.unwrap();
        let first = service.printer(NAME).unwrap();

        service.connect(NAME).await.unwrap();

        assert_eq!(usb.permission_requests(), 1);
        assert!(Arc::ptr_eq(&first, &service.printer(NAME).unwrap()));
    }

    #[tokio::test]
    async fn test_connect_already_permitted_skips_request() {
        let (usb, service) = setup();
        usb.grant(1002);
        service.connect(NAME).await.unwrap();
        assert_eq!(usb.permission_requests(), 0);
        assert_eq!(service.registered(), vec![NAME.to_string()]);
    }

    #[tokio::test]
    async fn test_connect_permission_denied() {
        let (usb, service) = setup();
        usb.set_grant_on_request(false);
        let mut events = service.subscribe();

        let err = service.connect(NAME).await.unwrap_err();

        assert!(matches!(err, PrintError::PermissionDenied));
        assert!(service.registered().is_empty());
        assert_eq!(
            events.recv().await.unwrap(),
            PrinterEvent::PermissionDenied(NAME.to_string())
        );
    }

    #[tokio::test]
    async fn test_connect_unknown_names() {
        let (_, service) = setup();
        for name in ["1155_9999", "EPSON-1", "1155", ""] {
            let err = service.connect(name).await.unwrap_err();
            assert!(matches!(err, PrintError::NotConnected), "{name}");
        }
    }

    #[tokio::test]
    async fn test_operations_need_connection() {
        let (_, service) = setup();
        assert!(matches!(service.disconnect(NAME).await, Err(PrintError::NotConnected)));
        assert!(matches!(service.print(NAME, "x").await, Err(PrintError::NotConnected)));
        assert!(matches!(
            service.send_command(NAME, vec![1]).await,
            Err(PrintError::NotConnected)
        ));
        assert!(matches!(
            service.is_paper_available(NAME).await,
            Err(PrintError::NotConnected)
        ));
        assert!(matches!(service.cut_paper(NAME).await, Err(PrintError::NotConnected)));
    }

    #[tokio::test]
    async fn test_print_checks_paper() {
        let (usb, service) = setup();
        service.connect(NAME).await.unwrap();

        usb.set_status(1002, 0x38);
        assert!(matches!(service.print(NAME, "Hello").await, Err(PrintError::PaperEmpty)));
        assert!(usb.written(1002).is_empty());

        usb.set_status(1002, 0x12);
        service.print(NAME, "Hello").await.unwrap();
        assert_eq!(usb.written(1002), b"Hello\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_print_uses_configured_charset() {
        let usb = MemoryUsbBackend::new();
        usb.attach(thermal_printer(1155, 1002));
        let config = ServiceConfig::new().with_charset("utf-8");
        let service = PrinterService::new(Arc::new(usb.clone()), config);
        service.connect(NAME).await.unwrap();

        service.print(NAME, "€").await.unwrap();
        assert_eq!(usb.written(1002), [&"€".as_bytes()[..], &b"\r\n"[..]].concat());
    }

    #[tokio::test]
    async fn test_cut_paper_uses_feed_lines() {
        let usb = MemoryUsbBackend::new();
        usb.attach(thermal_printer(1155, 1002));
        let service = PrinterService::new(
            Arc::new(usb.clone()),
            ServiceConfig::new().with_cut_feed_lines(4),
        );
        service.connect(NAME).await.unwrap();

        service.cut_paper(NAME).await.unwrap();
        assert_eq!(usb.written(1002), vec![29, 86, 66, 4]);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (_, service) = setup();
        service.connect(NAME).await.unwrap();
        let printer = service.printer(NAME).unwrap();
        let mut events = service.subscribe();

        service.disconnect(NAME).await.unwrap();

        assert!(!printer.is_connected());
        assert!(service.registered().is_empty());
        assert_eq!(
            events.recv().await.unwrap(),
            PrinterEvent::Disconnected(NAME.to_string())
        );
    }

    #[tokio::test]
    async fn test_handle_detach() {
        let (usb, service) = setup();
        service.connect(NAME).await.unwrap();
        let mut events = service.subscribe();

        let device = usb.detach(1002).unwrap();
        assert!(service.handle_detach(&device).await);
        assert!(!service.handle_detach(&device).await);

        assert!(service.registered().is_empty());
        assert_eq!(events.recv().await.unwrap(), PrinterEvent::Detached(NAME.to_string()));
    }

    #[tokio::test]
    async fn test_detach_of_unregistered_device_is_ignored() {
        let (usb, service) = setup();
        let mut events = service.subscribe();

        let device = usb.detach(1002).unwrap();
        assert!(!service.handle_detach(&device).await);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_prune_detached() {
        let (usb, service) = setup();
        usb.attach(thermal_printer(1155, 1003));
        service.connect(NAME).await.unwrap();
        service.connect("1155_1003").await.unwrap();

        usb.detach(1003);
        assert_eq!(service.prune_detached().await.unwrap(), 1);
        assert_eq!(service.registered(), vec![NAME.to_string()]);
        assert_eq!(service.prune_detached().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_registered_printer_when_access_check_fails() {
        let (usb, service) = setup();
        service.connect(NAME).await.unwrap();
        let first = service.printer(NAME).unwrap();
        let mut events = service.subscribe();

        usb.revoke(1002);
        usb.set_grant_on_request(false);
        service.connect(NAME).await.unwrap();

        assert!(Arc::ptr_eq(&first, &service.printer(NAME).unwrap()));
        assert_eq!(usb.permission_requests(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let (usb, service) = setup();
        usb.attach(thermal_printer(1155, 1003));
        service.connect(NAME).await.unwrap();
        service.connect("1155_1003").await.unwrap();

        service.shutdown().await;
        assert!(service.registered().is_empty());
    }

    #[tokio::test]
    async fn test_execute_wire_values() {
        let (usb, service) = setup();

        assert_eq!(service.execute("connect", &[json!(NAME)]).await.unwrap(), json!("Connected"));
        assert_eq!(
            service.execute("isPaperAvailable", &[json!(NAME)]).await.unwrap(),
            json!("true")
        );
        assert_eq!(
            service
                .execute("print", &[json!(NAME), json!("Hi")])
                .await
                .unwrap(),
            json!("Printed")
        );
        assert_eq!(
            service
                .execute("sendCommand", &[json!(NAME), json!([27, 64])])
                .await
                .unwrap(),
            json!("Send")
        );
        assert_eq!(service.execute("cutPaper", &[json!(NAME)]).await.unwrap(), json!("true"));
        assert_eq!(
            service.execute("disconnect", &[json!(NAME)]).await.unwrap(),
            json!("DisConnected")
        );

        assert_eq!(
            usb.written(1002),
            vec![b'H', b'i', 0x0D, 0x0A, 27, 64, 29, 86, 66, 0]
        );
    }

    #[tokio::test]
    async fn test_execute_failures() {
        let (usb, service) = setup();

        let err = service.execute("openCashBox", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid action: openCashBox");

        let err = service.execute("print", &[json!(NAME)]).await.unwrap_err();
        assert!(matches!(err, PrintError::InvalidArgument(_)));

        let err = service.execute("cutPaper", &[json!(NAME)]).await.unwrap_err();
        assert_eq!(err.to_string(), "No Printer of specified name is connected");

        service.connect(NAME).await.unwrap();
        usb.set_status(1002, 0x38);
        let err = service
            .execute("print", &[json!(NAME), json!("x")])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Paper roll is empty");
        assert_eq!(
            service.execute("isPaperAvailable", &[json!(NAME)]).await.unwrap(),
            json!("false")
        );
    }
}
