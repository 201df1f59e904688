//! One connected USB printer
//!
//! The device is opened lazily on the first write or status probe. The
//! handle and the chosen bulk endpoint live behind a mutex; transfers run
//! on the blocking pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument, warn};

use crate::error::{PrintError, PrintResult};
use crate::escpos::{CutMode, EscPosBuilder};
use crate::usb::{UsbBackend, UsbConnection, UsbDeviceInfo};

/// Class-specific, device-to-host, interface recipient
const STATUS_REQUEST_TYPE: u8 = 0xA1;
/// Printer class GET_PORT_STATUS
const STATUS_REQUEST: u8 = 1;

#[derive(Debug, Default)]
struct Link {
    conn: Option<Box<dyn UsbConnection>>,
    endpoint: Option<u8>,
}

impl Link {
    fn connection(
        &mut self,
        backend: &dyn UsbBackend,
        device: &UsbDeviceInfo,
    ) -> PrintResult<&mut (dyn UsbConnection + 'static)> {
        if self.conn.is_none() {
            debug!(device = %device.printer_name(), "Opening USB device");
            self.conn = Some(backend.open(device)?);
        }
        self.conn
            .as_deref_mut()
            .ok_or_else(|| PrintError::Usb("device not open".to_string()))
    }

    fn write(
        &mut self,
        backend: &dyn UsbBackend,
        device: &UsbDeviceInfo,
        data: &[u8],
    ) -> PrintResult<()> {
        let endpoint = match self.endpoint {
            Some(endpoint) => endpoint,
            None => {
                let iface = device
                    .interfaces
                    .first()
                    .ok_or_else(|| PrintError::Usb("device has no interfaces".to_string()))?;
                let endpoint = device
                    .bulk_out_endpoint()
                    .ok_or_else(|| PrintError::Usb("no bulk OUT endpoint".to_string()))?;
                self.connection(backend, device)?
                    .claim_interface(iface.number)?;
                self.endpoint = Some(endpoint);
                endpoint
            }
        };

        let written = self
            .connection(backend, device)?
            .write_bulk(endpoint, data)?;
        if written != data.len() {
            return Err(PrintError::Usb(format!(
                "Incomplete write: {} of {} bytes",
                written,
                data.len()
            )));
        }
        Ok(())
    }

    fn read_status(&mut self, backend: &dyn UsbBackend, device: &UsbDeviceInfo) -> PrintResult<u8> {
        let mut bits = [0u8; 2];
        self.connection(backend, device)?.read_control(
            STATUS_REQUEST_TYPE,
            STATUS_REQUEST,
            0,
            0,
            &mut bits,
        )?;
        Ok(bits[0])
    }

    fn close(&mut self) {
        self.conn = None;
        self.endpoint = None;
    }
}

/// USB thermal printer
#[derive(Debug)]
pub struct UsbPrinter {
    name: String,
    device: UsbDeviceInfo,
    backend: Arc<dyn UsbBackend>,
    paper_out_status: u8,
    link: Arc<Mutex<Link>>,
    connected: AtomicBool,
}

impl UsbPrinter {
    pub fn new(
        device: UsbDeviceInfo,
        backend: Arc<dyn UsbBackend>,
        paper_out_status: u8,
    ) -> Self {
        Self {
            name: device.printer_name(),
            device,
            backend,
            paper_out_status,
            link: Arc::new(Mutex::new(Link::default())),
            connected: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &UsbDeviceInfo {
        &self.device
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        info!(printer = %self.name, "Printer connected");
    }

    /// Run `f` against the link on the blocking pool
    async fn with_link<T, F>(&self, f: F) -> PrintResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Link, &dyn UsbBackend, &UsbDeviceInfo) -> PrintResult<T> + Send + 'static,
    {
        let link = self.link.clone();
        let backend = self.backend.clone();
        let device = self.device.clone();

        tokio::task::spawn_blocking(move || {
            let mut link = link.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut *link, backend.as_ref(), &device)
        })
        .await
        .map_err(|e| PrintError::Usb(format!("Task join failed: {}", e)))?
    }

    /// Send raw bytes to the bulk OUT endpoint
    #[instrument(skip(self, data), fields(printer = %self.name, data_len = data.len()))]
    pub async fn send_bytes(&self, data: Vec<u8>) -> PrintResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.with_link(move |link, backend, device| link.write(backend, device, &data))
            .await?;
        debug!("Bytes sent");
        Ok(())
    }

    /// Print one line of text in `charset`, terminated by CR LF
    ///
    /// An empty message sends nothing.
    pub async fn send_message(&self, msg: &str, charset: &str) -> PrintResult<()> {
        if msg.is_empty() {
            return Ok(());
        }
        let mut builder = EscPosBuilder::new();
        builder.line(msg, charset);
        self.send_bytes(builder.build()).await
    }

    /// Raw first status byte from the printer
    ///
    /// A failed probe closes the connection and reports 0.
    #[instrument(skip(self), fields(printer = %self.name))]
    pub async fn read_status(&self) -> u8 {
        match self
            .with_link(|link, backend, device| link.read_status(backend, device))
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Status probe failed, closing connection");
                self.close().await;
                0
            }
        }
    }

    pub async fn is_paper_available(&self) -> bool {
        self.read_status().await != self.paper_out_status
    }

    /// Feed `lines` then cut
    pub async fn cut_paper(&self, lines: u8) -> PrintResult<()> {
        let mut builder = EscPosBuilder::new();
        builder.cut_feed(lines);
        self.send_bytes(builder.build()).await
    }

    pub async fn cut_by_mode(&self, mode: CutMode) -> PrintResult<()> {
        let mut builder = EscPosBuilder::new();
        builder.cut(mode);
        self.send_bytes(builder.build()).await
    }

    pub async fn open_cash_box(&self) -> PrintResult<()> {
        let mut builder = EscPosBuilder::new();
        builder.open_cash_box();
        self.send_bytes(builder.build()).await
    }

    pub async fn default_buzzer(&self) -> PrintResult<()> {
        let mut builder = EscPosBuilder::new();
        builder.default_buzzer();
        self.send_bytes(builder.build()).await
    }

    pub async fn buzzer(&self, times: u8, duration: u8) -> PrintResult<()> {
        let mut builder = EscPosBuilder::new();
        builder.buzzer(times, duration);
        self.send_bytes(builder.build()).await
    }

    pub async fn set_buzzer_mode(&self, times: u8, duration: u8, mode: u8) -> PrintResult<()> {
        let mut builder = EscPosBuilder::new();
        builder.buzzer_mode(times, duration, mode);
        self.send_bytes(builder.build()).await
    }

    /// Drop the device handle and mark the printer disconnected
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self
            .with_link(|link, _, _| {
                link.close();
                Ok(())
            })
            .await
        {
            warn!(printer = %self.name, error = %e, "Failed to release USB handle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::memory::{MemoryUsbBackend, thermal_printer};
    use crate::usb::{InterfaceInfo, USB_CLASS_PRINTER};

    fn setup() -> (MemoryUsbBackend, UsbPrinter) {
        let usb = MemoryUsbBackend::new();
        usb.attach(thermal_printer(1155, 7));
        let printer = UsbPrinter::new(thermal_printer(1155, 7), Arc::new(usb.clone()), 0x38);
        (usb, printer)
    }

    #[tokio::test]
    async fn test_opens_lazily_once() {
        let (usb, printer) = setup();
        assert_eq!(printer.name(), "1155_7");
        assert_eq!(usb.open_count(7), 0);

        printer.send_bytes(vec![1, 2, 3]).await.unwrap();
        printer.send_bytes(vec![4]).await.unwrap();

        assert_eq!(usb.open_count(7), 1);
        assert_eq!(usb.writes(7), vec![(0x01, vec![1, 2, 3]), (0x01, vec![4])]);
    }

    #[tokio::test]
    async fn test_send_message_appends_crlf() {
        let (usb, printer) = setup();
        printer.send_message("Hi", "GBK").await.unwrap();
        assert_eq!(usb.written(7), vec![b'H', b'i', 0x0D, 0x0A]);
    }

    #[tokio::test]
    async fn test_empty_message_sends_nothing() {
        let (usb, printer) = setup();
        printer.send_message("", "GBK").await.unwrap();
        assert!(usb.writes(7).is_empty());
        assert_eq!(usb.open_count(7), 0);
    }

    #[tokio::test]
    async fn test_paper_status() {
        let (usb, printer) = setup();
        assert!(printer.is_paper_available().await);

        usb.set_status(7, 0x38);
        assert_eq!(printer.read_status().await, 0x38);
        assert!(!printer.is_paper_available().await);
    }

    #[tokio::test]
    async fn test_failed_probe_closes_and_reports_paper() {
        let (usb, printer) = setup();
        printer.mark_connected();
        usb.set_status(7, 0x38);
        usb.fail_control_transfers(7, true);

        assert!(printer.is_paper_available().await);
        assert!(!printer.is_connected());

        // reopened on next use
        usb.fail_control_transfers(7, false);
        printer.send_bytes(vec![0]).await.unwrap();
        assert_eq!(usb.open_count(7), 2);
    }

    #[tokio::test]
    async fn test_helpers_emit_escpos() {
        let (usb, printer) = setup();
        printer.cut_paper(0).await.unwrap();
        printer.cut_by_mode(CutMode::Partial).await.unwrap();
        printer.open_cash_box().await.unwrap();
        printer.default_buzzer().await.unwrap();
        printer.buzzer(1, 2).await.unwrap();
        printer.set_buzzer_mode(1, 2, 3).await.unwrap();

        let sent: Vec<Vec<u8>> = usb.writes(7).into_iter().map(|(_, d)| d).collect();
        assert_eq!(
            sent,
            vec![
                vec![29, 86, 66, 0],
                vec![29, 86, 49],
                vec![27, 112, 0, 64, 80],
                vec![27, 66, 4, 1],
                vec![27, 66, 1, 2],
                vec![27, 67, 1, 2, 3],
            ]
        );
    }

    #[tokio::test]
    async fn test_no_bulk_out_endpoint() {
        let usb = MemoryUsbBackend::new();
        let mut device = thermal_printer(1, 2);
        device.interfaces = vec![InterfaceInfo {
            number: 0,
            class_code: USB_CLASS_PRINTER,
            endpoints: vec![],
        }];
        usb.attach(device.clone());
        let printer = UsbPrinter::new(device, Arc::new(usb), 0x38);

        let err = printer.send_bytes(vec![1]).await.unwrap_err();
        assert!(matches!(err, PrintError::Usb(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (usb, printer) = setup();
        printer.mark_connected();
        printer.send_bytes(vec![1]).await.unwrap();

        printer.close().await;
        printer.close().await;
        assert!(!printer.is_connected());

        printer.send_bytes(vec![2]).await.unwrap();
        assert_eq!(usb.open_count(7), 2);
    }
}
