//! List attached USB printers as JSON. With a printer name, also connect,
//! report paper status, optionally print a line and cut.
//!
//! ```text
//! usbprint-probe
//! usbprint-probe 1155_1026 "Hello"
//! ```

use anyhow::Context;
use std::sync::Arc;
use usbprint_printer::{LibUsbBackend, PrinterService, ServiceConfig, logger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    logger::init_logger(&level, false)?;

    let service = PrinterService::new(Arc::new(LibUsbBackend::new()), ServiceConfig::from_env());

    let mut args = std::env::args().skip(1);
    let Some(name) = args.next() else {
        let printers = service
            .get_connected_printers()
            .await
            .context("Failed to enumerate USB devices")?;
        println!("{}", serde_json::to_string_pretty(&printers)?);
        return Ok(());
    };

    service
        .connect(&name)
        .await
        .with_context(|| format!("Failed to connect to {}", name))?;
    let paper = service.is_paper_available(&name).await?;
    println!("{}: paper available = {}", name, paper);

    if let Some(text) = args.next() {
        service.print(&name, &text).await?;
        service.cut_paper(&name).await?;
        println!("{}: printed {} chars", name, text.chars().count());
    }

    service.shutdown().await;
    Ok(())
}
