//! Bridge host
//!
//! Pulls calls off the host end of a bridge and answers them from the
//! printer service. Each call runs on its own task. Unplugged devices are
//! dropped from the registry as the backend reports them.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};
use usbprint_client::{BridgeHost, Envelope};

use crate::error::PrintError;
use crate::service::PrinterService;

#[derive(Debug, Clone)]
pub struct ServiceHost {
    service: Arc<PrinterService>,
}

impl ServiceHost {
    pub fn new(service: Arc<PrinterService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<PrinterService> {
        &self.service
    }

    /// Serve `bridge` on a background task
    pub fn spawn(self, bridge: BridgeHost) -> JoinHandle<()> {
        tokio::spawn(self.run(bridge))
    }

    /// Serve until every client end of the bridge is gone, then shut the
    /// service down
    pub async fn run(self, mut bridge: BridgeHost) {
        info!(service = %self.service.config().service_name, "Printer service host started");

        let mut detached = self.service.watch_detach();
        let mut watching = true;

        loop {
            tokio::select! {
                envelope = bridge.recv() => {
                    let Some(envelope) = envelope else { break };
                    let service = self.service.clone();
                    let span = info_span!(
                        "call",
                        call_id = %envelope.call.id,
                        method = %envelope.call.method
                    );
                    tokio::spawn(async move { answer(&service, envelope).await }.instrument(span));
                }
                device = detached.recv(), if watching => match device {
                    Ok(device) => {
                        self.service.handle_detach(&device).await;
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("Missed {} USB detach notifications", n);
                        if let Err(e) = self.service.prune_detached().await {
                            warn!(error = %e, "Failed to re-check attached printers");
                        }
                    }
                    Err(RecvError::Closed) => {
                        warn!("USB detach notifications ended");
                        watching = false;
                    }
                },
            }
        }

        self.service.shutdown().await;
        info!("Bridge closed, printer service host stopped");
    }
}

/// Answer one envelope
pub async fn answer(service: &PrinterService, envelope: Envelope) {
    let Envelope { call, reply } = envelope;

    if call.service != service.config().service_name {
        warn!(service = %call.service, "Call for unknown service");
        reply.failure(Value::String(
            PrintError::UnknownService(call.service).to_string(),
        ));
        return;
    }

    match service.execute(&call.method, &call.args).await {
        Ok(value) => {
            debug!("Call succeeded");
            reply.success(value);
        }
        Err(e) => {
            warn!(error = %e, "Call failed");
            reply.failure(Value::String(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::usb::memory::{MemoryUsbBackend, thermal_printer};
    use serde_json::json;
    use usbprint_client::{Call, Method, Reply};

    fn service() -> PrinterService {
        let usb = MemoryUsbBackend::new();
        usb.attach(thermal_printer(1155, 1002));
        PrinterService::new(Arc::new(usb), ServiceConfig::default())
    }

    async fn ask(service: &PrinterService, call: Call) -> Result<Value, Value> {
        let (reply, rx) = Reply::channel();
        answer(service, Envelope { call, reply }).await;
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_answer_success() {
        let service = service();
        let call = Call::new("PrinterService", Method::Connect, vec![json!("1155_1002")]);
        assert_eq!(ask(&service, call).await, Ok(json!("Connected")));
    }

    #[tokio::test]
    async fn test_answer_failure_is_message_string() {
        let service = service();
        let call = Call::new("PrinterService", Method::CutPaper, vec![json!("1155_1002")]);
        assert_eq!(
            ask(&service, call).await,
            Err(json!("No Printer of specified name is connected"))
        );
    }

    #[tokio::test]
    async fn test_answer_foreign_service() {
        let service = service();
        let call = Call::new("CameraService", Method::Connect, vec![json!("1155_1002")]);
        assert_eq!(
            ask(&service, call).await,
            Err(json!("Unknown service: CameraService"))
        );
    }

    #[tokio::test]
    async fn test_answer_unknown_method() {
        let service = service();
        let mut call = Call::new("PrinterService", Method::Connect, vec![]);
        call.method = "openCashBox".to_string();
        assert_eq!(
            ask(&service, call).await,
            Err(json!("Invalid action: openCashBox"))
        );
    }
}
