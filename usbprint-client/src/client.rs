//! Printer service client

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::bridge::{Bridge, Reply};
use crate::call::{Call, Method};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Printer service client
///
/// Each operation forwards its arguments, in order, to the service behind the
/// bridge. `Ok` carries the service's success value and
/// `Err(ClientError::Rejected)` its failure value, both untouched.
#[derive(Debug, Clone)]
pub struct PrinterClient<B> {
    bridge: B,
    config: ClientConfig,
}

impl<B: Bridge> PrinterClient<B> {
    pub fn new(bridge: B) -> Self {
        Self::with_config(bridge, ClientConfig::default())
    }

    pub fn with_config(bridge: B, config: ClientConfig) -> Self {
        Self { bridge, config }
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Forward one call and wait for its outcome
    #[instrument(skip(self, args), fields(service = %self.config.service_name))]
    pub async fn invoke(&self, method: Method, args: Vec<Value>) -> ClientResult<Value> {
        let call = Call::new(&self.config.service_name, method, args);
        let call_id = call.id;
        let (reply, rx) = Reply::channel();

        debug!(%call_id, "Dispatching call");
        self.bridge.dispatch(call, reply).await?;

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(ClientError::Rejected(error)),
            Err(_) => Err(ClientError::NoReply),
        }
    }

    /// Print `message` on `printer`
    pub async fn print(&self, printer: &str, message: &str) -> ClientResult<Value> {
        self.invoke(Method::Print, vec![printer.into(), message.into()])
            .await
    }

    /// Send a raw command to `printer`
    pub async fn send_command(&self, printer: &str, command: &str) -> ClientResult<Value> {
        self.invoke(Method::SendCommand, vec![printer.into(), command.into()])
            .await
    }

    pub async fn connect(&self, printer: &str) -> ClientResult<Value> {
        self.invoke(Method::Connect, vec![printer.into()]).await
    }

    pub async fn disconnect(&self, printer: &str) -> ClientResult<Value> {
        self.invoke(Method::Disconnect, vec![printer.into()]).await
    }

    /// List the printers the service can see
    pub async fn get_connected_printers(&self) -> ClientResult<Value> {
        self.invoke(Method::GetConnectedPrinters, Vec::new()).await
    }

    pub async fn is_paper_available(&self, printer: &str) -> ClientResult<Value> {
        self.invoke(Method::IsPaperAvailable, vec![printer.into()])
            .await
    }

    pub async fn cut_paper(&self, printer: &str) -> ClientResult<Value> {
        self.invoke(Method::CutPaper, vec![printer.into()]).await
    }
}

impl<B: Bridge + Clone + 'static> PrinterClient<B> {
    /// Callback-pair form of [`invoke`](Self::invoke)
    ///
    /// Returns immediately. Exactly one of the continuations runs, once, when
    /// the outcome arrives. Bridge failures that carry no service value reach
    /// `on_failure` as their message string.
    pub fn invoke_with<S, F>(
        &self,
        method: Method,
        args: Vec<Value>,
        on_success: S,
        on_failure: F,
    ) -> JoinHandle<()>
    where
        S: FnOnce(Value) + Send + 'static,
        F: FnOnce(Value) + Send + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move {
            match client.invoke(method, args).await {
                Ok(value) => on_success(value),
                Err(ClientError::Rejected(error)) => on_failure(error),
                Err(e) => on_failure(Value::String(e.to_string())),
            }
        })
    }
}
