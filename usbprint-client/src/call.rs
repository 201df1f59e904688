//! Call envelope exchanged across the bridge

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::UnknownMethod;

/// Name the printer service registers under on the host side
pub const SERVICE_NAME: &str = "PrinterService";

/// Printer service operations, spelled as they travel over the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    Print,
    SendCommand,
    Connect,
    Disconnect,
    GetConnectedPrinters,
    IsPaperAvailable,
    CutPaper,
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::Print,
        Method::SendCommand,
        Method::Connect,
        Method::Disconnect,
        Method::GetConnectedPrinters,
        Method::IsPaperAvailable,
        Method::CutPaper,
    ];

    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Print => "print",
            Method::SendCommand => "sendCommand",
            Method::Connect => "connect",
            Method::Disconnect => "disconnect",
            Method::GetConnectedPrinters => "getConnectedPrinters",
            Method::IsPaperAvailable => "isPaperAvailable",
            Method::CutPaper => "cutPaper",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

/// One request crossing the bridge
///
/// `method` stays a plain string so hosts can receive calls from bridges that
/// do not go through [`Method`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Log correlation only
    pub id: Uuid,
    pub service: String,
    pub method: String,
    pub args: Vec<Value>,
}

impl Call {
    pub fn new(service: impl Into<String>, method: Method, args: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.into(),
            method: method.as_str().to_string(),
            args,
        }
    }

    /// Parse the method name
    pub fn method(&self) -> Result<Method, UnknownMethod> {
        self.method.parse()
    }
}
