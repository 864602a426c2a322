//! The uniform error surfaced at the client/server boundary.

use ccrpc_registry::{CodecError, RegistryError};
use ccrpc_transport::AddrError;
use ccrpc_wire::{Status, WireError};

/// A failed call or lifecycle operation.
///
/// Every failure carries a status from the wire taxonomy plus the address
/// and method it concerns, when known. Server internals are never included;
/// user-level messages pass through unchanged.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub status: Status,
    pub message: String,
    pub address: Option<String>,
    pub method: Option<String>,
}

impl RpcError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        RpcError {
            status,
            message: message.into(),
            address: None,
            method: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        RpcError::new(Status::ErrorInvalid, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        RpcError::new(Status::ErrorTimeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        RpcError::new(Status::ErrorUnavailable, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        RpcError::new(Status::Busy, message)
    }

    pub fn with_address(mut self, address: impl std::fmt::Display) -> Self {
        self.address = Some(address.to_string());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)?;
        match (&self.method, &self.address) {
            (Some(m), Some(a)) => write!(f, " (method={m}, address={a})"),
            (Some(m), None) => write!(f, " (method={m})"),
            (None, Some(a)) => write!(f, " (address={a})"),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<WireError> for RpcError {
    fn from(e: WireError) -> Self {
        RpcError::invalid(e.to_string())
    }
}

impl From<CodecError> for RpcError {
    fn from(e: CodecError) -> Self {
        RpcError::invalid(e.to_string())
    }
}

impl From<RegistryError> for RpcError {
    fn from(e: RegistryError) -> Self {
        RpcError::invalid(e.to_string())
    }
}

impl From<AddrError> for RpcError {
    fn from(e: AddrError) -> Self {
        RpcError::invalid(e.to_string())
    }
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        // Framing rejects (oversized frames, malformed heads) are protocol
        // faults; everything else is the transport going away.
        if e.kind() == std::io::ErrorKind::InvalidData {
            RpcError::invalid(e.to_string())
        } else {
            RpcError::unavailable(e.to_string())
        }
    }
}
