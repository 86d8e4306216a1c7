//! Link Transport Module
//!
//! A transport wraps one bidirectional byte stream to a paired vehicle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │             ConnectionController             │
//! │   (state machine, owns the link worker)      │
//! └──────────────────────┬───────────────────────┘
//!                        │ dyn Transport
//!              ┌─────────┴──────────┐
//!              ▼                    ▼
//!      ┌──────────────┐     ┌───────────────┐
//!      │    Serial    │     │    RFCOMM     │
//!      │ - SPP ports  │     │ - WinRT       │
//!      │ - any host   │     │ - Windows only│
//!      └──────────────┘     └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`serial`] - Paired Bluetooth devices exposed as serial ports
//! - `rfcomm` - Native RFCOMM sockets through WinRT (Windows only)

pub mod serial;

#[cfg(windows)]
pub mod rfcomm;

use crate::domain::models::Endpoint;
use crate::domain::settings::TransportSettings;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

pub use serial::SerialTransport;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Link I/O failed: {source}")]
    Io { source: io::Error },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },
}

impl From<io::Error> for TransportError {
    fn from(source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            TransportError::PermissionDenied {
                reason: source.to_string(),
            }
        } else {
            TransportError::Io { source }
        }
    }
}

impl TransportError {
    /// Error for an operation on a transport that has no open link.
    pub fn not_open() -> Self {
        TransportError::Io {
            source: io::Error::new(io::ErrorKind::NotConnected, "link is not open"),
        }
    }
}

/// One byte-stream link to a previously paired endpoint.
///
/// Methods take `&self` so discovery can run on the caller's thread while the
/// link worker owns open/write/close. Implementations keep the open handle
/// behind their own lock. Only the link worker calls `open`, `write` and
/// `close`, so writes are never concurrent.
pub trait Transport: Send + Sync + 'static {
    /// Endpoints already paired with the host. Never fails: a denied or
    /// unsupported query yields an empty list.
    fn list_known_endpoints(&self) -> Vec<Endpoint>;

    /// Stops any active discovery so a connect attempt is not slowed down.
    fn cancel_discovery(&self) {}

    /// Blocks until the stream is established or fails. On failure no handle
    /// is retained.
    fn open(&self, endpoint: &Endpoint) -> Result<(), TransportError>;

    /// Writes and flushes. No retry.
    fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Idempotent. Close-time errors are swallowed and the handle is always
    /// dropped.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Builds the transport selected in the settings.
pub fn from_settings(settings: &TransportSettings) -> Arc<dyn Transport> {
    match settings.backend.to_lowercase().as_str() {
        "rfcomm" => rfcomm_or_serial(settings),
        "serial" => Arc::new(SerialTransport::new(settings.clone())),
        other => {
            warn!("Unknown transport backend '{}', using serial", other);
            Arc::new(SerialTransport::new(settings.clone()))
        }
    }
}

#[cfg(windows)]
fn rfcomm_or_serial(settings: &TransportSettings) -> Arc<dyn Transport> {
    match rfcomm::RfcommTransport::new() {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            warn!("Failed to start RFCOMM backend ({}), using serial", e);
            Arc::new(SerialTransport::new(settings.clone()))
        }
    }
}

#[cfg(not(windows))]
fn rfcomm_or_serial(settings: &TransportSettings) -> Arc<dyn Transport> {
    warn!("RFCOMM backend is only available on Windows, using serial");
    Arc::new(SerialTransport::new(settings.clone()))
}
