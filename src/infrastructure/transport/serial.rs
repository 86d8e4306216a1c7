//! Serial Transport
//!
//! Paired Bluetooth SPP devices are exposed by the host as serial ports
//! (`/dev/rfcomm*` on Linux, "Standard Serial over Bluetooth link" COM ports
//! on Windows). This transport lists those ports and writes command bytes to
//! the chosen one.

use crate::domain::models::Endpoint;
use crate::domain::settings::TransportSettings;
use crate::infrastructure::transport::{Transport, TransportError};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the transport needs from an open port.
trait PortHandle: Write + Send {
    /// Fails once the device behind the port has gone away.
    fn probe(&self) -> io::Result<()>;
}

impl PortHandle for Box<dyn SerialPort> {
    fn probe(&self) -> io::Result<()> {
        // an rfcomm tty whose peer dropped rejects the output-queue query
        self.bytes_to_write().map(|_| ()).map_err(io::Error::from)
    }
}

pub struct SerialTransport {
    settings: TransportSettings,
    port: Mutex<Option<Box<dyn PortHandle>>>,
}

impl SerialTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            port: Mutex::new(None),
        }
    }

    fn port(&self) -> MutexGuard<'_, Option<Box<dyn PortHandle>>> {
        self.port.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether a port looks like a Bluetooth SPP link.
pub(crate) fn is_bluetooth_port(info: &SerialPortInfo) -> bool {
    matches!(info.port_type, SerialPortType::BluetoothPort)
        || info.port_name.to_lowercase().contains("rfcomm")
}

fn endpoint_for(info: &SerialPortInfo) -> Endpoint {
    let name = match &info.port_type {
        SerialPortType::UsbPort(usb) => usb.product.clone().or_else(|| usb.manufacturer.clone()),
        _ => None,
    };
    Endpoint::new(info.port_name.clone(), name)
}

/// Turns the host's port list into endpoints, dropping duplicates and
/// non-Bluetooth ports when requested.
pub(crate) fn endpoints_from_ports(ports: &[SerialPortInfo], bluetooth_only: bool) -> Vec<Endpoint> {
    let mut seen = HashSet::new();
    ports
        .iter()
        .filter(|info| !bluetooth_only || is_bluetooth_port(info))
        .map(endpoint_for)
        .filter(|endpoint| seen.insert(endpoint.clone()))
        .collect()
}

fn map_open_error(err: serialport::Error) -> TransportError {
    match err.kind() {
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied {
                reason: err.description,
            }
        }
        _ => TransportError::Io { source: err.into() },
    }
}

impl Transport for SerialTransport {
    fn list_known_endpoints(&self) -> Vec<Endpoint> {
        match serialport::available_ports() {
            Ok(ports) => {
                let endpoints = endpoints_from_ports(&ports, self.settings.bluetooth_only);
                debug!(
                    "{} serial port(s) on host, {} usable endpoint(s)",
                    ports.len(),
                    endpoints.len()
                );
                endpoints
            }
            Err(e) => {
                warn!("Failed to enumerate serial ports: {}", e);
                Vec::new()
            }
        }
    }

    fn open(&self, endpoint: &Endpoint) -> Result<(), TransportError> {
        self.cancel_discovery();
        // a stale handle from an earlier session must not survive a reopen
        self.close();

        info!(
            "Opening serial link {} at {} baud",
            endpoint.address(),
            self.settings.baud_rate
        );
        let port = serialport::new(endpoint.address(), self.settings.baud_rate)
            .timeout(Duration::from_millis(self.settings.write_timeout_ms))
            .open()
            .map_err(map_open_error)?;

        *self.port() = Some(Box::new(port));
        Ok(())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.port();
        let port = guard.as_mut().ok_or_else(TransportError::not_open)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn close(&self) {
        // dropping the handle closes the file descriptor; there is nothing
        // to report if that fails
        if self.port().take().is_some() {
            info!("Serial link closed");
        }
    }

    fn is_open(&self) -> bool {
        let mut guard = self.port();
        let alive = guard.as_ref().map(|port| port.probe());
        match alive {
            None => false,
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!("Serial link is gone: {}", e);
                guard.take();
                false
            }
        }
    }
}
