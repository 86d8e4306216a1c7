//! RFCOMM Transport (Windows)
//!
//! Talks to paired Serial Port Profile devices through WinRT directly, without
//! relying on the virtual COM port Windows may or may not have created.
//! WinRT operations are awaited on a private current-thread runtime so the
//! blocking [`Transport`] contract holds.

use crate::domain::models::Endpoint;
use crate::infrastructure::transport::{Transport, TransportError};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use windows::core::{HRESULT, HSTRING};
use windows::Devices::Bluetooth::Rfcomm::{RfcommDeviceService, RfcommServiceId};
use windows::Devices::Enumeration::DeviceInformation;
use windows::Networking::Sockets::StreamSocket;
use windows::Storage::Streams::DataWriter;

const E_ACCESSDENIED: HRESULT = HRESULT(0x8007_0005_u32 as i32);

struct RfcommLink {
    socket: StreamSocket,
    writer: DataWriter,
}

pub struct RfcommTransport {
    runtime: Runtime,
    link: Mutex<Option<RfcommLink>>,
}

impl RfcommTransport {
    pub fn new() -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            link: Mutex::new(None),
        })
    }

    fn link(&self) -> MutexGuard<'_, Option<RfcommLink>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn paired_spp_devices() -> windows::core::Result<Vec<Endpoint>> {
    let selector = RfcommDeviceService::GetDeviceSelector(&RfcommServiceId::SerialPort()?)?;
    let devices = DeviceInformation::FindAllAsyncAqsFilter(&selector)?.await?;

    let mut endpoints = Vec::new();
    for i in 0..devices.Size()? {
        let info = devices.GetAt(i)?;
        let name = info.Name().map(|n| n.to_string()).ok();
        endpoints.push(Endpoint::new(info.Id()?.to_string(), name));
    }
    Ok(endpoints)
}

async fn connect(endpoint: &Endpoint) -> windows::core::Result<RfcommLink> {
    let service = RfcommDeviceService::FromIdAsync(&HSTRING::from(endpoint.address()))?.await?;

    let socket = StreamSocket::new()?;
    socket
        .ConnectAsync(
            &service.ConnectionHostName()?,
            &service.ConnectionServiceName()?,
        )?
        .await?;

    let writer = match socket
        .OutputStream()
        .and_then(|out| DataWriter::CreateDataWriter(&out))
    {
        Ok(writer) => writer,
        Err(e) => {
            let _ = socket.Close();
            return Err(e);
        }
    };
    Ok(RfcommLink { socket, writer })
}

async fn write_bytes(link: &RfcommLink, bytes: &[u8]) -> windows::core::Result<()> {
    link.writer.WriteBytes(bytes)?;
    link.writer.StoreAsync()?.await?;
    link.writer.FlushAsync()?.await?;
    Ok(())
}

/// Fails once the socket no longer has a remote end.
fn probe(link: &RfcommLink) -> windows::core::Result<()> {
    link.socket.Information()?.RemoteHostName()?;
    Ok(())
}

fn release(link: RfcommLink) {
    // sink first, then the socket; errors here change nothing
    let _ = link.writer.Close();
    let _ = link.socket.Close();
}

fn map_error(err: windows::core::Error) -> TransportError {
    if err.code() == E_ACCESSDENIED {
        TransportError::PermissionDenied {
            reason: err.message().to_string(),
        }
    } else {
        TransportError::Io {
            source: io::Error::new(io::ErrorKind::Other, err.message().to_string()),
        }
    }
}

impl Transport for RfcommTransport {
    fn list_known_endpoints(&self) -> Vec<Endpoint> {
        match self.runtime.block_on(paired_spp_devices()) {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!("Failed to query paired RFCOMM devices: {:?}", e);
                Vec::new()
            }
        }
    }

    fn open(&self, endpoint: &Endpoint) -> Result<(), TransportError> {
        self.cancel_discovery();
        self.close();

        info!("Opening RFCOMM link to {}", endpoint);
        let link = self
            .runtime
            .block_on(connect(endpoint))
            .map_err(map_error)?;
        *self.link() = Some(link);
        Ok(())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.link();
        let link = guard.as_ref().ok_or_else(TransportError::not_open)?;
        let result = self.runtime.block_on(write_bytes(link, bytes));
        if result.is_err() {
            // a socket that failed a write is not reused
            if let Some(link) = guard.take() {
                release(link);
            }
        }
        result.map_err(map_error)
    }

    fn close(&self) {
        if let Some(link) = self.link().take() {
            release(link);
            info!("RFCOMM link closed");
        }
    }

    fn is_open(&self) -> bool {
        let mut guard = self.link();
        let alive = guard.as_ref().map(probe);
        match alive {
            None => false,
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!("RFCOMM link is gone: {:?}", e);
                if let Some(link) = guard.take() {
                    release(link);
                }
                false
            }
        }
    }
}
