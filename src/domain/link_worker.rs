//! Link worker thread.
//!
//! All transport I/O happens here, one command at a time, so writes are never
//! concurrent and callers never block on the stream.

use crate::domain::codec::speed_code;
use crate::domain::controller::{ControlError, Shared};
use crate::domain::models::{ConnectionState, Endpoint};
use crate::infrastructure::transport::TransportError;
use std::io;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub(crate) enum LinkCommand {
    Open {
        endpoint: Endpoint,
        session: u64,
    },
    Write {
        code: u8,
        /// Status text once the byte is out; `None` keeps the current text
        description: Option<String>,
        session: u64,
    },
    Close,
    Barrier(std_mpsc::Sender<()>),
}

pub(crate) fn spawn(
    shared: Arc<Shared>,
    link_rx: mpsc::UnboundedReceiver<LinkCommand>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("link-worker".to_string())
        .spawn(move || run(shared, link_rx))
}

fn run(shared: Arc<Shared>, mut link_rx: mpsc::UnboundedReceiver<LinkCommand>) {
    debug!("Link worker started");

    while let Some(command) = link_rx.blocking_recv() {
        match command {
            LinkCommand::Open { endpoint, session } => open(&shared, &endpoint, session),
            LinkCommand::Write {
                code,
                description,
                session,
            } => write(&shared, code, description, session),
            LinkCommand::Close => shared.transport.close(),
            LinkCommand::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }

    // queue closed: the controller is shutting down
    shared.transport.close();
    debug!("Link worker stopped");
}

fn open(shared: &Shared, endpoint: &Endpoint, session: u64) {
    let result = shared.transport.open(endpoint);

    let mut state = shared.lock();
    if state.session != session || state.connection != ConnectionState::Connecting {
        drop(state);
        if result.is_ok() {
            info!("Connect to {} finished after disconnect, closing", endpoint);
            shared.transport.close();
        }
        return;
    }

    match result {
        Ok(()) => {
            info!("Connected to {}", endpoint);
            state.connection = ConnectionState::Connected;
            state.message = format!("Connected to {}", endpoint.label());

            // fresh peer: nothing has been sent in this session yet, except
            // the operator's current speed which goes out right away
            let code = speed_code(state.speed);
            state.last_speed_code = Some(code);
            state.last_angle_code = None;
            shared.commit(state);

            write(shared, code, None, session);
        }
        Err(e) => {
            error!("Connection to {} failed: {}", endpoint, e);
            state.connection = ConnectionState::Disconnected;
            state.message = ControlError::from_open(e).to_string();
            shared.commit(state);
        }
    }
}

fn write(shared: &Shared, code: u8, description: Option<String>, session: u64) {
    {
        let state = shared.lock();
        if state.session != session || state.connection != ConnectionState::Connected {
            debug!("Dropping stale command '{}'", code as char);
            return;
        }
    }

    // a link that died while idle is reported the same way as a failed write
    let result = if shared.transport.is_open() {
        shared.transport.write(&[code])
    } else {
        Err(TransportError::not_open())
    };

    match result {
        Ok(()) => {
            debug!("Sent '{}'", code as char);
            if let Some(description) = description {
                let mut state = shared.lock();
                if state.session == session {
                    state.message = description;
                    shared.commit(state);
                }
            }
        }
        Err(e) => {
            let lost = ControlError::LinkLost { source: e };
            warn!("Write of '{}' failed: {:?}", code as char, lost);
            shared.transport.close();

            let mut state = shared.lock();
            if state.session == session && state.connection == ConnectionState::Connected {
                state.connection = ConnectionState::Disconnected;
                state.message = lost.to_string();
                shared.commit(state);
            }
        }
    }
}
