//! Connection Controller
//!
//! Owns the link lifecycle (`Disconnected → Connecting → Connected →
//! Disconnected`) and turns operator intents into wire bytes. Every method
//! returns immediately: open, write and close run on the link worker thread
//! and report back through the [`StatusPublisher`].
//!
//! Failures never reach the caller as errors. They end the current session,
//! leave the controller in `Disconnected` and show up as status text; the
//! operator reconnects explicitly.

use crate::domain::codec::{angle_code, clamp_angle, speed_code, speed_step, Command};
use crate::domain::link_worker::{self, LinkCommand};
use crate::domain::models::{ConnectionState, Endpoint, Movement, StatusSnapshot};
use crate::domain::settings::Settings;
use crate::domain::status::{StatusPublisher, SubscriptionId};
use crate::infrastructure::transport::{Transport, TransportError};
use std::io;
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Reasons an operation did not happen. The `Display` text is what the
/// operator sees as status.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Please select a device first")]
    NoEndpointSelected,

    #[error("Not connected to any device")]
    NotConnected,

    #[error("Controller has been shut down")]
    ShutDown,

    #[error("Connection failed. Check if device is powered on.")]
    ConnectFailed { source: TransportError },

    #[error("Permission denied. Please grant Bluetooth permissions.")]
    PermissionDenied { reason: String },

    #[error("Failed to send command. Connection lost?")]
    LinkLost { source: TransportError },
}

impl ControlError {
    pub(crate) fn from_open(source: TransportError) -> Self {
        match source {
            TransportError::PermissionDenied { reason } => ControlError::PermissionDenied { reason },
            source => ControlError::ConnectFailed { source },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    /// Normalized speed the operator starts with, 0.0..=1.0
    pub initial_speed: f32,
    /// Servo angle the operator starts with, in degrees
    pub initial_angle: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            initial_speed: 0.5,
            initial_angle: 90.0,
        }
    }
}

impl From<&Settings> for ControllerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            initial_speed: settings.initial_speed,
            initial_angle: settings.initial_angle,
        }
    }
}

pub(crate) struct ControllerState {
    pub(crate) connection: ConnectionState,
    /// Bumped by every connect and disconnect; link work tagged with an older
    /// session is stale.
    pub(crate) session: u64,
    pub(crate) selected: Option<Endpoint>,
    pub(crate) endpoints: Vec<Endpoint>,
    pub(crate) speed: f32,
    pub(crate) angle: f32,
    /// Wire codes last handed to the link in this session
    pub(crate) last_speed_code: Option<u8>,
    pub(crate) last_angle_code: Option<u8>,
    pub(crate) message: String,
    pub(crate) shut_down: bool,
}

impl ControllerState {
    fn new(config: &ControllerConfig) -> Self {
        let speed = if config.initial_speed.is_finite() {
            config.initial_speed.clamp(0.0, 1.0)
        } else {
            0.5
        };
        Self {
            connection: ConnectionState::Disconnected,
            session: 0,
            selected: None,
            endpoints: Vec::new(),
            speed,
            angle: clamp_angle(config.initial_angle),
            last_speed_code: None,
            last_angle_code: None,
            message: "Ready".to_string(),
            shut_down: false,
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.connection == ConnectionState::Connected,
            state: self.connection,
            message: self.message.clone(),
            endpoints: self.endpoints.clone(),
            selected: self.selected.clone(),
            speed: speed_step(self.speed).unwrap_or(5),
            angle: self.angle,
        }
    }
}

/// State shared between the controller and its link worker.
pub(crate) struct Shared {
    state: Mutex<ControllerState>,
    pub(crate) publisher: StatusPublisher,
    pub(crate) transport: Arc<dyn Transport>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes the state and releases the lock before observers run.
    pub(crate) fn commit(&self, state: MutexGuard<'_, ControllerState>) {
        let pending = self.publisher.stage(state.snapshot());
        drop(state);
        pending.deliver();
    }
}

pub struct ConnectionController {
    shared: Arc<Shared>,
    link_tx: Mutex<Option<mpsc::UnboundedSender<LinkCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl ConnectionController {
    /// Creates the controller and starts its link worker thread.
    pub fn new(transport: Arc<dyn Transport>, config: ControllerConfig) -> io::Result<Self> {
        let state = ControllerState::new(&config);
        let publisher = StatusPublisher::new(state.snapshot());
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            publisher,
            transport,
        });

        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let worker = link_worker::spawn(shared.clone(), link_rx)?;
        let worker_id = worker.thread().id();

        Ok(Self {
            shared,
            link_tx: Mutex::new(Some(link_tx)),
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    fn enqueue(&self, command: LinkCommand) -> Result<(), ControlError> {
        let link_tx = self.link_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = link_tx.as_ref().ok_or(ControlError::ShutDown)?;
        sender.send(command).map_err(|_| ControlError::ShutDown)
    }

    /// Shows a failed operation as status text.
    fn report(&self, error: ControlError) {
        debug!("Operation rejected: {}", error);
        let mut state = self.shared.lock();
        state.message = error.to_string();
        self.shared.commit(state);
    }

    // ===== Read side =====

    pub fn snapshot(&self) -> StatusSnapshot {
        self.shared.publisher.current()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().connection
    }

    /// Registers an observer; it gets the current snapshot immediately.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&StatusSnapshot) + Send + Sync + 'static,
    {
        self.shared.publisher.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.publisher.unsubscribe(id)
    }

    // ===== Discovery =====

    /// Re-reads the paired endpoints on the calling thread.
    pub fn refresh_endpoints(&self) {
        let endpoints = self.shared.transport.list_known_endpoints();
        info!("Found {} paired endpoint(s)", endpoints.len());

        let mut state = self.shared.lock();
        state.message = if endpoints.is_empty() {
            "No paired devices. Pair the vehicle in Bluetooth settings first.".to_string()
        } else {
            format!("Found {} paired device(s)", endpoints.len())
        };
        state.endpoints = endpoints;
        self.shared.commit(state);
    }

    pub fn select_endpoint(&self, endpoint: Endpoint) {
        info!("Selected endpoint {}", endpoint);
        let mut state = self.shared.lock();
        state.selected = Some(endpoint);
        self.shared.commit(state);
    }

    // ===== Lifecycle =====

    /// Starts a connection attempt to the selected endpoint. Ignored while an
    /// attempt is in flight or a link is up.
    pub fn connect(&self) {
        if let Err(e) = self.try_connect() {
            self.report(e);
        }
    }

    fn try_connect(&self) -> Result<(), ControlError> {
        let mut state = self.shared.lock();
        if state.shut_down {
            return Err(ControlError::ShutDown);
        }
        if state.connection != ConnectionState::Disconnected {
            debug!("Connect ignored, link is {:?}", state.connection);
            return Ok(());
        }
        let endpoint = state
            .selected
            .clone()
            .ok_or(ControlError::NoEndpointSelected)?;

        state.session += 1;
        // queued under the state lock so queue order matches session order
        self.enqueue(LinkCommand::Open {
            endpoint: endpoint.clone(),
            session: state.session,
        })?;

        info!("Connecting to {}", endpoint);
        state.connection = ConnectionState::Connecting;
        state.message = format!("Connecting to {}...", endpoint.label());
        self.shared.commit(state);
        Ok(())
    }

    /// Tears the link down from any state. Never fails.
    pub fn disconnect(&self) {
        let mut state = self.shared.lock();
        if state.connection != ConnectionState::Disconnected {
            info!("Disconnecting from {:?} state", state.connection);
        }
        state.session += 1;
        state.connection = ConnectionState::Disconnected;
        state.message = "Disconnected".to_string();
        if self.enqueue(LinkCommand::Close).is_err() {
            debug!("Link worker already stopped");
        }
        self.shared.commit(state);
    }

    /// Connects when disconnected, disconnects otherwise.
    pub fn toggle_connection(&self) {
        let connection = self.state();
        if connection == ConnectionState::Disconnected {
            self.connect();
        } else {
            self.disconnect();
        }
    }

    // ===== Commands =====

    pub fn send(&self, command: Command) {
        let result = {
            let mut state = self.shared.lock();
            self.queue_write(&mut state, command)
        };
        if let Err(e) = result {
            self.report(e);
        }
    }

    fn queue_write(&self, state: &mut ControllerState, command: Command) -> Result<(), ControlError> {
        if state.connection != ConnectionState::Connected {
            return Err(ControlError::NotConnected);
        }

        let code = command.wire_code();
        self.enqueue(LinkCommand::Write {
            code,
            description: Some(command.describe()),
            session: state.session,
        })?;

        match command {
            Command::Speed(_) => state.last_speed_code = Some(code),
            Command::Angle(_) => state.last_angle_code = Some(code),
            Command::Move(_) => {}
        }
        Ok(())
    }

    pub fn move_forward(&self) {
        self.send(Command::Move(Movement::Forward));
    }

    pub fn move_backward(&self) {
        self.send(Command::Move(Movement::Backward));
    }

    pub fn turn_left(&self) {
        self.send(Command::Move(Movement::Left));
    }

    pub fn turn_right(&self) {
        self.send(Command::Move(Movement::Right));
    }

    pub fn stop(&self) {
        self.send(Command::Move(Movement::Stop));
    }

    /// A drive control was pressed.
    pub fn on_action_start(&self, movement: Movement) {
        self.send(Command::Move(movement));
    }

    /// A drive control was released.
    pub fn on_action_end(&self) {
        self.stop();
    }

    /// Updates the speed shown to the operator right away; the wire code only
    /// goes out when it differs from the last one sent.
    ///
    /// The code is taken from `p` as given, so a step outside `0..=10` goes
    /// out as the fallback `'5'`. The published level is clamped.
    pub fn set_speed(&self, p: f32) {
        if !p.is_finite() {
            warn!("Ignoring non-finite speed {}", p);
            return;
        }

        let mut state = self.shared.lock();
        state.speed = p.clamp(0.0, 1.0);
        if state.last_speed_code != Some(speed_code(p)) {
            if let Err(e) = self.queue_write(&mut state, Command::Speed(p)) {
                state.message = e.to_string();
            }
        }
        self.shared.commit(state);
    }

    /// Same debounce as [`Self::set_speed`], for the steering servo.
    pub fn set_angle(&self, a: f32) {
        if !a.is_finite() {
            warn!("Ignoring non-finite angle {}", a);
            return;
        }
        let a = clamp_angle(a);

        let mut state = self.shared.lock();
        state.angle = a;
        if state.last_angle_code != Some(angle_code(a)) {
            if let Err(e) = self.queue_write(&mut state, Command::Angle(a)) {
                state.message = e.to_string();
            }
        }
        self.shared.commit(state);
    }

    // ===== Teardown =====

    /// Blocks until every link operation queued so far has run.
    ///
    /// Returns at once when called from the link worker itself (for example
    /// from an observer) or after shutdown.
    pub fn wait_idle(&self) {
        if thread::current().id() == self.worker_id {
            return;
        }
        let (ack_tx, ack_rx) = std_mpsc::channel();
        if self.enqueue(LinkCommand::Barrier(ack_tx)).is_ok() {
            // an error only means the worker is gone, which is idle too
            let _ = ack_rx.recv();
        }
    }

    /// Disconnects, stops the link worker and waits for it. The owner calls
    /// this once when it is done with the controller; later calls do
    /// nothing.
    pub fn shutdown(&self) {
        let link_tx = self
            .link_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if !link_tx {
            return;
        }

        self.disconnect();
        {
            let mut state = self.shared.lock();
            state.shut_down = true;
            state.selected = None;
            self.shared.commit(state);
        }
        // dropping the sender lets the worker drain its queue and exit
        self.link_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if thread::current().id() == self.worker_id {
                debug!("Shutdown requested from the link worker, not joining");
            } else if worker.join().is_err() {
                warn!("Link worker panicked");
            }
        }
        info!("Controller shut down");
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
