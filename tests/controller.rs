//! Controller behavior against an in-memory transport.

use rc_link_controller::{
    ConnectionController, ConnectionState, ControllerConfig, Endpoint, Movement, StatusSnapshot,
    Transport, TransportError,
};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

#[derive(Default)]
struct FakeTransport {
    endpoints: Vec<Endpoint>,
    open: AtomicBool,
    opens: AtomicUsize,
    fail_writes: AtomicBool,
    next_open_error: Mutex<Option<TransportError>>,
    // when set, open() waits for a message before completing
    gate: Mutex<Option<mpsc::Receiver<()>>>,
    written: Mutex<Vec<u8>>,
}

impl FakeTransport {
    fn with_endpoints(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints,
            ..Self::default()
        }
    }

    fn written(&self) -> String {
        String::from_utf8(self.written.lock().unwrap().clone()).unwrap()
    }

    fn hold_open(&self) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }
}

impl Transport for FakeTransport {
    fn list_known_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }

    fn open(&self, _endpoint: &Endpoint) -> Result<(), TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        if let Some(err) = self.next_open_error.lock().unwrap().take() {
            return Err(err);
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::not_open());
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Io {
                source: io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"),
            });
        }
        self.written.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

fn rc_car() -> Endpoint {
    Endpoint::new("00:11:22:33:44:55", Some("RC Car".to_string()))
}

fn controller_with(transport: &Arc<FakeTransport>) -> ConnectionController {
    ConnectionController::new(transport.clone(), ControllerConfig::default()).unwrap()
}

fn connected() -> (Arc<FakeTransport>, ConnectionController) {
    let transport = Arc::new(FakeTransport::default());
    let controller = controller_with(&transport);
    controller.select_endpoint(rc_car());
    controller.connect();
    controller.wait_idle();
    assert_eq!(controller.state(), ConnectionState::Connected);
    (transport, controller)
}

#[test]
fn connect_without_selection_asks_for_a_device() {
    let transport = Arc::new(FakeTransport::default());
    let controller = controller_with(&transport);

    controller.connect();
    controller.wait_idle();

    let snapshot = controller.snapshot();
    assert!(snapshot.message.contains("select a device first"));
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(!snapshot.connected);
    assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
}

#[test]
fn connect_publishes_connected_and_resends_speed() {
    let (transport, controller) = connected();

    let snapshot = controller.snapshot();
    assert!(snapshot.connected);
    assert_eq!(snapshot.message, "Connected to RC Car");
    assert_eq!(snapshot.selected, Some(rc_car()));
    assert_eq!(transport.written(), "5");
}

#[test]
fn forward_is_written_and_failed_write_drops_the_link() {
    let (transport, controller) = connected();

    controller.move_forward();
    controller.wait_idle();
    assert_eq!(transport.written(), "5F");
    assert_eq!(controller.snapshot().message, "Moving Forward");

    transport.fail_writes.store(true, Ordering::SeqCst);
    controller.move_forward();
    controller.wait_idle();

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(!snapshot.connected);
    assert!(snapshot.message.contains("Connection lost"));
    assert!(!transport.is_open());
}

#[test]
fn same_angle_bucket_is_sent_once() {
    let (transport, controller) = connected();

    controller.set_angle(170.0);
    controller.set_angle(175.0);
    controller.wait_idle();

    assert_eq!(transport.written(), "5j");
    assert_eq!(controller.snapshot().angle, 175.0);
}

#[test]
fn repeated_speed_is_sent_once() {
    let (transport, controller) = connected();

    controller.set_speed(0.42);
    controller.set_speed(0.42);
    controller.wait_idle();

    assert_eq!(transport.written(), "54");
    assert_eq!(controller.snapshot().speed, 4);
    assert_eq!(controller.snapshot().message, "Speed set to 4");
}

#[test]
fn speed_matching_the_resent_level_is_not_repeated() {
    let (transport, controller) = connected();

    controller.set_speed(0.55);
    controller.set_speed(1.0);
    controller.wait_idle();

    assert_eq!(transport.written(), "5q");
    assert_eq!(controller.snapshot().speed, 10);
}

#[test]
fn disconnect_twice_matches_disconnect_once() {
    let (transport, controller) = connected();

    controller.disconnect();
    controller.wait_idle();
    let once = controller.snapshot();
    controller.disconnect();
    controller.wait_idle();
    let twice = controller.snapshot();

    assert_eq!(once, twice);
    assert_eq!(twice.state, ConnectionState::Disconnected);
    assert_eq!(twice.message, "Disconnected");
    assert!(!transport.is_open());
}

#[test]
fn commands_while_disconnected_do_no_io() {
    let transport = Arc::new(FakeTransport::default());
    let controller = controller_with(&transport);

    controller.move_forward();
    controller.on_action_end();
    controller.set_angle(10.0);
    controller.wait_idle();

    assert_eq!(transport.written(), "");
    assert_eq!(controller.snapshot().message, "Not connected to any device");
}

#[test]
fn sliders_update_published_state_while_disconnected() {
    let transport = Arc::new(FakeTransport::default());
    let controller = controller_with(&transport);

    controller.set_speed(0.87);
    controller.set_angle(400.0);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.speed, 8);
    assert_eq!(snapshot.angle, 180.0);
    assert_eq!(transport.written(), "");
}

#[test]
fn reconnect_sends_the_current_speed() {
    let transport = Arc::new(FakeTransport::default());
    let controller = controller_with(&transport);
    controller.set_speed(0.9);
    controller.select_endpoint(rc_car());

    controller.connect();
    controller.wait_idle();
    controller.disconnect();
    controller.set_speed(0.2);
    controller.connect();
    controller.wait_idle();

    assert_eq!(transport.written(), "92");
}

#[test]
fn angle_is_resent_after_reconnect() {
    let (transport, controller) = connected();
    controller.set_angle(90.0);
    controller.wait_idle();

    controller.disconnect();
    controller.connect();
    controller.wait_idle();
    controller.set_angle(90.0);
    controller.wait_idle();

    assert_eq!(transport.written(), "5e5e");
}

#[test]
fn failed_connect_reports_reason() {
    let transport = Arc::new(FakeTransport::default());
    let controller = controller_with(&transport);
    controller.select_endpoint(rc_car());

    *transport.next_open_error.lock().unwrap() = Some(TransportError::Io {
        source: io::Error::new(io::ErrorKind::ConnectionRefused, "host is down"),
    });
    controller.connect();
    controller.wait_idle();
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.message, "Connection failed. Check if device is powered on.");

    *transport.next_open_error.lock().unwrap() = Some(TransportError::PermissionDenied {
        reason: "BLUETOOTH_CONNECT not granted".to_string(),
    });
    controller.connect();
    controller.wait_idle();
    assert_eq!(
        controller.snapshot().message,
        "Permission denied. Please grant Bluetooth permissions."
    );

    // still operable
    controller.connect();
    controller.wait_idle();
    assert_eq!(controller.state(), ConnectionState::Connected);
}

#[test]
fn disconnect_while_connecting_closes_the_late_link() {
    let transport = Arc::new(FakeTransport::default());
    let controller = controller_with(&transport);
    controller.select_endpoint(rc_car());
    let release = transport.hold_open();

    controller.connect();
    assert_eq!(controller.state(), ConnectionState::Connecting);
    assert_eq!(controller.snapshot().message, "Connecting to RC Car...");

    controller.disconnect();
    assert_eq!(controller.state(), ConnectionState::Disconnected);
    release.send(()).unwrap();
    controller.wait_idle();

    assert_eq!(controller.state(), ConnectionState::Disconnected);
    assert!(!transport.is_open());
    assert_eq!(transport.written(), "");
}

#[test]
fn second_connect_while_connecting_is_ignored() {
    let transport = Arc::new(FakeTransport::default());
    let controller = controller_with(&transport);
    controller.select_endpoint(rc_car());
    let release = transport.hold_open();

    controller.connect();
    controller.connect();
    release.send(()).unwrap();
    controller.wait_idle();
    controller.connect();
    controller.wait_idle();

    assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
    assert_eq!(controller.state(), ConnectionState::Connected);
}

#[test]
fn press_and_release_send_movement_then_stop() {
    let (transport, controller) = connected();

    controller.on_action_start(Movement::Left);
    controller.on_action_end();
    controller.wait_idle();

    assert_eq!(transport.written(), "5LS");
    assert_eq!(controller.snapshot().message, "Stopped");
}

#[test]
fn toggle_connects_then_disconnects() {
    let transport = Arc::new(FakeTransport::default());
    let controller = controller_with(&transport);
    controller.select_endpoint(rc_car());

    controller.toggle_connection();
    controller.wait_idle();
    assert_eq!(controller.state(), ConnectionState::Connected);

    controller.toggle_connection();
    controller.wait_idle();
    assert_eq!(controller.state(), ConnectionState::Disconnected);
    assert!(!transport.is_open());
}

#[test]
fn refresh_publishes_endpoints() {
    let transport = Arc::new(FakeTransport::with_endpoints(vec![
        rc_car(),
        Endpoint::new("AA:BB:CC:DD:EE:FF", None),
    ]));
    let controller = controller_with(&transport);

    controller.refresh_endpoints();
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.endpoints.len(), 2);
    assert_eq!(snapshot.message, "Found 2 paired device(s)");

    let empty = Arc::new(FakeTransport::default());
    let controller = controller_with(&empty);
    controller.refresh_endpoints();
    assert!(controller.snapshot().message.starts_with("No paired devices"));
}

#[test]
fn observers_see_the_connection_sequence() {
    let transport = Arc::new(FakeTransport::default());
    let controller = controller_with(&transport);
    let (tx, rx) = mpsc::channel::<StatusSnapshot>();
    controller.subscribe(move |s| {
        let _ = tx.send(s.clone());
    });

    controller.select_endpoint(rc_car());
    let release = transport.hold_open();
    controller.connect();
    release.send(()).unwrap();
    controller.wait_idle();

    let mut states: Vec<ConnectionState> = rx.try_iter().map(|s| s.state).collect();
    states.dedup();
    assert_eq!(
        states,
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

#[test]
fn observer_can_call_back_into_the_controller() {
    let transport = Arc::new(FakeTransport::default());
    let controller = Arc::new(controller_with(&transport));
    let weak = Arc::downgrade(&controller);
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = stopped.clone();

    controller.subscribe(move |s| {
        // stop the car as soon as the link comes up
        if s.connected && !flag.swap(true, Ordering::SeqCst) {
            if let Some(controller) = weak.upgrade() {
                controller.stop();
            }
        }
    });
    controller.select_endpoint(rc_car());
    controller.connect();
    controller.wait_idle();
    controller.wait_idle();

    assert_eq!(transport.written(), "5S");
}

#[test]
fn shutdown_closes_the_link_and_rejects_new_work() {
    let (transport, controller) = connected();

    controller.shutdown();
    assert!(!transport.is_open());
    assert_eq!(controller.state(), ConnectionState::Disconnected);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.selected, None);
    assert!(!snapshot.connected);

    controller.connect();
    assert_eq!(controller.snapshot().message, "Controller has been shut down");
    controller.move_forward();
    controller.wait_idle();
    controller.shutdown();
    assert_eq!(transport.written(), "5");
}

#[test]
fn out_of_range_speed_sends_the_fallback_code() {
    let (transport, controller) = connected();

    controller.set_speed(0.3);
    controller.set_speed(1.5);
    controller.set_speed(-0.2);
    controller.wait_idle();

    assert_eq!(transport.written(), "535");
    assert_eq!(controller.snapshot().speed, 0);
}

#[test]
fn out_of_range_speed_publishes_the_clamped_level() {
    let (transport, controller) = connected();

    controller.set_speed(1.5);
    controller.wait_idle();

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.speed, 10);
    assert_eq!(snapshot.message, "Connected to RC Car");
    // '5' was already resent on connect
    assert_eq!(transport.written(), "5");
}

#[test]
fn commands_while_connecting_do_no_io() {
    let transport = Arc::new(FakeTransport::default());
    let controller = controller_with(&transport);
    controller.select_endpoint(rc_car());
    let release = transport.hold_open();

    controller.connect();
    controller.move_forward();
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Connecting);
    assert_eq!(snapshot.message, "Not connected to any device");

    release.send(()).unwrap();
    controller.wait_idle();
    assert_eq!(controller.state(), ConnectionState::Connected);
    assert_eq!(transport.written(), "5");
}

#[test]
fn link_dropped_while_idle_is_reported_on_next_command() {
    let (transport, controller) = connected();

    // peer went away without a failed write
    transport.open.store(false, Ordering::SeqCst);
    controller.move_backward();
    controller.wait_idle();

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(snapshot.message.contains("Connection lost"));
    assert_eq!(transport.written(), "5");
}
