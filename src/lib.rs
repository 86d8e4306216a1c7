//! Operator-side controller for a remote vehicle on a single-byte serial link.
//!
//! - [`domain`] - command codec, connection state machine, status publisher, settings
//! - [`infrastructure`] - link transports and logging
//! - [`presentation`] - the console front end

pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::codec::{angle_code, speed_code, Command};
pub use domain::controller::{ConnectionController, ControlError, ControllerConfig};
pub use domain::models::{ConnectionState, Endpoint, Movement, StatusSnapshot};
pub use domain::status::{StatusPublisher, SubscriptionId};
pub use infrastructure::transport::{Transport, TransportError};
