use std::fmt;

/// A remote peer the controller can open a link to.
///
/// Equality and hashing only look at the address; the display name may be
/// withheld by the host (permission policy) or change between discoveries.
#[derive(Debug, Clone, Eq)]
pub struct Endpoint {
    address: String,
    name: Option<String>,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name: name.filter(|n| !n.trim().is_empty()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name shown to the operator, falling back to the address.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Discrete drive intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

/// Immutable view of the controller published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub state: ConnectionState,
    pub message: String,
    pub endpoints: Vec<Endpoint>,
    pub selected: Option<Endpoint>,
    /// Speed level, 0..=10
    pub speed: u8,
    /// Servo angle in degrees, 0..=180
    pub angle: f32,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            connected: false,
            state: ConnectionState::Disconnected,
            message: "Ready".to_string(),
            endpoints: Vec::new(),
            selected: None,
            speed: 5,
            angle: 90.0,
        }
    }
}
