pub mod logging;
pub mod transport;
