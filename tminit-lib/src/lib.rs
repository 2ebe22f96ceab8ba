pub mod catalog;
pub mod error;
pub mod handshake;
pub mod ids;
pub mod quirks;
pub mod session;
pub mod transport;
pub mod usb;
pub mod wire;

pub use error::TmError;
pub use session::{DeviceIdentity, DeviceSession, SessionOptions, SessionOutcome};
pub use transport::Transport;
