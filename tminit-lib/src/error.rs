use crate::handshake::{HandshakeState, Phase};
use crate::transport::TransferStatus;
use thiserror::Error;

/// The primary error type for the `tminit` library.
#[derive(Error, Debug)]
pub enum TmError {
    #[error("No supported Thrustmaster wheel found. Is it connected?")]
    DeviceNotFound,

    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("Unable to read the device configuration: {0}")]
    Configuration(String),

    #[error("Failed to allocate a {size} byte transfer buffer")]
    AllocationFailure { size: usize },

    #[error("Transport rejected the request: {0}")]
    Rejected(String),

    #[error("Transport refused the {phase} request: {reason}")]
    SubmissionFailure { phase: Phase, reason: String },

    #[error("Request to get the wheel model failed: {0}")]
    QueryTransportError(TransferStatus),

    #[error("Unknown packet type {0:#06x}, unable to proceed further")]
    UnrecognizedResponse(u16),

    #[error("Unknown wheel model id {0:#04x}, unable to proceed further")]
    UnknownModel(u8),

    #[error("Request to change the wheel mode failed: {0}")]
    SwitchTransportError(TransferStatus),

    #[error("Setup packet {index} couldn't be sent: {status}")]
    QuirkPacketFailure { index: usize, status: TransferStatus },

    #[error("Wrong number of endpoints: expected at least 2, got {0}")]
    EndpointCount(usize),

    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Cannot perform the {phase} step while in state {state}")]
    InvalidState { phase: Phase, state: HandshakeState },

    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
