//! Device specific steps that run before the model query.

use crate::error::TmError;
use crate::ids::PID_T128;
use crate::session::DeviceIdentity;
use crate::transport::Transport;
use std::time::Duration;
use tracing::{debug, info};

/// Switch code the T128 needs; it resets itself if asked for its model.
pub const T128_SWITCH_VALUE: u16 = 0x000b;

/// Per-packet timeout for the setup packets.
pub const SETUP_PACKET_TIMEOUT: Duration = Duration::from_secs(5);

// Sent to the second endpoint before querying. Without them some hosts crash
// while a T300RS initializes; other wheels accept them without side effects.
#[rustfmt::skip]
pub const SETUP_PACKETS: [&[u8]; 5] = [
    &[0x42, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x0a, 0x04, 0x90, 0x03, 0x00, 0x00, 0x00, 0x00],
    &[0x0a, 0x04, 0x00, 0x0c, 0x00, 0x00, 0x00, 0x00],
    &[0x0a, 0x04, 0x12, 0x10, 0x00, 0x00, 0x00, 0x00],
    &[0x0a, 0x04, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreInit {
    /// Send the switch right away with this value, without a model query.
    DirectSwitch(u16),
    /// Send [`SETUP_PACKETS`], then query the model.
    Stabilize,
}

pub fn select(identity: &DeviceIdentity) -> PreInit {
    match identity.product_id {
        PID_T128 => PreInit::DirectSwitch(T128_SWITCH_VALUE),
        _ => PreInit::Stabilize,
    }
}

/// Send [`SETUP_PACKETS`] one by one over the interface's second endpoint.
///
/// Stops at the first packet that fails. Failures are for the caller to log;
/// the query goes ahead either way.
pub async fn send_setup_packets<T: Transport>(transport: &T, identity: &DeviceIdentity) -> Result<(), TmError> {
    let endpoint = match identity.endpoints.get(1) {
        Some(&endpoint) => endpoint,
        None => return Err(TmError::EndpointCount(identity.endpoints.len())),
    };

    for (index, packet) in SETUP_PACKETS.iter().enumerate() {
        debug!(endpoint, bytes = hex::encode(packet), "Setup packet {}", index);
        transport
            .send_interrupt(endpoint, packet, SETUP_PACKET_TIMEOUT)
            .await
            .map_err(|status| TmError::QuirkPacketFailure { index, status })?;
    }

    info!("Sent {} setup packets to endpoint {:#04x}", SETUP_PACKETS.len(), endpoint);
    Ok(())
}
