// USB identifiers for Thrustmaster wheels handled by this crate

/// Thrustmaster vendor ID.
pub const VENDOR_ID: u16 = 0x044f;

/// "Thrustmaster FFB Wheel": the generic mode every supported wheel boots into.
pub const PID_FFB_WHEEL: u16 = 0xb65d;

/// Generic mode reported by some firmware revisions.
pub const PID_FFB_WHEEL_ALT: u16 = 0xb664;

/// T128, which resets itself when queried for its model.
pub const PID_T128: u16 = 0xb69c;

/// Product IDs this crate knows how to switch.
pub const SUPPORTED_PRODUCT_IDS: &[u16] = &[PID_FFB_WHEEL, PID_FFB_WHEEL_ALT, PID_T128];

/// Interface claimed for the handshake.
pub const INTERFACE: u8 = 0;

pub fn is_supported(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == VENDOR_ID && SUPPORTED_PRODUCT_IDS.contains(&product_id)
}
