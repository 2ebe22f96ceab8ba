//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use std::sync::Arc;
#[allow(unused_imports)]
pub use tminit_lib::catalog::{self, WheelInfo};
#[allow(unused_imports)]
pub use tminit_lib::error::TmError;
#[allow(unused_imports)]
pub use tminit_lib::handshake::{HandshakeState, Phase};
#[allow(unused_imports)]
pub use tminit_lib::ids::{PID_FFB_WHEEL, PID_T128, VENDOR_ID};
#[allow(unused_imports)]
pub use tminit_lib::quirks::SETUP_PACKETS;
#[allow(unused_imports)]
pub use tminit_lib::session::{DeviceIdentity, DeviceSession, SessionOptions, SessionOutcome};
#[allow(unused_imports)]
pub use tminit_lib::transport::{Completion, PendingTransfer, TransferStatus, Transport};
#[allow(unused_imports)]
pub use tminit_lib::wire::{self, ControlRequest, REQUEST_CHANGE_MODE, REQUEST_MODEL};

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Vec<u8> {
    hex::decode(hex_data).expect("Failed to decode hex")
}

/// Model query reply of a T300RS with its stock wheel (tag 0x0049)
#[allow(dead_code)]
pub const T300RS_REPLY: &str = "49000000000006020000000000000000";

/// Interrupt OUT endpoint the setup packets go to in [`wheel_identity`]
#[allow(dead_code)]
pub const SETUP_ENDPOINT: u8 = 0x01;

#[allow(dead_code)]
pub fn wheel_identity(product_id: u16) -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: VENDOR_ID,
        product_id,
        endpoints: vec![0x81, SETUP_ENDPOINT],
    }
}

/// How the mock answers the next control request.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Reply {
    /// Complete right away with this status and data.
    Respond { status: TransferStatus, data: Vec<u8> },
    /// Refuse to queue the request.
    Refuse,
    /// Never complete unless cancelled.
    Hang,
}

#[allow(dead_code)]
impl Reply {
    pub fn ok(data: &[u8]) -> Self {
        Reply::Respond {
            status: TransferStatus::Complete,
            data: data.to_vec(),
        }
    }

    pub fn status(status: TransferStatus) -> Self {
        Reply::Respond {
            status,
            data: Vec::new(),
        }
    }
}

/// Scripted transport that records everything sent to it.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<Reply>>,
    fail_interrupt: Option<(usize, TransferStatus)>,
    controls: Mutex<Vec<ControlRequest>>,
    interrupts: Mutex<Vec<(u8, Vec<u8>)>>,
    cancelled: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        })
    }

    /// Like [`MockTransport::new`], failing the `index`th interrupt packet.
    pub fn failing_interrupt(
        replies: impl IntoIterator<Item = Reply>,
        index: usize,
        status: TransferStatus,
    ) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            fail_interrupt: Some((index, status)),
            ..Default::default()
        })
    }

    pub fn controls(&self) -> Vec<ControlRequest> {
        self.controls.lock().unwrap().clone()
    }

    pub fn interrupts(&self) -> Vec<(u8, Vec<u8>)> {
        self.interrupts.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Poll until `count` transfers were cancelled or a second has passed.
    pub async fn wait_cancelled(&self, count: usize) -> bool {
        for _ in 0..100 {
            if self.cancelled() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Transport for MockTransport {
    fn submit_control(&self, request: ControlRequest, mut buffer: Vec<u8>) -> Result<PendingTransfer, TmError> {
        self.controls.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Hang);

        let (pending, mut slot) = PendingTransfer::channel();
        let cancelled = self.cancelled.clone();
        match reply {
            Reply::Refuse => return Err(TmError::Rejected("device is gone".to_string())),
            Reply::Respond { status, data } => {
                let n = data.len().min(buffer.len());
                buffer[..n].copy_from_slice(&data[..n]);
                slot.complete(Completion::new(status, buffer, n));
            }
            Reply::Hang => {
                tokio::spawn(async move {
                    slot.cancelled().await;
                    cancelled.fetch_add(1, Ordering::SeqCst);
                    slot.complete(Completion::cancelled(buffer));
                });
            }
        }
        Ok(pending)
    }

    async fn send_interrupt(&self, endpoint: u8, packet: &[u8], _timeout: Duration) -> Result<(), TransferStatus> {
        let index = {
            let mut interrupts = self.interrupts.lock().unwrap();
            interrupts.push((endpoint, packet.to_vec()));
            interrupts.len() - 1
        };
        match self.fail_interrupt {
            Some((failing, status)) if failing == index => Err(status),
            _ => Ok(()),
        }
    }
}
