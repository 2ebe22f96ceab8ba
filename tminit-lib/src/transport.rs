//! The seam between the handshake and the USB stack.
//!
//! A submitted control request is represented by a [`PendingTransfer`] on the
//! submitting side and a [`TransferSlot`] on the transport side. The slot is
//! consumed by [`TransferSlot::complete`], so a transfer completes at most
//! once, and a dropped slot reads as [`TransferStatus::Cancelled`].

use crate::error::TmError;
use crate::wire::ControlRequest;
use std::future::Future;
use std::time::Duration;
use strum_macros::Display;
use tokio::sync::oneshot;

/// Final state of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TransferStatus {
    Complete,
    Cancelled,
    /// Endpoint halted (`EPIPE`).
    Stall,
    /// Low-level protocol violation on the bus (`EPROTO`).
    Protocol,
    Disconnected,
    TimedOut,
    Fault,
}

impl TransferStatus {
    pub fn is_ok(&self) -> bool {
        *self == TransferStatus::Complete
    }
}

/// What a transport hands back for a control request.
#[derive(Debug)]
pub struct Completion {
    pub status: TransferStatus,
    /// The buffer passed to [`Transport::submit_control`], with received data
    /// in `buffer[..actual_length]` for device-to-host requests.
    pub buffer: Vec<u8>,
    pub actual_length: usize,
}

impl Completion {
    pub fn new(status: TransferStatus, buffer: Vec<u8>, actual_length: usize) -> Self {
        Self {
            status,
            buffer,
            actual_length,
        }
    }

    pub fn cancelled(buffer: Vec<u8>) -> Self {
        Self::new(TransferStatus::Cancelled, buffer, 0)
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual_length.min(self.buffer.len())]
    }
}

/// Submitter's handle on an in-flight control transfer.
#[derive(Debug)]
pub struct PendingTransfer {
    completion: oneshot::Receiver<Completion>,
    cancel: oneshot::Sender<()>,
}

/// Transport's handle on an in-flight control transfer.
#[derive(Debug)]
pub struct TransferSlot {
    completion: oneshot::Sender<Completion>,
    cancel: Option<oneshot::Receiver<()>>,
}

impl PendingTransfer {
    pub fn channel() -> (PendingTransfer, TransferSlot) {
        let (completion_tx, completion_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        (
            PendingTransfer {
                completion: completion_rx,
                cancel: cancel_tx,
            },
            TransferSlot {
                completion: completion_tx,
                cancel: Some(cancel_rx),
            },
        )
    }

    /// Wait for the transport to finish the transfer.
    ///
    /// Cancel safe: dropping the returned future leaves the transfer pending.
    pub async fn wait(&mut self) -> Completion {
        match (&mut self.completion).await {
            Ok(completion) => completion,
            Err(_) => Completion::cancelled(Vec::new()),
        }
    }

    /// Ask the transport to abort the transfer and wait until it has let go of
    /// it. Nothing is delivered for this transfer afterwards.
    pub async fn cancel_and_wait(self) -> Completion {
        let PendingTransfer { completion, cancel } = self;
        let _ = cancel.send(());
        completion.await.unwrap_or_else(|_| Completion::cancelled(Vec::new()))
    }
}

impl TransferSlot {
    /// Resolves once the submitter cancels the transfer or drops its handle.
    pub async fn cancelled(&mut self) {
        if let Some(cancel) = self.cancel.as_mut() {
            let _ = cancel.await;
            self.cancel = None;
        }
    }

    pub fn complete(self, completion: Completion) {
        let _ = self.completion.send(completion);
    }
}

/// A USB device as seen by the handshake.
pub trait Transport: Send + Sync + 'static {
    /// Queue a control request on the default pipe.
    ///
    /// `buffer` receives the data stage of device-to-host requests and must be
    /// returned in the [`Completion`]. An `Err` means nothing was queued.
    fn submit_control(&self, request: ControlRequest, buffer: Vec<u8>) -> Result<PendingTransfer, TmError>;

    /// Send one interrupt OUT packet and wait for it to be acknowledged.
    fn send_interrupt(
        &self,
        endpoint: u8,
        packet: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<(), TransferStatus>> + Send;
}
