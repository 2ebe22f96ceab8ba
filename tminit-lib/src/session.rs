//! One attached wheel and its handshake.
//!
//! [`DeviceSession::attach`] runs the pre-init step and submits the first
//! request, then hands the in-flight transfer to a task that advances the
//! [`Handshake`] as completions arrive. The task owns every transfer buffer.
//! On detach it cancels the outstanding request and waits for the transport
//! to give the buffer back before exiting.

use crate::error::TmError;
use crate::handshake::{Handshake, HandshakeState, Phase, SwitchOutcome};
use crate::quirks::{self, PreInit};
use crate::transport::{PendingTransfer, Transport};
use crate::wire::{ControlRequest, MODEL_RESPONSE_LEN};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Identity of an attached device as reported by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Endpoint addresses of the active interface, in descriptor order.
    pub endpoints: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Query the model without sending the setup packets first.
    pub skip_setup_packets: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The switch was accepted; the wheel re-enumerates in full-feature mode.
    Switched(SwitchOutcome),
    /// Torn down before the handshake finished.
    Detached { state: HandshakeState },
}

pub struct DeviceSession {
    identity: DeviceIdentity,
    detach: oneshot::Sender<()>,
    task: JoinHandle<Result<SessionOutcome, TmError>>,
}

impl DeviceSession {
    pub async fn attach<T: Transport>(transport: Arc<T>, identity: DeviceIdentity) -> Result<Self, TmError> {
        Self::attach_with(transport, identity, SessionOptions::default()).await
    }

    /// Start the handshake on a freshly attached device.
    ///
    /// Fails if the first request cannot be submitted; everything after that
    /// is reported by [`DeviceSession::finished`].
    pub async fn attach_with<T: Transport>(
        transport: Arc<T>,
        identity: DeviceIdentity,
        options: SessionOptions,
    ) -> Result<Self, TmError> {
        let mut handshake = Handshake::new();

        let (phase, request, buffer) = match quirks::select(&identity) {
            PreInit::DirectSwitch(switch_value) => {
                info!(
                    "Product {:#06x} resets when queried, sending switch {:#06x} directly",
                    identity.product_id, switch_value
                );
                (Phase::Switch, handshake.start_direct_switch(switch_value)?, Vec::new())
            }
            PreInit::Stabilize => {
                if options.skip_setup_packets {
                    info!("Skipping setup packets");
                } else if let Err(e) = quirks::send_setup_packets(transport.as_ref(), &identity).await {
                    warn!(
                        vid = identity.vendor_id,
                        pid = identity.product_id,
                        "Setup packets not delivered, querying anyway: {}",
                        e
                    );
                }
                let buffer = allocate(MODEL_RESPONSE_LEN as usize)?;
                (Phase::Query, handshake.start()?, buffer)
            }
        };

        let pending = submit(transport.as_ref(), &identity, &mut handshake, phase, request, buffer)?;

        let (detach_tx, detach_rx) = oneshot::channel();
        let task = tokio::spawn(drive(transport, identity.clone(), handshake, pending, detach_rx));

        Ok(Self {
            identity,
            detach: detach_tx,
            task,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Wait for the handshake to end on its own.
    pub async fn finished(self) -> Result<SessionOutcome, TmError> {
        let DeviceSession { detach, task, .. } = self;
        let result = task.await?;
        drop(detach);
        result
    }

    /// Wait for the handshake to end, detaching if it takes longer than
    /// `timeout`.
    pub async fn finished_within(self, timeout: Duration) -> Result<SessionOutcome, TmError> {
        let (vendor_id, product_id) = (self.identity.vendor_id, self.identity.product_id);
        self.finished_or_detach(async {
            tokio::time::sleep(timeout).await;
            warn!(vid = vendor_id, pid = product_id, "No answer after {:?}, detaching", timeout);
        })
        .await
    }

    /// Wait for the handshake to end, detaching as soon as `stop` resolves.
    ///
    /// On detach this returns only after the transport has released the
    /// outstanding request.
    pub async fn finished_or_detach<F: Future<Output = ()>>(mut self, stop: F) -> Result<SessionOutcome, TmError> {
        let result = tokio::select! {
            result = &mut self.task => Some(result),
            _ = stop => None,
        };
        match result {
            Some(result) => result?,
            None => self.detach().await,
        }
    }

    /// Tear the session down, cancelling any outstanding request.
    ///
    /// Returns once the transport has released the request, with whatever
    /// the handshake had reached. A session that already ended reports its
    /// own result.
    pub async fn detach(self) -> Result<SessionOutcome, TmError> {
        let DeviceSession { detach, task, .. } = self;
        let _ = detach.send(());
        task.await?
    }
}

fn allocate(size: usize) -> Result<Vec<u8>, TmError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| TmError::AllocationFailure { size })?;
    buffer.resize(size, 0);
    Ok(buffer)
}

fn submit<T: Transport>(
    transport: &T,
    identity: &DeviceIdentity,
    handshake: &mut Handshake,
    phase: Phase,
    request: ControlRequest,
    buffer: Vec<u8>,
) -> Result<PendingTransfer, TmError> {
    debug!(setup = hex::encode(request.to_setup_packet()), "Submitting {}", phase);
    transport
        .submit_control(request, buffer)
        .map_err(|e| report(identity, phase, handshake.submission_failed(phase, e)))
}

fn report(identity: &DeviceIdentity, phase: Phase, err: TmError) -> TmError {
    error!(
        vid = identity.vendor_id,
        pid = identity.product_id,
        %phase,
        "Unable to initialize this wheel: {}",
        err
    );
    err
}

async fn drive<T: Transport>(
    transport: Arc<T>,
    identity: DeviceIdentity,
    mut handshake: Handshake,
    mut pending: PendingTransfer,
    mut detach: oneshot::Receiver<()>,
) -> Result<SessionOutcome, TmError> {
    loop {
        let completion = tokio::select! {
            biased;
            _ = &mut detach => {
                let state = handshake.state();
                let cancelled = pending.cancel_and_wait().await;
                info!(%state, status = %cancelled.status, "Session detached");
                return Ok(SessionOutcome::Detached { state });
            }
            completion = pending.wait() => completion,
        };

        match handshake.state() {
            HandshakeState::QuerySent => {
                debug!(bytes = hex::encode(completion.data()), status = %completion.status, "Model query complete");
                handshake
                    .on_query_complete(completion.status, completion.data())
                    .map_err(|e| report(&identity, Phase::Query, e))?;
                let request = handshake.submit_switch()?;
                pending = submit(transport.as_ref(), &identity, &mut handshake, Phase::Switch, request, Vec::new())?;
            }
            HandshakeState::SwitchSent => {
                let outcome = handshake
                    .on_switch_complete(completion.status)
                    .map_err(|e| report(&identity, Phase::Switch, e))?;
                info!(status = %outcome.status, "Success, the wheel should have been initialized!");
                return Ok(SessionOutcome::Switched(outcome));
            }
            state => {
                return Err(TmError::InvalidState {
                    phase: Phase::Query,
                    state,
                });
            }
        }
    }
}
