//! The two-phase model query / mode switch exchange as a state machine.
//!
//! [`Handshake`] does no I/O. The caller submits the requests it returns and
//! feeds transfer completions back in; see [`crate::session`] for the driver.

use crate::catalog::{self, Resolved, WheelInfo};
use crate::error::TmError;
use crate::transport::TransferStatus;
use crate::wire::{self, ControlRequest};
use strum_macros::Display;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HandshakeState {
    Idle,
    QuerySent,
    ModelResolved,
    SwitchSent,
    Done,
    Errored,
}

/// The request a step belongs to, used to label errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    #[strum(to_string = "model query")]
    Query,
    #[strum(to_string = "mode switch")]
    Switch,
    #[strum(to_string = "setup packet")]
    Setup,
}

/// How a switch request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchOutcome {
    /// `None` when the switch was sent without querying the model first.
    pub wheel: Option<&'static WheelInfo>,
    pub switch_value: u16,
    /// `Complete`, or a tolerated `Stall`/`Protocol` error.
    pub status: TransferStatus,
}

#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    resolved: Option<Resolved>,
    switch_value: Option<u16>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
            resolved: None,
            switch_value: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn resolved(&self) -> Option<Resolved> {
        self.resolved
    }

    /// `Idle -> QuerySent`. Returns the query to submit.
    pub fn start(&mut self) -> Result<ControlRequest, TmError> {
        self.expect(HandshakeState::Idle, Phase::Query)?;
        self.state = HandshakeState::QuerySent;
        Ok(wire::encode_query_command())
    }

    /// `Idle -> SwitchSent`, skipping the query. Returns the switch to submit.
    pub fn start_direct_switch(&mut self, switch_value: u16) -> Result<ControlRequest, TmError> {
        self.expect(HandshakeState::Idle, Phase::Switch)?;
        self.switch_value = Some(switch_value);
        self.state = HandshakeState::SwitchSent;
        Ok(wire::encode_switch_command(switch_value))
    }

    /// `QuerySent -> ModelResolved | Errored`.
    pub fn on_query_complete(&mut self, status: TransferStatus, response: &[u8]) -> Result<Resolved, TmError> {
        self.expect(HandshakeState::QuerySent, Phase::Query)?;
        match Self::identify(status, response) {
            Ok(resolved) => {
                self.resolved = Some(resolved);
                self.state = HandshakeState::ModelResolved;
                Ok(resolved)
            }
            Err(e) => {
                self.state = HandshakeState::Errored;
                Err(e)
            }
        }
    }

    fn identify(status: TransferStatus, response: &[u8]) -> Result<Resolved, TmError> {
        if !status.is_ok() {
            return Err(TmError::QueryTransportError(status));
        }

        let response = wire::decode_probe_response(response)?;
        let (model, attachment) = (response.model(), response.attachment());
        let resolved = catalog::resolve(model, attachment).ok_or(TmError::UnknownModel(model))?;

        info!(
            attachment_found = resolved.attachment_matched,
            "Wheel with (model, attachment) = ({:#04x}, {:#04x}) is a {}",
            model,
            attachment,
            resolved.wheel.name
        );
        if !resolved.attachment_matched {
            warn!(
                "Attachment {:#04x} is unknown for model {:#04x}, using the {} switch code",
                attachment, model, resolved.wheel.name
            );
        }
        Ok(resolved)
    }

    /// `ModelResolved -> SwitchSent`. Returns the switch to submit.
    pub fn submit_switch(&mut self) -> Result<ControlRequest, TmError> {
        self.expect(HandshakeState::ModelResolved, Phase::Switch)?;
        let switch_value = match self.resolved {
            Some(resolved) => resolved.wheel.switch_value,
            None => return self.invalid(Phase::Switch),
        };
        self.switch_value = Some(switch_value);
        self.state = HandshakeState::SwitchSent;
        Ok(wire::encode_switch_command(switch_value))
    }

    /// `SwitchSent -> Done | Errored`.
    ///
    /// The wheel drops off the bus while switching, often before the status
    /// stage, so endpoint stalls and protocol errors count as success.
    pub fn on_switch_complete(&mut self, status: TransferStatus) -> Result<SwitchOutcome, TmError> {
        self.expect(HandshakeState::SwitchSent, Phase::Switch)?;
        match status {
            TransferStatus::Complete | TransferStatus::Stall | TransferStatus::Protocol => {
                self.state = HandshakeState::Done;
                Ok(SwitchOutcome {
                    wheel: self.resolved.map(|r| r.wheel),
                    switch_value: self.switch_value.unwrap_or_default(),
                    status,
                })
            }
            other => {
                self.state = HandshakeState::Errored;
                Err(TmError::SwitchTransportError(other))
            }
        }
    }

    /// The transport refused a request returned by this machine.
    pub fn submission_failed(&mut self, phase: Phase, reason: impl ToString) -> TmError {
        self.state = HandshakeState::Errored;
        TmError::SubmissionFailure {
            phase,
            reason: reason.to_string(),
        }
    }

    fn expect(&self, state: HandshakeState, phase: Phase) -> Result<(), TmError> {
        if self.state == state {
            Ok(())
        } else {
            self.invalid(phase)
        }
    }

    fn invalid<T>(&self, phase: Phase) -> Result<T, TmError> {
        Err(TmError::InvalidState {
            phase,
            state: self.state,
        })
    }
}
