//! End-to-end handshakes against a scripted transport

mod common;

use common::*;

async fn run(transport: &Arc<MockTransport>, product_id: u16) -> Result<SessionOutcome, TmError> {
    let session = DeviceSession::attach(transport.clone(), wheel_identity(product_id)).await?;
    session.finished().await
}

fn switched(outcome: SessionOutcome) -> tminit_lib::handshake::SwitchOutcome {
    match outcome {
        SessionOutcome::Switched(outcome) => outcome,
        other => panic!("Expected the switch to complete, got {:?}", other),
    }
}

#[tokio::test]
async fn test_t300rs_long_reply() {
    let transport = MockTransport::new([
        Reply::ok(&hex_to_bytes(T300RS_REPLY)),
        Reply::status(TransferStatus::Complete),
    ]);

    let outcome = switched(run(&transport, PID_FFB_WHEEL).await.unwrap());
    assert_eq!(outcome.wheel.map(|w| w.name), Some("Thrustmaster T300RS"));
    assert_eq!(outcome.switch_value, 0x0005);

    let controls = transport.controls();
    assert_eq!(controls.len(), 2);
    assert_eq!(controls[0], wire::encode_query_command());
    assert_eq!(controls[1].request, REQUEST_CHANGE_MODE);
    assert_eq!(controls[1].value, 0x0005);
    assert_eq!(hex::encode(controls[1].to_setup_packet()), "4153050000000000");
}

#[tokio::test]
async fn test_short_reply_unknown_attachment_falls_back() {
    // tag 0x0047, attachment 0x01, model 0x02
    let reply = [0x47, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02];
    let transport = MockTransport::new([Reply::ok(&reply), Reply::status(TransferStatus::Complete)]);

    let outcome = switched(run(&transport, PID_FFB_WHEEL).await.unwrap());
    assert_eq!(
        outcome.wheel.map(|w| w.name),
        Some("Thrustmaster T300RS (Missing Attachment)")
    );
    assert_eq!(outcome.switch_value, 0x0005);
    assert_eq!(transport.controls()[1].value, 0x0005);
}

#[tokio::test]
async fn test_switch_protocol_errors_count_as_success() {
    for status in [TransferStatus::Protocol, TransferStatus::Stall] {
        let transport = MockTransport::new([Reply::ok(&hex_to_bytes(T300RS_REPLY)), Reply::status(status)]);
        let outcome = switched(run(&transport, PID_FFB_WHEEL).await.unwrap());
        assert_eq!(outcome.status, status);
    }
}

#[tokio::test]
async fn test_switch_transport_error() {
    let transport = MockTransport::new([
        Reply::ok(&hex_to_bytes(T300RS_REPLY)),
        Reply::status(TransferStatus::Disconnected),
    ]);
    let result = run(&transport, PID_FFB_WHEEL).await;
    assert!(matches!(
        result,
        Err(TmError::SwitchTransportError(TransferStatus::Disconnected))
    ));
    // no retry
    assert_eq!(transport.controls().len(), 2);
}

#[tokio::test]
async fn test_t128_switches_without_query() {
    let transport = MockTransport::new([Reply::status(TransferStatus::Protocol)]);

    let outcome = switched(run(&transport, PID_T128).await.unwrap());
    assert_eq!(outcome.wheel, None);
    assert_eq!(outcome.switch_value, 0x000b);

    let controls = transport.controls();
    assert_eq!(controls.len(), 1);
    assert_eq!(controls[0], wire::encode_switch_command(0x000b));
    assert!(controls.iter().all(|c| c.request != REQUEST_MODEL));
    assert!(transport.interrupts().is_empty());
}

#[tokio::test]
async fn test_query_transport_error() {
    let transport = MockTransport::new([Reply::Respond {
        status: TransferStatus::Stall,
        data: hex_to_bytes(T300RS_REPLY),
    }]);
    let result = run(&transport, PID_FFB_WHEEL).await;
    assert!(matches!(result, Err(TmError::QueryTransportError(TransferStatus::Stall))));
    assert_eq!(transport.controls().len(), 1);
}

#[tokio::test]
async fn test_unrecognized_reply() {
    let reply = hex_to_bytes("01000000000006020000000000000000");
    let transport = MockTransport::new([Reply::ok(&reply)]);
    let result = run(&transport, PID_FFB_WHEEL).await;
    assert!(matches!(result, Err(TmError::UnrecognizedResponse(0x0001))));
    assert_eq!(transport.controls().len(), 1);
}

#[tokio::test]
async fn test_unknown_model() {
    // TMX: model 0x04, attachment 0x07
    let reply = hex_to_bytes("49000000000007040000000000000000");
    let transport = MockTransport::new([Reply::ok(&reply)]);
    let result = run(&transport, PID_FFB_WHEEL).await;
    assert!(matches!(result, Err(TmError::UnknownModel(0x04))));
    assert_eq!(transport.controls().len(), 1);
}

#[tokio::test]
async fn test_truncated_reply() {
    let transport = MockTransport::new([Reply::ok(&[0x49, 0x00, 0x00, 0x00])]);
    let result = run(&transport, PID_FFB_WHEEL).await;
    assert!(matches!(result, Err(TmError::InsufficientData { expected: 8, actual: 4 })));
}

#[tokio::test]
async fn test_query_submission_failure_fails_attach() {
    let transport = MockTransport::new([Reply::Refuse]);
    let result = DeviceSession::attach(transport.clone(), wheel_identity(PID_FFB_WHEEL)).await;
    assert!(matches!(
        result,
        Err(TmError::SubmissionFailure { phase: Phase::Query, .. })
    ));
}

#[tokio::test]
async fn test_switch_submission_failure() {
    let transport = MockTransport::new([Reply::ok(&hex_to_bytes(T300RS_REPLY)), Reply::Refuse]);
    let result = run(&transport, PID_FFB_WHEEL).await;
    assert!(matches!(
        result,
        Err(TmError::SubmissionFailure { phase: Phase::Switch, .. })
    ));
}

#[tokio::test]
async fn test_detach_during_query() {
    let transport = MockTransport::new([Reply::Hang]);
    let session = DeviceSession::attach(transport.clone(), wheel_identity(PID_FFB_WHEEL))
        .await
        .unwrap();

    let outcome = session.detach().await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Detached {
            state: HandshakeState::QuerySent
        }
    );
    assert_eq!(transport.cancelled(), 1);
    // the switch never went out
    assert_eq!(transport.controls().len(), 1);
}

#[tokio::test]
async fn test_detach_during_switch() {
    let transport = MockTransport::new([Reply::ok(&hex_to_bytes(T300RS_REPLY)), Reply::Hang]);
    let session = DeviceSession::attach(transport.clone(), wheel_identity(PID_FFB_WHEEL))
        .await
        .unwrap();

    // let the query completion through before detaching
    for _ in 0..100 {
        if transport.controls().len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let outcome = session.detach().await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Detached {
            state: HandshakeState::SwitchSent
        }
    );
    assert_eq!(transport.cancelled(), 1);
}

#[tokio::test]
async fn test_detach_after_completion() {
    let transport = MockTransport::new([Reply::status(TransferStatus::Complete)]);
    let session = DeviceSession::attach(transport.clone(), wheel_identity(PID_T128))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let outcome = session.detach().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Switched(_)));
    assert_eq!(transport.cancelled(), 0);
}

#[tokio::test]
async fn test_dropping_session_cancels() {
    let transport = MockTransport::new([Reply::Hang]);
    let session = DeviceSession::attach(transport.clone(), wheel_identity(PID_FFB_WHEEL))
        .await
        .unwrap();
    drop(session);
    assert!(transport.wait_cancelled(1).await);
}

#[tokio::test]
async fn test_finished_within_detaches_silent_wheel() {
    let transport = MockTransport::new([Reply::Hang]);
    let session = DeviceSession::attach(transport.clone(), wheel_identity(PID_FFB_WHEEL))
        .await
        .unwrap();

    let outcome = session
        .finished_within(std::time::Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Detached {
            state: HandshakeState::QuerySent
        }
    );
    assert_eq!(transport.cancelled(), 1);
}

#[tokio::test]
async fn test_stop_signal_detaches_after_cancellation_completes() {
    let transport = MockTransport::new([Reply::Hang]);
    let session = DeviceSession::attach(transport.clone(), wheel_identity(PID_FFB_WHEEL))
        .await
        .unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let waiter = tokio::spawn(session.finished_or_detach(async move {
        let _ = stop_rx.await;
    }));
    stop_tx.send(()).unwrap();

    let outcome = waiter.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Detached {
            state: HandshakeState::QuerySent
        }
    );
    // the transport had already given the request back when the call returned
    assert_eq!(transport.cancelled(), 1);
    assert_eq!(transport.controls().len(), 1);
}

#[tokio::test]
async fn test_stop_signal_after_switch_keeps_outcome() {
    let transport = MockTransport::new([
        Reply::ok(&hex_to_bytes(T300RS_REPLY)),
        Reply::status(TransferStatus::Complete),
    ]);
    let session = DeviceSession::attach(transport.clone(), wheel_identity(PID_FFB_WHEEL))
        .await
        .unwrap();

    let outcome = session.finished_or_detach(std::future::pending::<()>()).await.unwrap();
    assert_eq!(switched(outcome).switch_value, 0x0005);
    assert_eq!(transport.cancelled(), 0);
}

#[tokio::test]
async fn test_eight_byte_long_reply_switches() {
    let reply = [0x49, 0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x02];
    let transport = MockTransport::new([Reply::ok(&reply), Reply::status(TransferStatus::Complete)]);

    let outcome = switched(run(&transport, PID_FFB_WHEEL).await.unwrap());
    assert_eq!(outcome.wheel.map(|w| w.name), Some("Thrustmaster T300RS"));
    assert_eq!(transport.controls()[1].value, 0x0005);
}
