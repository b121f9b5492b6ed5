// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Exercise the passthrough relay end to end over in-memory pipes.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::cell::Cell;

use hgserve_gate::wire::Phase;
use hgserve_gate::{
    DecoderLimits, PassthroughRelay, RelayConfig, RelayError, SessionEnd, SessionReport,
    WireError,
};
use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt};

const HEADS: &[u8] = b"hello\nheads\n";
const PUSH: &[u8] =
    b"unbundle\nheads 5\nforce6\n\0\n\xff\nab0\npushkey\nnamespace 9\nbookmarkskey 3\ndevold 0\nnew 1\nx";
const RESPONSE: &[u8] = b"1\n\n2\nok";

struct Outcome {
    result: Result<SessionReport, RelayError>,
    received: Vec<u8>,
    returned: Vec<u8>,
    authorize_calls: usize,
    notified: Vec<String>,
}

async fn run_session(input: &[u8], grant: bool, read_chunk: usize) -> Outcome {
    let (client, gate_client) = duplex(64);
    let (gate_client_in, gate_client_out) = split(gate_client);
    let (backend, gate_backend) = duplex(64);
    let (gate_process_out, gate_process_in) = split(gate_backend);

    let calls = Cell::new(0);
    let notified = Cell::new(Vec::new());
    let relay = PassthroughRelay::new(
        "repos/widget",
        RelayConfig {
            limits: DecoderLimits::default(),
            read_chunk,
        },
        || {
            calls.set(calls.get() + 1);
            grant
        },
        |repository: &str| {
            let mut seen = notified.take();
            seen.push(repository.to_owned());
            notified.set(seen);
        },
    );

    let client_side = async {
        let (mut reader, mut writer) = split(client);
        let _ = writer.write_all(input).await;
        let _ = writer.shutdown().await;
        let mut returned = Vec::new();
        let _ = reader.read_to_end(&mut returned).await;
        returned
    };
    let backend_side = async {
        let (mut reader, mut writer) = split(backend);
        let mut received = Vec::new();
        let _ = reader.read_to_end(&mut received).await;
        let _ = writer.write_all(RESPONSE).await;
        let _ = writer.shutdown().await;
        received
    };
    let session = relay.run(gate_client_in, gate_client_out, gate_process_in, gate_process_out);

    let (returned, received, result) = tokio::join!(client_side, backend_side, session);
    Outcome {
        result,
        received,
        returned,
        authorize_calls: calls.get(),
        notified: notified.take(),
    }
}

#[tokio::test]
async fn allowed_session_forwards_bytes_verbatim() {
    let input = [HEADS, PUSH, HEADS].concat();
    let outcome = run_session(&input, true, 7).await;
    let report = outcome.result.expect("session");

    assert_eq!(outcome.received, input);
    assert_eq!(outcome.returned, RESPONSE);
    assert_eq!(outcome.authorize_calls, 1);
    assert_eq!(outcome.notified, vec!["repos/widget".to_owned()]);
    assert_eq!(report.end, SessionEnd::ClientClosed);
    assert!(report.write_seen);
    assert_eq!(report.bytes_forwarded, input.len() as u64);
    assert_eq!(report.bytes_returned, RESPONSE.len() as u64);
    // hello, heads, unbundle, 2 chunks, pushkey, hello, heads
    assert_eq!(report.frames_forwarded, 8);
}

#[tokio::test]
async fn read_only_session_does_not_notify() {
    let outcome = run_session(HEADS, false, 1).await;
    let report = outcome.result.expect("session");
    assert_eq!(outcome.received, HEADS);
    assert_eq!(outcome.authorize_calls, 0);
    assert!(outcome.notified.is_empty());
    assert!(!report.write_seen);
}

#[tokio::test]
async fn denied_write_forwards_only_read_prefix() {
    let input = [HEADS, PUSH, HEADS].concat();
    let outcome = run_session(&input, false, 4096).await;

    match outcome.result {
        Err(RelayError::Denied(denial)) => {
            assert_eq!(denial.repository, "repos/widget");
            assert_eq!(denial.command, "unbundle");
        }
        other => panic!("expected denial, got {other:?}"),
    }
    assert_eq!(outcome.received, HEADS);
    assert_eq!(outcome.authorize_calls, 1);
    assert!(outcome.notified.is_empty());
}

#[tokio::test]
async fn framing_error_ends_session() {
    let input = [HEADS, b"lookup\nkey x\n"].concat();
    let outcome = run_session(&input, true, 1).await;
    match outcome.result {
        Err(RelayError::Wire(WireError::InvalidLength(field))) => assert_eq!(field, "x"),
        other => panic!("expected framing error, got {other:?}"),
    }
    assert_eq!(outcome.received, HEADS);
    assert!(outcome.notified.is_empty());
}

#[tokio::test]
async fn client_closing_mid_message_is_truncation() {
    let input = [HEADS, b"lookup\nkey 3\nt"].concat();
    let outcome = run_session(&input, true, 4096).await;
    match outcome.result {
        Err(RelayError::Wire(WireError::Truncated { phase })) => assert_eq!(phase, Phase::Value),
        other => panic!("expected truncation, got {other:?}"),
    }
    assert_eq!(outcome.received, HEADS);
}

#[tokio::test]
async fn write_before_failure_still_notifies() {
    let input = [PUSH, b"lookup\nkey x\n"].concat();
    let outcome = run_session(&input, true, 1).await;
    assert!(matches!(outcome.result, Err(RelayError::Wire(_))));
    assert_eq!(outcome.received, PUSH);
    assert_eq!(outcome.notified.len(), 1);
}

#[tokio::test]
async fn backend_exit_while_client_sends_is_process_close() {
    let (client, gate_client) = duplex(64);
    let (gate_client_in, gate_client_out) = split(gate_client);
    let (mut backend, gate_backend) = duplex(64);
    let (gate_process_out, gate_process_in) = split(gate_backend);

    let relay = PassthroughRelay::new(
        "repos/widget",
        RelayConfig {
            limits: DecoderLimits::default(),
            read_chunk: 16,
        },
        || true,
        |_: &str| {},
    );
    let input = b"heads\n".repeat(200);

    let client_side = async {
        let (mut reader, mut writer) = split(client);
        let _ = writer.write_all(&input).await;
        let _ = writer.shutdown().await;
        let mut returned = Vec::new();
        let _ = reader.read_to_end(&mut returned).await;
        returned
    };
    let backend_side = async move {
        let mut first = [0u8; 6];
        backend.read_exact(&mut first).await.expect("first command");
        backend.write_all(RESPONSE).await.expect("response");
        drop(backend);
        first
    };
    let session = relay.run(gate_client_in, gate_client_out, gate_process_in, gate_process_out);

    let (returned, first, result) = tokio::join!(client_side, backend_side, session);
    let report = result.expect("process exit ends the session cleanly");
    assert_eq!(&first, b"heads\n");
    assert_eq!(report.end, SessionEnd::ProcessClosed);
    assert_eq!(returned, RESPONSE);
    assert!(report.bytes_forwarded < input.len() as u64);
}
