// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate the once-per-connection write authorization check.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::cell::Cell;

use hgserve_gate::{AccessGate, ConnectionSession, Decision, DecoderLimits};

const HEADS: &[u8] = b"heads\n";
const PUSHKEY: &[u8] = b"pushkey\nnamespace 9\nbookmarkskey 3\ndevold 0\nnew 4\nabcd";

fn gate_stream(input: &[u8], grant: bool) -> (Vec<Decision>, usize, ConnectionSession) {
    let mut session = ConnectionSession::new("repo", DecoderLimits::default());
    let calls = Cell::new(0);
    let authorizer = || {
        calls.set(calls.get() + 1);
        grant
    };
    let mut decisions = Vec::new();
    for frame in session.ingest(input).expect("decode") {
        let decision = AccessGate.check(&mut session, frame, &authorizer);
        let denied = matches!(decision, Decision::Deny(_));
        decisions.push(decision);
        if denied {
            break;
        }
    }
    (decisions, calls.get(), session)
}

#[test]
fn read_write_write_read_authorizes_once() {
    let input = [HEADS, PUSHKEY, PUSHKEY, HEADS].concat();
    let (decisions, calls, session) = gate_stream(&input, true);
    assert_eq!(calls, 1);
    assert_eq!(decisions.len(), 4);
    let forwarded: Vec<u8> = decisions
        .into_iter()
        .flat_map(|decision| match decision {
            Decision::Allow(raw) => raw,
            Decision::Deny(denial) => panic!("unexpected {denial}"),
        })
        .collect();
    assert_eq!(forwarded, input);
    assert!(session.write_seen());
}

#[test]
fn read_only_session_never_authorizes() {
    let input = [HEADS, b"capabilities\n", HEADS].concat();
    let (decisions, calls, session) = gate_stream(&input, false);
    assert_eq!(calls, 0);
    assert_eq!(decisions.len(), 3);
    assert!(!session.write_seen());
}

#[test]
fn denial_stops_at_first_write() {
    let input = [HEADS, PUSHKEY, HEADS].concat();
    let (decisions, calls, mut session) = gate_stream(&input, false);
    assert_eq!(calls, 1);
    assert_eq!(decisions.len(), 2);
    assert!(matches!(decisions[0], Decision::Allow(_)));
    match &decisions[1] {
        Decision::Deny(denial) => {
            assert_eq!(denial.repository, "repo");
            assert_eq!(denial.command, "pushkey");
        }
        Decision::Allow(_) => panic!("write was allowed"),
    }
    assert!(session.is_denied());
    assert!(!session.write_seen());
    assert!(session.ingest(HEADS).expect("closed").is_empty());
}

#[test]
fn unbundle_grant_covers_its_chunks() {
    let input = b"unbundle\nheads 5\nforce3\nabc0\n";
    let (decisions, calls, session) = gate_stream(input, true);
    assert_eq!(calls, 1);
    assert_eq!(decisions.len(), 3);
    assert!(decisions
        .iter()
        .all(|decision| matches!(decision, Decision::Allow(_))));
    assert!(session.write_seen());
}
