// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate unbundle chunk framing, binary values, and fatal framing errors.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use hgserve_gate::wire::Phase;
use hgserve_gate::{
    ConnectionSession, DecoderLimits, DecoderState, Frame, WireDecoder, WireError,
};

fn decode(input: &[u8]) -> Result<Vec<Frame>, WireError> {
    WireDecoder::default()
        .feed(DecoderState::Command, input.to_vec())
        .map(|fed| fed.frames)
}

#[test]
fn unbundle_chunks_end_with_empty_terminal_chunk() {
    let frames = decode(b"unbundle\nheads 5\nforce5\nHG20\n0\n").expect("decode");
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].command(), "unbundle");

    let chunks: Vec<_> = frames[1..]
        .iter()
        .map(|frame| match frame {
            Frame::Data(chunk) => chunk,
            Frame::Command(message) => panic!("unexpected command {}", message.command()),
        })
        .collect();
    assert_eq!(chunks[0].payload_len(), 5);
    assert_eq!(chunks[0].payload(), b"HG20\n");
    assert!(!chunks[0].is_terminal());
    assert_eq!(chunks[1].payload_len(), 0);
    assert!(chunks[1].payload().is_empty());
    assert!(chunks[1].is_terminal());
}

#[test]
fn value_with_newline_and_nul_is_atomic() {
    let value = b"line one\n\0line two\n";
    let mut input = format!("lookup\nkey {}\n", value.len()).into_bytes();
    input.extend_from_slice(value);
    input.extend_from_slice(b"heads\n");

    let frames = decode(&input).expect("decode");
    assert_eq!(frames.len(), 2);
    match &frames[0] {
        Frame::Command(message) => {
            assert_eq!(message.named_arg("key"), Some(&value[..]));
            assert_eq!(message.named_args().len(), 1);
        }
        Frame::Data(_) => panic!("expected lookup"),
    }
    assert_eq!(frames[1].command(), "heads");
}

#[test]
fn chunk_length_must_be_decimal() {
    let err = decode(b"unbundle\nheads 5\nforce-1\n").expect_err("bad chunk length");
    assert_eq!(err, WireError::InvalidLength("-1".to_owned()));
}

#[test]
fn header_name_must_not_be_empty() {
    let err = decode(b"lookup\n 3\n").expect_err("empty name");
    assert!(matches!(err, WireError::MalformedHeader(_)));
}

#[test]
fn oversized_chunk_is_rejected() {
    let decoder = WireDecoder::new(DecoderLimits {
        max_value_len: 1024,
        ..DecoderLimits::default()
    });
    let err = decoder
        .feed(DecoderState::DataLength, b"1025\n".to_vec())
        .expect_err("chunk too large");
    assert_eq!(
        err,
        WireError::ValueTooLarge {
            declared: 1025,
            max: 1024
        }
    );
}

#[test]
fn end_of_stream_inside_bundle_is_truncation() {
    let mut session = ConnectionSession::new("repo", DecoderLimits::default());
    let frames = session
        .ingest(b"unbundle\nheads 5\nforce10\nabc")
        .expect("partial bundle");
    assert_eq!(frames.len(), 1);
    assert_eq!(session.phase(), Phase::DataBytes);
    assert_eq!(
        session.finish(),
        Err(WireError::Truncated {
            phase: Phase::DataBytes
        })
    );
}

#[test]
fn end_of_stream_between_bundle_chunks_is_truncation() {
    let mut session = ConnectionSession::new("repo", DecoderLimits::default());
    session
        .ingest(b"unbundle\nheads 5\nforce3\nabc")
        .expect("chunk");
    assert_eq!(
        session.finish(),
        Err(WireError::Truncated {
            phase: Phase::DataLength
        })
    );
}
