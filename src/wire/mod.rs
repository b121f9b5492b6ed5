// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define Mercurial SSH wire frames, limits, and framing errors.
// Author: Lukas Bower

//! Mercurial SSH wire protocol framing.
//!
//! A client stream is a sequence of commands, each a command line followed by
//! length-prefixed arguments. After a complete `unbundle` the stream switches
//! to length-prefixed bundle chunks until a zero-length chunk. Decoded frames
//! keep the exact bytes they were decoded from so the relay can forward them
//! without re-encoding.

use std::collections::BTreeMap;
use std::fmt;

mod decoder;
pub mod schema;

pub use decoder::{DecoderState, Fed, PendingCommand, Phase, WireDecoder};

/// Pseudo command name carried by bundle data chunks.
pub const RAW_DATA_COMMAND: &str = "<raw-data>";

/// Default maximum length of a command or header line, terminator excluded.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

/// Default maximum declared length of an argument value or bundle chunk.
pub const DEFAULT_MAX_VALUE_LEN: usize = 64 * 1024 * 1024;

/// Bounds applied while decoding a client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderLimits {
    /// Longest accepted command or header line.
    pub max_line_len: usize,
    /// Largest accepted declared value or chunk length.
    pub max_value_len: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_line_len: DEFAULT_MAX_LINE_LEN,
            max_value_len: DEFAULT_MAX_VALUE_LEN,
        }
    }
}

/// Fatal framing errors. Any of these ends the session.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    /// A line ran past the limit without a terminator.
    #[error("line exceeds {max} bytes")]
    LineTooLong {
        /// Configured maximum line length.
        max: usize,
    },
    /// An argument header did not have the `<name> <length>` shape.
    #[error("malformed argument header {0:?}")]
    MalformedHeader(String),
    /// A length or count field was not a decimal number.
    #[error("invalid length field {0:?}")]
    InvalidLength(String),
    /// A declared length exceeded the configured bound.
    #[error("declared length {declared} exceeds limit {max}")]
    ValueTooLarge {
        /// Length declared on the wire.
        declared: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The stream ended while a message was incomplete.
    #[error("stream ended mid-message in {phase} state")]
    Truncated {
        /// Decoder phase at end of stream.
        phase: Phase,
    },
}

/// A fully decoded protocol command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    command: String,
    named_args: BTreeMap<String, Vec<u8>>,
    variadic_args: Option<Vec<(String, Vec<u8>)>>,
    raw: Vec<u8>,
}

impl Message {
    pub(crate) fn new(
        command: String,
        named_args: BTreeMap<String, Vec<u8>>,
        variadic_args: Option<Vec<(String, Vec<u8>)>>,
        raw: Vec<u8>,
    ) -> Self {
        Self {
            command,
            named_args,
            variadic_args,
            raw,
        }
    }

    /// Command name as sent on the command line.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Look up a named argument value.
    #[must_use]
    pub fn named_arg(&self, name: &str) -> Option<&[u8]> {
        self.named_args.get(name).map(Vec::as_slice)
    }

    /// All named arguments.
    #[must_use]
    pub fn named_args(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.named_args
    }

    /// Variadic (`*`) arguments in wire order, when the command sent a `*` block.
    #[must_use]
    pub fn variadic_args(&self) -> Option<&[(String, Vec<u8>)]> {
        self.variadic_args.as_deref()
    }

    /// Exact bytes this message was decoded from.
    #[must_use]
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Consume the message, keeping only its wire bytes.
    #[must_use]
    pub fn into_raw_bytes(self) -> Vec<u8> {
        self.raw
    }
}

/// One length-prefixed chunk of an `unbundle` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDataChunk {
    payload_len: usize,
    raw: Vec<u8>,
}

impl RawDataChunk {
    pub(crate) fn new(payload_len: usize, raw: Vec<u8>) -> Self {
        debug_assert!(raw.len() > payload_len);
        Self { payload_len, raw }
    }

    /// Declared payload length; zero marks the end of the bundle.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Payload bytes without the length line.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.raw[self.raw.len() - self.payload_len..]
    }

    /// True for the zero-length chunk closing the bundle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.payload_len == 0
    }

    /// Exact bytes of the length line and payload.
    #[must_use]
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Consume the chunk, keeping only its wire bytes.
    #[must_use]
    pub fn into_raw_bytes(self) -> Vec<u8> {
        self.raw
    }
}

/// Unit emitted by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A protocol command with its arguments.
    Command(Message),
    /// A bundle chunk following `unbundle`.
    Data(RawDataChunk),
}

impl Frame {
    /// Command name, or [`RAW_DATA_COMMAND`] for bundle chunks.
    #[must_use]
    pub fn command(&self) -> &str {
        match self {
            Frame::Command(message) => message.command(),
            Frame::Data(_) => RAW_DATA_COMMAND,
        }
    }

    /// Exact bytes this frame was decoded from.
    #[must_use]
    pub fn raw_bytes(&self) -> &[u8] {
        match self {
            Frame::Command(message) => message.raw_bytes(),
            Frame::Data(chunk) => chunk.raw_bytes(),
        }
    }

    /// Consume the frame, keeping only its wire bytes.
    #[must_use]
    pub fn into_raw_bytes(self) -> Vec<u8> {
        match self {
            Frame::Command(message) => message.into_raw_bytes(),
            Frame::Data(chunk) => chunk.into_raw_bytes(),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Command(message) => {
                write!(f, "{} ({} bytes)", message.command(), message.raw.len())
            }
            Frame::Data(chunk) => {
                write!(f, "{RAW_DATA_COMMAND} ({} byte payload)", chunk.payload_len)
            }
        }
    }
}
