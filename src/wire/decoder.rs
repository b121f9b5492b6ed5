// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Incrementally decode Mercurial SSH wire frames from arbitrary chunks.
// Author: Lukas Bower

//! Pure, resumable decoder for the client side of the SSH wire protocol.
//!
//! [`WireDecoder::feed`] takes the current [`DecoderState`] and the unconsumed
//! input, decodes as many frames as the input allows, and hands back the new
//! state together with whatever bytes it could not consume yet. Feeding a
//! stream in one call or one byte at a time yields the same frames.

use std::collections::BTreeMap;
use std::fmt;

use log::trace;

use super::schema::{self, ArgSpec};
use super::{DecoderLimits, Frame, Message, RawDataChunk, WireError};

/// Command after which the stream carries bundle chunks.
const UNBUNDLE: &str = "unbundle";

/// Upper bound on capacity reserved for a declared `*` count.
const VARIADIC_RESERVE: usize = 16;

/// Decoder phase without the partially decoded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Waiting for a command line.
    Command,
    /// Waiting for the next argument header, or ready to emit.
    Arguments,
    /// Waiting for a named argument value.
    Value,
    /// Inside a `*` block, waiting for the next header.
    Argv,
    /// Inside a `*` block, waiting for a value.
    ArgvValue,
    /// Waiting for a bundle chunk length line.
    DataLength,
    /// Waiting for bundle chunk payload bytes.
    DataBytes,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Command => "command",
            Phase::Arguments => "arguments",
            Phase::Value => "value",
            Phase::Argv => "argv",
            Phase::ArgvValue => "argv-value",
            Phase::DataLength => "data-length",
            Phase::DataBytes => "data-bytes",
        };
        f.write_str(label)
    }
}

/// A command whose arguments are still being collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    command: String,
    schema: &'static [ArgSpec],
    named_args: BTreeMap<String, Vec<u8>>,
    variadic_args: Option<Vec<(String, Vec<u8>)>>,
    headers_read: usize,
    raw: Vec<u8>,
}

impl PendingCommand {
    fn new(command: String, raw: Vec<u8>) -> Self {
        let schema = schema::schema_for(&command);
        Self {
            command,
            schema,
            named_args: BTreeMap::new(),
            variadic_args: None,
            headers_read: 0,
            raw,
        }
    }

    /// Command name being collected.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Bytes consumed so far for this command.
    #[must_use]
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    fn is_complete(&self) -> bool {
        self.headers_read >= self.schema.len()
    }

    fn into_message(self) -> Message {
        Message::new(self.command, self.named_args, self.variadic_args, self.raw)
    }
}

/// Decoder state threaded through [`WireDecoder::feed`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DecoderState {
    /// Waiting for a command line.
    #[default]
    Command,
    /// Collecting argument headers for a command.
    Arguments(PendingCommand),
    /// Waiting for `len` bytes of the named argument `name`.
    Value {
        /// Command being collected.
        pending: PendingCommand,
        /// Argument name from the header.
        name: String,
        /// Declared value length.
        len: usize,
    },
    /// Inside a `*` block with `remaining` headers left.
    Argv {
        /// Command being collected.
        pending: PendingCommand,
        /// Headers still expected in the block.
        remaining: usize,
    },
    /// Waiting for `len` bytes of the variadic argument `name`.
    ArgvValue {
        /// Command being collected.
        pending: PendingCommand,
        /// Headers still expected after this value.
        remaining: usize,
        /// Argument name from the header.
        name: String,
        /// Declared value length.
        len: usize,
    },
    /// Waiting for a bundle chunk length line.
    DataLength,
    /// Collecting `remaining` more payload bytes of a chunk.
    DataBytes {
        /// Length line plus payload consumed so far.
        raw: Vec<u8>,
        /// Declared payload length.
        payload_len: usize,
        /// Payload bytes still expected.
        remaining: usize,
    },
}

impl DecoderState {
    /// Phase label for this state.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            DecoderState::Command => Phase::Command,
            DecoderState::Arguments(_) => Phase::Arguments,
            DecoderState::Value { .. } => Phase::Value,
            DecoderState::Argv { .. } => Phase::Argv,
            DecoderState::ArgvValue { .. } => Phase::ArgvValue,
            DecoderState::DataLength => Phase::DataLength,
            DecoderState::DataBytes { .. } => Phase::DataBytes,
        }
    }

    /// True when no partially decoded frame is held.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, DecoderState::Command)
    }
}

/// Result of one [`WireDecoder::feed`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fed {
    /// State to pass to the next call.
    pub state: DecoderState,
    /// Unconsumed input; append new bytes before the next call.
    pub buffer: Vec<u8>,
    /// Frames completed during this call, in stream order.
    pub frames: Vec<Frame>,
}

/// Stateless decoder configured with framing limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireDecoder {
    limits: DecoderLimits,
}

impl WireDecoder {
    /// Create a decoder enforcing `limits`.
    #[must_use]
    pub fn new(limits: DecoderLimits) -> Self {
        Self { limits }
    }

    /// Limits enforced by this decoder.
    #[must_use]
    pub fn limits(&self) -> DecoderLimits {
        self.limits
    }

    /// Decode as many frames as `buffer` allows, starting from `state`.
    ///
    /// Never waits for input: when the buffer runs dry mid-frame the partial
    /// frame is kept in the returned state and the call returns.
    pub fn feed(&self, state: DecoderState, mut buffer: Vec<u8>) -> Result<Fed, WireError> {
        let mut input = Input {
            bytes: &buffer,
            pos: 0,
            limits: self.limits,
        };
        let mut frames = Vec::new();
        let mut state = state;
        loop {
            let (next, progressed) = step(state, &mut input, &mut frames)?;
            state = next;
            if !progressed {
                break;
            }
        }
        let consumed = input.pos;
        buffer.drain(..consumed);
        Ok(Fed {
            state,
            buffer,
            frames,
        })
    }
}

struct Input<'a> {
    bytes: &'a [u8],
    pos: usize,
    limits: DecoderLimits,
}

impl<'a> Input<'a> {
    fn available(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Consume one `\n`-terminated line, returning it with its terminator.
    fn take_line(&mut self) -> Result<Option<&'a [u8]>, WireError> {
        let bytes: &'a [u8] = self.bytes;
        let rest = &bytes[self.pos..];
        let max = self.limits.max_line_len;
        match rest.iter().position(|byte| *byte == b'\n') {
            Some(idx) if idx > max => Err(WireError::LineTooLong { max }),
            Some(idx) => {
                self.pos += idx + 1;
                Ok(Some(&rest[..=idx]))
            }
            None if rest.len() > max => Err(WireError::LineTooLong { max }),
            None => Ok(None),
        }
    }

    fn take_exact(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.available() < len {
            return None;
        }
        let all: &'a [u8] = self.bytes;
        let bytes = &all[self.pos..self.pos + len];
        self.pos += len;
        Some(bytes)
    }

    fn take_up_to(&mut self, len: usize) -> &'a [u8] {
        let take = len.min(self.available());
        let all: &'a [u8] = self.bytes;
        let bytes = &all[self.pos..self.pos + take];
        self.pos += take;
        bytes
    }

    fn check_len(&self, declared: usize) -> Result<usize, WireError> {
        let max = self.limits.max_value_len;
        if declared > max {
            return Err(WireError::ValueTooLarge { declared, max });
        }
        Ok(declared)
    }
}

type Step = (DecoderState, bool);

fn step(
    state: DecoderState,
    input: &mut Input<'_>,
    frames: &mut Vec<Frame>,
) -> Result<Step, WireError> {
    match state {
        DecoderState::Command => {
            let Some(line) = input.take_line()? else {
                return Ok((DecoderState::Command, false));
            };
            let command = String::from_utf8_lossy(strip_newline(line)).into_owned();
            trace!("wire command line {command:?}");
            Ok((
                DecoderState::Arguments(PendingCommand::new(command, line.to_vec())),
                true,
            ))
        }
        DecoderState::Arguments(mut pending) => {
            if pending.is_complete() {
                let next = if pending.command == UNBUNDLE {
                    DecoderState::DataLength
                } else {
                    DecoderState::Command
                };
                frames.push(Frame::Command(pending.into_message()));
                return Ok((next, true));
            }
            let Some(line) = input.take_line()? else {
                return Ok((DecoderState::Arguments(pending), false));
            };
            let (name, declared) = parse_header(line)?;
            pending.raw.extend_from_slice(line);
            pending.headers_read += 1;
            if name == "*" {
                pending
                    .variadic_args
                    .get_or_insert_with(|| Vec::with_capacity(declared.min(VARIADIC_RESERVE)));
                return Ok((
                    DecoderState::Argv {
                        pending,
                        remaining: declared,
                    },
                    true,
                ));
            }
            let len = input.check_len(declared)?;
            Ok((DecoderState::Value { pending, name, len }, true))
        }
        DecoderState::Value {
            mut pending,
            name,
            len,
        } => {
            let Some(value) = input.take_exact(len) else {
                return Ok((DecoderState::Value { pending, name, len }, false));
            };
            pending.raw.extend_from_slice(value);
            pending.named_args.insert(name, value.to_vec());
            Ok((DecoderState::Arguments(pending), true))
        }
        DecoderState::Argv {
            mut pending,
            remaining,
        } => {
            if remaining == 0 {
                return Ok((DecoderState::Arguments(pending), true));
            }
            let Some(line) = input.take_line()? else {
                return Ok((DecoderState::Argv { pending, remaining }, false));
            };
            let (name, declared) = parse_header(line)?;
            let len = input.check_len(declared)?;
            pending.raw.extend_from_slice(line);
            Ok((
                DecoderState::ArgvValue {
                    pending,
                    remaining: remaining - 1,
                    name,
                    len,
                },
                true,
            ))
        }
        DecoderState::ArgvValue {
            mut pending,
            remaining,
            name,
            len,
        } => {
            let Some(value) = input.take_exact(len) else {
                return Ok((
                    DecoderState::ArgvValue {
                        pending,
                        remaining,
                        name,
                        len,
                    },
                    false,
                ));
            };
            pending.raw.extend_from_slice(value);
            pending
                .variadic_args
                .get_or_insert_with(Vec::new)
                .push((name, value.to_vec()));
            Ok((DecoderState::Argv { pending, remaining }, true))
        }
        DecoderState::DataLength => {
            let Some(line) = input.take_line()? else {
                return Ok((DecoderState::DataLength, false));
            };
            let declared = parse_decimal(strip_newline(line))?;
            if declared == 0 {
                frames.push(Frame::Data(RawDataChunk::new(0, line.to_vec())));
                return Ok((DecoderState::Command, true));
            }
            let payload_len = input.check_len(declared)?;
            let mut raw = Vec::with_capacity(line.len() + payload_len);
            raw.extend_from_slice(line);
            Ok((
                DecoderState::DataBytes {
                    raw,
                    payload_len,
                    remaining: payload_len,
                },
                true,
            ))
        }
        DecoderState::DataBytes {
            mut raw,
            payload_len,
            remaining,
        } => {
            let chunk = input.take_up_to(remaining);
            raw.extend_from_slice(chunk);
            let remaining = remaining - chunk.len();
            if remaining == 0 {
                frames.push(Frame::Data(RawDataChunk::new(payload_len, raw)));
                return Ok((DecoderState::DataLength, true));
            }
            Ok((
                DecoderState::DataBytes {
                    raw,
                    payload_len,
                    remaining,
                },
                false,
            ))
        }
    }
}

fn strip_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

/// Parse a `<name> <decimal>` header line.
fn parse_header(line: &[u8]) -> Result<(String, usize), WireError> {
    let body = strip_newline(line);
    let malformed = || WireError::MalformedHeader(String::from_utf8_lossy(body).into_owned());
    let split = body.iter().position(|byte| *byte == b' ').ok_or_else(malformed)?;
    let (name, digits) = (&body[..split], &body[split + 1..]);
    if name.is_empty() || name.iter().any(u8::is_ascii_whitespace) {
        return Err(malformed());
    }
    let name = std::str::from_utf8(name).map_err(|_| malformed())?;
    let declared = parse_decimal(digits)?;
    Ok((name.to_owned(), declared))
}

fn parse_decimal(digits: &[u8]) -> Result<usize, WireError> {
    let invalid = || WireError::InvalidLength(String::from_utf8_lossy(digits).into_owned());
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    digits.iter().try_fold(0usize, |acc, digit| {
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(usize::from(digit - b'0')))
            .ok_or_else(invalid)
    })
}
