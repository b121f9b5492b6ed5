// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Classify decoded wire commands as read-only or mutating.
// Author: Lukas Bower

//! Read/write classification for decoded frames.
//!
//! Only commands in [`READ_ONLY_COMMANDS`] skip the write check. `batch` is
//! read-only when every sub-command it carries is. Anything unknown or
//! unparsable is treated as mutating.

use log::debug;
use thiserror::Error;

use crate::wire::{Frame, Message};

/// Access class of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// May run without write authorization.
    ReadOnly,
    /// Requires write authorization.
    Mutating,
}

impl Access {
    /// True for [`Access::Mutating`].
    #[must_use]
    pub fn is_mutating(self) -> bool {
        self == Access::Mutating
    }
}

/// Commands that never modify the repository.
pub const READ_ONLY_COMMANDS: &[&str] = &[
    "between",
    "branchmap",
    "branches",
    "capabilities",
    "changegroup",
    "changegroupsubset",
    "clonebundles",
    "clonebundles_manifest",
    "debugwireargs",
    "getbundle",
    "heads",
    "hello",
    "known",
    "listkeys",
    "lookup",
    "protocaps",
    "stream_out",
];

/// Commands known to modify the repository.
pub const MUTATING_COMMANDS: &[&str] = &["pushkey", "unbundle"];

const BATCH: &str = "batch";
const BATCH_CMDS_ARG: &str = "cmds";

/// Classify a command name on its own.
///
/// `batch` classifies as mutating here because its safety depends on its
/// arguments; use [`classify_message`] for decoded batches.
#[must_use]
pub fn classify_command(command: &str) -> Access {
    if READ_ONLY_COMMANDS.contains(&command) {
        Access::ReadOnly
    } else {
        Access::Mutating
    }
}

/// Classify a decoded command, inspecting `batch` sub-commands.
#[must_use]
pub fn classify_message(message: &Message) -> Access {
    if message.command() == BATCH {
        return classify_batch(message.named_arg(BATCH_CMDS_ARG));
    }
    classify_command(message.command())
}

/// Classify any decoded frame. Bundle chunks are always mutating.
#[must_use]
pub fn classify(frame: &Frame) -> Access {
    match frame {
        Frame::Command(message) => classify_message(message),
        Frame::Data(_) => Access::Mutating,
    }
}

/// Classify the `cmds` argument of a `batch` command.
#[must_use]
pub fn classify_batch(cmds: Option<&[u8]>) -> Access {
    let Some(cmds) = cmds.filter(|cmds| !cmds.is_empty()) else {
        return Access::Mutating;
    };
    match parse_batch(cmds) {
        Ok(invocations) => {
            if invocations
                .iter()
                .all(|invocation| classify_command(&invocation.command) == Access::ReadOnly)
            {
                Access::ReadOnly
            } else {
                Access::Mutating
            }
        }
        Err(err) => {
            debug!("unparsable batch cmds treated as mutating: {err}");
            Access::Mutating
        }
    }
}

/// One sub-command carried inside a `batch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInvocation {
    /// Sub-command name.
    pub command: String,
    /// Unescaped `key=value` arguments in wire order.
    pub args: Vec<(String, Vec<u8>)>,
}

/// Errors raised while parsing batch `cmds`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    /// An invocation had no command name.
    #[error("empty batch command")]
    EmptyCommand,
    /// A command or argument name was not valid UTF-8.
    #[error("batch name is not valid utf8")]
    InvalidUtf8,
    /// An argument lacked the `=` separator.
    #[error("batch argument without '='")]
    MalformedArgument,
    /// An escape sequence was not one of `:c :o :s :e`.
    #[error("invalid batch escape")]
    BadEscape,
}

/// Split batch `cmds` into sub-invocations.
///
/// Invocations are separated by `;`, the name from its arguments by the first
/// space, arguments by `,`, and keys from values by `=`. Those delimiters are
/// escaped inside keys and values as `:s`, `:o`, `:e`, with `:c` for `:`.
pub fn parse_batch(cmds: &[u8]) -> Result<Vec<BatchInvocation>, BatchError> {
    cmds.split(|byte| *byte == b';')
        .map(parse_invocation)
        .collect()
}

fn parse_invocation(invocation: &[u8]) -> Result<BatchInvocation, BatchError> {
    let (name, args) = match invocation.iter().position(|byte| *byte == b' ') {
        Some(idx) => (&invocation[..idx], &invocation[idx + 1..]),
        None => (invocation, &[][..]),
    };
    if name.is_empty() {
        return Err(BatchError::EmptyCommand);
    }
    let command = utf8(name)?;
    let mut parsed = Vec::new();
    if !args.is_empty() {
        for pair in args.split(|byte| *byte == b',') {
            let split = pair
                .iter()
                .position(|byte| *byte == b'=')
                .ok_or(BatchError::MalformedArgument)?;
            let key = utf8(&unescape(&pair[..split])?)?;
            let value = unescape(&pair[split + 1..])?;
            parsed.push((key, value));
        }
    }
    Ok(BatchInvocation {
        command,
        args: parsed,
    })
}

fn utf8(bytes: &[u8]) -> Result<String, BatchError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| BatchError::InvalidUtf8)
}

fn unescape(escaped: &[u8]) -> Result<Vec<u8>, BatchError> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut bytes = escaped.iter();
    while let Some(&byte) = bytes.next() {
        if byte != b':' {
            out.push(byte);
            continue;
        }
        let decoded = match bytes.next() {
            Some(b'c') => b':',
            Some(b'o') => b',',
            Some(b's') => b';',
            Some(b'e') => b'=',
            _ => return Err(BatchError::BadEscape),
        };
        out.push(decoded);
    }
    Ok(out)
}
