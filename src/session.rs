// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Track per-connection decoder state and write authorization status.
// Author: Lukas Bower

//! Per-connection session state.

use std::mem;

use log::{debug, warn};

use crate::wire::{DecoderLimits, DecoderState, Frame, Phase, WireDecoder, WireError};

/// State owned by a single client connection.
///
/// Sessions never share state; each connection creates its own. Once closed
/// (by a framing error or a denied write) a session ignores further input.
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    repository: String,
    decoder: WireDecoder,
    state: DecoderState,
    buffer: Vec<u8>,
    write_seen: bool,
    denied: bool,
    closed: bool,
    frames_forwarded: u64,
    bytes_forwarded: u64,
}

impl ConnectionSession {
    /// Open a session for `repository` with the supplied decoder limits.
    #[must_use]
    pub fn new(repository: impl Into<String>, limits: DecoderLimits) -> Self {
        Self {
            repository: repository.into(),
            decoder: WireDecoder::new(limits),
            state: DecoderState::Command,
            buffer: Vec::new(),
            write_seen: false,
            denied: false,
            closed: false,
            frames_forwarded: 0,
            bytes_forwarded: 0,
        }
    }

    /// Repository this session serves.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Append client bytes and return every frame they complete.
    ///
    /// A framing error closes the session and discards buffered input.
    pub fn ingest(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, WireError> {
        if self.closed {
            debug!("discarding {} bytes on closed session", bytes.len());
            return Ok(Vec::new());
        }
        let mut buffer = mem::take(&mut self.buffer);
        buffer.extend_from_slice(bytes);
        let state = mem::take(&mut self.state);
        match self.decoder.feed(state, buffer) {
            Ok(fed) => {
                self.state = fed.state;
                self.buffer = fed.buffer;
                Ok(fed.frames)
            }
            Err(err) => {
                warn!("framing error on {}: {err}", self.repository);
                self.close();
                Err(err)
            }
        }
    }

    /// Validate that the client stopped on a frame boundary.
    pub fn finish(&mut self) -> Result<(), WireError> {
        if self.closed || (self.state.is_idle() && self.buffer.is_empty()) {
            return Ok(());
        }
        let phase = self.state.phase();
        debug!(
            "client closed {} in {phase} with {} buffered bytes",
            self.repository,
            self.buffer.len()
        );
        self.close();
        Err(WireError::Truncated { phase })
    }

    /// Current decoder phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Number of received bytes not yet part of an emitted frame or pending state.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// True once a mutating frame has been authorized.
    #[must_use]
    pub fn write_seen(&self) -> bool {
        self.write_seen
    }

    /// True once a write authorization has been refused.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.denied
    }

    /// True once the session stopped accepting input.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Frames forwarded to the backing process.
    #[must_use]
    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded
    }

    /// Bytes forwarded to the backing process.
    #[must_use]
    pub fn bytes_forwarded(&self) -> u64 {
        self.bytes_forwarded
    }

    pub(crate) fn mark_write_seen(&mut self) {
        self.write_seen = true;
    }

    pub(crate) fn mark_denied(&mut self) {
        self.denied = true;
        self.close();
    }

    pub(crate) fn record_forwarded(&mut self, len: usize) {
        self.frames_forwarded += 1;
        self.bytes_forwarded += len as u64;
    }

    fn close(&mut self) {
        self.closed = true;
        self.state = DecoderState::Command;
        self.buffer = Vec::new();
    }
}
