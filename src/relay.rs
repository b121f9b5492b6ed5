// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Relay a client session to the backing Mercurial process through the gate.
// Author: Lukas Bower

//! Full-duplex passthrough between the SSH client and the backing process.
//!
//! Client bytes are decoded, gated, and forwarded frame by frame; a frame's
//! bytes are written only after the gate allows it, and the next client read
//! waits until that write completes. Backing process output is copied to the
//! client unparsed. The two directions run concurrently in one task.

use std::error::Error as _;
use std::io;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::gate::{AccessGate, Decision, Denial, WriteAuthorizer};
use crate::session::ConnectionSession;
use crate::wire::{DecoderLimits, WireError};

/// Default number of client bytes read per poll.
pub const DEFAULT_READ_CHUNK: usize = 8 * 1024;

/// Receives the "repository needs update" signal after a session that wrote.
pub trait WriteNotifier {
    /// Called at most once per session, after it ends, if a write was allowed.
    fn on_write_occurred(&self, repository: &str);
}

impl<F> WriteNotifier for F
where
    F: Fn(&str),
{
    fn on_write_occurred(&self, repository: &str) {
        self(repository)
    }
}

/// Relay tuning shared by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Framing limits for the client stream.
    pub limits: DecoderLimits,
    /// Client bytes read per poll; bounds data held ahead of the backing process.
    pub read_chunk: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            limits: DecoderLimits::default(),
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Errors that end a session abnormally.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Reading or writing either channel failed.
    #[error("relay i/o failed")]
    Io(#[from] io::Error),
    /// The client stream could not be framed.
    #[error("client stream framing error")]
    Wire(#[from] WireError),
    /// A mutating command was refused.
    #[error("{0}")]
    Denied(Denial),
}

/// How a clean session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed its input and the backing process drained its output.
    ClientClosed,
    /// The backing process went away first, closing its output or its input.
    ProcessClosed,
}

/// Summary of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Repository served.
    pub repository: String,
    /// Which side ended the session.
    pub end: SessionEnd,
    /// True if any mutating frame was allowed.
    pub write_seen: bool,
    /// Frames forwarded to the backing process.
    pub frames_forwarded: u64,
    /// Bytes forwarded to the backing process.
    pub bytes_forwarded: u64,
    /// Bytes copied from the backing process to the client.
    pub bytes_returned: u64,
}

/// Drives one client session against one backing process.
#[derive(Debug)]
pub struct PassthroughRelay<A, N> {
    repository: String,
    config: RelayConfig,
    gate: AccessGate,
    authorizer: A,
    notifier: N,
}

impl<A, N> PassthroughRelay<A, N>
where
    A: WriteAuthorizer,
    N: WriteNotifier,
{
    /// Build a relay for `repository`.
    pub fn new(
        repository: impl Into<String>,
        config: RelayConfig,
        authorizer: A,
        notifier: N,
    ) -> Self {
        Self {
            repository: repository.into(),
            config,
            gate: AccessGate,
            authorizer,
            notifier,
        }
    }

    /// Repository served by this relay.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Run the session until either side closes, a write is denied, or the
    /// client stream fails to frame. All four channel ends are closed on return,
    /// and the notifier fires once if a write was allowed.
    pub async fn run<CI, CO, PI, PO>(
        &self,
        client_in: CI,
        client_out: CO,
        process_in: PI,
        process_out: PO,
    ) -> Result<SessionReport, RelayError>
    where
        CI: AsyncRead + Unpin,
        CO: AsyncWrite + Unpin,
        PI: AsyncWrite + Unpin,
        PO: AsyncRead + Unpin,
    {
        let mut session = ConnectionSession::new(self.repository.clone(), self.config.limits);
        let outcome = {
            let inbound = self.pump_inbound(&mut session, client_in, process_in);
            let outbound = copy_outbound(process_out, client_out);
            tokio::pin!(inbound);
            tokio::pin!(outbound);
            tokio::select! {
                inbound_result = &mut inbound => match inbound_result {
                    Ok(end) => {
                        debug!("{end:?} on {}; draining backing process", self.repository);
                        outbound
                            .await
                            .map(|returned| (end, returned))
                            .map_err(RelayError::from)
                    }
                    Err(err) => Err(err),
                },
                outbound_result = &mut outbound => {
                    debug!("backing process closed output for {}", self.repository);
                    outbound_result
                        .map(|returned| (SessionEnd::ProcessClosed, returned))
                        .map_err(RelayError::from)
                }
            }
        };

        if session.write_seen() {
            info!("marking {} as needing update", self.repository);
            self.notifier.on_write_occurred(&self.repository);
        }

        let (end, bytes_returned) = outcome.inspect_err(|err| match err.source() {
            Some(cause) => warn!("session for {} ended: {err}: {cause}", self.repository),
            None => warn!("session for {} ended: {err}", self.repository),
        })?;
        Ok(SessionReport {
            repository: self.repository.clone(),
            end,
            write_seen: session.write_seen(),
            frames_forwarded: session.frames_forwarded(),
            bytes_forwarded: session.bytes_forwarded(),
            bytes_returned,
        })
    }

    async fn pump_inbound<CI, PI>(
        &self,
        session: &mut ConnectionSession,
        mut client_in: CI,
        mut process_in: PI,
    ) -> Result<SessionEnd, RelayError>
    where
        CI: AsyncRead + Unpin,
        PI: AsyncWrite + Unpin,
    {
        let mut chunk = vec![0u8; self.config.read_chunk.max(1)];
        loop {
            let read = client_in.read(&mut chunk).await?;
            if read == 0 {
                session.finish()?;
                return process_end(process_in.shutdown().await, SessionEnd::ClientClosed);
            }
            for frame in session.ingest(&chunk[..read])? {
                match self.gate.check(session, frame, &self.authorizer) {
                    Decision::Allow(raw) => {
                        if let Err(err) = process_in.write_all(&raw).await {
                            return process_end(Err(err), SessionEnd::ProcessClosed);
                        }
                        session.record_forwarded(raw.len());
                    }
                    Decision::Deny(denial) => return Err(RelayError::Denied(denial)),
                }
            }
            if let Err(err) = process_in.flush().await {
                return process_end(Err(err), SessionEnd::ProcessClosed);
            }
        }
    }
}

/// Map the result of a write to the backing process onto a session end.
/// A broken pipe means the process exited, which ends the session normally.
fn process_end(result: io::Result<()>, end: SessionEnd) -> Result<SessionEnd, RelayError> {
    match result {
        Ok(()) => Ok(end),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(SessionEnd::ProcessClosed),
        Err(err) => Err(err.into()),
    }
}

async fn copy_outbound<PO, CO>(mut process_out: PO, mut client_out: CO) -> io::Result<u64>
where
    PO: AsyncRead + Unpin,
    CO: AsyncWrite + Unpin,
{
    let returned = tokio::io::copy(&mut process_out, &mut client_out).await?;
    client_out.shutdown().await?;
    Ok(returned)
}
