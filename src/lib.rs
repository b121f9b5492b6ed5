// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Expose the Mercurial wire gate, classifier, and relay.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Write-access gate for Mercurial served over SSH.
//!
//! Client bytes are framed by [`wire::WireDecoder`], classified by
//! [`classify`], checked once per connection by [`gate::AccessGate`], and
//! forwarded verbatim to the backing `hg serve --stdio` process by
//! [`relay::PassthroughRelay`]. Backing process output flows back untouched.

/// Read/write classification of decoded commands.
pub mod classify;
/// Gate configuration loading.
pub mod config;
/// Per-connection write authorization.
pub mod gate;
/// Needs-update journal.
pub mod notify;
/// Full-duplex session relay.
pub mod relay;
/// Per-connection session state.
pub mod session;
/// Wire protocol framing.
pub mod wire;

pub use classify::{classify, Access};
pub use config::{load_config, GateConfig};
pub use gate::{AccessGate, Decision, Denial, WriteAuthorizer};
pub use relay::{
    PassthroughRelay, RelayConfig, RelayError, SessionEnd, SessionReport, WriteNotifier,
};
pub use session::ConnectionSession;
pub use wire::{
    DecoderLimits, DecoderState, Frame, Message, RawDataChunk, WireDecoder, WireError,
};
