// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Enforce a single write authorization check per connection.
// Author: Lukas Bower

//! Write-access gate.
//!
//! Read-only frames always pass. The first mutating frame of a session asks
//! the [`WriteAuthorizer`]; a grant holds for the rest of the session and a
//! refusal closes it.

use std::fmt;

use log::{debug, info, warn};

use crate::classify::{classify, Access};
use crate::session::ConnectionSession;
use crate::wire::Frame;

/// External write-permission check for the connected identity.
pub trait WriteAuthorizer {
    /// Return true when the caller may modify the session's repository.
    fn authorize(&self) -> bool;
}

impl<F> WriteAuthorizer for F
where
    F: Fn() -> bool,
{
    fn authorize(&self) -> bool {
        self()
    }
}

/// Why a frame was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Repository the write targeted.
    pub repository: String,
    /// Command that required write access.
    pub command: String,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "write access to {} denied (command {})",
            self.repository, self.command
        )
    }
}

impl std::error::Error for Denial {}

/// Outcome of gating one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward these exact bytes to the backing process.
    Allow(Vec<u8>),
    /// Drop the frame and end the session.
    Deny(Denial),
}

/// Applies the per-session write check to decoded frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGate;

impl AccessGate {
    /// Gate `frame` for `session`, consulting `authorizer` at most once per session.
    pub fn check<A>(
        &self,
        session: &mut ConnectionSession,
        frame: Frame,
        authorizer: &A,
    ) -> Decision
    where
        A: WriteAuthorizer + ?Sized,
    {
        if session.is_denied() {
            return Decision::Deny(denial(session, &frame));
        }
        let access = classify(&frame);
        debug!("{} frame {frame}: {access:?}", session.repository());
        match access {
            Access::ReadOnly => Decision::Allow(frame.into_raw_bytes()),
            Access::Mutating if session.write_seen() => Decision::Allow(frame.into_raw_bytes()),
            Access::Mutating => {
                if authorizer.authorize() {
                    info!(
                        "write access granted for {} on {}",
                        session.repository(),
                        frame.command()
                    );
                    session.mark_write_seen();
                    Decision::Allow(frame.into_raw_bytes())
                } else {
                    let denial = denial(session, &frame);
                    warn!("{denial}");
                    session.mark_denied();
                    Decision::Deny(denial)
                }
            }
        }
    }
}

fn denial(session: &ConnectionSession, frame: &Frame) -> Denial {
    Denial {
        repository: session.repository().to_owned(),
        command: frame.command().to_owned(),
    }
}
