// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Record repositories that need an update scan after a push.
// Author: Lukas Bower

//! Needs-update journal.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::relay::WriteNotifier;

/// Event name written for every record.
pub const NEEDS_UPDATE_EVENT: &str = "needs-update";

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedsUpdateRecord {
    /// Repository that received a write.
    pub repository: String,
    /// Always [`NEEDS_UPDATE_EVENT`].
    pub event: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

/// Appends a JSON line per written repository to a journal file.
///
/// Journal failures are logged and swallowed: the push already happened and
/// must not be reported to the client as failed.
#[derive(Debug, Clone, Default)]
pub struct JournalNotifier {
    journal: Option<PathBuf>,
}

impl JournalNotifier {
    /// Write records to `journal`, or only log them when `None`.
    #[must_use]
    pub fn new(journal: Option<PathBuf>) -> Self {
        Self { journal }
    }

    /// Journal path, if any.
    #[must_use]
    pub fn journal(&self) -> Option<&Path> {
        self.journal.as_deref()
    }

    fn append(path: &Path, record: &NeedsUpdateRecord) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        file.write_all(&line)
    }
}

impl WriteNotifier for JournalNotifier {
    fn on_write_occurred(&self, repository: &str) {
        let record = NeedsUpdateRecord {
            repository: repository.to_owned(),
            event: NEEDS_UPDATE_EVENT.to_owned(),
            timestamp: Utc::now().to_rfc3339(),
        };
        let Some(path) = self.journal.as_deref() else {
            debug!("{repository} needs update (no journal configured)");
            return;
        };
        if let Err(err) = Self::append(path, &record) {
            warn!(
                "failed to record needs-update for {repository} in {}: {err}",
                path.display()
            );
        }
    }
}
