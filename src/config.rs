// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Load and validate hgserve-gate configuration from TOML and environment.
// Author: Lukas Bower

//! Gate configuration.
//!
//! Every TOML section is optional; missing keys fall back to the built-in
//! defaults. Environment overrides are applied after the file and the merged
//! result is validated before use.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::gate::WriteAuthorizer;
use crate::relay::{RelayConfig, DEFAULT_READ_CHUNK};
use crate::wire::{DecoderLimits, DEFAULT_MAX_LINE_LEN, DEFAULT_MAX_VALUE_LEN};

/// Smallest accepted `max_line_len`; shorter limits reject ordinary headers.
pub const MIN_LINE_LEN: usize = 16;

/// Environment override for `decoder.max_line_len`.
pub const ENV_MAX_LINE_LEN: &str = "HGSERVE_GATE_MAX_LINE_LEN";
/// Environment override for `decoder.max_value_len`.
pub const ENV_MAX_VALUE_LEN: &str = "HGSERVE_GATE_MAX_VALUE_LEN";
/// Environment override for `relay.read_chunk`.
pub const ENV_READ_CHUNK: &str = "HGSERVE_GATE_READ_CHUNK";

/// Complete gate configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateConfig {
    /// Relay and decoder tuning.
    pub relay: RelayConfig,
    /// Backing process settings.
    pub backend: BackendConfig,
    /// Write access policy.
    pub access: AccessPolicy,
    /// Needs-update journal location.
    pub notify: NotifyConfig,
}

/// Backing process settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Mercurial executable used to serve the repository.
    pub hg: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            hg: PathBuf::from("hg"),
        }
    }
}

/// Identities allowed to write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Identities granted write access.
    pub writers: Vec<String>,
    /// Grant write access to every identity.
    pub allow_all_writes: bool,
}

impl AccessPolicy {
    /// Return true when `identity` may write.
    #[must_use]
    pub fn allows_write(&self, identity: &str) -> bool {
        self.allow_all_writes || self.writers.iter().any(|writer| writer == identity)
    }

    /// Bind the policy to the connected identity.
    #[must_use]
    pub fn authorizer_for(&self, identity: impl Into<String>) -> PolicyAuthorizer {
        PolicyAuthorizer {
            identity: identity.into(),
            policy: self.clone(),
        }
    }
}

/// [`WriteAuthorizer`] backed by an [`AccessPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyAuthorizer {
    identity: String,
    policy: AccessPolicy,
}

impl PolicyAuthorizer {
    /// Identity being authorized.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl WriteAuthorizer for PolicyAuthorizer {
    fn authorize(&self) -> bool {
        self.policy.allows_write(&self.identity)
    }
}

/// Where needs-update records are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyConfig {
    /// JSON lines journal; `None` disables the journal.
    pub journal: Option<PathBuf>,
}

/// Optional values layered over a loaded configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Override `decoder.max_line_len`.
    pub max_line_len: Option<usize>,
    /// Override `decoder.max_value_len`.
    pub max_value_len: Option<usize>,
    /// Override `relay.read_chunk`.
    pub read_chunk: Option<usize>,
}

impl ConfigOverrides {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_line_len: parse_env_number(ENV_MAX_LINE_LEN)?,
            max_value_len: parse_env_number(ENV_MAX_VALUE_LEN)?,
            read_chunk: parse_env_number(ENV_READ_CHUNK)?,
        })
    }
}

impl GateConfig {
    /// Apply overrides and return the validated result.
    pub fn with_overrides(self, overrides: &ConfigOverrides) -> Result<Self> {
        let mut updated = self;
        if let Some(value) = overrides.max_line_len {
            updated.relay.limits.max_line_len = value;
        }
        if let Some(value) = overrides.max_value_len {
            updated.relay.limits.max_value_len = value;
        }
        if let Some(value) = overrides.read_chunk {
            updated.relay.read_chunk = value;
        }
        validate_config(&updated)?;
        Ok(updated)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct ConfigToml {
    decoder: DecoderToml,
    relay: RelayToml,
    backend: BackendToml,
    access: AccessToml,
    notify: NotifyToml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct DecoderToml {
    max_line_len: Option<usize>,
    max_value_len: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RelayToml {
    read_chunk: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct BackendToml {
    hg: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct AccessToml {
    writers: Vec<String>,
    allow_all_writes: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct NotifyToml {
    journal: Option<PathBuf>,
}

/// Parse configuration text.
pub fn parse_config(text: &str) -> Result<GateConfig> {
    let parsed: ConfigToml = toml::from_str(text).context("invalid gate configuration TOML")?;
    let config = GateConfig {
        relay: RelayConfig {
            limits: DecoderLimits {
                max_line_len: parsed.decoder.max_line_len.unwrap_or(DEFAULT_MAX_LINE_LEN),
                max_value_len: parsed.decoder.max_value_len.unwrap_or(DEFAULT_MAX_VALUE_LEN),
            },
            read_chunk: parsed.relay.read_chunk.unwrap_or(DEFAULT_READ_CHUNK),
        },
        backend: BackendConfig {
            hg: parsed.backend.hg.unwrap_or_else(|| PathBuf::from("hg")),
        },
        access: AccessPolicy {
            writers: parsed.access.writers,
            allow_all_writes: parsed.access.allow_all_writes,
        },
        notify: NotifyConfig {
            journal: parsed.notify.journal,
        },
    };
    validate_config(&config)?;
    Ok(config)
}

/// Load and validate configuration from `path`.
pub fn load_config(path: &Path) -> Result<GateConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read gate config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("invalid gate config {}", path.display()))
}

fn validate_config(config: &GateConfig) -> Result<()> {
    let limits = config.relay.limits;
    if limits.max_line_len < MIN_LINE_LEN {
        return Err(anyhow!(
            "decoder max_line_len {} must be >= {MIN_LINE_LEN}",
            limits.max_line_len
        ));
    }
    if limits.max_value_len == 0 {
        return Err(anyhow!("decoder max_value_len must be >= 1"));
    }
    if config.relay.read_chunk == 0 {
        return Err(anyhow!("relay read_chunk must be >= 1"));
    }
    if config.backend.hg.as_os_str().is_empty() {
        return Err(anyhow!("backend hg path must not be empty"));
    }
    Ok(())
}

fn parse_env_number<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                trimmed
                    .parse::<T>()
                    .map(Some)
                    .map_err(|err| anyhow!("invalid {key} value '{trimmed}': {err}"))
            }
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(anyhow!("failed to read {key}: {err}")),
    }
}
