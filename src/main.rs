// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point that gates an hg serve --stdio session.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! `hgserve-gate` binary.
//!
//! Runs as the SSH forced command for a Mercurial repository: spawns the
//! backing `hg serve --stdio`, relays the SSH channel through the write gate,
//! and exits with the backing process's status.

use std::env;
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, LevelFilter};
use tokio::process::Command;

use hgserve_gate::config::{load_config, ConfigOverrides, GateConfig};
use hgserve_gate::notify::JournalNotifier;
use hgserve_gate::{PassthroughRelay, RelayError};

/// Environment variable naming the connected identity when `--user` is absent.
const ENV_USER: &str = "HGSERVE_GATE_USER";

/// hgserve-gate command-line arguments.
#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "Write-access gate for hg serve over SSH", long_about = None)]
struct Cli {
    /// Repository path passed to `hg -R`.
    #[arg(long)]
    repo: PathBuf,

    /// Identity checked against the write policy.
    #[arg(long)]
    user: Option<String>,

    /// Gate configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the Mercurial executable from the configuration.
    #[arg(long)]
    hg: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn resolve_identity(cli: &Cli) -> Result<String> {
    if let Some(user) = &cli.user {
        return Ok(user.clone());
    }
    for key in [ENV_USER, "USER"] {
        if let Ok(value) = env::var(key) {
            if !value.trim().is_empty() {
                return Ok(value.trim().to_owned());
            }
        }
    }
    Err(anyhow!("no identity: pass --user or set {ENV_USER}"))
}

fn load_gate_config(cli: &Cli) -> Result<GateConfig> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GateConfig::default(),
    };
    let mut config = config.with_overrides(&ConfigOverrides::from_env()?)?;
    if let Some(hg) = &cli.hg {
        config.backend.hg = hg.clone();
    }
    Ok(config)
}

async fn serve(cli: Cli) -> Result<ExitCode> {
    let config = load_gate_config(&cli)?;
    let identity = resolve_identity(&cli)?;
    let repository = cli.repo.display().to_string();

    let mut child = Command::new(&config.backend.hg)
        .arg("-R")
        .arg(&cli.repo)
        .arg("serve")
        .arg("--stdio")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start {}", config.backend.hg.display()))?;
    let process_in = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("backing process stdin unavailable"))?;
    let process_out = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("backing process stdout unavailable"))?;

    let relay = PassthroughRelay::new(
        repository,
        config.relay,
        config.access.authorizer_for(identity),
        JournalNotifier::new(config.notify.journal.clone()),
    );
    let result = relay
        .run(tokio::io::stdin(), tokio::io::stdout(), process_in, process_out)
        .await;

    match result {
        Ok(report) => {
            debug!("session report: {report:?}");
            let status = child.wait().await.context("failed to reap backing process")?;
            let code = status.code().unwrap_or(1);
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
        Err(err) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            match err {
                RelayError::Denied(denial) => Err(anyhow!(denial)),
                other => Err(other.into()),
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    let outcome = runtime.block_on(serve(cli));
    // A stdin read blocked on its worker thread cannot be cancelled; do not wait for it.
    runtime.shutdown_background();
    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
