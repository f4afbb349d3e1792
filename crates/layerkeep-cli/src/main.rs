//! # layerkeep — overlay upper-layer archiving OCI hook
//!
//! Poststop hook binary. The invoking runtime writes the container state
//! document to stdin; the hook loads the bundle's `config.json`, parses
//! the archive annotations, and preserves the upper layer of every
//! targeted overlay mount before the mount namespace disappears.

mod logging;

use std::io;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use oci_spec::runtime::Spec;
use serde::Deserialize;

use layerkeep_core::config::{DEFAULT_MOUNT_PROGRAM, HookConfig};

/// layerkeep — preserve overlay upper layers when a container stops.
#[derive(Parser, Debug)]
#[command(name = "layerkeep", version, about, long_about = None)]
struct Cli {
    /// Log verbosity.
    #[arg(long, value_enum, default_value = "info")]
    log_level: logging::LogLevel,

    /// Send log output to syslog instead of stderr.
    #[arg(long)]
    syslog: bool,

    /// Path of the fuse mount helper whose live processes are
    /// cross-referenced to resolve bind-indirected mounts.
    #[arg(long, default_value = DEFAULT_MOUNT_PROGRAM)]
    mount_program: PathBuf,
}

/// Subset of the OCI runtime state document read from stdin.
#[derive(Debug, Deserialize)]
struct HookState {
    /// Absolute path of the container bundle directory.
    bundle: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level, cli.syslog)?;

    let state: HookState = serde_json::from_reader(io::stdin().lock())
        .context("decoding container state from stdin")?;
    tracing::debug!(bundle = %state.bundle.display(), "received container state");

    let config_path = state.bundle.join("config.json");
    let spec = Spec::load(&config_path)
        .with_context(|| format!("loading bundle config {}", config_path.display()))?;

    let config = HookConfig {
        mount_program: cli.mount_program,
    };
    layerkeep_core::hook::run(&spec, &config)?;
    Ok(())
}
