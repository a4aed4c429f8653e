use anyhow::{anyhow, Context, Result};
use bleep_upgrade_mode::{
    Clock, Identity, RecordingEventSink, SystemClock, Timestamp, UpgradeEvent, UpgradeMode,
    UpgradeModeConfig, UpgradeModeRecord, UpgradeStatus,
};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

#[derive(Parser)]
#[command(name = "bleep_upgrade_admin")]
#[command(about = "BLEEP upgrade mode administration", long_about = None)]
struct Cli {
    /// Upgrade mode config file (TOML, YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Upgrade mode state file, created on first successful operation.
    /// It pins the master identity.
    #[arg(long, default_value = "upgrade-mode.json")]
    state: PathBuf,

    /// Master identity (hex). Needed to create the state file; once the
    /// file exists it must match the pinned master.
    #[arg(long, env = "BLEEP_UPGRADE_MASTER")]
    master: Option<String>,

    /// Caller identity (hex)
    #[arg(long, env = "BLEEP_UPGRADE_CALLER")]
    caller: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Open a new upgrade window
    Activate,

    /// Advance to finalize status once the wait period has elapsed
    CheckFinalize,

    /// Cancel the open upgrade window
    Cancel,

    /// Complete a finalized upgrade window
    Finish,

    /// Cancel a window that exceeded the max upgrade period
    ForceCancel,

    /// Print the current status
    Status,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    master: Identity,
    version: u64,
    #[serde(flatten)]
    state: UpgradeStatus,
    finalize_available_at: Option<Timestamp>,
    force_cancel_available_at: Option<Timestamp>,
    wait_period_secs: u64,
    max_period_secs: u64,
}

impl StatusReport {
    fn of(mode: &UpgradeMode) -> Self {
        let process = mode.snapshot();
        StatusReport {
            master: mode.master().clone(),
            version: process.version(),
            state: process.status(),
            finalize_available_at: mode.finalize_available_at(),
            force_cancel_available_at: mode.force_cancel_available_at(),
            wait_period_secs: mode.wait_period(),
            max_period_secs: mode.max_period(),
        }
    }
}

#[derive(Debug)]
struct Outcome {
    events: Vec<UpgradeEvent>,
    /// Result of `check-finalize`, `None` for other commands
    finalize_reached: Option<bool>,
    status: StatusReport,
}

fn parse_identity(hex: &str, role: &str) -> Result<Identity> {
    Identity::from_hex(hex).with_context(|| format!("invalid {} identity {}", role, hex))
}

/// Read the stored record, or start a genesis record for `master` when
/// there is no state file yet.
fn load_record(path: &Path, master: Option<&Identity>) -> Result<UpgradeModeRecord> {
    if !path.exists() {
        let master = master.ok_or_else(|| {
            anyhow!("no state at {}; --master is required to create it", path.display())
        })?;
        info!("No state at {}, starting from genesis", path.display());
        return Ok(UpgradeModeRecord::genesis(master.clone()));
    }
    let json = fs::read_to_string(path)
        .with_context(|| format!("reading state {}", path.display()))?;
    Ok(UpgradeModeRecord::from_json(&json)?)
}

/// Replace the state file atomically: write a sibling temp file, then rename.
fn store_record(path: &Path, record: &UpgradeModeRecord) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    file.write_all(record.to_json()?.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path)
        .with_context(|| format!("writing state {}", path.display()))?;
    Ok(())
}

fn execute(cli: &Cli, clock: Arc<dyn Clock>) -> Result<Outcome> {
    let config = UpgradeModeConfig::load(cli.config.as_deref())?;
    let master = cli
        .master
        .as_deref()
        .map(|hex| parse_identity(hex, "master"))
        .transpose()?;
    let caller = parse_identity(&cli.caller, "caller")?;

    let record = load_record(&cli.state, master.as_ref())?;
    let sink = Arc::new(RecordingEventSink::new());
    let mode = UpgradeMode::resume(config, clock, sink.clone(), record, master.as_ref())?;

    let mut finalize_reached = None;
    let result = match cli.command {
        Command::Activate => mode.activate(&caller).map(|_| ()),
        Command::CheckFinalize => {
            let reached = mode.check_finalize(&caller);
            info!(
                "Finalize status for upgrade {}: {}",
                mode.current_version(),
                if reached { "active" } else { "not reached" }
            );
            finalize_reached = Some(reached);
            Ok(())
        }
        Command::Cancel => mode.cancel(&caller).map(|_| ()),
        Command::Finish => mode.finish(&caller).map(|_| ()),
        Command::ForceCancel => mode.force_cancel(&caller).map(|_| ()),
        Command::Status => Ok(()),
    };
    result.with_context(|| format!("{:?} rejected", cli.command))?;

    if !sink.is_empty() {
        store_record(&cli.state, &mode.record())?;
    }

    Ok(Outcome {
        events: sink.take(),
        finalize_reached,
        status: StatusReport::of(&mode),
    })
}

fn main() -> Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let cli = Cli::parse();
    match execute(&cli, Arc::new(SystemClock::new())) {
        Ok(outcome) => {
            for event in &outcome.events {
                println!("{}", serde_json::to_string(event)?);
            }
            println!("{}", serde_json::to_string(&outcome.status)?);
            Ok(())
        }
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}
