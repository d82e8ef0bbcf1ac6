//! Command-line interface
//!
//! Commands run against the simulated NFC backend, the file-backed local
//! store under the configured data dir and an in-process backend store.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use tapkey_app::config::{self, Settings};
use tapkey_app::{
    Engine, FileStore, KeyValueStore, LogMailer, MemoryRemoteStore, PairingStep, ReadStateService,
};
use tapkey_core::prelude::Result;
use tapkey_core::KeyRecord;
use tapkey_nfc::SimulatedBackend;

use crate::headless::{self, CommandEvent};

pub type CliEngine = Engine<SimulatedBackend, MemoryRemoteStore, FileStore, LogMailer>;

/// tapkey - NFC smart-lock key manager
#[derive(Parser, Debug)]
#[command(name = "tapkey")]
#[command(about = "Pair NFC keys, toggle locks and sync notifications", long_about = None)]
pub struct Cli {
    /// Directory holding `.tapkey/config.toml`
    #[arg(long, value_name = "PATH", global = true)]
    pub project: Option<PathBuf>,

    /// Debug-level logging for tapkey crates (ignored when TAPKEY_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Write a default `.tapkey/config.toml`
    Init,

    /// Pair a new key
    Pair {
        /// Present a tag with this serial once scanning starts
        #[arg(long, value_name = "SERIAL")]
        simulate: Option<String>,

        /// Name for the new key
        #[arg(long, default_value = "My key")]
        name: String,
    },

    /// Write a payload to the next presented tag
    Write { payload: String },

    /// Emulate a card carrying an id
    Emulate { id: String },

    /// Merge local and remote read notification ids
    Reconcile {
        /// Comma-separated ids read on this device
        #[arg(long, value_delimiter = ',')]
        local: Vec<String>,

        /// Comma-separated ids read elsewhere
        #[arg(long, value_delimiter = ',')]
        remote: Vec<String>,
    },

    /// Manage the session PIN
    Pin {
        #[command(subcommand)]
        action: PinAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum PinAction {
    /// Set or change the PIN
    Set {
        pin: String,
        /// Current PIN, required when one is set
        #[arg(long)]
        current: Option<String>,
    },
    /// Check a PIN
    Verify { pin: String },
    /// Remove the PIN
    Clear { pin: String },
}

impl Cli {
    pub fn project_path(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

/// Build the engine used by every command
pub fn build_engine(settings: Settings) -> Result<(Arc<CliEngine>, Arc<FileStore>)> {
    let local = Arc::new(FileStore::open(settings.storage.resolve_data_dir())?);
    let backend = if settings.nfc.simulate {
        SimulatedBackend::new()
    } else {
        warn!("nfc.simulate is off and no hardware backend is built in; NFC is unavailable");
        SimulatedBackend::unsupported()
    };
    let backend = backend.with_emulation_delay(settings.nfc.emulation_delay());
    let engine = Engine::new(
        settings,
        backend,
        Arc::new(MemoryRemoteStore::new()),
        Arc::clone(&local),
        Arc::new(LogMailer),
    );
    Ok((Arc::new(engine), local))
}

/// Run one command with the loaded `settings`, streaming events to stdout
pub async fn run(cli: Cli, settings: Settings) -> Result<()> {
    if cli.command == Command::Init {
        return init(&cli.project_path());
    }

    let (engine, local) = build_engine(settings)?;

    let mut events = engine.subscribe();
    let forwarder = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            headless::emit_app_event(&event);
            if matches!(event, tapkey_app::AppEvent::Shutdown) {
                break;
            }
        }
    });

    let result = dispatch(&engine, local, cli.command).await;
    if let Err(e) = &result {
        headless::emit_error(e);
    }

    engine.shutdown().await;
    let _ = forwarder.await;
    result
}

async fn dispatch(engine: &Arc<CliEngine>, local: Arc<FileStore>, command: Command) -> Result<()> {
    match command {
        Command::Init => Ok(()),
        Command::Pair { simulate, name } => {
            pair(engine, simulate, &name).await?;
            Ok(())
        }
        Command::Write { payload } => {
            engine.write_tag(&payload).await?;
            headless::emit(&CommandEvent::TagWritten {
                bytes: payload.len(),
            });
            Ok(())
        }
        Command::Emulate { id } => {
            let correlation_id = engine.emulate(&id).await?;
            headless::emit(&CommandEvent::Emulated { correlation_id });
            Ok(())
        }
        Command::Reconcile { local: ids, remote } => {
            let read_ids = reconcile(engine.user_id(), local, ids, remote).await?;
            headless::emit(&CommandEvent::Reconciled {
                read_ids: read_ids.into_iter().collect(),
            });
            Ok(())
        }
        Command::Pin { action } => pin(engine, action).await,
    }
}

fn init(project_path: &Path) -> Result<()> {
    config::init_config_dir(project_path)?;
    headless::emit(&CommandEvent::ConfigInitialized {
        path: project_path.join(".tapkey").display().to_string(),
    });
    Ok(())
}

/// Scan for a tag and create a key for it. `None` when no tag was paired.
pub async fn pair(
    engine: &Arc<CliEngine>,
    simulate: Option<String>,
    name: &str,
) -> Result<Option<KeyRecord>> {
    // Aborted once pairing ends, even if no scan ever started
    let presenter = simulate.map(|serial| {
        let engine = Arc::clone(engine);
        tokio::spawn(async move {
            while !engine.session().is_scanning() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            debug!("presenting simulated tag {}", serial);
            engine.simulate_tag(&serial);
        })
    });

    let step = engine.pair().await;
    if let Some(presenter) = presenter {
        presenter.abort();
    }

    match step? {
        PairingStep::Succeeded { .. } => Ok(Some(engine.confirm_pairing(name).await?)),
        step => {
            info!("pairing ended in {}", step.name());
            Ok(None)
        }
    }
}

/// Merge `local_ids` (plus anything already stored) with `remote_ids`
pub async fn reconcile<K: KeyValueStore>(
    user_id: &str,
    local: Arc<K>,
    local_ids: Vec<String>,
    remote_ids: Vec<String>,
) -> Result<BTreeSet<String>> {
    let remote = Arc::new(MemoryRemoteStore::new());
    let seeded: Vec<&str> = remote_ids.iter().map(String::as_str).collect();
    remote.seed_read_notifications(user_id, &seeded);

    let service = ReadStateService::new(local, remote, user_id);
    let report = service.refresh().await;
    for warning in &report.warnings {
        debug!("reconcile warning: {}", warning.message);
    }
    let report = service.mark_all_read(local_ids).await?;
    Ok(report.read_ids)
}

async fn pin(engine: &Arc<CliEngine>, action: PinAction) -> Result<()> {
    let gate = engine.pin();
    match action {
        PinAction::Set { pin, current } => {
            gate.set_pin(&pin, current.as_deref()).await?;
            headless::emit(&CommandEvent::PinSet);
        }
        PinAction::Verify { pin } => {
            let valid = gate.verify_pin(&pin).await?;
            headless::emit(&CommandEvent::PinVerified { valid });
        }
        PinAction::Clear { pin } => {
            gate.clear_pin(&pin).await?;
            headless::emit(&CommandEvent::PinCleared);
        }
    }
    Ok(())
}
