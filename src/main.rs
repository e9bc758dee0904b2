use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use payterm::application::multiplexer::DeliveryChannels;
use payterm::application::orchestrator::PaymentOrchestrator;
use payterm::config::OrchestratorConfig;
use payterm::domain::delivery::{CallbackSlot, DeliveryChannel};
use payterm::domain::ports::{SnapshotSinkRef, SnapshotSourceRef};
use payterm::infrastructure::in_memory::InMemorySnapshotStore;
use payterm::infrastructure::simulated::{
    Publishers, ScriptedOutcome, SimulatedTerminal, TerminalScript,
};
use payterm::interfaces::csv::request_reader::RequestReader;
use payterm::interfaces::csv::result_writer::ResultWriter;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Outcome {
    Approve,
    Decline,
    Cancel,
    Fail,
    Silent,
}

impl From<Outcome> for ScriptedOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Approve => Self::Approve,
            Outcome::Decline => Self::Decline,
            Outcome::Cancel => Self::Cancel,
            Outcome::Fail => Self::Fail,
            Outcome::Silent => Self::Silent,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Channel {
    Callback,
    Event,
    Snapshot,
}

impl From<Channel> for DeliveryChannel {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Callback => Self::Callback,
            Channel::Event => Self::Event,
            Channel::Snapshot => Self::Snapshot,
        }
    }
}

/// Runs a batch of card payments against a simulated POS terminal.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input payment requests CSV file
    input: PathBuf,

    /// How the simulated terminal answers every transaction
    #[arg(long, value_enum, default_value = "approve")]
    outcome: Outcome,

    /// Channels the terminal publishes answers on (repeat to duplicate)
    #[arg(long, value_enum, value_delimiter = ',', default_value = "callback")]
    channels: Vec<Channel>,

    /// Terminal answer latency in milliseconds
    #[arg(long, default_value_t = 200)]
    latency_ms: u64,

    /// Boot the terminal with an unconfirmed transaction from a previous run
    #[arg(long)]
    pending_lock: bool,

    /// Post-confirmation cooldown in milliseconds (overrides PAYTERM_COOLDOWN_MS)
    #[arg(long)]
    cooldown_ms: Option<u64>,

    /// Result timeout in milliseconds (overrides PAYTERM_RESULT_TIMEOUT_SECS)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Path to persistent snapshot storage (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

fn in_memory_store() -> (SnapshotSourceRef, SnapshotSinkRef) {
    let store = InMemorySnapshotStore::new();
    (Arc::new(store.clone()), Arc::new(store))
}

#[cfg(feature = "storage-rocksdb")]
fn snapshot_store(db_path: Option<PathBuf>) -> Result<(SnapshotSourceRef, SnapshotSinkRef)> {
    use payterm::infrastructure::rocksdb::RocksDBSnapshotStore;

    match db_path {
        Some(path) => {
            let store = RocksDBSnapshotStore::open(path).into_diagnostic()?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory_store()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn snapshot_store(db_path: Option<PathBuf>) -> Result<(SnapshotSourceRef, SnapshotSinkRef)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_store())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = OrchestratorConfig::from_env();
    if let Some(ms) = cli.cooldown_ms {
        config.cooldown = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.timeout_ms {
        config.result_timeout = Duration::from_millis(ms);
    }

    let (snapshot_source, snapshot_sink) = snapshot_store(cli.db_path)?;
    let callback = Arc::new(CallbackSlot::new());
    let (events, _) = broadcast::channel(16);

    let script = TerminalScript {
        outcome: cli.outcome.into(),
        channels: cli.channels.into_iter().map(DeliveryChannel::from).collect(),
        latency: Duration::from_millis(cli.latency_ms),
        settle_time: config.cooldown,
        locked: cli.pending_lock,
        ..TerminalScript::default()
    };
    let terminal = SimulatedTerminal::new(
        script,
        Publishers {
            callback: callback.clone(),
            events: events.clone(),
            snapshots: snapshot_sink,
        },
    );

    let channels = DeliveryChannels::default()
        .with_callback(callback)
        .with_events(events)
        .with_snapshots(snapshot_source);
    let orchestrator = PaymentOrchestrator::new(Arc::new(terminal), channels, config);

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = RequestReader::new(file);
    let stdout = io::stdout();
    let mut writer = ResultWriter::new(stdout.lock());

    for (row, request) in reader.requests().enumerate() {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                eprintln!("Error reading request on row {}: {}", row + 1, e);
                continue;
            }
        };
        let order_id = request.order_id.clone();
        match orchestrator.submit(request).await {
            Ok(result) => writer.write_result(&order_id, &result).into_diagnostic()?,
            Err(e) => {
                eprintln!("Error processing payment {}: {}", order_id, e);
                writer.write_failure(&order_id, &e).into_diagnostic()?;
            }
        }
    }
    writer.flush().into_diagnostic()?;

    Ok(())
}
