use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use farmhand::config::SupervisorConfig;
use farmhand::dashboard::{run_dashboard, DashboardState};
use farmhand::error::FarmError;
use farmhand::lease::path::abort_path;
use farmhand::lease::{scan, send_abort, AbortPolicy, LeaseHandle};
use farmhand::shutdown::install_shutdown_handler;
use farmhand::supervisor::Supervisor;
use farmhand::worker::{run_job, HoldOutcome};

#[derive(Parser, Debug)]
#[command(name = "farmhand")]
#[command(version)]
#[command(about = "Single-host device-farm job lease supervisor")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the supervisor loop over a lease directory
    Supervise(SuperviseArgs),

    /// Acquire a lease and run one job under it (worker harness)
    Hold(HoldArgs),

    /// One-shot scan: print every lease and its classification
    Status(StatusArgs),

    /// Unlink all orphaned leases (post-shutdown cleanup)
    Sweep(SweepArgs),

    /// Send a cooperative abort datagram to a lease's endpoint
    Abort(AbortArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SuperviseArgs {
    /// Directory holding lease files and abort endpoints
    #[arg(long)]
    lease_dir: PathBuf,

    /// Freshness window in seconds; an unlocked lease older than this is
    /// crash residue
    #[arg(long, default_value = "5")]
    freshness_window: u64,

    /// Seconds between scans (default: freshness window / 2)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Seconds after startup during which nothing is classified expired
    /// (default: freshness window)
    #[arg(long)]
    startup_grace: Option<u64>,

    /// Port for the read-only web dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Format for the event stream on stdout
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct HoldArgs {
    /// Directory holding lease files and abort endpoints
    #[arg(long)]
    lease_dir: PathBuf,

    /// Job id (decimal integer, becomes the lease file basename)
    id: u64,

    /// The job command to run under the lease (e.g. "run_suite board-3")
    command: String,

    /// Freshness window in seconds; the lease is refreshed at a third of it
    #[arg(long, default_value = "5")]
    freshness_window: u64,

    /// Fail instead of continuing when the abort endpoint cannot be bound
    #[arg(long)]
    require_abort: bool,
}

#[derive(Parser, Debug)]
struct StatusArgs {
    /// Directory holding lease files and abort endpoints
    #[arg(long)]
    lease_dir: PathBuf,

    /// Freshness window in seconds used for classification
    #[arg(long, default_value = "5")]
    freshness_window: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct SweepArgs {
    /// Directory holding lease files and abort endpoints
    #[arg(long)]
    lease_dir: PathBuf,
}

#[derive(Parser, Debug)]
struct AbortArgs {
    /// Directory holding lease files and abort endpoints
    #[arg(long)]
    lease_dir: PathBuf,

    /// Job id whose owner should be asked to shut down
    id: u64,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct LeaseStatusOutput {
    id: u64,
    age_secs: u64,
    locked: bool,
    expired: bool,
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_supervise(args: SuperviseArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = SupervisorConfig::new(args.lease_dir)
        .with_freshness_window(Duration::from_secs(args.freshness_window));
    if let Some(secs) = args.poll_interval {
        config = config.with_poll_interval(Duration::from_secs(secs));
    }
    if let Some(secs) = args.startup_grace {
        config = config.with_startup_grace(Duration::from_secs(secs));
    }

    let (supervisor, mut events_rx) = Supervisor::new(config)?;
    let shutdown = install_shutdown_handler();

    if let Some(port) = args.dashboard_port {
        let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
        let state = DashboardState::from_supervisor(&supervisor);
        tokio::spawn(run_dashboard(addr, state));
    }

    // Surface the event stream on stdout for the host to consume.
    let output = args.output;
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match output {
                OutputFormat::Json => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::error!(error = %e, "could not serialize event"),
                },
                OutputFormat::Table => println!("{}", event),
            }
        }
    });

    supervisor.run(shutdown).await?;
    Ok(())
}

async fn run_hold(args: HoldArgs) -> Result<(), Box<dyn std::error::Error>> {
    let policy = if args.require_abort {
        AbortPolicy::Required
    } else {
        AbortPolicy::Optional
    };

    let handle = match LeaseHandle::acquire_with(&args.lease_dir, args.id, policy) {
        Ok(handle) => handle,
        Err(FarmError::AcquireBusy(id)) => {
            eprintln!("Error: lease {} is held by another process", id);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let window = Duration::from_secs(args.freshness_window);
    match run_job(handle, &args.command, window).await? {
        HoldOutcome::Completed(result) => {
            if let Some(output) = result.output {
                print!("{}", output);
            }
            if let Some(error) = result.error {
                eprint!("{}", error);
            }
            let code = result.exit_code.unwrap_or(if result.success { 0 } else { 1 });
            std::process::exit(code);
        }
        HoldOutcome::Aborted => {
            eprintln!("Job {} aborted on request", args.id);
            Ok(())
        }
    }
}

fn run_status(args: StatusArgs) -> Result<(), Box<dyn std::error::Error>> {
    let window = Duration::from_secs(args.freshness_window);
    let now = SystemTime::now();
    let entries = scan(&args.lease_dir)?;

    let statuses: Vec<LeaseStatusOutput> = entries
        .iter()
        .map(|entry| LeaseStatusOutput {
            id: entry.id,
            age_secs: now
                .duration_since(entry.mtime)
                .map(|age| age.as_secs())
                .unwrap_or(0),
            locked: !entry.orphaned(),
            expired: entry.expired(now, window),
        })
        .collect();

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
        OutputFormat::Table => {
            if statuses.is_empty() {
                println!("No leases in {}", args.lease_dir.display());
            } else {
                println!("{:<10} {:<10} {:<8} STATE", "ID", "AGE (S)", "LOCKED");
                println!("{}", "-".repeat(40));
                for status in &statuses {
                    let state = if status.expired { "expired" } else { "live" };
                    println!(
                        "{:<10} {:<10} {:<8} {}",
                        status.id, status.age_secs, status.locked, state
                    );
                }
            }
        }
    }
    Ok(())
}

fn run_sweep(args: SweepArgs) -> Result<(), Box<dyn std::error::Error>> {
    let entries = scan(&args.lease_dir)?;
    let mut swept = 0usize;

    for entry in &entries {
        if !entry.orphaned() {
            continue;
        }
        for path in [entry.path.clone(), entry.abort_endpoint()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    eprintln!("Error: could not unlink {}: {}", path.display(), e);
                    continue;
                }
            }
        }
        println!("Swept orphaned lease {}", entry.id);
        swept += 1;
    }

    println!("Swept {} of {} leases", swept, entries.len());
    Ok(())
}

fn run_abort(args: AbortArgs) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = abort_path(&args.lease_dir, args.id);
    match send_abort(&endpoint) {
        Ok(()) => {
            println!("Abort requested for lease {}", args.id);
        }
        Err(e)
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::ConnectionRefused =>
        {
            // The endpoint refusing means the owner is already gone; the
            // intent is satisfied either way.
            println!("Lease {} has no listening owner (already gone?)", args.id);
        }
        Err(e) => {
            eprintln!("Error: could not reach abort endpoint: {}", e);
            std::process::exit(1);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Supervise(supervise_args) => run_supervise(supervise_args).await?,
        Commands::Hold(hold_args) => run_hold(hold_args).await?,
        Commands::Status(status_args) => run_status(status_args)?,
        Commands::Sweep(sweep_args) => run_sweep(sweep_args)?,
        Commands::Abort(abort_args) => run_abort(abort_args)?,
    }

    Ok(())
}
