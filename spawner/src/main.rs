mod config;
mod error;
mod identity;
mod orchestrator;
mod overlay;
mod process;
mod public_ip;
mod remote;
mod scheduler;
#[cfg(test)]
mod testing;
mod topology;
mod types;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, Instrument, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use config::{FileConfig, SpawnConfig};
use identity::WgKeyGenerator;
use orchestrator::Orchestrator;
use process::{CommandRunner, SystemRunner};
use remote::SshChannel;
use scheduler::ProcessScheduler;

/// Exit code for a run that finished but left sites unprovisioned or not torn
/// down. Usage errors already exit with 2.
const EXIT_PARTIAL: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "meshspawn")]
#[command(
    about = "Bring up a WireGuard overlay to remote clouds and run a compute cluster across it",
    long_about = None
)]
struct Args {
    /// Remote sites as ssh login targets, e.g. mgrant@64.225.129.36
    #[arg(required = true, num_args = 1.., value_name = "USER@HOST")]
    targets: Vec<String>,

    /// TOML config file
    #[arg(long, env = "MESHSPAWN_CONFIG")]
    config: Option<PathBuf>,

    /// Local overlay config to write [default: /etc/wireguard/dasklocal.conf]
    #[arg(long, env = "MESHSPAWN_CONF_FILE")]
    conf_file: Option<PathBuf>,

    /// Workers started on each site [default: 1]
    #[arg(long, env = "MESHSPAWN_WORKERS_PER_SITE")]
    workers_per_site: Option<u32>,

    /// Address remote sites use to reach this host (skips detection)
    #[arg(long, env = "MESHSPAWN_PUBLIC_ENDPOINT")]
    public_endpoint: Option<String>,

    /// Scheduler command line [default: dask-scheduler]
    #[arg(long, env = "MESHSPAWN_SCHEDULER_COMMAND")]
    scheduler_command: Option<String>,

    /// Gateway script run on each site [default: dask_wg/wg_cloud_gateway.sh]
    #[arg(long, env = "MESHSPAWN_ENTRYPOINT")]
    entrypoint: Option<String>,

    /// Overlay interface name on the remote sites [default: dasklocal]
    #[arg(long, env = "MESHSPAWN_REMOTE_INTERFACE")]
    remote_interface: Option<String>,

    /// Worker container name prefix on the remote sites [default: dask-worker-]
    #[arg(long, env = "MESHSPAWN_WORKER_PREFIX")]
    worker_prefix: Option<String>,

    /// Seconds to wait after starting the scheduler [default: 5]
    #[arg(long, env = "MESHSPAWN_SCHEDULER_WARMUP_SECS")]
    scheduler_warmup_secs: Option<u64>,

    /// Seconds to wait after the overlay interface comes up [default: 1]
    #[arg(long, env = "MESHSPAWN_INTERFACE_SETTLE_SECS")]
    interface_settle_secs: Option<u64>,

    /// ssh connect timeout in seconds
    #[arg(long, env = "MESHSPAWN_SSH_CONNECT_TIMEOUT_SECS")]
    ssh_connect_timeout_secs: Option<u64>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting meshspawn for {} site(s)", args.targets.len());

    let config = build_config(&args)?;

    // Handlers go in before anything is touched, so an interrupt during
    // bring-up is held until the wait phase instead of killing us mid-way
    let shutdown = shutdown_signal()?;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let orchestrator = Orchestrator::new(
        config.clone(),
        Arc::new(WgKeyGenerator::new(runner.clone())),
        Arc::new(SshChannel::new(runner.clone(), config.ssh_connect_timeout)),
        runner,
        Arc::new(ProcessScheduler::new(
            config.scheduler_command.clone(),
            config.scheduler_stop_grace,
        )),
    );

    let span = info_span!("run", id = %Uuid::new_v4());
    let report = match orchestrator.run(&args.targets, shutdown).instrument(span).await {
        Ok(report) => report,
        Err(e) => {
            if let Some(output) = e.captured_output() {
                error!("Command output was:\n{}", output);
            }
            return Err(e).context("Cluster bring-up failed");
        }
    };

    report.log_summary();
    if !report.is_clean() {
        std::process::exit(EXIT_PARTIAL);
    }

    Ok(())
}

/// Defaults, then the config file, then flags and their env vars
fn build_config(args: &Args) -> Result<SpawnConfig> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let mut config = file.into_spawn_config()?;

    if let Some(path) = &args.conf_file {
        config.conf_file = path.clone();
    }
    if let Some(n) = args.workers_per_site {
        config.workers_per_site = n;
    }
    if let Some(endpoint) = &args.public_endpoint {
        config.public_endpoint = Some(endpoint.clone());
    }
    if let Some(cmd) = &args.scheduler_command {
        let parts: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
        if parts.is_empty() {
            bail!("--scheduler-command must not be empty");
        }
        config.scheduler_command = parts;
    }
    if let Some(entrypoint) = &args.entrypoint {
        config.entrypoint = entrypoint.clone();
    }
    if let Some(iface) = &args.remote_interface {
        config.remote_interface = iface.clone();
    }
    if let Some(prefix) = &args.worker_prefix {
        config.worker_prefix = prefix.clone();
    }
    if let Some(secs) = args.scheduler_warmup_secs {
        config.scheduler_warmup = Duration::from_secs(secs);
    }
    if let Some(secs) = args.interface_settle_secs {
        config.interface_settle = Duration::from_secs(secs);
    }
    if let Some(secs) = args.ssh_connect_timeout_secs {
        config.ssh_connect_timeout = Some(Duration::from_secs(secs));
    }

    Ok(config)
}

#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()> + Send> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = ()> + Send> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C");
    })
}
