//! CLI for inspecting iOS Simulator and device targets and terminating their
//! processes.
//!
//! # Usage
//!
//! ```bash
//! # List simulators with their state
//! targetctl list
//!
//! # List physical devices attached through usbmuxd
//! targetctl list --devices
//!
//! # State and attributes of one simulator
//! targetctl info A1B2C3D4-E5F6-7890-ABCD-EF1234567890
//!
//! # Processes running on a simulator
//! targetctl ps A1B2C3D4-E5F6-7890-ABCD-EF1234567890
//!
//! # Terminate a process, waiting up to 5s for it to exit
//! targetctl --timeout 5000 kill A1B2C3D4-E5F6-7890-ABCD-EF1234567890 4242
//!
//! # Terminate an application by bundle id
//! targetctl terminate A1B2C3D4-E5F6-7890-ABCD-EF1234567890 com.example.app
//!
//! # Persist a longer termination timeout
//! targetctl config --set-timeout 20000
//!
//! # JSON output for scripting
//! targetctl -f json list
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use targetctl_core::attributes::keys;
use targetctl_core::config::{TargetctlConfig, TerminationConfig};
use targetctl_core::descriptor::TargetDescriptor;
use targetctl_core::provider::{ProcessHandle, ProcessInventory, ProviderError, TargetTransport};
use targetctl_core::registry::TargetRegistry;
use targetctl_core::simctl::SimctlProvider;
use targetctl_core::termination::{TerminationCoordinator, TerminationError};
use targetctl_core::usb_device::UsbmuxTransport;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Inspect iOS Simulator and device targets and terminate their processes.
#[derive(Parser)]
#[command(name = "targetctl")]
#[command(about = "Inspect iOS Simulator/device targets and terminate their processes")]
#[command(version)]
struct Cli {
    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// How long to wait for a terminated process to exit, in milliseconds
    #[arg(long, env = "TARGETCTL_TIMEOUT")]
    timeout: Option<u64>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List targets and their state
    List {
        /// List physical devices (usbmuxd) instead of simulators
        #[arg(long)]
        devices: bool,
    },

    /// Show the state and attributes of a target
    Info {
        /// Target UDID or serial number
        udid: String,
        /// Look the target up among physical devices
        #[arg(long)]
        devices: bool,
    },

    /// List the processes running on a simulator
    Ps {
        /// Simulator UDID
        udid: String,
    },

    /// Terminate a process on a simulator
    Kill {
        /// Simulator UDID
        udid: String,
        /// Process id
        pid: u32,
    },

    /// Terminate an application on a simulator by bundle id
    Terminate {
        /// Simulator UDID
        udid: String,
        /// Application bundle identifier
        bundle_id: String,
    },

    /// Print the effective configuration, optionally updating saved settings first
    Config {
        /// Save a new termination timeout, in milliseconds
        #[arg(long, value_name = "MS")]
        set_timeout: Option<u64>,
        /// Save a new process-list poll interval, in milliseconds
        #[arg(long, value_name = "MS")]
        set_poll_interval: Option<u64>,
        /// Save a new path to the xcrun executable
        #[arg(long, value_name = "PATH")]
        set_xcrun: Option<PathBuf>,
    },
}

fn init_logging(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "targetctl.log".into());
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file_appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

#[derive(Debug)]
enum CliError {
    ActionFailed(String),
    TargetNotFound(String),
    Provider(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::ActionFailed(_) => ExitCode::from(1),
            CliError::TargetNotFound(_) => ExitCode::from(2),
            CliError::Provider(_) => ExitCode::from(3),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::ActionFailed(msg) => write!(f, "Action failed: {}", msg),
            CliError::TargetNotFound(udid) => write!(f, "Target not found: {}", udid),
            CliError::Provider(msg) => write!(f, "Provider error: {}", msg),
        }
    }
}

impl From<ProviderError> for CliError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::TargetNotFound(udid) => CliError::TargetNotFound(udid),
            other => CliError::Provider(other.to_string()),
        }
    }
}

impl From<TerminationError> for CliError {
    fn from(e: TerminationError) -> Self {
        match e {
            TerminationError::Transport(inner) => inner.into(),
            other => CliError::ActionFailed(other.to_string()),
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = TargetctlConfig::load();
    if let Command::Config {
        set_timeout,
        set_poll_interval,
        set_xcrun,
    } = &cli.command
    {
        update_config(&mut config, *set_timeout, *set_poll_interval, set_xcrun.clone())?;
    }

    let mut termination = config.termination();
    if let Some(ms) = cli.timeout {
        termination.timeout = Duration::from_millis(ms);
    }
    let simctl = Arc::new(SimctlProvider::from_config(&config));

    match &cli.command {
        Command::List { devices } => {
            let registry = discover(transport_for(*devices, &simctl)).await?;
            list_targets(&registry, cli.format).await
        }
        Command::Info { udid, devices } => {
            let registry = discover(transport_for(*devices, &simctl)).await?;
            let target = lookup(&registry, udid)?;
            show_target(&target, cli.format).await
        }
        Command::Ps { udid } => {
            let registry = discover(simctl.clone()).await?;
            let target = lookup(&registry, udid)?;
            let processes = simctl.list_processes(target.handle()).await?;
            print_processes(&processes, cli.format)
        }
        Command::Kill { udid, pid } => {
            let registry = discover(simctl.clone()).await?;
            let target = lookup(&registry, udid)?;

            // Use the live record so an application goes through
            // application-level termination.
            let process = simctl
                .list_processes(target.handle())
                .await?
                .into_iter()
                .find(|p| p.pid == *pid)
                .unwrap_or_else(|| ProcessHandle::new(*pid));

            let coordinator = coordinator(target, &simctl, termination);
            coordinator.terminate_process(&process).await?;
            report_terminated(cli.format, serde_json::json!({ "pid": pid }), &format!("Terminated process {}", pid));
            Ok(())
        }
        Command::Terminate { udid, bundle_id } => {
            let registry = discover(simctl.clone()).await?;
            let target = lookup(&registry, udid)?;

            let coordinator = coordinator(target, &simctl, termination);
            coordinator.terminate_application(bundle_id).await?;
            report_terminated(
                cli.format,
                serde_json::json!({ "bundle_id": bundle_id }),
                &format!("Terminated {}", bundle_id),
            );
            Ok(())
        }
        Command::Config { .. } => print_config(&config, termination, cli.format),
    }
}

/// Applies the `config --set-*` flags and saves the result.
fn update_config(
    config: &mut TargetctlConfig,
    timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    xcrun: Option<PathBuf>,
) -> Result<(), CliError> {
    if timeout_ms.is_none() && poll_interval_ms.is_none() && xcrun.is_none() {
        return Ok(());
    }
    if let Some(ms) = timeout_ms {
        config.termination_timeout_ms = ms;
    }
    if let Some(ms) = poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(path) = xcrun {
        config.xcrun_path = path;
    }
    config
        .save()
        .map_err(|e| CliError::ActionFailed(format!("Failed to save config: {}", e)))?;
    debug!(?config, "config saved");
    Ok(())
}

fn transport_for(devices: bool, simctl: &Arc<SimctlProvider>) -> Arc<dyn TargetTransport> {
    if devices {
        Arc::new(UsbmuxTransport)
    } else {
        simctl.clone()
    }
}

async fn discover(transport: Arc<dyn TargetTransport>) -> Result<TargetRegistry, CliError> {
    let mut registry = TargetRegistry::new(transport);
    let report = registry.reconcile().await?;
    debug!(found = report.added.len(), "targets discovered");
    Ok(registry)
}

fn lookup(registry: &TargetRegistry, udid: &str) -> Result<Arc<TargetDescriptor>, CliError> {
    registry
        .find(udid)
        .ok_or_else(|| CliError::TargetNotFound(udid.to_string()))
}

fn coordinator(
    target: Arc<TargetDescriptor>,
    simctl: &Arc<SimctlProvider>,
    termination: TerminationConfig,
) -> TerminationCoordinator {
    let inventory: Arc<dyn ProcessInventory> = simctl.clone();
    TerminationCoordinator::bind(target, inventory).with_config(termination)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(|e| CliError::Provider(e.to_string()))
}

async fn list_targets(registry: &TargetRegistry, format: OutputFormat) -> Result<(), CliError> {
    let mut summaries = Vec::with_capacity(registry.len());
    for target in registry.targets() {
        summaries.push(target.summary().await);
    }

    if format == OutputFormat::Json {
        println!("{}", to_json(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        eprintln!("No targets found");
        return Ok(());
    }
    for summary in &summaries {
        let name = summary
            .attributes
            .get(keys::DEVICE_NAME)
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        println!("{} -- {} ({})", summary.handle, name, summary.state);
    }
    Ok(())
}

async fn show_target(target: &TargetDescriptor, format: OutputFormat) -> Result<(), CliError> {
    let summary = target.summary().await;

    if format == OutputFormat::Json {
        println!("{}", to_json(&summary)?);
        return Ok(());
    }

    println!("Handle: {}", summary.handle);
    println!("State:  {}", summary.state);
    for (key, value) in &summary.attributes {
        match value.as_str() {
            Some(s) => println!("  {}: {}", key, s),
            None => println!("  {}: {}", key, value),
        }
    }
    Ok(())
}

fn print_processes(processes: &[ProcessHandle], format: OutputFormat) -> Result<(), CliError> {
    if format == OutputFormat::Json {
        println!("{}", to_json(&processes)?);
        return Ok(());
    }

    for process in processes {
        let label = process
            .bundle_id
            .as_deref()
            .or(process.name.as_deref())
            .unwrap_or("-");
        let marker = if process.is_application() { " [app]" } else { "" };
        println!("{:>7}  {}{}", process.pid, label, marker);
    }
    Ok(())
}

fn report_terminated(format: OutputFormat, mut json: serde_json::Value, text: &str) {
    if format == OutputFormat::Json {
        json["success"] = serde_json::Value::Bool(true);
        println!("{}", json);
    } else {
        eprintln!("{}", text);
    }
}

fn print_config(
    config: &TargetctlConfig,
    termination: TerminationConfig,
    format: OutputFormat,
) -> Result<(), CliError> {
    if format == OutputFormat::Json {
        let mut value = serde_json::to_value(config).map_err(|e| CliError::Provider(e.to_string()))?;
        value["termination_timeout_ms"] = serde_json::json!(termination.timeout.as_millis() as u64);
        println!("{}", value);
        return Ok(());
    }

    println!("xcrun_path:             {}", config.xcrun_path.display());
    println!("poll_interval_ms:       {}", termination.poll_interval.as_millis());
    println!("termination_timeout_ms: {}", termination.timeout.as_millis());
    Ok(())
}
