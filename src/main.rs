use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use otg_glue::config::GlueConfig;
use otg_glue::regs::mmio::{MmioRegisters, DEFAULT_WINDOW_LEN};
use otg_glue::regs::{ctrl, wrapper, RegisterBus, RegisterGroup};
use otg_glue::sim::{Script, SimRig};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// otg-glue command line arguments
#[derive(Parser, Debug)]
#[command(name = "otg-glue")]
#[command(version, about = "Dual-role USB OTG controller glue", long_about = None)]
struct CliArgs {
    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the default configuration as JSON
    Defaults,

    /// Bind a controller to simulated hardware and replay a script
    Simulate {
        /// Configuration file (JSON); defaults are used when omitted
        #[arg(short = 'c', long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Script file (JSON)
        #[arg(short = 's', long, value_name = "FILE")]
        script: PathBuf,
    },

    /// Dump the controller registers at a physical address (needs /dev/mem)
    Inspect {
        /// Physical base address of the register window, e.g. 0x480ab000
        #[arg(long, value_parser = parse_hex)]
        base: u64,

        /// Window length in bytes
        #[arg(long, value_parser = parse_hex)]
        len: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose, args.json_logs);

    match args.command {
        Command::Defaults => {
            println!("{}", serde_json::to_string_pretty(&GlueConfig::default())?);
        }
        Command::Simulate { config, script } => run_simulation(config, script).await?,
        Command::Inspect { base, len } => {
            let len = match len {
                Some(len) => usize::try_from(len).context("Window length out of range")?,
                None => DEFAULT_WINDOW_LEN,
            };
            inspect(base, len)?;
        }
    }

    Ok(())
}

async fn run_simulation(config: Option<PathBuf>, script: PathBuf) -> anyhow::Result<()> {
    let script = Script::load(&script)
        .with_context(|| format!("Failed to load script {}", script.display()))?;

    let config = match (script.config.clone(), config) {
        (Some(inline), _) => inline,
        (None, Some(path)) => GlueConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        (None, None) => GlueConfig::default(),
    };

    tracing::info!("Starting otg-glue v{} simulation", env!("CARGO_PKG_VERSION"));
    let rig = SimRig::bind(config).context("Failed to bind simulated controller")?;

    // Bus events go to stdout as JSON lines next to the step reports
    let mut rx = rig.events.subscribe();
    let forwarder = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("{}", json),
                    Err(e) => tracing::warn!("Failed to serialize event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event log lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let reports = rig.run(&script.steps).await;
    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }

    rig.glue.exit()?;
    drop(rig);
    // Bus is gone with the rig, so the forwarder drains and stops
    if let Err(e) = forwarder.await {
        tracing::warn!("Event forwarder failed: {}", e);
    }
    Ok(())
}

fn inspect(base: u64, len: usize) -> anyhow::Result<()> {
    let regs = MmioRegisters::map(base, len)
        .with_context(|| format!("Failed to map registers at {:#x}", base))?;

    let core = [("POWER", ctrl::POWER), ("DEVCTL", ctrl::DEVCTL)];
    for (name, offset) in core {
        println!(
            "{:<10} {:#06x} = {:#04x}",
            name,
            offset,
            regs.read(RegisterGroup::DeviceControl, offset)
        );
    }

    let glue = [
        ("REVISION", wrapper::REVISION),
        ("SYSCONFIG", wrapper::SYSCONFIG),
        ("SYSSTATUS", wrapper::SYSSTATUS),
        ("INTERFSEL", wrapper::INTERFSEL),
        ("SIMENABLE", wrapper::SIMENABLE),
        ("FORCESTDBY", wrapper::FORCESTDBY),
    ];
    for (name, offset) in glue {
        println!(
            "{:<10} {:#06x} = {:#010x}",
            name,
            offset,
            regs.read(RegisterGroup::SystemConfig, offset)
        );
    }
    Ok(())
}

fn parse_hex(raw: &str) -> Result<u64, String> {
    let trimmed = raw.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", raw, e))
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "otg_glue=error",
        LogLevel::Warn => "otg_glue=warn",
        LogLevel::Info => "otg_glue=info",
        LogLevel::Verbose => "otg_glue=debug,otg_glue::otg::idle=info",
        LogLevel::Debug => "otg_glue=debug",
        LogLevel::Trace => "otg_glue=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
