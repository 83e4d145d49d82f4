use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use radpro_core::{
    auto_detect, candidate_ports, probe, run_until, Poller, PollerConfig, RadProClient, RateMode,
    SerialTransport,
};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod render;

use render::OutputFormat;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(name = "radprod")]
#[command(about = "Rad Pro dosimeter serial poller (read-only)")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Serial device path, or "auto" to probe candidate ports.
    #[arg(long, default_value = "auto")]
    port: String,

    #[arg(long, default_value_t = 115_200)]
    baud_rate: u32,

    #[arg(long, default_value_t = 2)]
    interval_secs: u64,

    #[arg(long, default_value_t = 3600)]
    sensitivity_interval_secs: u64,

    #[arg(long, default_value_t = 600)]
    deviceinfo_interval_secs: u64,

    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,

    #[arg(long, value_enum, default_value = "pulse-count")]
    rate_mode: RateModeArg,
}

#[derive(Debug, Subcommand)]
enum Command {
    Scan,
    Probe {
        /// Probe every candidate port instead of only --port.
        #[arg(long)]
        all: bool,
    },
    Info,
    Get {
        key: String,
    },
    Once {
        #[arg(long, default_value_t = 2)]
        cycles: u32,
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    Run {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Watch {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RateModeArg {
    PulseCount,
    DeviceRate,
}

impl From<RateModeArg> for RateMode {
    fn from(arg: RateModeArg) -> Self {
        match arg {
            RateModeArg::PulseCount => RateMode::PulseCount,
            RateModeArg::DeviceRate => RateMode::DeviceRate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let mut config = PollerConfig {
        endpoint: cli.port.clone(),
        baud_rate: cli.baud_rate,
        timeout: Duration::from_millis(cli.timeout_ms),
        poll_interval: Duration::from_secs(cli.interval_secs.max(1)),
        sensitivity_interval: Duration::from_secs(cli.sensitivity_interval_secs),
        deviceinfo_interval: Duration::from_secs(cli.deviceinfo_interval_secs),
        rate_mode: cli.rate_mode.into(),
        ..Default::default()
    };

    match cli.command {
        Command::Scan => {
            let ports = candidate_ports()?;
            println!("{}", serde_json::to_string_pretty(&ports)?);
        }
        Command::Probe { all } => {
            let targets = if all || config.is_auto_endpoint() {
                candidate_ports()?
            } else {
                vec![config.endpoint.clone()]
            };
            let mut reports = Vec::with_capacity(targets.len());
            for target in &targets {
                reports.push(probe(target, config.baud_rate, PROBE_TIMEOUT).await);
            }
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Info => {
            config.endpoint = resolve_endpoint(&config).await?;
            let mut poller = Poller::new(SerialTransport::new(config.serial_settings()), &config);
            let setup = poller.setup().await.map(|_| ());
            if setup.is_ok() {
                let info = render::device_json(poller.endpoint(), poller.identity(), poller.sensitivity());
                println!("{}", serde_json::to_string_pretty(&info)?);
            }
            poller.close().await;
            setup?;
        }
        Command::Get { key } => {
            config.endpoint = resolve_endpoint(&config).await?;
            let mut client = RadProClient::new(SerialTransport::new(config.serial_settings()));
            client.open().await?;
            let value = client.get(&key).await;
            client.close().await;
            let out = serde_json::json!({ "key": key, "value": value? });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Once { cycles, format } => {
            config.endpoint = resolve_endpoint(&config).await?;
            let mut poller = Poller::new(SerialTransport::new(config.serial_settings()), &config);
            if let Err(err) = poller.setup().await {
                poller.close().await;
                return Err(err.into());
            }
            for cycle in 0..cycles.max(1) {
                if cycle > 0 {
                    sleep(config.poll_interval).await;
                }
                if let Err(err) = poller.poll_once().await {
                    warn!("{err}");
                }
            }
            let view = poller.subscribe().borrow().clone();
            poller.close().await;
            render::print_view(&view, &config.endpoint, format)?;
        }
        Command::Run { format } | Command::Watch { format } => {
            config.endpoint = resolve_endpoint(&config).await?;
            stream_loop(&config, format).await?;
        }
    }

    Ok(())
}

async fn resolve_endpoint(config: &PollerConfig) -> Result<String> {
    if !config.is_auto_endpoint() {
        return Ok(config.endpoint.clone());
    }

    let ports = candidate_ports().context("listing serial ports")?;
    match auto_detect(&ports, config.baud_rate, PROBE_TIMEOUT).await {
        Some(report) => {
            info!(port = %report.endpoint, "auto-detected Rad Pro device");
            Ok(report.endpoint)
        }
        None => bail!("Rad Pro device not found; connect it or pass --port"),
    }
}

async fn stream_loop(config: &PollerConfig, format: OutputFormat) -> Result<()> {
    let mut poller = Poller::new(SerialTransport::new(config.serial_settings()), config);
    if let Err(err) = poller.setup().await {
        poller.close().await;
        return Err(err.into());
    }

    let mut view = poller.subscribe();
    let endpoint = config.endpoint.clone();
    let printer = tokio::spawn(async move {
        let mut last_cycle = None;
        while view.changed().await.is_ok() {
            let current = view.borrow_and_update().clone();
            let cycle = current.snapshot.as_ref().map(|s| s.cycle);
            if cycle.is_none() || cycle == last_cycle {
                continue;
            }
            last_cycle = cycle;
            if let Err(err) = render::print_view(&current, &endpoint, format) {
                warn!("failed to print snapshot: {err}");
            }
        }
    });

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received ctrl-c, stopping");
        }
    };
    run_until(&mut poller, config.poll_interval, shutdown).await;

    printer.abort();
    Ok(())
}
