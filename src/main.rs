use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap_verbosity_flag::{InfoLevel, Verbosity};
use nusb::DeviceInfo;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tminit_lib::usb::{self, UsbTransport};
use tminit_lib::{DeviceSession, SessionOptions, SessionOutcome, TmError, catalog};

/// Switches Thrustmaster force-feedback wheels out of their generic USB mode.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached wheels still in generic mode.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the wheel models this tool knows how to switch.
    Models {
        #[arg(long)]
        json: bool,
    },
    /// Identify each attached wheel and switch it to full-feature mode.
    Init {
        /// Only handle the device with this product ID (hex, e.g. b65d).
        #[arg(short, long, value_parser = parse_hex_u16)]
        product_id: Option<u16>,
        /// Query the model without sending the setup packets first.
        #[arg(long)]
        skip_setup_packets: bool,
        /// Detach from a wheel that has not answered after this many seconds.
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
    },
}

fn parse_hex_u16(s: &str) -> Result<u16, std::num::ParseIntError> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u16::from_str_radix(digits, 16)
}

fn setup_logging(log_file_path: Option<&PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    // stdout is reserved for command output
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = if let Some(path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.as_ref(), &cli.verbose)?;

    let result = match cli.command {
        Command::List { json } => list(json),
        Command::Models { json } => models(json),
        Command::Init {
            product_id,
            skip_setup_packets,
            timeout_secs,
        } => {
            let options = SessionOptions { skip_setup_packets };
            init(product_id, options, Duration::from_secs(timeout_secs)).await
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }

    Ok(())
}

fn list(json: bool) -> Result<()> {
    let devices = usb::find_devices().context("Failed to enumerate USB devices")?;

    if json {
        let entries: Vec<_> = devices
            .iter()
            .map(|d| {
                serde_json::json!({
                    "vendor_id": d.vendor_id(),
                    "product_id": d.product_id(),
                    "bus": d.bus_number(),
                    "address": d.device_address(),
                    "product": d.product_string(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No Thrustmaster wheel in generic mode found.");
        return Ok(());
    }
    for d in &devices {
        println!(
            "Bus {:03} Device {:03}: ID {:04x}:{:04x} {}",
            d.bus_number(),
            d.device_address(),
            d.vendor_id(),
            d.product_id(),
            d.product_string().unwrap_or("<unknown>")
        );
    }
    Ok(())
}

fn models(json: bool) -> Result<()> {
    let wheels = catalog::wheels();

    if json {
        println!("{}", serde_json::to_string_pretty(wheels)?);
        return Ok(());
    }

    println!("{:<6} {:<11} {:<7} NAME", "MODEL", "ATTACHMENT", "SWITCH");
    for w in wheels {
        println!(
            "{:<6} {:<11} {:<7} {}",
            format!("{:#04x}", w.model),
            format!("{:#04x}", w.attachment),
            format!("{:#06x}", w.switch_value),
            w.name
        );
    }
    Ok(())
}

async fn init(product_id: Option<u16>, options: SessionOptions, timeout: Duration) -> Result<()> {
    let devices: Vec<DeviceInfo> = usb::find_devices()
        .context("Failed to enumerate USB devices")?
        .into_iter()
        .filter(|d| product_id.is_none_or(|pid| d.product_id() == pid))
        .collect();

    if devices.is_empty() {
        return Err(TmError::DeviceNotFound.into());
    }

    let (interrupt_tx, interrupt) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, detaching.");
            let _ = interrupt_tx.send(true);
        }
    });

    let mut failures = 0;
    for device_info in &devices {
        if *interrupt.borrow() {
            bail!("Interrupted before all wheels were initialized");
        }
        match init_one(device_info, options, timeout, interrupt.clone()).await {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(())) => bail!("Interrupted before all wheels were initialized"),
            Err(e) => {
                warn!(
                    bus = device_info.bus_number(),
                    address = device_info.device_address(),
                    "{:#}",
                    e
                );
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} wheel(s) could not be initialized", failures, devices.len());
    }
    Ok(())
}

/// Switch one wheel. `Break` means Ctrl+C detached it before it finished.
async fn init_one(
    device_info: &DeviceInfo,
    options: SessionOptions,
    timeout: Duration,
    mut interrupt: watch::Receiver<bool>,
) -> Result<ControlFlow<()>> {
    let (transport, identity) = UsbTransport::open(device_info).with_context(|| {
        format!(
            "Failed to open device {:04x}:{:04x}",
            device_info.vendor_id(),
            device_info.product_id()
        )
    })?;

    let session = DeviceSession::attach_with(Arc::new(transport), identity, options)
        .await
        .context("Failed to start the handshake")?;
    let identity = session.identity();
    info!(
        vid = identity.vendor_id,
        pid = identity.product_id,
        endpoints = identity.endpoints.len(),
        "Handshake started"
    );

    let mut interrupted = false;
    let stop = async {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => warn!("No answer after {:?}, detaching", timeout),
            Ok(_) = interrupt.wait_for(|&stop| stop) => interrupted = true,
        }
    };

    let outcome = session.finished_or_detach(stop).await?;
    match outcome {
        SessionOutcome::Switched(outcome) => {
            let name = outcome.wheel.map_or("Wheel", |w| w.name);
            println!(
                "{} switched with code {:#06x} ({})",
                name, outcome.switch_value, outcome.status
            );
            Ok(ControlFlow::Continue(()))
        }
        SessionOutcome::Detached { .. } if interrupted => Ok(ControlFlow::Break(())),
        SessionOutcome::Detached { state } => {
            bail!("Wheel did not answer within {:?} (stopped in state {})", timeout, state)
        }
    }
}
