use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use gamepad_decode::controller::{ControllerSession, SessionError, SessionOptions};
use gamepad_decode::device::{HidApiBackend, HidBackend};
use gamepad_decode::events::{Event, Payload};
use gamepad_decode::{AppConfig, ConfigCatalogue};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Decode gamepad HID reports into named controller events
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Controller to connect to, "<vendor>" or "<vendor>/<model>"
    #[arg(required_unless_present = "list_devices")]
    identifier: Option<String>,

    /// Log every report's pin values
    #[arg(long)]
    debug: bool,

    /// Vendor ID to open instead of the configured one (decimal or 0x hex)
    #[arg(long, value_parser = parse_id)]
    vendor_id: Option<u16>,

    /// Product ID to open instead of the configured one (decimal or 0x hex)
    #[arg(long, value_parser = parse_id)]
    product_id: Option<u16>,

    /// Controller catalogue root
    #[arg(long)]
    controllers_dir: Option<PathBuf>,

    /// Application config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print attached HID devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup(args.verbose)?;

    let backend = Arc::new(
        HidApiBackend::new().map_err(|e| eyre!("Failed to initialize hidapi: {}", e))?,
    );

    if args.list_devices {
        return list_devices(backend.as_ref());
    }

    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let app_config = AppConfig::load(&config_path).await?;
    let catalogue = ConfigCatalogue::new(app_config.catalogue_root(args.controllers_dir.clone()));

    let options = SessionOptions {
        debug: args.debug || app_config.debug,
        vendor_id: args.vendor_id,
        product_id: args.product_id,
        ..app_config.session_options()
    };

    let identifier = args
        .identifier
        .ok_or_else(|| eyre!("No controller identifier given"))?;

    let connected = ControllerSession::connect(&identifier, options, &catalogue, backend).await;
    let mut session = match connected {
        Ok(session) => session,
        Err(SessionError::Resolve(e)) if e.is_missing_configuration() => {
            return Err(eyre!("{} (check the identifier or {})", e, catalogue.root().display()))
        }
        Err(SessionError::Resolve(e)) if e.is_missing_hardware() => {
            return Err(eyre!("{} (is the controller plugged in?)", e))
        }
        Err(e) => return Err(eyre!("Failed to connect to {}: {}", identifier, e)),
    };

    for channel in session.channels() {
        let printed = channel.clone();
        session.subscribe_channel(channel, move |payload: &Payload| {
            println!("{}", Event::new(printed.clone(), payload.clone()));
            Ok(())
        })?;
    }

    let shutdown = session.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, disconnecting");
                shutdown.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    let result = session.run().await;
    session.shutdown().await;

    if let Err(e) = result {
        error!("Session ended with error: {}", e);
        return Err(eyre!("Session ended: {}", e));
    }
    Ok(())
}

fn list_devices(backend: &dyn HidBackend) -> Result<()> {
    let devices = backend
        .devices()
        .map_err(|e| eyre!("Failed to enumerate devices: {}", e))?;
    if devices.is_empty() {
        println!("No HID devices attached");
    }
    for device in devices {
        println!(
            "{:04x}:{:04x}  ({}/{})  {}",
            device.vendor_id, device.product_id, device.vendor_id, device.product_id, device.path
        );
    }
    Ok(())
}

fn parse_id(raw: &str) -> Result<u16, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => raw.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid ID '{}': {}", raw, e))
}

fn setup(verbose: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env(if verbose { Level::DEBUG } else { Level::INFO });
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
