use anyhow::Context;
use clap::Parser;
use rc_link_controller::domain::controller::{ConnectionController, ControllerConfig};
use rc_link_controller::domain::settings::SettingsService;
use rc_link_controller::infrastructure::{logging, transport};
use rc_link_controller::presentation::console;
use std::path::PathBuf;

/// Console controller for a remote vehicle on a paired Bluetooth serial link
#[derive(Parser, Debug)]
#[command(name = "rc_link_controller")]
#[command(version)]
struct Args {
    /// Settings file to use instead of the per-user one
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Do not store the last speed and angle on exit
    #[arg(long)]
    no_save: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings_service = match args.settings {
        Some(path) => SettingsService::with_path(path),
        None => SettingsService::new()?,
    };
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    tracing::info!(
        "Starting RC link controller (settings: {})",
        settings_service.path().display()
    );

    let transport = transport::from_settings(&settings.transport);
    let controller = ConnectionController::new(transport, ControllerConfig::from(&settings))
        .context("Failed to start link worker")?;

    controller.refresh_endpoints();
    console::run(&controller, std::io::stdin().lock())?;

    if !args.no_save {
        settings_service.remember_controls(&controller.snapshot());
        if let Err(e) = settings_service.save() {
            tracing::warn!("Failed to save settings: {}", e);
        }
    }

    tracing::info!("Bye");
    Ok(())
}
