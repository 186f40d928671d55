//! ptt-fix - push-to-talk from any input device button
//!
//! Watches raw input devices for one key and mirrors its presses and releases
//! as a synthetic key or mouse button in the focused X11 window.

use std::process::ExitCode;
use std::sync::Arc;

use ptt_fix::cli::{Args, USAGE};
use ptt_fix::device::EvdevOpener;
use ptt_fix::input_listener::SystemTimer;
use ptt_fix::{app, logging, Config, PttError, Shutdown, XTestSender};
use tracing::{error, info};

fn main() -> ExitCode {
    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };
    if args.help {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }
    if args.print_default_config {
        print!("{}", Config::default_file());
        return ExitCode::SUCCESS;
    }

    logging::init(args.verbose);

    match try_main(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn try_main(args: Args) -> Result<(), PttError> {
    info!("ptt-fix starting...");

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_create_default()?,
    };
    let config = match args.sym {
        Some(sym) => config.with_sym(sym),
        None => config,
    };
    let config = if args.devices.is_empty() {
        config
    } else {
        config.with_devices(args.devices)
    };
    let devices = config.resolve_devices()?;
    let config = config.with_devices(devices);

    // Set up Ctrl+C handler for graceful shutdown
    let shutdown = Shutdown::new();
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        handler_shutdown.cancel("interrupted");
    })?;

    info!("Press Ctrl+C to exit");
    app::run(
        &shutdown,
        &config,
        Arc::new(EvdevOpener),
        Arc::new(SystemTimer),
        XTestSender::connect,
    )?;

    info!("ptt-fix shutting down...");
    Ok(())
}
