mod codec;
mod command;
mod default_char;
mod error;
mod format;
mod input;
mod logging;
mod session;
mod term;
mod transport;
mod transport_btle;
#[cfg(test)]
mod transport_mock;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use clap::{ArgAction, Parser};
use inquire::Select;
use log::{info, warn};
use tokio::sync::mpsc;

use crate::format::Palette;
use crate::input::RustylineInput;
use crate::session::{is_link_address, PeripheralSession};
use crate::term::{PrinterConsole, SharedConsole, Shell, ShellConfig, StdoutConsole};
use crate::transport::BleTransport;
use crate::transport_btle::BtleTransport;

const KEEP_SCANNING: &str = "NOT IN LIST; KEEP SCANNING";

fn parse_scan_timeout(s: &str) -> Result<f64, String> {
    command::parse_timeout(s).map(|timeout| timeout.as_secs_f64())
}

/// Interactive BLE GATT shell
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Index of the Bluetooth adapter to use
    #[arg(short = 'a', long = "adapter", default_value_t = 0)]
    adapter: usize,
    /// Default `scan` window in seconds
    #[arg(short = 't', long = "scan-timeout", default_value_t = 5.0, value_parser = parse_scan_timeout)]
    scan_timeout: f64,
    /// Address or name to connect to on start-up
    #[arg(short = 'c', long = "connect")]
    connect: Option<String>,
    /// Pick a peripheral from a scan list before entering the shell
    #[arg(short = 'p', long = "pick", default_value_t = false, conflicts_with = "connect")]
    pick: bool,
    /// Load and save line history here
    #[arg(long = "history")]
    history: Option<PathBuf>,
    /// Write logs to this file instead of stderr
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,
    /// More logging, repeat for more
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
    /// Plain output without ANSI colours
    #[arg(long = "no-color", default_value_t = false)]
    no_color: bool,
    /// Prefix notifications with the local time
    #[arg(long = "timestamps", default_value_t = false)]
    timestamps: bool,
}

/// Keep scanning until the user chooses a peripheral, then connect to it
async fn pick_peripheral<T: BleTransport>(shell: &mut Shell<T>, window: Duration) -> anyhow::Result<()> {
    loop {
        println!("Scanning for {}s...", window.as_secs_f64());
        let devices = shell.session_mut().scan(window).await?.to_vec();
        let mut choices: Vec<String> = devices.iter().map(format::device_label).collect();
        choices.insert(0, KEEP_SCANNING.to_owned());

        let choice = match Select::new("Please choose a BLE peripheral", choices).raw_prompt() {
            Ok(choice) => choice,
            Err(err) => {
                warn!("peripheral picker closed: {err}");
                return Ok(());
            }
        };
        // NOTE: index 0 is the "keep scanning" entry
        let Some(device) = choice.index.checked_sub(1).and_then(|i| devices.get(i)) else {
            continue;
        };
        let _ = shell.execute(&format!("connect {}", device.address)).await;
        return Ok(());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.verbose, args.log_file.as_deref())?;
    info!("args = {args:?}");

    let palette = if args.no_color { Palette::plain() } else { Palette::colored() };
    let scan_timeout = Duration::from_secs_f64(args.scan_timeout);

    let transport = BtleTransport::acquire(args.adapter)
        .await
        .context("no usable Bluetooth adapter")?;

    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let stdout: SharedConsole = Arc::new(Mutex::new(StdoutConsole));
    let config = ShellConfig { scan_timeout, palette };
    let mut shell = Shell::new(PeripheralSession::new(transport, notify_tx), config, stdout.clone());

    if args.pick {
        pick_peripheral(&mut shell, scan_timeout).await?;
    } else if let Some(target) = &args.connect {
        if !is_link_address(target) {
            let _ = shell.execute("scan").await;
        }
        let _ = shell.execute(&format!("connect {target}")).await;
    }

    let (mut input, printer) = RustylineInput::spawn(args.history.clone())?;
    let notify_console: SharedConsole = match printer {
        Some(printer) => Arc::new(Mutex::new(PrinterConsole::new(printer))),
        None => stdout,
    };
    let listener = term::spawn_notification_listener(notify_rx, notify_console, palette, args.timestamps);

    shell.run(&mut input).await;

    listener.abort();
    input.close();
    Ok(())
}
