use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use dmm_core::config::Settings;
use dmm_core::display::{LogScreen, Screen, TerminalScreen};
use dmm_core::eprom::FileEprom;
use dmm_core::interpreter::{Interpreter, BANNER};
use dmm_core::meter::SimulatedMeter;
use dmm_core::store::{CalibrationStore, Region};
use dmm_core::transport::{ChannelTransport, ScriptedTransport, SerialTransport, Transport};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type Shell = Interpreter<SimulatedMeter, FileEprom, Box<dyn Screen>>;

/// DMMShield command interpreter running against the simulated meter.
#[derive(Parser, Debug)]
#[command(name = "dmm_shield", version, about)]
struct Args {
    /// Settings file (default: dmm.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Serial port to listen on; skips the menu
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    /// EPROM image file
    #[arg(long)]
    eprom: Option<PathBuf>,
    /// Run the commands of a file, one per line, and print the responses
    #[arg(long)]
    script: Option<PathBuf>,
    /// Write the current USER table as the FACTORY record and exit
    #[arg(long)]
    provision_factory: bool,
    /// Write the device serial number and exit
    #[arg(long)]
    serial_number: Option<String>,
    /// Draw the display panel on the terminal
    #[arg(long)]
    oled: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    if let Some(port) = &args.port {
        settings.port = Some(port.clone());
    }
    if let Some(baud) = args.baud {
        settings.baud = baud;
    }
    if let Some(eprom) = &args.eprom {
        settings.eprom_image = eprom.clone();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let eprom = FileEprom::open(&settings.eprom_image)?;
    info!(path = %eprom.path().display(), "EPROM image opened");
    let mut store = CalibrationStore::new(eprom, settings.write_ready_timeout());

    if args.provision_factory || args.serial_number.is_some() {
        return provision(&mut store, &args);
    }

    let screen: Box<dyn Screen> = if args.oled {
        match TerminalScreen::new() {
            Ok(screen) => Box::new(screen),
            Err(e) => {
                warn!(error = %e, "terminal display unavailable, logging instead");
                Box::new(LogScreen)
            }
        }
    } else {
        Box::new(LogScreen)
    };
    let meter = SimulatedMeter::new(settings.simulator.clone());
    let mut shell = Interpreter::new(meter, store, screen, &settings);

    if let Some(script) = &args.script {
        return run_script_mode(&mut shell, script);
    }
    if let Some(port) = settings.port.clone() {
        return run_serial_loop(&mut shell, &port, settings.baud, &settings);
    }

    println!("=========================");
    println!("    DMMShield Console    ");
    println!("=========================");

    let mut input = ChannelTransport::stdin(settings.line_timeout());

    // Main menu loop.
    loop {
        println!("\nSelect mode:");
        println!("  1. Manual Command Input");
        println!("  2. Listen on Serial Port");
        println!("  3. Exit");
        let Some(choice) = prompt(&mut input, "> ")? else {
            break;
        };

        match choice.trim() {
            "1" => run_manual_mode(&mut shell, &mut input)?,
            "2" => run_serial_mode(&mut shell, &mut input, &settings)?,
            "3" => break,
            _ => eprintln!("[ERROR] Invalid choice. Please enter 1, 2, or 3."),
        }
    }
    Ok(())
}

fn provision(store: &mut CalibrationStore<FileEprom>, args: &Args) -> Result<()> {
    if let Some(serial) = &args.serial_number {
        store
            .write_serial_number(serial)
            .context("writing serial number")?;
        info!(serial = %serial, "serial number written");
    }
    if args.provision_factory {
        let table = store.load(Region::User).unwrap_or_else(|e| {
            warn!(error = %e, "no valid USER record, provisioning identity coefficients");
            Default::default()
        });
        let changed = store
            .provision_factory(&table)
            .context("writing FACTORY record")?;
        info!(changed, "FACTORY record written");
    }
    Ok(())
}

// Waits for the next stdin line; `None` once stdin is closed.
fn prompt(input: &mut ChannelTransport, text: &str) -> Result<Option<String>> {
    print!("{}", text);
    io::stdout().flush()?;
    loop {
        match input.read_line() {
            Ok(Some(line)) => return Ok(Some(line)),
            Ok(None) => continue,
            Err(_) => return Ok(None),
        }
    }
}

// Commands typed on stdin; the repeated stream keeps running between lines.
fn run_manual_mode(shell: &mut Shell, input: &mut ChannelTransport) -> Result<()> {
    println!("\n--- Manual Mode ---");
    println!("Enter commands, or type 'back' to return to the main menu.");
    input.write_str(BANNER)?;

    loop {
        let line = match input.read_line() {
            Ok(line) => line,
            Err(_) => break,
        };
        if let Some(line) = line {
            let command = line.trim();
            if command == "back" {
                break;
            }
            shell.handle_line(input, command)?;
        }
        shell.service_repeat(input)?;
    }
    Ok(())
}

fn run_serial_mode(
    shell: &mut Shell,
    input: &mut ChannelTransport,
    settings: &Settings,
) -> Result<()> {
    println!("\n--- Serial Mode ---");

    // List available serial ports.
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("[ERROR] Could not enumerate serial ports: {}", e);
            return Ok(());
        }
    };

    if ports.is_empty() {
        eprintln!("[ERROR] No serial ports found.");
        return Ok(());
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port.port_name);
    }

    let Some(port_choice) = prompt(input, "Select a port (number): ")? else {
        return Ok(());
    };
    let port_index: usize = match port_choice.trim().parse() {
        Ok(i) if i < ports.len() => i,
        _ => {
            eprintln!("[ERROR] Invalid port selection.");
            return Ok(());
        }
    };
    let port_name = ports[port_index].port_name.clone();

    let baud_rates = [9600, 19200, 38400, 57600, 115200];
    println!("Available baud rates:");
    for (i, &rate) in baud_rates.iter().enumerate() {
        println!("  {}: {}", i, rate);
    }
    let Some(baud_choice) = prompt(input, "Select a baud rate (number): ")? else {
        return Ok(());
    };
    let baud_rate = match baud_choice.trim().parse::<usize>() {
        Ok(i) if i < baud_rates.len() => baud_rates[i],
        _ => {
            eprintln!("[ERROR] Invalid baud rate selection.");
            return Ok(());
        }
    };

    run_serial_loop(shell, &port_name, baud_rate, settings)
}

fn run_serial_loop(shell: &mut Shell, port_name: &str, baud: u32, settings: &Settings) -> Result<()> {
    let mut port = SerialTransport::open(port_name, baud, settings.line_timeout())?;
    println!(
        "\nListening on {} at {} baud. Press Ctrl+C to exit.",
        port_name, baud
    );
    port.write_str(BANNER)?;
    // Timeouts are handled inside the transport, so any error here is fatal.
    loop {
        shell
            .poll(&mut port)
            .with_context(|| format!("serial port '{}' failed", port_name))?;
    }
}

fn run_script_mode(shell: &mut Shell, path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading script '{}'", path.display()))?;
    let mut transport = ScriptedTransport::default();
    for line in text.lines().map(str::trim) {
        if !line.is_empty() && !line.starts_with('#') {
            transport.push_line(line);
        }
    }
    transport.write_str(BANNER)?;
    while !transport.is_drained() {
        shell.poll(&mut transport)?;
    }
    // The last command holds the stream back for one cycle.
    for _ in 0..2 {
        shell.poll(&mut transport)?;
    }
    print!("{}", transport.output());
    io::stdout().flush()?;
    Ok(())
}
