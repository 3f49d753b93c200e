//! ARES link - host-side serial link for the ARES LED panel
//!
//! Usage:
//!   ares-link ports                              List serial ports
//!   ares-link send --port COM3 --mask 0xFF       Send one LED frame
//!   ares-link monitor --port COM3 [--json]       Watch frames, send masks from stdin
//!   ares-link monitor --virtual                  Same, against a simulated device

mod cli;

use anyhow::{bail, Context, Result};
use ares_link::config::{self, Config};
use ares_link::constants::RECONNECT_DELAY_SECS;
use ares_link::dispatcher::ObserverResult;
use ares_link::logging::{init_tracing, timestamp};
use ares_link::transport::serial::list_ports;
use ares_link::{Frame, LinkEvent, LinkSession, LinkState, MemoryTransport, SerialTransport};
use clap::Parser;
use cli::{parse_u32, Cli, Command, LinkArgs};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Port name shown for the simulated device
const VIRTUAL_PORT: &str = "virtual";

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let path = config::config_path(cli.config.as_deref());
    let cfg = config::load(&path);

    match cli.command {
        Command::Ports { json } => run_ports(json),
        Command::Send {
            link,
            mask,
            command,
            index,
            sub_index,
            kind,
            timeout,
        } => {
            let target = Target::resolve(&cfg, &link)?;
            let session = target.session(&cfg);
            let frame = Frame::with_bitmask(command, index.to_be_bytes(), sub_index, kind, mask);
            run_send(&session, &target, &frame, Duration::from_secs(timeout))
        }
        Command::Monitor {
            link,
            json,
            reconnect,
        } => {
            let target = Target::resolve(&cfg, &link)?;
            let session = Arc::new(target.session(&cfg));
            let rt = tokio::runtime::Runtime::new()?;
            let result = rt.block_on(run_monitor(session, target, json, reconnect));
            // The stdin reader sits in a blocking read; do not wait for it
            rt.shutdown_background();
            result
        }
    }
}

// =============================================================================
// Session setup
// =============================================================================

/// Where to connect, after merging CLI flags over the config file
struct Target {
    port: String,
    baud_rate: u32,
    virtual_device: bool,
}

impl Target {
    fn resolve(cfg: &Config, args: &LinkArgs) -> Result<Self> {
        let port = args
            .port
            .clone()
            .unwrap_or_else(|| cfg.link.port.clone());
        let port = match (port.is_empty(), args.virtual_device) {
            (true, true) => VIRTUAL_PORT.to_string(),
            (true, false) => bail!("No serial port given (use --port or set link.port in config)"),
            (false, _) => port,
        };

        let baud_rate = args.baud.unwrap_or(cfg.link.baud_rate);
        if baud_rate == 0 {
            bail!("Baud rate must be greater than 0");
        }

        Ok(Self {
            port,
            baud_rate,
            virtual_device: args.virtual_device,
        })
    }

    fn session(&self, cfg: &Config) -> LinkSession {
        let options = cfg.link_options();
        if self.virtual_device {
            LinkSession::new(MemoryTransport::echo(), options)
        } else {
            LinkSession::new(SerialTransport::new(cfg.read_timeout()), options)
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

fn run_ports(json: bool) -> Result<()> {
    let ports = list_ports();

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("No serial ports found");
        return Ok(());
    }

    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{:<24} {:<9} {:04X}:{:04X} {}",
                port.name,
                port.kind,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{:<24} {}", port.name, port.kind),
        }
    }
    Ok(())
}

fn run_send(session: &LinkSession, target: &Target, frame: &Frame, timeout: Duration) -> Result<()> {
    session
        .open(&target.port, target.baud_rate)
        .with_context(|| format!("Cannot open {}", target.port))?;

    let seq = session.send(frame)?;
    session
        .drain_and_close(timeout)
        .context("Frame was not delivered")?;

    tracing::debug!(seq, "Frame delivered");
    println!("{} TX {}", timestamp(), frame);
    Ok(())
}

async fn run_monitor(
    session: Arc<LinkSession>,
    target: Target,
    json: bool,
    reconnect: bool,
) -> Result<()> {
    session.on_frame_received(move |frame: &Frame| -> ObserverResult {
        print_frame(frame, json)
    });
    let mut events = session.subscribe_events();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    if let Err(e) = session.open(&target.port, target.baud_rate) {
        if !reconnect {
            return Err(e).with_context(|| format!("Cannot open {}", target.port));
        }
        eprintln!("{}, retrying every {}s", e, RECONNECT_DELAY_SECS);
        tokio::select! {
            _ = &mut ctrl_c => return Ok(()),
            _ = reopen(&session, &target) => {}
        }
    }

    eprintln!(
        "Monitoring {} @ {} baud (type a mask and press Enter to send, Ctrl-C to quit)",
        target.port, target.baud_rate
    );
    tokio::spawn(submit_stdin_masks(session.clone()));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Ok(LinkEvent::Error { port, reason }) => eprintln!("{}: {}", port, reason),
                Ok(LinkEvent::Disconnected { port }) => {
                    eprintln!("{} disconnected", port);
                    if !reconnect {
                        break;
                    }
                    tokio::select! {
                        _ = &mut ctrl_c => break,
                        _ = reopen(&session, &target) => {}
                    }
                }
                Ok(LinkEvent::Connected { port }) => tracing::debug!(port = %port, "Connected"),
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "Link events lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    session.close();
    let stats = session.stats();
    tracing::info!(
        frames_in = stats.frames_in,
        frames_out = stats.frames_out,
        malformed = stats.malformed_frames,
        "Monitor stopped"
    );
    Ok(())
}

/// Keep trying to open the port until it succeeds
async fn reopen(session: &LinkSession, target: &Target) {
    loop {
        tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        if session.state() != LinkState::Disconnected {
            return;
        }
        match session.open(&target.port, target.baud_rate) {
            Ok(()) => {
                eprintln!("{} reconnected", target.port);
                return;
            }
            Err(e) => tracing::debug!("Reconnect failed: {}", e),
        }
    }
}

/// Submit one LED mask per stdin line until EOF
async fn submit_stdin_masks(session: Arc<LinkSession>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mask = match parse_u32(line) {
            Ok(m) => m,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        let frame = Frame::with_bitmask(0x01, [0x00, 0x00], 0x00, 0x00, mask);
        match session.send(&frame) {
            Ok(seq) => tracing::debug!(seq, "Mask queued"),
            Err(e) => eprintln!("{}", e),
        }
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Serialize)]
struct FrameLine<'a> {
    timestamp: String,
    frame: &'a Frame,
    mask: u32,
    leds: Vec<bool>,
}

fn print_frame(frame: &Frame, json: bool) -> ObserverResult {
    if json {
        let line = FrameLine {
            timestamp: timestamp(),
            frame,
            mask: frame.bitmask(),
            leds: (0..32).map(|n| frame.bit(n)).collect(),
        };
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!("{} RX {}  {}", timestamp(), frame, led_row(frame));
    }
    Ok(())
}

/// LED 0 first, one group of 8 per payload byte
fn led_row(frame: &Frame) -> String {
    let mut row = String::with_capacity(35);
    for n in 0..32 {
        if n > 0 && n % 8 == 0 {
            row.push(' ');
        }
        row.push(if frame.bit(n) { '#' } else { '.' });
    }
    row
}
