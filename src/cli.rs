//! Command-line interface definition using clap
//!
//! Provides structured argument parsing with automatic help generation.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// Host-side serial link for the ARES LED panel
#[derive(Parser, Debug)]
#[command(name = "ares-link")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: ./config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports present on this machine
    Ports {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send one LED frame, wait until it is written, then exit
    Send {
        #[command(flatten)]
        link: LinkArgs,

        /// 32-bit LED mask (decimal, 0x hex or 0b binary)
        #[arg(long, value_parser = parse_u32)]
        mask: u32,

        /// Command byte
        #[arg(long, value_parser = parse_u8, default_value = "0x01")]
        command: u8,

        /// Two-byte index, high byte first
        #[arg(long, value_parser = parse_u16, default_value = "0x0000")]
        index: u16,

        #[arg(long, value_parser = parse_u8, default_value = "0x00")]
        sub_index: u8,

        /// Type byte
        #[arg(long, value_parser = parse_u8, default_value = "0x00")]
        kind: u8,

        /// Seconds to wait for the frame to be written
        #[arg(long, default_value_t = 2)]
        timeout: u64,
    },

    /// Print received frames; submit masks read from stdin
    Monitor {
        #[command(flatten)]
        link: LinkArgs,

        /// One JSON object per line instead of LED rows
        #[arg(long)]
        json: bool,

        /// Reopen the port after the device disconnects
        #[arg(long)]
        reconnect: bool,
    },
}

/// Connection arguments shared by `send` and `monitor`
#[derive(Args, Debug, Default, Clone)]
pub struct LinkArgs {
    /// Serial port to use (overrides config)
    #[arg(long, value_name = "PORT")]
    pub port: Option<String>,

    /// Baud rate (overrides config)
    #[arg(long, value_name = "BAUD")]
    pub baud: Option<u32>,

    /// Use a simulated device that echoes every frame
    #[arg(long = "virtual")]
    pub virtual_device: bool,
}

// =============================================================================
// Value parsers
// =============================================================================

/// Parse an integer written in decimal, `0x` hex or `0b` binary
fn parse_radix(s: &str) -> Result<u64, String> {
    let s = s.trim().replace('_', "");
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (bin, 2)
    } else {
        (s.as_str(), 10)
    };
    u64::from_str_radix(digits, radix).map_err(|e| format!("invalid number '{}': {}", s, e))
}

pub fn parse_u32(s: &str) -> Result<u32, String> {
    let v = parse_radix(s)?;
    u32::try_from(v).map_err(|_| format!("{} does not fit in 32 bits", v))
}

pub fn parse_u16(s: &str) -> Result<u16, String> {
    let v = parse_radix(s)?;
    u16::try_from(v).map_err(|_| format!("{} does not fit in 16 bits", v))
}

pub fn parse_u8(s: &str) -> Result<u8, String> {
    let v = parse_radix(s)?;
    u8::try_from(v).map_err(|_| format!("{} does not fit in 8 bits", v))
}

// =============================================================================
// Tests
// =============================================================================
