// CLI definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ambient-led")]
#[command(author, version, about = "Screen-reactive ambient lighting driver")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive every strip configured in the config directory (default)
    Run,

    /// Parse and validate configuration files without opening anything
    #[command(visible_alias = "validate")]
    Check {
        /// Configuration files to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List serial ports usable as `com` names
    #[command(visible_alias = "list")]
    Ports,
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Directory of *.json instance configurations
    #[arg(short, long, default_value = "config", value_name = "DIR")]
    pub config_dir: PathBuf,

    /// Worker threads for capture and device I/O
    #[arg(short, long, default_value_t = 4)]
    pub workers: usize,

    /// Screen capture backend
    #[arg(long, value_enum, default_value_t = CaptureKind::default())]
    pub capture: CaptureKind,

    /// Color shown by the static backend (RRGGBB)
    #[arg(long, default_value = "202020", value_parser = parse_hex_color)]
    pub static_color: u32,

    /// Config directory poll interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub poll_ms: u64,

    /// Rate the PipeWire stream is requested at
    #[arg(long, default_value_t = 60)]
    pub capture_fps: u32,

    /// Start with all strips paused
    #[arg(long)]
    pub paused: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Default, Debug)]
pub enum CaptureKind {
    /// Solid color from --static-color (dry runs)
    #[cfg_attr(not(feature = "screen-capture"), default)]
    Static,
    /// XDG ScreenCast portal + PipeWire
    #[cfg_attr(feature = "screen-capture", default)]
    Pipewire,
}

fn parse_hex_color(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches('#');
    if digits.len() != 6 {
        return Err(format!("expected RRGGBB, got {s:?}"));
    }
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid color {s:?}: {e}"))
}
