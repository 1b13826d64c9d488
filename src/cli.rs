// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use octokeyz::{DisplayLineAlign, LedState};

#[derive(Parser)]
#[command(name = "octokeyz")]
#[command(author, version, about = "Host driver for octokeyz and b8 USB macropads")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file path (default: ~/.config/octokeyz/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Serial number of the keypad to use
    #[arg(short, long, global = true)]
    pub serial: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Look for a b8 keypad instead of an octokeyz
    #[arg(long, global = true)]
    pub legacy_b8: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List connected keypads
    #[command(visible_aliases = ["ls"])]
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set the LED state (on, flash, slow-blink, fast-blink, off)
    Led {
        state: LedState,
    },

    /// Draw text on a display line
    Display {
        /// Line number (1-8)
        #[arg(value_parser = clap::value_parser!(u8).range(1..=8))]
        line: u8,

        /// Text to draw (cut to the display width)
        text: String,

        /// Horizontal alignment (left, right, center)
        #[arg(short, long, default_value = "left")]
        align: DisplayLineAlign,
    },

    /// Clear the display, or a single line of it
    Clear {
        /// Only clear this line (1-8)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=8))]
        line: Option<u8>,

        /// Let the keypad clear the display after this many milliseconds
        #[arg(long, conflicts_with = "line")]
        delay_ms: Option<u16>,
    },

    /// Log button presses until interrupted
    Listen,
}
