//! Command-line surface of the launcher
//!
//! Mirrors the historical getopt flag set; `--server` flips the process
//! into offscreen render-server mode instead of showing a window.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "aardium")]
#[command(about = "Thin configurable desktop-shell launcher", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Initial window width
    #[arg(short = 'w', long)]
    pub width: Option<u32>,

    /// Initial window height
    #[arg(long)]
    pub height: Option<u32>,

    /// Initial url
    #[arg(short = 'u', long)]
    pub url: Option<String>,

    /// Show debug tools (enables the F10/F5 shortcuts)
    #[arg(short = 'g', long)]
    pub debug: bool,

    /// Icon file
    #[arg(short = 'i', long)]
    pub icon: Option<PathBuf>,

    /// Window title; setting one also pins it against page title changes
    #[arg(short = 't', long)]
    pub title: Option<String>,

    /// Display the default menu
    #[arg(short = 'm', long)]
    pub menu: bool,

    /// Display a fullscreen window
    #[arg(long)]
    pub fullscreen: bool,

    /// Start with a maximized window
    #[arg(long)]
    pub maximized: bool,

    /// Enable experimental webkit extensions
    #[arg(short = 'e', long)]
    pub experimental: bool,

    /// Frameless window
    #[arg(long)]
    pub frameless: bool,

    /// Window options overlay as a JSON object, merged over the defaults
    #[arg(long, value_name = "JSON")]
    pub woptions: Option<String>,

    /// Allow the page to navigate away from the initial host
    #[arg(long)]
    pub allow_external: bool,

    /// Run the offscreen render server instead of showing a window;
    /// the port defaults to the configured one when omitted
    #[arg(long, value_name = "PORT", num_args = 0..=1)]
    pub server: Option<Option<u16>>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
