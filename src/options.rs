//! Window option construction and merging
//!
//! Defaults follow the historical launcher: 1024×768, the aardvark home
//! page, and a pinned title only when the user supplied one. `--woptions`
//! is a shallow JSON overlay applied over the assembled defaults, last
//! write wins per key.

use crate::cli::Cli;
use crate::config::Config;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

pub const DEFAULT_TITLE: &str = "Aardvark rocks \\o/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowOptions {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub url: String,
    pub icon: PathBuf,
    pub fullscreen: bool,
    pub maximized: bool,
    /// False for a frameless window
    pub frame: bool,
    /// Show the default application menu
    pub menu: bool,
    /// Enable experimental webkit extensions
    pub experimental: bool,
    /// Debug tools available (inspector shortcut, reload shortcut)
    pub debug: bool,
    /// Permit navigation away from the initial host
    pub allow_external: bool,
    /// Keep the configured title when the page tries to change it
    pub prevent_title_change: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            title: DEFAULT_TITLE.to_string(),
            url: "http://ask.aardvark.graphics".to_string(),
            icon: default_icon(),
            fullscreen: false,
            maximized: false,
            frame: true,
            menu: false,
            experimental: false,
            debug: false,
            allow_external: false,
            prevent_title_change: false,
        }
    }
}

impl WindowOptions {
    /// Assemble options from config defaults and command-line flags
    /// (flags win), then apply the `--woptions` overlay if present.
    pub fn from_cli(cli: &Cli, config: &Config) -> Result<Self> {
        let mut options = Self {
            width: cli.width.unwrap_or(config.window.width),
            height: cli.height.unwrap_or(config.window.height),
            url: cli.url.clone().unwrap_or_else(|| config.window.url.clone()),
            fullscreen: cli.fullscreen,
            maximized: cli.maximized,
            frame: !cli.frameless,
            menu: cli.menu,
            experimental: cli.experimental,
            debug: cli.debug,
            allow_external: cli.allow_external,
            ..Self::default()
        };

        // A user-supplied title is pinned against page title changes; the
        // default title is not
        match cli.title.clone().or_else(|| config.window.title.clone()) {
            Some(title) => {
                options.title = title;
                options.prevent_title_change = true;
            }
            None => {
                options.title = DEFAULT_TITLE.to_string();
                options.prevent_title_change = false;
            }
        }

        if let Some(icon) = &cli.icon {
            options.icon = icon.clone();
        }

        match &cli.woptions {
            Some(overlay) => options.merge_overlay(overlay),
            None => Ok(options),
        }
    }

    /// Shallow key-by-key merge of a JSON object over these options.
    /// Unknown keys are accepted and dropped.
    pub fn merge_overlay(self, overlay: &str) -> Result<Self> {
        let patch: Value =
            serde_json::from_str(overlay).context("window options overlay is not valid JSON")?;
        let Value::Object(patch_map) = patch else {
            bail!("window options overlay must be a JSON object");
        };

        let mut base = serde_json::to_value(&self)?;
        let Value::Object(base_map) = &mut base else {
            unreachable!("window options always serialize to an object");
        };
        for (key, value) in patch_map {
            base_map.insert(key, value);
        }

        serde_json::from_value(base).context("window options overlay has incompatible values")
    }
}

/// Platform-specific default icon, next to the executable
fn default_icon() -> PathBuf {
    let name = if cfg!(target_os = "macos") {
        "aardvark_128.png"
    } else if cfg!(target_os = "windows") {
        "aardvark.ico"
    } else {
        "aardvark.png"
    };
    PathBuf::from(name)
}
