//! Host-runtime seam
//!
//! Window creation, menus, dialogs, and page navigation are delegated
//! wholesale to a GUI host runtime; these traits are that boundary. The
//! launcher is written purely against them. `HeadlessRuntime` is the
//! built-in implementation: it tracks all state without a display and
//! backs the test suite and the default wiring.

use crate::options::WindowOptions;
use anyhow::Result;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Identifier assigned by the launcher's window registry
pub type WindowId = u32;

/// Notifications surfaced by the host runtime, polled by the launcher loop
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// The page changed the window title
    TitleChanged { window: WindowId, title: String },
    /// The page asked to navigate the window somewhere
    NavigationRequested { window: WindowId, url: String },
    /// The page asked to open a child window
    ChildWindowRequested { window: WindowId, url: String },
    /// A registered keyboard shortcut fired
    Shortcut { window: WindowId, key: String },
    /// The page sent a bridge request (see [`crate::bridge`])
    BridgeRequest { window: WindowId, request: Value },
    /// The window was closed
    WindowClosed { window: WindowId },
}

/// One native window hosting a page
pub trait HostWindow: Send {
    fn navigate(&mut self, url: &str) -> Result<()>;
    fn current_url(&self) -> String;

    fn set_title(&mut self, title: &str);
    fn title(&self) -> String;

    fn set_menu_visible(&mut self, visible: bool);

    fn set_fullscreen(&mut self, fullscreen: bool);
    fn is_fullscreen(&self) -> bool;
    fn maximize(&mut self);

    fn toggle_devtools(&mut self);
    fn reload(&mut self);

    fn focus(&mut self);
    fn raise(&mut self);

    /// Snapshot the page as a BGRA bitmap (width, height, pixels)
    fn capture_page(&mut self) -> Result<(u32, u32, Vec<u8>)>;

    /// Deliver a JSON payload to the page (bridge responses)
    fn deliver(&mut self, payload: Value);

    fn close(&mut self);
}

/// The GUI host runtime boundary
pub trait HostRuntime {
    fn create_window(&mut self, options: &WindowOptions) -> Result<Box<dyn HostWindow>>;

    /// Next pending host notification, if any (non-blocking)
    fn poll_event(&mut self) -> Option<HostEvent>;

    fn set_dock_icon(&mut self, icon: &Path) -> Result<()>;

    /// Install an application menu from a JSON template
    fn set_application_menu(&mut self, template: &Value) -> Result<()>;

    /// Show a file-open dialog and return the chosen paths
    fn open_file_dialog(&mut self, multi: bool) -> Result<Vec<PathBuf>>;
}

// ============================================================================
// Headless runtime
// ============================================================================

#[derive(Debug, Default)]
struct HeadlessShared {
    events: VecDeque<HostEvent>,
    menu_template: Option<Value>,
    dock_icon: Option<PathBuf>,
    /// Paths the next file dialog resolves to
    dialog_paths: Vec<PathBuf>,
    /// Payloads delivered to pages, in order, across all windows
    delivered: Vec<Value>,
    windows_created: u32,
}

/// Display-less host runtime tracking all state in memory
#[derive(Debug, Clone, Default)]
pub struct HeadlessRuntime {
    shared: Arc<Mutex<HeadlessShared>>,
}

impl HeadlessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a host event for the launcher loop (used by tests to script
    /// page behavior)
    pub fn push_event(&self, event: HostEvent) {
        self.shared.lock().unwrap().events.push_back(event);
    }

    /// Script what the next file dialog returns
    pub fn set_dialog_paths(&self, paths: Vec<PathBuf>) {
        self.shared.lock().unwrap().dialog_paths = paths;
    }

    pub fn menu_template(&self) -> Option<Value> {
        self.shared.lock().unwrap().menu_template.clone()
    }

    pub fn dock_icon(&self) -> Option<PathBuf> {
        self.shared.lock().unwrap().dock_icon.clone()
    }

    pub fn windows_created(&self) -> u32 {
        self.shared.lock().unwrap().windows_created
    }

    /// Payloads pages received through [`HostWindow::deliver`]
    pub fn delivered(&self) -> Vec<Value> {
        self.shared.lock().unwrap().delivered.clone()
    }
}

impl HostRuntime for HeadlessRuntime {
    fn create_window(&mut self, options: &WindowOptions) -> Result<Box<dyn HostWindow>> {
        let mut shared = self.shared.lock().unwrap();
        shared.windows_created += 1;
        info!(
            "Creating window {}x{} for {} (frame={}, fullscreen={})",
            options.width, options.height, options.url, options.frame, options.fullscreen
        );
        Ok(Box::new(HeadlessWindow {
            url: options.url.clone(),
            title: options.title.clone(),
            width: options.width,
            height: options.height,
            menu_visible: options.menu,
            fullscreen: options.fullscreen,
            maximized: options.maximized,
            devtools_open: false,
            focused: false,
            reloads: 0,
            closed: false,
            shared: self.shared.clone(),
        }))
    }

    fn poll_event(&mut self) -> Option<HostEvent> {
        self.shared.lock().unwrap().events.pop_front()
    }

    fn set_dock_icon(&mut self, icon: &Path) -> Result<()> {
        self.shared.lock().unwrap().dock_icon = Some(icon.to_path_buf());
        Ok(())
    }

    fn set_application_menu(&mut self, template: &Value) -> Result<()> {
        self.shared.lock().unwrap().menu_template = Some(template.clone());
        Ok(())
    }

    fn open_file_dialog(&mut self, multi: bool) -> Result<Vec<PathBuf>> {
        let mut paths = self.shared.lock().unwrap().dialog_paths.clone();
        if !multi {
            paths.truncate(1);
        }
        Ok(paths)
    }
}

/// In-memory window double
pub struct HeadlessWindow {
    url: String,
    title: String,
    width: u32,
    height: u32,
    menu_visible: bool,
    fullscreen: bool,
    maximized: bool,
    devtools_open: bool,
    focused: bool,
    reloads: u32,
    closed: bool,
    shared: Arc<Mutex<HeadlessShared>>,
}

impl HostWindow for HeadlessWindow {
    fn navigate(&mut self, url: &str) -> Result<()> {
        debug!("Window navigating to {}", url);
        self.url = url.to_string();
        Ok(())
    }

    fn current_url(&self) -> String {
        self.url.clone()
    }

    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn set_menu_visible(&mut self, visible: bool) {
        if visible != self.menu_visible {
            debug!("Menu visibility: {}", visible);
            self.menu_visible = visible;
        }
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        self.fullscreen = fullscreen;
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    fn maximize(&mut self) {
        if !self.maximized {
            debug!("Window maximized");
            self.maximized = true;
        }
    }

    fn toggle_devtools(&mut self) {
        self.devtools_open = !self.devtools_open;
    }

    fn reload(&mut self) {
        self.reloads += 1;
    }

    fn focus(&mut self) {
        if !self.focused {
            debug!("Window focused");
            self.focused = true;
        }
    }

    fn raise(&mut self) {
        // Raising also takes focus, matching typical host behavior
        self.focus();
    }

    fn capture_page(&mut self) -> Result<(u32, u32, Vec<u8>)> {
        // Blank BGRA canvas at the window's size
        let pixels = vec![0u8; (self.width * self.height * 4) as usize];
        Ok((self.width, self.height, pixels))
    }

    fn deliver(&mut self, payload: Value) {
        self.shared.lock().unwrap().delivered.push(payload);
    }

    fn close(&mut self) {
        if !self.closed {
            debug!("Window closed");
            self.closed = true;
        }
    }
}
