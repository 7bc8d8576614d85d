//! Launcher lifecycle
//!
//! Creates the initial window through the host runtime, owns the window
//! registry, and reacts to host notifications: shortcut dispatch, title
//! pinning, external-navigation policy, and multi-window parenting.

use crate::bridge::{Bridge, BridgeRequest};
use crate::options::WindowOptions;
use crate::registry::WindowRegistry;
use crate::runtime::{HostEvent, HostRuntime, WindowId};
use anyhow::{Context, Result};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keyboard shortcut actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShortcutAction {
    ToggleFullscreen,
    ToggleDevTools,
    Reload,
}

struct Shortcut {
    key: &'static str,
    action: ShortcutAction,
}

/// Application lifecycle context for launcher mode
pub struct Launcher {
    options: WindowOptions,
    registry: WindowRegistry,
    shortcuts: Vec<Shortcut>,
    bridge: Bridge,
    /// Host of the initial URL, for the external-navigation policy
    initial_host: Option<String>,
}

impl Launcher {
    pub fn new(options: WindowOptions) -> Self {
        let mut shortcuts = vec![Shortcut {
            key: "F11",
            action: ShortcutAction::ToggleFullscreen,
        }];
        if options.debug {
            shortcuts.push(Shortcut {
                key: "F10",
                action: ShortcutAction::ToggleDevTools,
            });
            shortcuts.push(Shortcut {
                key: "F5",
                action: ShortcutAction::Reload,
            });
        }

        let initial_host = url_host(&options.url).map(str::to_string);

        Self {
            options,
            registry: WindowRegistry::new(),
            shortcuts,
            bridge: Bridge::new(),
            initial_host,
        }
    }

    /// Create and register the initial window
    pub fn start(&mut self, runtime: &mut dyn HostRuntime) -> Result<WindowId> {
        runtime
            .set_dock_icon(&self.options.icon)
            .context("failed to set dock icon")?;

        let mut window = runtime
            .create_window(&self.options)
            .context("failed to create main window")?;
        window.set_menu_visible(self.options.menu);
        if self.options.maximized {
            window.maximize();
        }

        let id = self.registry.insert(window, None);
        info!("Main window {} created for {}", id, self.options.url);
        Ok(id)
    }

    /// Drive the launcher until every window is closed
    pub async fn run(&mut self, runtime: &mut dyn HostRuntime) -> Result<()> {
        self.start(runtime)?;

        while !self.registry.is_empty() {
            match runtime.poll_event() {
                Some(event) => self.handle_event(event, runtime)?,
                None => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }

        info!("All windows closed, shutting down");
        Ok(())
    }

    /// React to one host notification
    pub fn handle_event(&mut self, event: HostEvent, runtime: &mut dyn HostRuntime) -> Result<()> {
        match event {
            HostEvent::TitleChanged { window, title } => {
                let pinned_title = self.options.title.clone();
                let pinned = self.options.prevent_title_change;
                if let Some(handle) = self.registry.get_mut(window) {
                    if pinned {
                        // Pinned titles win over page title changes
                        handle.set_title(&pinned_title);
                    } else {
                        handle.set_title(&title);
                    }
                }
            }

            HostEvent::NavigationRequested { window, url } => {
                let allowed = self.options.allow_external
                    || match (&self.initial_host, url_host(&url)) {
                        (Some(initial), Some(target)) => initial.eq_ignore_ascii_case(target),
                        _ => false,
                    };
                if let Some(handle) = self.registry.get_mut(window) {
                    if allowed {
                        handle.navigate(&url)?;
                    } else {
                        warn!("Refusing external navigation of window {} to {}", window, url);
                    }
                }
            }

            HostEvent::ChildWindowRequested { window, url } => {
                if !self.registry.contains(window) {
                    debug!("Child window request from unknown window {}", window);
                    return Ok(());
                }
                let child_options = WindowOptions {
                    url,
                    ..self.options.clone()
                };
                let mut child = runtime
                    .create_window(&child_options)
                    .context("failed to create child window")?;
                child.set_menu_visible(self.options.menu);
                let child_id = self.registry.insert(child, Some(window));
                info!("Child window {} opened by window {}", child_id, window);
            }

            HostEvent::Shortcut { window, key } => {
                let action = self
                    .shortcuts
                    .iter()
                    .find(|shortcut| shortcut.key == key)
                    .map(|shortcut| shortcut.action);
                let Some(action) = action else {
                    debug!("Unbound shortcut {}", key);
                    return Ok(());
                };
                if let Some(handle) = self.registry.get_mut(window) {
                    match action {
                        ShortcutAction::ToggleFullscreen => {
                            let next = !handle.is_fullscreen();
                            info!("fullscreen: {}", next);
                            handle.set_fullscreen(next);
                        }
                        ShortcutAction::ToggleDevTools => {
                            info!("devtools");
                            handle.toggle_devtools();
                        }
                        ShortcutAction::Reload => {
                            info!("reload");
                            handle.reload();
                        }
                    }
                }
            }

            HostEvent::BridgeRequest { window, request } => {
                let request: BridgeRequest = match serde_json::from_value(request) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Malformed bridge request from window {}: {}", window, e);
                        return Ok(());
                    }
                };
                let Some(handle) = self.registry.get_mut(window) else {
                    return Ok(());
                };
                let payload = match self.bridge.handle(request, handle.as_mut(), runtime) {
                    Ok(response) => serde_json::to_value(response)?,
                    Err(e) => {
                        warn!("Bridge request from window {} failed: {:#}", window, e);
                        json!({ "response": "error", "message": e.to_string() })
                    }
                };
                if let Some(handle) = self.registry.get_mut(window) {
                    handle.deliver(payload);
                }
            }

            HostEvent::WindowClosed { window } => {
                self.close_window(window);
            }
        }

        Ok(())
    }

    /// Remove a window and close any children parented to it
    fn close_window(&mut self, id: WindowId) {
        let Some((mut handle, children)) = self.registry.remove(id) else {
            return;
        };
        handle.close();
        info!(
            "Window {} closed ({} remaining, main {:?})",
            id,
            self.registry.len(),
            self.registry.main_window()
        );
        for child in children {
            self.close_window(child);
        }
    }
}

/// Host (including port) of a URL, without pulling in a URL parser:
/// everything between the scheme separator and the next slash
fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::HeadlessRuntime;

    fn launcher_with(options: WindowOptions) -> (Launcher, HeadlessRuntime, WindowId) {
        let mut launcher = Launcher::new(options);
        let mut runtime = HeadlessRuntime::new();
        let id = launcher.start(&mut runtime).unwrap();
        (launcher, runtime, id)
    }

    #[test]
    fn test_start_installs_the_dock_icon() {
        let (_launcher, runtime, _id) = launcher_with(base_options());
        assert!(runtime.dock_icon().is_some());
    }

    fn base_options() -> WindowOptions {
        WindowOptions {
            url: "http://app.example:4321/index.html".into(),
            ..WindowOptions::default()
        }
    }

    #[test]
    fn test_url_host_extraction() {
        assert_eq!(url_host("http://app.example:4321/x/y"), Some("app.example:4321"));
        assert_eq!(url_host("https://host"), Some("host"));
        assert_eq!(url_host("no-scheme"), None);
    }

    #[test]
    fn test_pinned_title_survives_page_changes() {
        let options = WindowOptions {
            title: "Pinned".into(),
            prevent_title_change: true,
            ..base_options()
        };
        let (mut launcher, mut runtime, id) = launcher_with(options);

        launcher
            .handle_event(
                HostEvent::TitleChanged { window: id, title: "Page Title".into() },
                &mut runtime,
            )
            .unwrap();
        assert_eq!(launcher.registry.get_mut(id).unwrap().title(), "Pinned");
    }

    #[test]
    fn test_default_title_follows_page_changes() {
        let (mut launcher, mut runtime, id) = launcher_with(base_options());

        launcher
            .handle_event(
                HostEvent::TitleChanged { window: id, title: "Page Title".into() },
                &mut runtime,
            )
            .unwrap();
        assert_eq!(launcher.registry.get_mut(id).unwrap().title(), "Page Title");
    }

    #[test]
    fn test_external_navigation_is_refused_by_default() {
        let (mut launcher, mut runtime, id) = launcher_with(base_options());

        launcher
            .handle_event(
                HostEvent::NavigationRequested {
                    window: id,
                    url: "http://evil.example/".into(),
                },
                &mut runtime,
            )
            .unwrap();
        assert_eq!(
            launcher.registry.get_mut(id).unwrap().current_url(),
            "http://app.example:4321/index.html"
        );

        // same host is fine
        launcher
            .handle_event(
                HostEvent::NavigationRequested {
                    window: id,
                    url: "http://app.example:4321/other".into(),
                },
                &mut runtime,
            )
            .unwrap();
        assert_eq!(
            launcher.registry.get_mut(id).unwrap().current_url(),
            "http://app.example:4321/other"
        );
    }

    #[test]
    fn test_allow_external_permits_navigation() {
        let options = WindowOptions {
            allow_external: true,
            ..base_options()
        };
        let (mut launcher, mut runtime, id) = launcher_with(options);

        launcher
            .handle_event(
                HostEvent::NavigationRequested {
                    window: id,
                    url: "http://elsewhere.example/".into(),
                },
                &mut runtime,
            )
            .unwrap();
        assert_eq!(
            launcher.registry.get_mut(id).unwrap().current_url(),
            "http://elsewhere.example/"
        );
    }

    #[test]
    fn test_f11_always_bound_f10_needs_debug() {
        let (mut launcher, mut runtime, id) = launcher_with(base_options());

        launcher
            .handle_event(HostEvent::Shortcut { window: id, key: "F11".into() }, &mut runtime)
            .unwrap();
        assert!(launcher.registry.get_mut(id).unwrap().is_fullscreen());

        // F10 is unbound without --debug: nothing happens
        launcher
            .handle_event(HostEvent::Shortcut { window: id, key: "F10".into() }, &mut runtime)
            .unwrap();

        let options = WindowOptions { debug: true, ..base_options() };
        let (mut launcher, mut runtime, id) = launcher_with(options);
        launcher
            .handle_event(HostEvent::Shortcut { window: id, key: "F5".into() }, &mut runtime)
            .unwrap();
        // reload observed through the headless double is checked in
        // runtime tests; here it must simply not error and keep the window
        assert!(launcher.registry.contains(id));
    }

    #[test]
    fn test_child_windows_close_with_their_parent() {
        let (mut launcher, mut runtime, parent) = launcher_with(base_options());

        launcher
            .handle_event(
                HostEvent::ChildWindowRequested {
                    window: parent,
                    url: "http://app.example:4321/child".into(),
                },
                &mut runtime,
            )
            .unwrap();
        assert_eq!(launcher.registry.len(), 2);
        assert_eq!(runtime.windows_created(), 2);

        launcher
            .handle_event(HostEvent::WindowClosed { window: parent }, &mut runtime)
            .unwrap();
        assert!(launcher.registry.is_empty());
    }

    #[test]
    fn test_bridge_requests_are_answered_through_the_window() {
        let (mut launcher, mut runtime, id) = launcher_with(base_options());

        launcher
            .handle_event(
                HostEvent::BridgeRequest {
                    window: id,
                    request: serde_json::json!({ "request": "focusWindow" }),
                },
                &mut runtime,
            )
            .unwrap();
        assert_eq!(
            runtime.delivered(),
            vec![serde_json::json!({ "response": "ack" })]
        );

        // malformed requests are logged and produce no delivery
        launcher
            .handle_event(
                HostEvent::BridgeRequest {
                    window: id,
                    request: serde_json::json!({ "request": "eval" }),
                },
                &mut runtime,
            )
            .unwrap();
        assert_eq!(runtime.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_run_exits_when_all_windows_close() {
        let mut launcher = Launcher::new(base_options());
        let mut runtime = HeadlessRuntime::new();
        // the first registered window always gets id 1
        runtime.push_event(HostEvent::WindowClosed { window: 1 });

        launcher.run(&mut runtime).await.unwrap();
        assert!(launcher.registry.is_empty());
    }
}
