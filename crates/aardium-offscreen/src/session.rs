//! Per-connection render session
//!
//! One session per socket connection, owning one hidden render surface and
//! one shared frame buffer. The session is a small state machine
//! (uninitialized → active → closed) plus the paint-to-frame encoder that
//! decides between full-frame appends and dirty-rect patches.

use crate::shared::SharedFrameBuffer;
use crate::surface::{
    RenderSurface, SurfaceConfig, SurfaceEvent, SurfaceFactory, DEFAULT_FRAME_RATE,
};
use aardium_proto::{Command, CustomOp, DirtyRect, Event};
use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// How often the session logs its observed paint rate
const RATE_REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// The most recent full frame resident in the shared buffer
struct FullFrameRef {
    offset: usize,
    width: u32,
    height: u32,
}

struct ActiveSession {
    surface: Box<dyn RenderSurface>,
    buffer: SharedFrameBuffer,
    incremental: bool,
    last_full: Option<FullFrameRef>,
}

/// What a command produced: events to send back, and for `init` the event
/// channel of the freshly created surface
pub struct CommandOutcome {
    pub replies: Vec<Event>,
    pub surface_events: Option<mpsc::Receiver<SurfaceEvent>>,
}

impl CommandOutcome {
    fn none() -> Self {
        Self {
            replies: Vec::new(),
            surface_events: None,
        }
    }

    fn reply(event: Event) -> Self {
        Self {
            replies: vec![event],
            surface_events: None,
        }
    }
}

/// Per-connection protocol state machine
pub struct RenderSession {
    active: Option<ActiveSession>,
    /// Cleared on close; surface callbacks that fire afterwards are
    /// suppressed instead of emitted
    connected: bool,
    /// Paint rate surfaces start at until a `setframerate` op retargets it
    default_frame_rate: u32,
    /// Paints encoded since the rate window opened
    paints_in_window: u32,
    rate_window_start: Instant,
}

impl RenderSession {
    pub fn new() -> Self {
        Self::with_frame_rate(DEFAULT_FRAME_RATE)
    }

    pub fn with_frame_rate(default_frame_rate: u32) -> Self {
        Self {
            active: None,
            connected: true,
            default_frame_rate,
            paints_in_window: 0,
            rate_window_start: Instant::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Dispatch one decoded command.
    ///
    /// Errors are recoverable from the connection's point of view: the
    /// caller logs them and keeps the connection open.
    pub fn handle_command(
        &mut self,
        command: Command,
        factory: &dyn SurfaceFactory,
    ) -> Result<CommandOutcome> {
        match command {
            Command::Init {
                map_name,
                map_size,
                width,
                height,
                url,
                incremental,
            } => {
                // Idempotent re-init: release the previous surface and
                // buffer before opening new ones, so the old map name is
                // immediately reusable
                self.close_active();

                let buffer = SharedFrameBuffer::create(&map_name, map_size)
                    .with_context(|| format!("failed to open shared buffer {map_name:?}"))?;

                let (mut surface, surface_events) = factory
                    .create(SurfaceConfig {
                        width,
                        height,
                        url: url.clone(),
                        frame_rate: self.default_frame_rate,
                    })
                    .context("failed to create render surface")?;
                surface.set_frame_rate(self.default_frame_rate);

                info!(
                    "Session initialized: {}x{} -> {} ({} bytes, incremental={})",
                    width, height, map_name, map_size, incremental
                );

                self.active = Some(ActiveSession {
                    surface,
                    buffer,
                    incremental,
                    last_full: None,
                });

                Ok(CommandOutcome {
                    replies: vec![Event::InitComplete],
                    surface_events: Some(surface_events),
                })
            }

            Command::RequestFullFrame => {
                if let Some(active) = self.active.as_mut() {
                    active.surface.request_capture();
                }
                Ok(CommandOutcome::none())
            }

            Command::OpenDevTools => {
                if let Some(active) = self.active.as_mut() {
                    active.surface.open_devtools();
                }
                Ok(CommandOutcome::none())
            }

            Command::Resize { width, height } => {
                if let Some(active) = self.active.as_mut() {
                    active.surface.resize(width, height);
                    // The remembered full frame no longer matches the
                    // surface; the next partial paint must take the full
                    // path instead of patching with stale dimensions
                    active.last_full = None;
                }
                Ok(CommandOutcome::none())
            }

            Command::InputEvent { event } => {
                let active = self
                    .active
                    .as_mut()
                    .ok_or_else(|| anyhow!("inputevent on uninitialized session"))?;
                active.surface.inject_input(event)?;
                Ok(CommandOutcome::none())
            }

            Command::SetFocus { focus } => {
                if let Some(active) = self.active.as_mut() {
                    active.surface.set_focus(focus);
                }
                Ok(CommandOutcome::none())
            }

            Command::Custom { op, args, id } => {
                let result = self.run_custom_op(&op, &args);
                match id {
                    Some(id) => Ok(CommandOutcome::reply(Event::Result { id, result })),
                    None => Ok(CommandOutcome::none()),
                }
            }
        }
    }

    /// Execute one allow-listed operation against the active surface.
    /// Names off the allow list produce an error result and run nothing.
    fn run_custom_op(&mut self, op: &str, args: &Value) -> Value {
        let Some(op) = CustomOp::from_name(op) else {
            return json!({ "error": format!("unknown operation {op:?}") });
        };
        let Some(active) = self.active.as_mut() else {
            return json!({ "error": "session not initialized" });
        };

        match op {
            CustomOp::Navigate => {
                let Some(url) = args.get("url").and_then(Value::as_str) else {
                    return json!({ "error": "navigate requires args.url" });
                };
                match active.surface.navigate(url) {
                    Ok(()) => json!({ "ok": true }),
                    Err(e) => json!({ "error": e.to_string() }),
                }
            }
            CustomOp::Reload => match active.surface.reload() {
                Ok(()) => json!({ "ok": true }),
                Err(e) => json!({ "error": e.to_string() }),
            },
            CustomOp::SetFrameRate => {
                let Some(fps) = args.get("fps").and_then(Value::as_u64) else {
                    return json!({ "error": "setframerate requires args.fps" });
                };
                active.surface.set_frame_rate(fps as u32);
                json!({ "ok": true })
            }
            CustomOp::Geometry => {
                let (width, height) = active.surface.size();
                json!({ "width": width, "height": height })
            }
        }
    }

    /// Encode one surface callback into a protocol event.
    ///
    /// Returns None when the session is closed or uninitialized: in-flight
    /// callbacks queued before close must not leak out afterwards.
    pub fn handle_surface_event(&mut self, event: SurfaceEvent) -> Option<Event> {
        if !self.connected {
            debug!("Suppressing surface event after session close");
            return None;
        }
        let active = self.active.as_mut()?;

        match event {
            SurfaceEvent::CursorChanged { name } => Some(Event::ChangeCursor { name }),

            SurfaceEvent::Captured {
                pixels,
                width,
                height,
            } => Some(encode_full(active, &pixels, width, height)),

            SurfaceEvent::Paint {
                pixels,
                width,
                height,
                dirty,
            } => {
                self.paints_in_window += 1;
                let elapsed = self.rate_window_start.elapsed();
                if elapsed >= RATE_REPORT_INTERVAL {
                    let rate = self.paints_in_window as f64 / elapsed.as_secs_f64();
                    debug!("Session paint rate: {:.1} fps", rate);
                    self.paints_in_window = 0;
                    self.rate_window_start = Instant::now();
                }
                Some(encode_paint(active, &pixels, width, height, dirty))
            }
        }
    }

    /// Release the surface and buffer of an active session, if any. The
    /// session stays connected and can be re-initialized.
    fn close_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.buffer.close();
            debug!("Released render surface and shared buffer");
        }
    }

    /// Tear the session down: surface and buffer handles are released
    /// before this returns, and every later emission is suppressed.
    /// Best-effort; never fails.
    pub fn close(&mut self) {
        self.close_active();
        self.connected = false;
    }
}

impl Default for RenderSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Full-frame path: wraparound append plus a `fullframe` event. The
/// reported byte length is the frame's true size even when the append
/// truncated at the buffer's capacity.
fn encode_full(active: &mut ActiveSession, pixels: &[u8], width: u32, height: u32) -> Event {
    let offset = active.buffer.append(pixels);
    active.last_full = Some(FullFrameRef {
        offset,
        width,
        height,
    });
    Event::FullFrame {
        width,
        height,
        offset,
        byte_length: pixels.len(),
    }
}

/// Paint encoder: dirty-rect patch into the resident full frame when the
/// caller asked for incremental updates and the previous full frame is
/// still valid for the surface's dimensions, full-frame append otherwise.
fn encode_paint(
    active: &mut ActiveSession,
    pixels: &[u8],
    width: u32,
    height: u32,
    dirty: DirtyRect,
) -> Event {
    if active.incremental && !dirty.covers(width, height) {
        let patched = match &active.last_full {
            Some(last) if last.width == width && last.height == height => {
                active.buffer.patch_rect(last.offset, dirty, pixels, width)
            }
            _ => false,
        };

        if patched {
            let offset = active
                .last_full
                .as_ref()
                .map(|last| last.offset)
                .unwrap_or(0);
            return Event::PartialFrame {
                width,
                height,
                offset,
                byte_length: 0,
                dx: dirty.x,
                dy: dirty.y,
                dw: dirty.width,
                dh: dirty.height,
            };
        }
        debug!("No resident full frame for dirty rect, falling back to full path");
    }

    encode_full(active, pixels, width, height)
}
