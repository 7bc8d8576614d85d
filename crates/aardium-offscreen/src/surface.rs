//! Render-surface seam
//!
//! A render surface is an off-screen instance of a page-rendering engine
//! producing pixel callbacks instead of an on-screen window. The session and
//! server are engine-agnostic: an embedding binds its engine by implementing
//! [`RenderSurface`] and [`SurfaceFactory`]. The crate ships
//! [`SoftwareSurface`], a software test-pattern producer used by the default
//! binary wiring and the tests.

use aardium_proto::DirtyRect;
use anyhow::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Fixed paint rate targeted after `init`
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Channel depth for surface events. Paint producers block (or drop, for
/// synchronous emitters) rather than queue unboundedly.
pub const EVENT_CHANNEL_DEPTH: usize = 64;

/// Events emitted by a render surface, in paint-callback order
#[derive(Debug, Clone)]
pub enum SurfaceEvent {
    /// A paint callback fired: the full BGRA bitmap plus the region that
    /// actually changed since the previous paint
    Paint {
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        dirty: DirtyRect,
    },

    /// Reply to an explicit [`RenderSurface::request_capture`]
    Captured {
        pixels: Vec<u8>,
        width: u32,
        height: u32,
    },

    /// The surface's mouse cursor shape changed
    CursorChanged { name: String },
}

/// Parameters for creating a hidden render surface
#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    pub url: String,
    pub frame_rate: u32,
}

/// An off-screen page-rendering surface.
///
/// Methods are synchronous and non-blocking; anything that resolves later
/// (captures, paints, cursor changes) arrives on the event channel handed
/// out by the factory at creation time.
pub trait RenderSurface: Send {
    /// Navigate to a new URL
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Reload the current page
    fn reload(&mut self) -> Result<()>;

    /// Resize the content area
    fn resize(&mut self, width: u32, height: u32);

    /// Focus or blur the surface
    fn set_focus(&mut self, focus: bool);

    /// Forward a synthetic input event
    fn inject_input(&mut self, event: Value) -> Result<()>;

    /// Open a detached inspector
    fn open_devtools(&mut self);

    /// Retarget the paint rate
    fn set_frame_rate(&mut self, fps: u32);

    /// Request one explicit full capture; resolves asynchronously as
    /// [`SurfaceEvent::Captured`]
    fn request_capture(&mut self);

    /// Current content size
    fn size(&self) -> (u32, u32);
}

/// Creates render surfaces for new sessions. This is the embedder seam.
pub trait SurfaceFactory: Send + Sync {
    fn create(
        &self,
        config: SurfaceConfig,
    ) -> Result<(Box<dyn RenderSurface>, mpsc::Receiver<SurfaceEvent>)>;
}

// ============================================================================
// Software surface
// ============================================================================

/// Factory for [`SoftwareSurface`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareSurfaceFactory;

impl SurfaceFactory for SoftwareSurfaceFactory {
    fn create(
        &self,
        config: SurfaceConfig,
    ) -> Result<(Box<dyn RenderSurface>, mpsc::Receiver<SurfaceEvent>)> {
        let (surface, rx) = SoftwareSurface::spawn(config);
        Ok((Box::new(surface), rx))
    }
}

struct SoftwareState {
    width: u32,
    height: u32,
    url: String,
    frame_rate: u32,
    focused: bool,
    /// Paints since the last full invalidation
    paints_since_invalidate: u64,
    closed: bool,
}

/// Software render surface painting a BGRA test pattern at the configured
/// frame rate. The first paint after creation, `navigate`, `reload`, or
/// `resize` reports a full dirty rect; subsequent paints report a moving
/// row band.
pub struct SoftwareSurface {
    state: Arc<Mutex<SoftwareState>>,
    tx: mpsc::Sender<SurfaceEvent>,
}

impl SoftwareSurface {
    pub fn spawn(config: SurfaceConfig) -> (Self, mpsc::Receiver<SurfaceEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let state = Arc::new(Mutex::new(SoftwareState {
            width: config.width,
            height: config.height,
            url: config.url,
            frame_rate: config.frame_rate.max(1),
            focused: false,
            paints_since_invalidate: 0,
            closed: false,
        }));

        let paint_state = state.clone();
        let paint_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let interval = {
                    let state = paint_state.lock().unwrap();
                    if state.closed {
                        break;
                    }
                    Duration::from_secs_f64(1.0 / state.frame_rate as f64)
                };
                tokio::time::sleep(interval).await;

                let event = {
                    let mut state = paint_state.lock().unwrap();
                    if state.closed {
                        break;
                    }
                    let dirty = if state.paints_since_invalidate == 0 {
                        DirtyRect::full(state.width, state.height)
                    } else {
                        moving_band(state.width, state.height, state.paints_since_invalidate)
                    };
                    let pixels =
                        test_pattern(state.width, state.height, state.paints_since_invalidate);
                    state.paints_since_invalidate += 1;
                    SurfaceEvent::Paint {
                        pixels,
                        width: state.width,
                        height: state.height,
                        dirty,
                    }
                };

                // Receiver gone means the session is gone
                if paint_tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("Software paint task ended");
        });

        (Self { state, tx }, rx)
    }

    fn emit(&self, event: SurfaceEvent) {
        // Synchronous emitter: drop on a full channel instead of queueing
        let _ = self.tx.try_send(event);
    }
}

impl RenderSurface for SoftwareSurface {
    fn navigate(&mut self, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.url = url.to_string();
        state.paints_since_invalidate = 0;
        drop(state);
        self.emit(SurfaceEvent::CursorChanged {
            name: "default".into(),
        });
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        self.state.lock().unwrap().paints_since_invalidate = 0;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        let mut state = self.state.lock().unwrap();
        state.width = width;
        state.height = height;
        state.paints_since_invalidate = 0;
    }

    fn set_focus(&mut self, focus: bool) {
        self.state.lock().unwrap().focused = focus;
    }

    fn inject_input(&mut self, event: Value) -> Result<()> {
        // The test pattern has nothing to click; a pointer event still moves
        // the reported cursor shape so the relay path is exercised end to end
        if event.get("type").and_then(Value::as_str) == Some("mousemove") {
            self.emit(SurfaceEvent::CursorChanged {
                name: "pointer".into(),
            });
        }
        Ok(())
    }

    fn open_devtools(&mut self) {
        debug!("Software surface has no inspector");
    }

    fn set_frame_rate(&mut self, fps: u32) {
        self.state.lock().unwrap().frame_rate = fps.max(1);
    }

    fn request_capture(&mut self) {
        let (pixels, width, height) = {
            let state = self.state.lock().unwrap();
            (
                test_pattern(state.width, state.height, state.paints_since_invalidate),
                state.width,
                state.height,
            )
        };
        self.emit(SurfaceEvent::Captured {
            pixels,
            width,
            height,
        });
    }

    fn size(&self) -> (u32, u32) {
        let state = self.state.lock().unwrap();
        (state.width, state.height)
    }
}

impl Drop for SoftwareSurface {
    fn drop(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

/// Byte length of a BGRA frame; widened before multiplying so large
/// client-supplied dimensions cannot overflow `u32`
fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// BGRA gradient keyed on position and paint count
fn test_pattern(width: u32, height: u32, tick: u64) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(frame_len(width, height));
    for y in 0..height {
        for x in 0..width {
            pixels.push(x as u8); // B
            pixels.push(y as u8); // G
            pixels.push(tick as u8); // R
            pixels.push(0xFF); // A
        }
    }
    pixels
}

/// A 16-row band sweeping down the surface, clamped to its bottom edge
fn moving_band(width: u32, height: u32, tick: u64) -> DirtyRect {
    let band = 16.min(height);
    let y = ((tick * band as u64) % height.max(1) as u64) as u32;
    DirtyRect {
        x: 0,
        y,
        width,
        height: band.min(height - y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_len_survives_large_dimensions() {
        // 33000 * 33000 * 4 overflows u32; the widened arithmetic must not
        assert_eq!(frame_len(33_000, 33_000), 4_356_000_000usize);
        assert_eq!(frame_len(800, 600), 1_920_000);
    }

    #[tokio::test]
    async fn test_first_paint_is_full_rect() {
        let (_surface, mut rx) = SoftwareSurface::spawn(SurfaceConfig {
            width: 32,
            height: 16,
            url: "http://localhost/".into(),
            frame_rate: 120,
        });

        let event = rx.recv().await.unwrap();
        match event {
            SurfaceEvent::Paint { width, height, dirty, pixels } => {
                assert_eq!((width, height), (32, 16));
                assert!(dirty.covers(32, 16));
                assert_eq!(pixels.len(), 32 * 16 * 4);
            }
            other => panic!("Expected paint, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_later_paints_are_partial_until_resize() {
        let (mut surface, mut rx) = SoftwareSurface::spawn(SurfaceConfig {
            width: 64,
            height: 64,
            url: "http://localhost/".into(),
            frame_rate: 240,
        });

        // skip the initial full paint
        let _ = rx.recv().await.unwrap();
        match rx.recv().await.unwrap() {
            SurfaceEvent::Paint { dirty, .. } => assert!(!dirty.covers(64, 64)),
            other => panic!("Expected paint, got {other:?}"),
        }

        surface.resize(32, 32);
        // drain until the resized frame shows up, then it must be full
        loop {
            match rx.recv().await.unwrap() {
                SurfaceEvent::Paint { width: 32, height: 32, dirty, .. } => {
                    assert!(dirty.covers(32, 32));
                    break;
                }
                SurfaceEvent::Paint { .. } => continue,
                other => panic!("Expected paint, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_request_capture_resolves_as_captured() {
        let (mut surface, mut rx) = SoftwareSurface::spawn(SurfaceConfig {
            width: 8,
            height: 8,
            url: "http://localhost/".into(),
            frame_rate: 1,
        });

        surface.request_capture();
        match rx.recv().await.unwrap() {
            SurfaceEvent::Captured { pixels, width, height } => {
                assert_eq!((width, height), (8, 8));
                assert_eq!(pixels.len(), 8 * 8 * 4);
            }
            other => panic!("Expected capture, got {other:?}"),
        }
    }
}
