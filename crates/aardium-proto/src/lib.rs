//! Aardium offscreen protocol
//!
//! Shared message types for the socket protocol between an external frame
//! consumer and the offscreen render server: JSON text frames, one object
//! per newline-terminated line, over a loopback TCP connection.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Default port for the offscreen server
pub const DEFAULT_PORT: u16 = 4327;

/// Server bind/connect address. Loopback only: binding to anything wider is
/// not supported by the protocol's trust model.
pub fn server_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

// ============================================================================
// Client → Server Commands
// ============================================================================

/// Commands sent by the connected client to drive a render session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Open (or re-open) the session: shared buffer + hidden render surface
    #[serde(rename_all = "camelCase")]
    Init {
        map_name: String,
        map_size: usize,
        width: u32,
        height: u32,
        url: String,
        #[serde(default)]
        incremental: bool,
    },

    /// Force one explicit full capture, independent of the paint stream
    RequestFullFrame,

    /// Open a detached inspector on the active surface
    OpenDevTools,

    /// Resize the active surface's content area
    Resize { width: u32, height: u32 },

    /// Forward a synthetic input event to the active surface
    InputEvent { event: serde_json::Value },

    /// Focus or blur the active surface
    SetFocus { focus: bool },

    /// Invoke an allow-listed session operation (see [`CustomOp`])
    Custom {
        /// Wire name of the operation; resolved against the allow list by
        /// the session so unknown names still get an error `result` reply
        op: String,
        #[serde(default)]
        args: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
}

/// Allow-listed operations for the `custom` command.
///
/// The reference implementation evaluated arbitrary script text here; that
/// escape hatch is replaced by this fixed capability set. Unknown operation
/// names are answered with an error result, never executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomOp {
    /// Navigate the surface to `args.url`
    Navigate,
    /// Reload the current page
    Reload,
    /// Retarget the paint rate to `args.fps`
    SetFrameRate,
    /// Report the surface's current content size
    Geometry,
}

impl CustomOp {
    /// Resolve a wire name against the allow list
    pub fn from_name(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
    }
}

// ============================================================================
// Server → Client Events
// ============================================================================

/// Events emitted by a render session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The session finished (re-)initialization; emitted exactly once per
    /// `init`, before any frame event
    #[serde(rename = "initComplete")]
    InitComplete,

    /// The surface's mouse cursor shape changed
    #[serde(rename = "changecursor")]
    ChangeCursor { name: String },

    /// A complete BGRA snapshot was appended to the shared buffer
    #[serde(rename = "fullframe", rename_all = "camelCase")]
    FullFrame {
        width: u32,
        height: u32,
        offset: usize,
        byte_length: usize,
    },

    /// A dirty rectangle was patched in place into the previous full frame
    /// already resident in the shared buffer; carries no new payload bytes
    #[serde(rename = "partialframe", rename_all = "camelCase")]
    PartialFrame {
        width: u32,
        height: u32,
        offset: usize,
        byte_length: usize,
        dx: u32,
        dy: u32,
        dw: u32,
        dh: u32,
    },

    /// Reply to a `custom` command that carried an `id`
    #[serde(rename = "result")]
    Result {
        id: u64,
        result: serde_json::Value,
    },
}

/// A rectangular update region within a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DirtyRect {
    /// The rect covering an entire `width`×`height` surface
    pub fn full(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }

    /// Whether this rect covers the entire `width`×`height` surface
    pub fn covers(&self, width: u32, height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width == width && self.height == height
    }
}

// ============================================================================
// Line Framing
// ============================================================================

/// Encode a message as one newline-terminated JSON text frame
pub fn encode_line<T: Serialize>(msg: &T) -> anyhow::Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Decode one text frame into a command.
///
/// A malformed frame (non-JSON, or JSON without a recognized `command` tag)
/// is an error for the caller to log and skip; it never tears the
/// connection down.
pub fn decode_command(line: &str) -> anyhow::Result<Command> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Decode one text frame into an event (client side)
pub fn decode_event(line: &str) -> anyhow::Result<Event> {
    Ok(serde_json::from_str(line.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_wire_format() {
        let line = r#"{"command":"init","mapName":"aardium-frames","mapSize":8388608,"width":800,"height":600,"url":"http://localhost:4321"}"#;
        let cmd = decode_command(line).unwrap();
        match cmd {
            Command::Init { map_name, map_size, width, height, url, incremental } => {
                assert_eq!(map_name, "aardium-frames");
                assert_eq!(map_size, 8388608);
                assert_eq!(width, 800);
                assert_eq!(height, 600);
                assert_eq!(url, "http://localhost:4321");
                // omitted on the wire, defaults to false
                assert!(!incremental);
            }
            _ => panic!("Wrong command type"),
        }
    }

    #[test]
    fn test_command_tags_are_lowercase() {
        let cmd = Command::RequestFullFrame;
        let line = encode_line(&cmd).unwrap();
        assert_eq!(line, "{\"command\":\"requestfullframe\"}\n");

        let cmd = Command::SetFocus { focus: true };
        let line = encode_line(&cmd).unwrap();
        assert_eq!(line, "{\"command\":\"setfocus\",\"focus\":true}\n");
    }

    #[test]
    fn test_fullframe_event_roundtrip() {
        let event = Event::FullFrame {
            width: 800,
            height: 600,
            offset: 0,
            byte_length: 1_920_000,
        };
        let line = encode_line(&event).unwrap();
        assert!(line.contains("\"type\":\"fullframe\""));
        assert!(line.contains("\"byteLength\":1920000"));

        match decode_event(&line).unwrap() {
            Event::FullFrame { byte_length, .. } => assert_eq!(byte_length, 1_920_000),
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_partialframe_carries_no_payload() {
        let event = Event::PartialFrame {
            width: 800,
            height: 600,
            offset: 128,
            byte_length: 0,
            dx: 10,
            dy: 20,
            dw: 64,
            dh: 32,
        };
        let line = encode_line(&event).unwrap();
        let decoded = decode_event(&line).unwrap();
        match decoded {
            Event::PartialFrame { byte_length, dx, dy, dw, dh, .. } => {
                assert_eq!(byte_length, 0);
                assert_eq!((dx, dy, dw, dh), (10, 20, 64, 32));
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_custom_op_allow_list() {
        let line = r#"{"command":"custom","op":"navigate","args":{"url":"http://example.org"},"id":7}"#;
        match decode_command(line).unwrap() {
            Command::Custom { op, id, .. } => {
                assert_eq!(CustomOp::from_name(&op), Some(CustomOp::Navigate));
                assert_eq!(id, Some(7));
            }
            _ => panic!("Wrong command type"),
        }

        // not on the allow list: still decodes (so the session can reply
        // with an error), but resolves to no operation
        let line = r#"{"command":"custom","op":"eval","args":{"js":"1+1"},"id":5}"#;
        match decode_command(line).unwrap() {
            Command::Custom { op, id, .. } => {
                assert!(CustomOp::from_name(&op).is_none());
                assert_eq!(id, Some(5));
            }
            _ => panic!("Wrong command type"),
        }
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(decode_command("not json").is_err());
        assert!(decode_command("{\"nocommand\":true}").is_err());
    }

    #[test]
    fn test_dirty_rect_coverage() {
        assert!(DirtyRect::full(800, 600).covers(800, 600));
        let partial = DirtyRect { x: 0, y: 0, width: 800, height: 599 };
        assert!(!partial.covers(800, 600));
    }

    #[test]
    fn test_server_addr_is_loopback() {
        let addr = server_addr(4327);
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 4327);
    }
}
