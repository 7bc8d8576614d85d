//! Page-to-host bridge
//!
//! The privileged operations a hosted page may ask of the launcher:
//! dialogs, menus, window stacking, page capture, and read access to the
//! named shared-memory regions the offscreen server writes frames into.
//! Requests and responses are tagged JSON so a host runtime can relay
//! them over whatever channel it has.

use crate::runtime::{HostRuntime, HostWindow};
use aardium_offscreen::shared::SharedFrameBuffer;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Handle for an opened shared-memory mapping, scoped to one bridge
pub type MappingId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "camelCase")]
pub enum BridgeRequest {
    /// Show a file-open dialog
    #[serde(rename_all = "camelCase")]
    OpenFileDialog { multi: bool },
    /// Install an application menu from a JSON template
    SetMenu { template: Value },
    /// Give the window keyboard focus
    FocusWindow,
    /// Raise the window above its siblings
    MoveWindowTop,
    /// Map an existing named shared-memory region for reading
    OpenMapping { name: String },
    /// Read a NUL-terminated string from the start of a mapping
    ReadString { mapping: MappingId },
    /// Read a width x height BGRA image from the start of a mapping
    #[serde(rename_all = "camelCase")]
    ReadImageData {
        mapping: MappingId,
        width: u32,
        height: u32,
    },
    /// Drop a mapping
    CloseMapping { mapping: MappingId },
    /// Snapshot the page and write the raw BGRA bitmap to a file
    CaptureFullscreen { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "camelCase")]
pub enum BridgeResponse {
    Ack,
    Paths { paths: Vec<PathBuf> },
    #[serde(rename_all = "camelCase")]
    Mapping { mapping: MappingId, length: usize },
    Text { text: String },
    #[serde(rename_all = "camelCase")]
    ImageData {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    #[serde(rename_all = "camelCase")]
    Captured {
        path: PathBuf,
        width: u32,
        height: u32,
    },
}

/// Bridge state owned by the launcher: the shared-memory mappings pages
/// have opened. Mapping ids are scoped to the launcher, not to a window.
#[derive(Default)]
pub struct Bridge {
    mappings: HashMap<MappingId, SharedFrameBuffer>,
    next_mapping: MappingId,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute one request against the window it arrived on
    pub fn handle(
        &mut self,
        request: BridgeRequest,
        window: &mut dyn HostWindow,
        runtime: &mut dyn HostRuntime,
    ) -> Result<BridgeResponse> {
        match request {
            BridgeRequest::OpenFileDialog { multi } => {
                let paths = runtime.open_file_dialog(multi)?;
                Ok(BridgeResponse::Paths { paths })
            }

            BridgeRequest::SetMenu { template } => {
                runtime.set_application_menu(&template)?;
                Ok(BridgeResponse::Ack)
            }

            BridgeRequest::FocusWindow => {
                window.focus();
                Ok(BridgeResponse::Ack)
            }

            BridgeRequest::MoveWindowTop => {
                window.raise();
                Ok(BridgeResponse::Ack)
            }

            BridgeRequest::OpenMapping { name } => {
                let buffer = SharedFrameBuffer::open(&name)
                    .with_context(|| format!("cannot map shared region {name:?}"))?;
                let length = buffer.capacity();
                let mapping = self.next_mapping;
                self.next_mapping += 1;
                self.mappings.insert(mapping, buffer);
                debug!("Mapped {} as mapping {} ({} bytes)", name, mapping, length);
                Ok(BridgeResponse::Mapping { mapping, length })
            }

            BridgeRequest::ReadString { mapping } => {
                let buffer = self.mapping(mapping)?;
                let bytes = buffer.bytes();
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let text = String::from_utf8_lossy(&bytes[..end]).into_owned();
                Ok(BridgeResponse::Text { text })
            }

            BridgeRequest::ReadImageData {
                mapping,
                width,
                height,
            } => {
                let buffer = self.mapping(mapping)?;
                let wanted = width as usize * height as usize * 4;
                let bytes = buffer.bytes();
                if bytes.len() < wanted {
                    return Err(anyhow!(
                        "mapping {} holds {} bytes, {}x{} needs {}",
                        mapping,
                        bytes.len(),
                        width,
                        height,
                        wanted
                    ));
                }
                Ok(BridgeResponse::ImageData {
                    width,
                    height,
                    pixels: bytes[..wanted].to_vec(),
                })
            }

            BridgeRequest::CloseMapping { mapping } => {
                if self.mappings.remove(&mapping).is_none() {
                    return Err(anyhow!("unknown mapping {}", mapping));
                }
                Ok(BridgeResponse::Ack)
            }

            BridgeRequest::CaptureFullscreen { path } => {
                let (width, height, pixels) = window.capture_page()?;
                std::fs::write(&path, &pixels)
                    .with_context(|| format!("cannot write capture to {}", path.display()))?;
                info!(
                    "Captured {}x{} page snapshot to {}",
                    width,
                    height,
                    path.display()
                );
                Ok(BridgeResponse::Captured {
                    path,
                    width,
                    height,
                })
            }
        }
    }

    fn mapping(&self, id: MappingId) -> Result<&SharedFrameBuffer> {
        self.mappings
            .get(&id)
            .ok_or_else(|| anyhow!("unknown mapping {}", id))
    }
}
