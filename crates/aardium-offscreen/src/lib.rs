//! Aardium offscreen rendering server
//!
//! Turns the launcher process into a frame relay: commands arrive as JSON
//! text frames over a loopback socket, drive one hidden render surface per
//! connection, and the painted frames land in a named shared-memory region
//! for an external consumer to read. Single producer, single consumer, one
//! embedded surface per connection; this is not a compositor or a general
//! remote-desktop protocol.

pub mod server;
pub mod session;
pub mod shared;
pub mod surface;

pub use server::FrameServer;
pub use session::RenderSession;
pub use shared::SharedFrameBuffer;
pub use surface::{RenderSurface, SoftwareSurfaceFactory, SurfaceConfig, SurfaceEvent, SurfaceFactory};
