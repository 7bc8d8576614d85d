//! Named shared-memory frame buffer
//!
//! A fixed-capacity byte region shared with the external frame consumer.
//! The region has exactly one writer (the owning render session); the
//! reader is a separate process with its own synchronization discipline.
//! Appends are wraparound-aware and carry no backpressure: correctness
//! assumes the reader drains frames faster than they are overwritten.

use aardium_proto::DirtyRect;
use memmap2::MmapMut;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::fs::File;
use thiserror::Error;
use tracing::{debug, warn};

/// Bytes per BGRA pixel
pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Error)]
pub enum SharedBufferError {
    #[error("failed to open shared memory region {name:?}: {source}")]
    Open { name: String, source: nix::Error },

    #[error("failed to size shared memory region {name:?} to {size} bytes: {source}")]
    Size {
        name: String,
        size: usize,
        source: nix::Error,
    },

    #[error("failed to map shared memory region {name:?}: {source}")]
    Map {
        name: String,
        source: std::io::Error,
    },

    #[error("shared memory region {name:?} has zero capacity")]
    Empty { name: String },
}

/// A named shared-memory region with a wraparound write cursor
pub struct SharedFrameBuffer {
    /// Normalized shm object name (leading slash)
    name: String,
    map: Option<MmapMut>,
    capacity: usize,
    /// Next append position; monotonic until wraparound
    write_offset: usize,
    /// Start offset of the most recent append, for dirty-rect patching
    last_offset: Option<usize>,
    /// Whether this handle created the region (and must unlink it on close)
    owned: bool,
}

impl SharedFrameBuffer {
    /// Create a named region sized to `size` bytes and map it writable.
    ///
    /// Failure is fatal to the calling session only.
    pub fn create(name: &str, size: usize) -> Result<Self, SharedBufferError> {
        let shm_name = normalize_name(name);
        if size == 0 {
            return Err(SharedBufferError::Empty { name: shm_name });
        }

        let fd = shm_open(
            shm_name.as_str(),
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|source| SharedBufferError::Open {
            name: shm_name.clone(),
            source,
        })?;

        ftruncate(&fd, size as i64).map_err(|source| SharedBufferError::Size {
            name: shm_name.clone(),
            size,
            source,
        })?;

        let file = File::from(fd);
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|source| SharedBufferError::Map {
            name: shm_name.clone(),
            source,
        })?;

        debug!("Created shared buffer {} ({} bytes)", shm_name, size);

        Ok(Self {
            name: shm_name,
            map: Some(map),
            capacity: size,
            write_offset: 0,
            last_offset: None,
            owned: true,
        })
    }

    /// Map an existing named region (reader side; does not unlink on close)
    pub fn open(name: &str) -> Result<Self, SharedBufferError> {
        let shm_name = normalize_name(name);

        let fd = shm_open(shm_name.as_str(), OFlag::O_RDWR, Mode::empty()).map_err(|source| {
            SharedBufferError::Open {
                name: shm_name.clone(),
                source,
            }
        })?;

        let file = File::from(fd);
        let size = file
            .metadata()
            .map_err(|source| SharedBufferError::Map {
                name: shm_name.clone(),
                source,
            })?
            .len() as usize;
        if size == 0 {
            return Err(SharedBufferError::Empty { name: shm_name });
        }

        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|source| SharedBufferError::Map {
            name: shm_name.clone(),
            source,
        })?;

        Ok(Self {
            name: shm_name,
            map: Some(map),
            capacity: size,
            write_offset: 0,
            last_offset: None,
            owned: false,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start offset of the most recent append, if any
    pub fn last_offset(&self) -> Option<usize> {
        self.last_offset
    }

    /// The raw byte view of the region
    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    /// Append `payload` at the write cursor and return the start offset used.
    ///
    /// If the payload does not fit before the region's end, the write
    /// restarts at offset 0 even if that overwrites not-yet-consumed data.
    /// A payload larger than the whole region is copied up to capacity; the
    /// caller still reports the payload's true byte length to the consumer.
    pub fn append(&mut self, payload: &[u8]) -> usize {
        let Some(map) = self.map.as_mut() else {
            warn!("Append on closed shared buffer {}", self.name);
            return 0;
        };

        let start = if self.write_offset + payload.len() > self.capacity {
            0
        } else {
            self.write_offset
        };

        let copy_len = payload.len().min(self.capacity - start);
        map[start..start + copy_len].copy_from_slice(&payload[..copy_len]);

        self.write_offset = start + payload.len();
        self.last_offset = Some(start);
        start
    }

    /// Patch `rect`'s pixels from a full `frame_width`-wide BGRA frame into
    /// the full frame previously appended at `base`, row by row, skipping
    /// the unaffected pixels of each row.
    ///
    /// Returns false (leaving the region untouched) when the patch would
    /// fall outside the region or outside the source frame; the caller
    /// falls back to a full append.
    pub fn patch_rect(&mut self, base: usize, rect: DirtyRect, frame: &[u8], frame_width: u32) -> bool {
        let Some(map) = self.map.as_mut() else {
            warn!("Patch on closed shared buffer {}", self.name);
            return false;
        };

        let fw = frame_width as usize;
        let (dx, dy) = (rect.x as usize, rect.y as usize);
        let (dw, dh) = (rect.width as usize, rect.height as usize);
        if dw == 0 || dh == 0 {
            return true;
        }

        let row_len = dw * BYTES_PER_PIXEL;
        let src_end = ((dy + dh - 1) * fw + dx + dw) * BYTES_PER_PIXEL;
        let dst_end = base + src_end;
        if src_end > frame.len() || dst_end > self.capacity {
            return false;
        }

        for row in 0..dh {
            let line = ((dy + row) * fw + dx) * BYTES_PER_PIXEL;
            map[base + line..base + line + row_len].copy_from_slice(&frame[line..line + row_len]);
        }
        true
    }

    /// Release the mapping and, for the creating handle, unlink the name so
    /// a new client can immediately reopen it. Idempotent; teardown never
    /// fails.
    pub fn close(&mut self) {
        if self.map.take().is_some() {
            debug!("Closed shared buffer {}", self.name);
        }
        if self.owned {
            if let Err(e) = shm_unlink(self.name.as_str()) {
                debug!("shm_unlink({}) failed: {}", self.name, e);
            }
            self.owned = false;
        }
        self.last_offset = None;
        self.write_offset = 0;
    }
}

impl Drop for SharedFrameBuffer {
    fn drop(&mut self) {
        self.close();
    }
}

/// POSIX shm object names live in a flat namespace rooted at '/'
fn normalize_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unique_name(tag: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        format!(
            "aardium-test-{}-{}-{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn test_append_returns_sequential_offsets() {
        let name = unique_name("seq");
        let mut buf = SharedFrameBuffer::create(&name, 64).unwrap();
        assert_eq!(buf.append(&[1u8; 16]), 0);
        assert_eq!(buf.append(&[2u8; 16]), 16);
        assert_eq!(buf.last_offset(), Some(16));
        assert_eq!(&buf.bytes()[0..16], &[1u8; 16]);
        assert_eq!(&buf.bytes()[16..32], &[2u8; 16]);
    }

    #[test]
    fn test_append_wraps_to_zero_when_full() {
        let name = unique_name("wrap");
        let mut buf = SharedFrameBuffer::create(&name, 40).unwrap();
        assert_eq!(buf.append(&[1u8; 16]), 0);
        assert_eq!(buf.append(&[2u8; 16]), 16);
        // 32 + 16 > 40: restart at offset 0, overwriting the first frame
        assert_eq!(buf.append(&[3u8; 16]), 0);
        assert_eq!(&buf.bytes()[0..16], &[3u8; 16]);
        // the second frame's tail is untouched
        assert_eq!(&buf.bytes()[16..32], &[2u8; 16]);
    }

    #[test]
    fn test_oversized_payload_wraps_immediately_and_truncates() {
        // A frame larger than the whole region starts at offset 0 and
        // the copy stops at capacity.
        let name = unique_name("oversize");
        let mut buf = SharedFrameBuffer::create(&name, 32).unwrap();
        buf.append(&[9u8; 8]);
        let payload = vec![7u8; 48];
        assert_eq!(buf.append(&payload), 0);
        assert_eq!(buf.bytes(), &[7u8; 32][..]);
    }

    #[test]
    fn test_patch_rect_row_arithmetic() {
        let name = unique_name("patch");
        // 4x3 surface, one full frame at offset 0
        let (fw, fh) = (4u32, 3u32);
        let frame_len = (fw * fh) as usize * BYTES_PER_PIXEL;
        let mut buf = SharedFrameBuffer::create(&name, frame_len).unwrap();
        let full = vec![0u8; frame_len];
        assert_eq!(buf.append(&full), 0);

        // updated frame: mark the 2x2 rect at (1,1)
        let mut updated = vec![0u8; frame_len];
        let rect = DirtyRect { x: 1, y: 1, width: 2, height: 2 };
        for row in 0..rect.height as usize {
            for col in 0..rect.width as usize {
                let px = ((rect.y as usize + row) * fw as usize + rect.x as usize + col)
                    * BYTES_PER_PIXEL;
                updated[px..px + BYTES_PER_PIXEL].copy_from_slice(&[0xAA; BYTES_PER_PIXEL]);
            }
        }

        assert!(buf.patch_rect(0, rect, &updated, fw));

        // patched pixels landed at base + 4*(dx + fw*dy) with row stride 4*fw
        for y in 0..fh as usize {
            for x in 0..fw as usize {
                let px = (y * fw as usize + x) * BYTES_PER_PIXEL;
                let inside = (1..3).contains(&x) && (1..3).contains(&y);
                let expected = if inside { 0xAA } else { 0x00 };
                assert_eq!(buf.bytes()[px], expected, "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn test_patch_rect_out_of_bounds_is_refused() {
        let name = unique_name("patch-oob");
        let mut buf = SharedFrameBuffer::create(&name, 64).unwrap();
        let frame = vec![1u8; 64];
        let rect = DirtyRect { x: 0, y: 0, width: 8, height: 8 };
        // 8x8 rect needs 256 bytes, region holds 64
        assert!(!buf.patch_rect(0, rect, &frame, 8));
    }

    #[test]
    fn test_close_is_idempotent_and_name_reusable() {
        let name = unique_name("reuse");
        let mut buf = SharedFrameBuffer::create(&name, 64).unwrap();
        buf.close();
        buf.close();

        // prior name can be immediately reopened by a new owner
        let again = SharedFrameBuffer::create(&name, 128).unwrap();
        assert_eq!(again.capacity(), 128);
    }

    #[test]
    fn test_open_existing_region() {
        let name = unique_name("open");
        let mut writer = SharedFrameBuffer::create(&name, 64).unwrap();
        writer.append(b"hello\0world");

        let reader = SharedFrameBuffer::open(&name).unwrap();
        assert_eq!(reader.capacity(), 64);
        assert_eq!(&reader.bytes()[..5], b"hello");
    }
}
