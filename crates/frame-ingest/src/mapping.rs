//! Zero-copy access to a buffer plane.
//!
//! The mapping is scoped: dropping a [`MappedPlane`] unmaps it, so every exit
//! path of a completion handler releases the view without bookkeeping.

use std::ops::Deref;

use memmap2::{Mmap, MmapOptions};

use crate::device::{CaptureError, Plane};

/// Read-only view over the used portion of a plane.
pub struct MappedPlane {
    map: Mmap,
}

impl MappedPlane {
    /// Map `len` bytes of the plane into the process.
    ///
    /// `len` is the byte count the hardware reported for this frame; it must
    /// fit inside the plane, and empty frames are rejected outright.
    pub fn map(plane: &Plane, len: usize) -> Result<Self, CaptureError> {
        if len == 0 || len > plane.length {
            return Err(CaptureError::PlaneOverrun {
                bytes_used: len,
                capacity: plane.length,
            });
        }
        // Safety: the fd stays open for as long as the pool owns the buffer,
        // and the mapping is read-only.
        let map = unsafe {
            MmapOptions::new()
                .offset(plane.offset)
                .len(len)
                .map(&plane.fd)?
        };
        Ok(Self { map })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }
}

impl Deref for MappedPlane {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}
