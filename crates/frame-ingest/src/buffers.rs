//! Ownership bookkeeping for hardware buffers.
//!
//! Every exported buffer is in exactly one of three states. The pool is the
//! single authority on those states; the scheduler drives transitions and
//! never holds a buffer outside of them.

use crate::device::{BufferId, CaptureError, FrameBuffer, Plane};

/// Where a buffer currently lives.
///
/// Legal transitions: Free→Queued (submit), Queued→Processing (completion
/// received), Processing→Free (recycle) and Processing→Queued (direct
/// requeue). Queued→Free covers requests flushed by the device on teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Free,
    Queued,
    Processing,
}

/// State census across the pool. `free + queued + processing` always equals
/// the number of exported buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub free: usize,
    pub queued: usize,
    pub processing: usize,
}

impl PoolCounts {
    pub fn total(&self) -> usize {
        self.free + self.queued + self.processing
    }
}

struct Entry {
    buffer: FrameBuffer,
    state: BufferState,
}

/// Owns every exported buffer for the lifetime of a capture cycle.
pub struct BufferPool {
    entries: Vec<Entry>,
}

impl BufferPool {
    pub fn new(buffers: Vec<FrameBuffer>) -> Self {
        let entries = buffers
            .into_iter()
            .map(|buffer| Entry {
                buffer,
                state: BufferState::Free,
            })
            .collect();
        Self { entries }
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts::default();
        for entry in &self.entries {
            match entry.state {
                BufferState::Free => counts.free += 1,
                BufferState::Queued => counts.queued += 1,
                BufferState::Processing => counts.processing += 1,
            }
        }
        counts
    }

    pub fn state(&self, id: BufferId) -> Option<BufferState> {
        self.entry(id).map(|entry| entry.state)
    }

    /// First buffer not currently queued or being processed.
    pub fn acquire_free(&self) -> Option<BufferId> {
        self.entries
            .iter()
            .find(|entry| entry.state == BufferState::Free)
            .map(|entry| entry.buffer.id)
    }

    /// Submit path (Free→Queued) and direct requeue (Processing→Queued).
    pub fn mark_queued(&mut self, id: BufferId) -> Result<(), CaptureError> {
        self.transition(id, BufferState::Queued, |from| {
            matches!(from, BufferState::Free | BufferState::Processing)
        })
    }

    /// Completion received (Queued→Processing).
    pub fn mark_processing(&mut self, id: BufferId) -> Result<(), CaptureError> {
        self.transition(id, BufferState::Processing, |from| {
            matches!(from, BufferState::Queued)
        })
    }

    /// Return a buffer to the free list (Processing→Free, or Queued→Free for
    /// requests the device flushed without completing).
    pub fn release(&mut self, id: BufferId) -> Result<(), CaptureError> {
        self.transition(id, BufferState::Free, |from| {
            matches!(from, BufferState::Processing | BufferState::Queued)
        })
    }

    pub fn plane(&self, id: BufferId, index: usize) -> Option<&Plane> {
        self.entry(id).and_then(|entry| entry.buffer.planes.get(index))
    }

    fn entry(&self, id: BufferId) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.buffer.id == id)
    }

    fn transition(
        &mut self,
        id: BufferId,
        to: BufferState,
        allowed: impl Fn(BufferState) -> bool,
    ) -> Result<(), CaptureError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.buffer.id == id)
            .ok_or(CaptureError::UnknownBuffer(id))?;
        if !allowed(entry.state) {
            return Err(CaptureError::BufferState {
                buffer: id,
                from: entry.state,
                to,
            });
        }
        entry.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    fn pool_with(total: usize) -> BufferPool {
        let buffers = (0..total)
            .map(|i| {
                let fd: File = tempfile::tempfile().expect("tempfile");
                FrameBuffer {
                    id: BufferId(i),
                    planes: vec![Plane {
                        fd,
                        offset: 0,
                        length: 64,
                    }],
                }
            })
            .collect();
        BufferPool::new(buffers)
    }

    #[test]
    fn counts_always_sum_to_total() {
        let mut pool = pool_with(3);
        assert_eq!(pool.counts().total(), 3);

        pool.mark_queued(BufferId(0)).unwrap();
        pool.mark_queued(BufferId(1)).unwrap();
        pool.mark_processing(BufferId(0)).unwrap();
        let counts = pool.counts();
        assert_eq!(counts, PoolCounts { free: 1, queued: 1, processing: 1 });
        assert_eq!(counts.total(), 3);

        pool.release(BufferId(0)).unwrap();
        assert_eq!(pool.counts().total(), 3);
    }

    #[test]
    fn requeue_skips_the_free_state() {
        let mut pool = pool_with(1);
        pool.mark_queued(BufferId(0)).unwrap();
        pool.mark_processing(BufferId(0)).unwrap();
        pool.mark_queued(BufferId(0)).unwrap();
        assert_eq!(pool.state(BufferId(0)), Some(BufferState::Queued));
    }

    #[test]
    fn completion_requires_a_queued_buffer() {
        let mut pool = pool_with(1);
        let err = pool.mark_processing(BufferId(0)).unwrap_err();
        assert!(matches!(err, CaptureError::BufferState { .. }));
    }

    #[test]
    fn flushed_requests_release_from_queued() {
        let mut pool = pool_with(1);
        pool.mark_queued(BufferId(0)).unwrap();
        pool.release(BufferId(0)).unwrap();
        assert_eq!(pool.state(BufferId(0)), Some(BufferState::Free));
    }

    #[test]
    fn unknown_buffers_are_rejected() {
        let mut pool = pool_with(1);
        assert!(matches!(
            pool.mark_queued(BufferId(9)),
            Err(CaptureError::UnknownBuffer(_))
        ));
    }

    #[test]
    fn acquire_free_skips_busy_buffers() {
        let mut pool = pool_with(2);
        pool.mark_queued(BufferId(0)).unwrap();
        assert_eq!(pool.acquire_free(), Some(BufferId(1)));
        pool.mark_queued(BufferId(1)).unwrap();
        assert_eq!(pool.acquire_free(), None);
    }
}
