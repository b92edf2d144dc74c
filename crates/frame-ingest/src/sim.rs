//! Synthetic in-process capture device.
//!
//! Frames are produced by a painter callback on a dedicated delivery thread
//! and written into file-backed planes, so the full map → process → recycle
//! path runs exactly as it would against hardware. The demo binary and the
//! integration tests both drive the pipeline through this device.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::debug;

use crate::device::{
    BufferId, CaptureDevice, CaptureError, CaptureRequest, Completion, CompletionSink,
    CompletionStatus, FrameBuffer, PixelFormat, Plane, RequestId, StreamConfig,
};

/// Produces the raw bytes for one frame. The returned length becomes the
/// completion's `bytes_used`, so a painter can emit any byte-length class,
/// including deliberately malformed ones.
pub type FramePainter = Box<dyn FnMut(u64) -> Vec<u8> + Send>;

struct Queued {
    request: RequestId,
    buffer: BufferId,
}

struct SimState {
    config: Option<StreamConfig>,
    /// Delivery-thread clones of the plane files, indexed by buffer id.
    files: Vec<File>,
    sender: Option<Sender<Queued>>,
    worker: Option<JoinHandle<()>>,
}

/// A [`CaptureDevice`] backed by generated frames.
pub struct SyntheticCamera {
    painter: Arc<Mutex<FramePainter>>,
    state: Mutex<SimState>,
    cancelled: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    frame_interval: Duration,
}

impl SyntheticCamera {
    pub fn new(painter: FramePainter) -> Self {
        Self {
            painter: Arc::new(Mutex::new(painter)),
            state: Mutex::new(SimState {
                config: None,
                files: Vec::new(),
                sender: None,
                worker: None,
            }),
            cancelled: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU64::new(0)),
            frame_interval: Duration::ZERO,
        }
    }

    /// Pace delivery instead of free-running; the demo binary uses this to
    /// approximate a sensor frame rate.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }
}

impl CaptureDevice for SyntheticCamera {
    fn configure(&self, config: &StreamConfig) -> Result<StreamConfig, CaptureError> {
        if config.width == 0 || config.height == 0 {
            return Err(CaptureError::Configure(format!(
                "unusable stream size {}x{}",
                config.width, config.height
            )));
        }
        if config.buffer_count == 0 {
            return Err(CaptureError::Configure("buffer count must be nonzero".into()));
        }
        let mut state = self.state.lock().expect("sim state lock");
        state.config = Some(config.clone());
        Ok(config.clone())
    }

    fn export_buffers(&self) -> Result<Vec<FrameBuffer>, CaptureError> {
        let mut state = self.state.lock().expect("sim state lock");
        let config = state
            .config
            .clone()
            .ok_or_else(|| CaptureError::Allocation("stream not configured".into()))?;

        // Planes are sized for the deepest supported layout so a painter can
        // switch byte-length classes frame to frame.
        let plane_len = (config.width as usize)
            * (config.height as usize)
            * PixelFormat::Grey16.bytes_per_pixel();
        let mut buffers = Vec::with_capacity(config.buffer_count);
        let mut files = Vec::with_capacity(config.buffer_count);
        for i in 0..config.buffer_count {
            let fd: File = tempfile::tempfile()
                .map_err(|err| CaptureError::Allocation(err.to_string()))?;
            fd.set_len(plane_len as u64)
                .map_err(|err| CaptureError::Allocation(err.to_string()))?;
            files.push(
                fd.try_clone()
                    .map_err(|err| CaptureError::Allocation(err.to_string()))?,
            );
            buffers.push(FrameBuffer {
                id: BufferId(i),
                planes: vec![Plane {
                    fd,
                    offset: 0,
                    length: plane_len,
                }],
            });
        }
        state.files = files;
        Ok(buffers)
    }

    fn start(&self, sink: CompletionSink) -> Result<(), CaptureError> {
        let mut state = self.state.lock().expect("sim state lock");
        if state.worker.is_some() {
            return Err(CaptureError::Configure("device already started".into()));
        }
        let files: Vec<File> = state
            .files
            .iter()
            .map(|file| file.try_clone())
            .collect::<Result<_, _>>()
            .map_err(|err| CaptureError::Allocation(err.to_string()))?;
        if files.is_empty() {
            return Err(CaptureError::Allocation("no buffers exported".into()));
        }

        let (tx, rx) = bounded::<Queued>(files.len().max(1));
        self.cancelled.store(false, Ordering::SeqCst);

        let painter = self.painter.clone();
        let cancelled = self.cancelled.clone();
        let sequence = self.sequence.clone();
        let interval = self.frame_interval;
        let worker = thread::Builder::new()
            .name("sim-camera".into())
            .spawn(move || deliver_loop(rx, files, painter, cancelled, sequence, interval, sink))
            .map_err(|err| CaptureError::Allocation(err.to_string()))?;

        state.sender = Some(tx);
        state.worker = Some(worker);
        Ok(())
    }

    fn queue(&self, request: &CaptureRequest) -> Result<(), CaptureError> {
        let sender = {
            let state = self.state.lock().expect("sim state lock");
            state
                .sender
                .clone()
                .ok_or_else(|| CaptureError::Queue("device not started".into()))?
        };
        sender
            .send(Queued {
                request: request.id,
                buffer: request.buffer,
            })
            .map_err(|_| CaptureError::Queue("device stopping".into()))
    }

    fn stop(&self) {
        // Flag first so requests still in flight are flushed as cancelled,
        // then close the channel and wait the delivery thread out. Joining
        // outside the state lock keeps the requeue path from wedging.
        self.cancelled.store(true, Ordering::SeqCst);
        let worker = {
            let mut state = self.state.lock().expect("sim state lock");
            state.sender = None;
            state.worker.take()
        };
        if let Some(worker) = worker {
            let _ = worker.join();
        }
        debug!("synthetic camera stopped");
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

fn deliver_loop(
    rx: Receiver<Queued>,
    files: Vec<File>,
    painter: Arc<Mutex<FramePainter>>,
    cancelled: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    interval: Duration,
    sink: CompletionSink,
) {
    while let Ok(queued) = rx.recv() {
        if cancelled.load(Ordering::SeqCst) {
            (*sink)(Completion {
                request: queued.request,
                buffer: queued.buffer,
                status: CompletionStatus::Cancelled,
                bytes_used: 0,
                sequence: sequence.load(Ordering::SeqCst),
                timestamp_ms: Utc::now().timestamp_millis(),
            });
            continue;
        }

        let seq = sequence.fetch_add(1, Ordering::SeqCst);
        let bytes = {
            let mut painter = painter.lock().expect("painter lock");
            (*painter)(seq)
        };
        let bytes_used = bytes.len();
        if let Some(file) = files.get(queued.buffer.0) {
            if !bytes.is_empty() {
                let _ = file.write_at(&bytes, 0);
            }
        }

        if !interval.is_zero() {
            thread::sleep(interval);
        }

        (*sink)(Completion {
            request: queued.request,
            buffer: queued.buffer,
            status: CompletionStatus::Success,
            bytes_used,
            sequence: seq,
            timestamp_ms: Utc::now().timestamp_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::scheduler::{CaptureScheduler, PipelineState, RawFrame};

    fn grey8_painter(width: u32, height: u32) -> FramePainter {
        Box::new(move |seq| vec![(seq % 251) as u8; (width * height) as usize])
    }

    struct CountingSink {
        frames: AtomicUsize,
    }

    impl crate::scheduler::FrameSink for CountingSink {
        fn on_frame(&self, frame: RawFrame<'_>) {
            assert_eq!(frame.data.len(), (frame.width * frame.height) as usize);
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        done()
    }

    #[test]
    fn frames_flow_and_buffers_recycle() {
        let device = SyntheticCamera::new(grey8_painter(16, 8));
        let sink = Arc::new(CountingSink { frames: AtomicUsize::new(0) });
        let scheduler = CaptureScheduler::new(Box::new(device), sink.clone());

        let config = StreamConfig::new(16, 8);
        scheduler.configure(&config).unwrap();
        let counts = scheduler.pool_counts().unwrap();
        assert_eq!(counts.total(), config.buffer_count);
        assert_eq!(counts.free, config.buffer_count);

        scheduler.start().unwrap();
        assert!(wait_for(Duration::from_secs(5), || {
            sink.frames.load(Ordering::SeqCst) >= 20
        }));
        assert_eq!(scheduler.pool_counts().unwrap().total(), config.buffer_count);

        scheduler.stop().unwrap();
        assert_eq!(scheduler.state(), PipelineState::Idle);
        assert!(scheduler.pool_counts().is_none());
    }

    #[test]
    fn stop_twice_is_a_failing_noop() {
        let device = SyntheticCamera::new(grey8_painter(8, 8));
        let sink = Arc::new(CountingSink { frames: AtomicUsize::new(0) });
        let scheduler = CaptureScheduler::new(Box::new(device), sink.clone());

        scheduler.configure(&StreamConfig::new(8, 8)).unwrap();
        scheduler.start().unwrap();
        wait_for(Duration::from_secs(5), || {
            sink.frames.load(Ordering::SeqCst) >= 1
        });
        scheduler.stop().unwrap();
        assert!(matches!(scheduler.stop(), Err(CaptureError::State { .. })));
        assert_eq!(scheduler.state(), PipelineState::Idle);
    }

    #[test]
    fn start_requires_configuration() {
        let device = SyntheticCamera::new(grey8_painter(8, 8));
        let sink = Arc::new(CountingSink { frames: AtomicUsize::new(0) });
        let scheduler = CaptureScheduler::new(Box::new(device), sink);
        assert!(matches!(scheduler.start(), Err(CaptureError::State { .. })));
    }

    #[test]
    fn rejected_configuration_returns_to_idle() {
        let device = SyntheticCamera::new(grey8_painter(8, 8));
        let sink = Arc::new(CountingSink { frames: AtomicUsize::new(0) });
        let scheduler = CaptureScheduler::new(Box::new(device), sink);

        let config = StreamConfig::new(0, 8);
        assert!(matches!(
            scheduler.configure(&config),
            Err(CaptureError::Configure(_))
        ));
        assert_eq!(scheduler.state(), PipelineState::Idle);
        assert!(scheduler.pool_counts().is_none());

        // A good configuration afterwards succeeds from the clean Idle state.
        scheduler.configure(&StreamConfig::new(8, 8)).unwrap();
    }

    #[test]
    fn full_lifecycle_can_run_twice() {
        let device = SyntheticCamera::new(grey8_painter(8, 8));
        let sink = Arc::new(CountingSink { frames: AtomicUsize::new(0) });
        let scheduler = CaptureScheduler::new(Box::new(device), sink.clone());

        for _ in 0..2 {
            scheduler.configure(&StreamConfig::new(8, 8)).unwrap();
            scheduler.start().unwrap();
            let seen = sink.frames.load(Ordering::SeqCst);
            assert!(wait_for(Duration::from_secs(5), || {
                sink.frames.load(Ordering::SeqCst) > seen
            }));
            scheduler.stop().unwrap();
            assert_eq!(scheduler.state(), PipelineState::Idle);
        }
    }

    #[test]
    fn unmappable_frames_still_recycle() {
        // Painter emits an empty frame every third sequence; the scheduler
        // skips those but the pool census must stay balanced.
        let painter: FramePainter = Box::new(move |seq| {
            if seq % 3 == 2 {
                Vec::new()
            } else {
                vec![7u8; 64]
            }
        });
        let device = SyntheticCamera::new(painter);
        let sink = Arc::new(CountingSink { frames: AtomicUsize::new(0) });
        let scheduler = CaptureScheduler::new(Box::new(device), sink.clone());

        scheduler.configure(&StreamConfig::new(8, 8)).unwrap();
        scheduler.start().unwrap();
        assert!(wait_for(Duration::from_secs(5), || {
            sink.frames.load(Ordering::SeqCst) >= 10
        }));
        assert_eq!(scheduler.pool_counts().unwrap().total(), 4);
        scheduler.stop().unwrap();
    }
}
