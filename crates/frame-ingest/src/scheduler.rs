//! Capture scheduling and pipeline lifecycle.
//!
//! The scheduler owns the buffer pool and the capture requests, drives the
//! Idle → Configuring → Running → Stopping state machine, and processes every
//! completion the device delivers. Frame work (normalize, detect, publish)
//! runs synchronously inside the completion, on the device's callback thread:
//! throughput is capped at one frame per detection pass and backpressure is
//! left to the hardware layer. That trade is deliberate and documented here
//! rather than hidden.

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace, warn};

use crate::buffers::{BufferPool, PoolCounts};
use crate::device::{
    CaptureDevice, CaptureError, CaptureRequest, Completion, CompletionStatus, RequestId,
    StreamConfig,
};
use crate::mapping::MappedPlane;

/// Lifecycle of one capture pipeline. Idle is both initial and terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Configuring,
    Running,
    Stopping,
}

/// A mapped frame handed to the sink. Valid only for the duration of the
/// call; the mapping is released when the handler returns.
pub struct RawFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
    pub timestamp_ms: i64,
}

/// Receives every successfully mapped frame, on the device's callback
/// thread. Implementations absorb their own failures; a frame that cannot be
/// used simply produces no output this cycle.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: RawFrame<'_>);
}

impl<F> FrameSink for F
where
    F: Fn(RawFrame<'_>) + Send + Sync,
{
    fn on_frame(&self, frame: RawFrame<'_>) {
        self(frame)
    }
}

struct Shared {
    device: Box<dyn CaptureDevice>,
    sink: Arc<dyn FrameSink>,
    state: Mutex<PipelineState>,
    pool: Mutex<Option<BufferPool>>,
    requests: Mutex<Vec<CaptureRequest>>,
    geometry: Mutex<Option<StreamConfig>>,
}

/// Issues capture requests and recycles buffers on completion.
pub struct CaptureScheduler {
    shared: Arc<Shared>,
}

impl CaptureScheduler {
    pub fn new(device: Box<dyn CaptureDevice>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            shared: Arc::new(Shared {
                device,
                sink,
                state: Mutex::new(PipelineState::Idle),
                pool: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
                geometry: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.state.lock().expect("state lock")
    }

    /// Pool census, available between `configure` and teardown.
    pub fn pool_counts(&self) -> Option<PoolCounts> {
        self.shared
            .pool
            .lock()
            .expect("pool lock")
            .as_ref()
            .map(|pool| pool.counts())
    }

    /// Negotiate the stream and allocate buffers and requests.
    ///
    /// Each exported buffer is bound to exactly one request. On any failure
    /// the pipeline returns to Idle with no partial state retained.
    pub fn configure(&self, config: &StreamConfig) -> Result<(), CaptureError> {
        self.transition(PipelineState::Idle, PipelineState::Configuring)?;

        match self.configure_inner(config) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.clear_capture_state();
                self.force_state(PipelineState::Idle);
                Err(err)
            }
        }
    }

    fn configure_inner(&self, config: &StreamConfig) -> Result<(), CaptureError> {
        let negotiated = self.shared.device.configure(config)?;
        let buffers = self.shared.device.export_buffers()?;
        if buffers.is_empty() {
            return Err(CaptureError::Allocation("device exported no buffers".into()));
        }

        let requests: Vec<CaptureRequest> = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| CaptureRequest {
                id: RequestId(i),
                buffer: buffer.id,
                exposure_us: negotiated.exposure_us,
            })
            .collect();

        debug!(
            width = negotiated.width,
            height = negotiated.height,
            buffers = buffers.len(),
            "stream configured"
        );

        *self.shared.pool.lock().expect("pool lock") = Some(BufferPool::new(buffers));
        *self.shared.requests.lock().expect("requests lock") = requests;
        *self.shared.geometry.lock().expect("geometry lock") = Some(negotiated);
        Ok(())
    }

    /// Register the completion sink and submit every prepared request.
    ///
    /// Fails without side effects unless configuration completed; on a
    /// submission failure the pipeline is torn back down to Idle.
    pub fn start(&self) -> Result<(), CaptureError> {
        self.transition(PipelineState::Configuring, PipelineState::Running)?;

        match self.start_inner() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.shared.device.stop();
                self.clear_capture_state();
                self.force_state(PipelineState::Idle);
                Err(err)
            }
        }
    }

    fn start_inner(&self) -> Result<(), CaptureError> {
        let weak = Arc::downgrade(&self.shared);
        self.shared.device.start(Arc::new(move |completion| {
            if let Some(shared) = Weak::upgrade(&weak) {
                handle_completion(&shared, completion);
            }
        }))?;

        let requests = self.shared.requests.lock().expect("requests lock").clone();
        for request in &requests {
            {
                let mut pool = self.shared.pool.lock().expect("pool lock");
                // A concurrent stop may have torn the stream down already.
                let Some(pool) = pool.as_mut() else {
                    return Err(CaptureError::Queue("stream torn down while starting".into()));
                };
                pool.mark_queued(request.buffer)?;
            }
            self.shared.device.queue(request)?;
        }

        debug!(requests = requests.len(), "capture started");
        Ok(())
    }

    /// Stop capture and tear down buffers, requests, and stream state.
    ///
    /// Synchronous: the device guarantees no completion is delivered after
    /// its `stop` returns, so teardown below it is safe. Calling `stop` when
    /// not running is a failing no-op, never fatal.
    pub fn stop(&self) -> Result<(), CaptureError> {
        self.transition(PipelineState::Running, PipelineState::Stopping)?;

        self.shared.device.stop();
        self.clear_capture_state();
        self.force_state(PipelineState::Idle);
        debug!("capture stopped");
        Ok(())
    }

    fn transition(&self, from: PipelineState, to: PipelineState) -> Result<(), CaptureError> {
        let mut state = self.shared.state.lock().expect("state lock");
        if *state != from {
            return Err(CaptureError::State {
                required: from,
                actual: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn force_state(&self, to: PipelineState) {
        *self.shared.state.lock().expect("state lock") = to;
    }

    fn clear_capture_state(&self) {
        self.shared.requests.lock().expect("requests lock").clear();
        *self.shared.pool.lock().expect("pool lock") = None;
        *self.shared.geometry.lock().expect("geometry lock") = None;
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Runs on the device's callback thread, once per completed request.
///
/// The buffer is recycled on every path out of this function: cancelled,
/// unmappable, and processed frames all end Free or re-Queued.
fn handle_completion(shared: &Shared, completion: Completion) {
    {
        let mut pool = shared.pool.lock().expect("pool lock");
        let Some(pool) = pool.as_mut() else {
            warn!(buffer = ?completion.buffer, "completion after teardown, ignoring");
            return;
        };
        if let Err(err) = pool.mark_processing(completion.buffer) {
            warn!(%err, "completion for a buffer the pool did not queue");
            return;
        }
    }

    if completion.status == CompletionStatus::Cancelled {
        trace!(sequence = completion.sequence, "request cancelled, recycling buffer");
        metrics::counter!("capture_requests_cancelled_total").increment(1);
        release_buffer(shared, &completion);
        return;
    }

    let geometry = shared
        .geometry
        .lock()
        .expect("geometry lock")
        .clone()
        .expect("geometry present while running");

    let mapped = {
        let pool = shared.pool.lock().expect("pool lock");
        let pool = pool.as_ref().expect("pool present while running");
        match pool.plane(completion.buffer, 0) {
            Some(plane) => MappedPlane::map(plane, completion.bytes_used),
            None => Err(CaptureError::UnknownBuffer(completion.buffer)),
        }
    };

    match mapped {
        Ok(view) => {
            trace!(
                sequence = completion.sequence,
                bytes = completion.bytes_used,
                "frame mapped"
            );
            shared.sink.on_frame(RawFrame {
                data: &view,
                width: geometry.width,
                height: geometry.height,
                sequence: completion.sequence,
                timestamp_ms: completion.timestamp_ms,
            });
            metrics::counter!("capture_frames_total").increment(1);
        }
        Err(err) => {
            warn!(sequence = completion.sequence, %err, "skipping unmappable frame");
            metrics::counter!("capture_frames_dropped_total", "reason" => "map_failed")
                .increment(1);
        }
    }

    requeue_or_release(shared, &completion);

    if let Some(pool) = shared.pool.lock().expect("pool lock").as_ref() {
        metrics::gauge!("capture_pool_free").set(pool.counts().free as f64);
    }
}

/// Processing→Queued plus resubmission while running; Processing→Free once
/// the pipeline is stopping or the device refuses the request.
fn requeue_or_release(shared: &Shared, completion: &Completion) {
    let running = *shared.state.lock().expect("state lock") == PipelineState::Running;
    if !running {
        release_buffer(shared, completion);
        return;
    }

    let request = shared
        .requests
        .lock()
        .expect("requests lock")
        .iter()
        .find(|request| request.id == completion.request)
        .cloned();
    let Some(request) = request else {
        release_buffer(shared, completion);
        return;
    };

    {
        let mut pool = shared.pool.lock().expect("pool lock");
        if let Some(pool) = pool.as_mut() {
            if let Err(err) = pool.mark_queued(completion.buffer) {
                warn!(%err, "requeue bookkeeping failed");
                return;
            }
        }
    }

    if let Err(err) = shared.device.queue(&request) {
        // The device is winding down; undo the Queued mark so the pool
        // census stays truthful.
        warn!(%err, "device refused requeue, releasing buffer");
        let mut pool = shared.pool.lock().expect("pool lock");
        if let Some(pool) = pool.as_mut() {
            let _ = pool.release(completion.buffer);
        }
    }
}

fn release_buffer(shared: &Shared, completion: &Completion) {
    let mut pool = shared.pool.lock().expect("pool lock");
    if let Some(pool) = pool.as_mut() {
        if let Err(err) = pool.release(completion.buffer) {
            warn!(%err, "release bookkeeping failed");
        }
    }
}
