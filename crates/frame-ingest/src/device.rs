//! Contract between the capture pipeline and a hardware frame source.
//!
//! A [`CaptureDevice`] negotiates one stream, exports its buffers as plane
//! descriptors, and delivers completions to a registered sink from a thread
//! the device owns. The pipeline never assumes which thread that is.

use std::fs::File;
use std::sync::Arc;

use thiserror::Error;

/// Identifies a buffer exported by the device. Stable for the lifetime of a
/// configure/stop cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

/// Identifies a capture request submitted to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub usize);

/// Role requested for the configured stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamRole {
    Viewfinder,
    VideoRecording,
    StillCapture,
    Raw,
}

/// Pixel layout of the configured stream. Only single-plane, single-channel
/// layouts are accepted by this pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Grey8,
    Grey16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey8 => 1,
            PixelFormat::Grey16 => 2,
        }
    }
}

/// Requested (and, after `configure`, negotiated) stream parameters.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub role: StreamRole,
    /// Fixed exposure applied to every capture request, in microseconds.
    pub exposure_us: Option<u32>,
    pub buffer_count: usize,
}

impl StreamConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::Grey8,
            role: StreamRole::Viewfinder,
            exposure_us: None,
            buffer_count: 4,
        }
    }
}

/// One mappable plane of an exported buffer.
///
/// The device keeps the backing memory alive for as long as the buffer is
/// exported; the pipeline only ever maps it, never copies it.
#[derive(Debug)]
pub struct Plane {
    pub fd: File,
    pub offset: u64,
    pub length: usize,
}

/// A hardware buffer: one or more planes sharing a lifetime.
#[derive(Debug)]
pub struct FrameBuffer {
    pub id: BufferId,
    pub planes: Vec<Plane>,
}

/// A buffer binding submitted to the device. Reused across capture cycles.
#[derive(Clone, Debug)]
pub struct CaptureRequest {
    pub id: RequestId,
    pub buffer: BufferId,
    pub exposure_us: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    /// Reported by the device for requests flushed during teardown. Expected,
    /// not an error.
    Cancelled,
}

/// Delivered by the device once per completed request.
#[derive(Clone, Debug)]
pub struct Completion {
    pub request: RequestId,
    pub buffer: BufferId,
    pub status: CompletionStatus,
    pub bytes_used: usize,
    pub sequence: u64,
    pub timestamp_ms: i64,
}

/// Completion sink registered at start. The context it captures replaces any
/// process-wide instance pointer: every pipeline carries its own.
pub type CompletionSink = Arc<dyn Fn(Completion) + Send + Sync>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no capture device available")]
    NoDevice,
    #[error("stream configuration rejected: {0}")]
    Configure(String),
    #[error("buffer allocation failed: {0}")]
    Allocation(String),
    #[error("capture request rejected: {0}")]
    Queue(String),
    #[error("buffer {0:?} is not tracked by the pool")]
    UnknownBuffer(BufferId),
    #[error("buffer {buffer:?} cannot move from {from:?} to {to:?}")]
    BufferState {
        buffer: BufferId,
        from: crate::buffers::BufferState,
        to: crate::buffers::BufferState,
    },
    #[error("pipeline is {actual:?}, operation requires {required:?}")]
    State {
        required: crate::scheduler::PipelineState,
        actual: crate::scheduler::PipelineState,
    },
    #[error("frame reports {bytes_used} bytes but the plane holds {capacity}")]
    PlaneOverrun { bytes_used: usize, capacity: usize },
    #[error("memory mapping failed")]
    Map(#[from] std::io::Error),
}

/// A hardware frame source.
///
/// Implementations are internally synchronized: `queue` may be called from
/// the completion sink itself (the usual requeue path), concurrently with a
/// `stop` issued from another thread.
pub trait CaptureDevice: Send + Sync {
    /// Validate and apply a stream configuration, returning the negotiated
    /// parameters.
    fn configure(&self, config: &StreamConfig) -> Result<StreamConfig, CaptureError>;

    /// Export the stream's buffers. Valid after a successful `configure`.
    fn export_buffers(&self) -> Result<Vec<FrameBuffer>, CaptureError>;

    /// Begin delivering completions to `sink`.
    fn start(&self, sink: CompletionSink) -> Result<(), CaptureError>;

    /// Submit a request for capture. Thread-safe; commonly invoked from the
    /// completion sink to recycle a buffer.
    fn queue(&self, request: &CaptureRequest) -> Result<(), CaptureError>;

    /// Stop capture. Synchronous: once this returns, the device guarantees
    /// the sink will never be invoked again, so the caller may tear down
    /// buffers and requests.
    fn stop(&self);
}
