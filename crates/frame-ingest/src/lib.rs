//! Frame acquisition for the marker-tracking pipeline.
//!
//! The crate owns everything between the hardware frame source and the
//! detection stage: the device contract, buffer-state bookkeeping, zero-copy
//! plane mapping, and the capture scheduler that recycles buffers on every
//! completion. Detection itself lives upstream; this crate hands out mapped
//! frames and takes the buffers back.

pub mod buffers;
pub mod device;
pub mod mapping;
pub mod scheduler;
pub mod sim;

pub use buffers::{BufferPool, BufferState, PoolCounts};
pub use device::{
    BufferId, CaptureDevice, CaptureError, CaptureRequest, Completion, CompletionSink,
    CompletionStatus, FrameBuffer, PixelFormat, Plane, RequestId, StreamConfig, StreamRole,
};
pub use mapping::MappedPlane;
pub use scheduler::{CaptureScheduler, FrameSink, PipelineState, RawFrame};
pub use sim::{FramePainter, SyntheticCamera};
