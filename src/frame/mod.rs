// Backend-independent frame submission protocol

pub mod barrier;
pub mod constants;
pub mod fence;
pub mod hal;
pub mod retry;
pub mod scheduler;
pub mod slot;
pub mod stereo;
pub mod upload;

#[cfg(test)]
pub(crate) mod mock;

pub use barrier::{ResourceState, StateTracker, Transition};
pub use constants::ConstantLayout;
pub use fence::{Completion, Fence};
pub use hal::{
    Backend, BufferDesc, BufferUsage, Extent, FencePrimitive, PresentStatus, PresentationSurface, Rect,
    RecordingContext, ResourceFactory, StagingBuffer, SubmissionQueue,
};
pub use retry::{LoadStatus, RetryPolicy};
pub use scheduler::{CancelToken, CommandRecorder, FrameInfo, FrameStats, GpuFrameScheduler, SchedulerConfig};
pub use slot::{FrameSlot, SlotState};
pub use stereo::{
    Compositor, CompositorStatus, EyeConstants, EyePose, Eye, EyeTarget, HeadPose, RenderModelInfo, StereoRenderer,
};
pub use upload::{UploadResource, UploadState, UploadTick, Uploader, UploaderConfig};
