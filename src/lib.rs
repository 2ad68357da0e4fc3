// Frame scheduler - per-frame GPU submission and synchronization
//
// The `frame` module is backend independent: fences, frame slots,
// uploads and stereo hand-off are written against the traits in
// `frame::hal`. The `backend` module implements those traits on Vulkan.

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;

pub use error::{FrameError, FrameResult};
pub use frame::{
    CancelToken, CommandRecorder, Fence, FrameInfo, FrameSlot, GpuFrameScheduler, SchedulerConfig,
    UploadResource, UploadState, Uploader,
};
