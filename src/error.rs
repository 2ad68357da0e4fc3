// Error taxonomy for the frame protocol
//
// Setup failures are reported through anyhow by the application.
// Everything the scheduler, fence and uploader can return lives here.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the frame submission protocol.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The GPU stopped making progress (device removed, driver reset).
    #[error("GPU device lost")]
    DeviceLost,

    /// A bounded fence wait expired before the target value was reached.
    #[error("timed out after {timeout:?} waiting for fence value {value} (completed: {completed})")]
    WaitTimeout {
        value: u64,
        completed: u64,
        timeout: Duration,
    },

    /// Shutdown was requested through the cancellation token.
    #[error("frame loop cancelled")]
    Cancelled,

    /// The presentation surface no longer matches the window; resize first.
    #[error("presentation surface is out of date")]
    SurfaceOutOfDate,

    #[error("upload of {requested} bytes does not fit a {capacity} byte resource")]
    UploadTooLarge { requested: u64, capacity: u64 },

    /// The resource already has a copy in flight.
    #[error("upload already in flight")]
    UploadInFlight,

    /// The staging half was already reclaimed after a completed upload.
    #[error("staging buffer was released")]
    StagingReleased,

    #[error("upload queue is full ({capacity} pending)")]
    UploadQueueFull { capacity: usize },

    /// The resource has not been observed complete by its fence yet.
    #[error("resource is not ready (state: {state})")]
    NotReady { state: &'static str },

    /// An external "still loading" operation exhausted its retry budget.
    #[error("{what} still loading after {attempts} attempts")]
    StillLoading { what: &'static str, attempts: u32 },

    /// A backend API call failed for a reason other than device loss.
    #[error("{call} failed: {message}")]
    Backend { call: &'static str, message: String },
}

impl FrameError {
    /// Whether the error means the GPU can no longer be trusted to finish work.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost | Self::WaitTimeout { .. })
    }

    pub fn backend(call: &'static str, message: impl ToString) -> Self {
        Self::Backend {
            call,
            message: message.to_string(),
        }
    }
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_counts_as_device_loss() {
        let err = FrameError::WaitTimeout {
            value: 7,
            completed: 3,
            timeout: Duration::from_millis(10),
        };
        assert!(err.is_device_lost());
        assert!(FrameError::DeviceLost.is_device_lost());
        assert!(!FrameError::Cancelled.is_device_lost());
    }

    #[test]
    fn backend_error_names_the_call() {
        let err = FrameError::backend("vkQueueSubmit", "ERROR_OUT_OF_HOST_MEMORY");
        assert_eq!(err.to_string(), "vkQueueSubmit failed: ERROR_OUT_OF_HOST_MEMORY");
    }
}
