// Backend module - Vulkan implementation of the frame protocol traits
//
// Design: Thin wrapper around ash with safety and ergonomics
// The frame fence is a timeline semaphore; binary semaphores only link
// acquire, submit and present inside the swapchain.

pub mod buffer;
pub mod command;
pub mod compositor;
pub mod device;
pub mod queue;
pub mod swapchain;
pub mod sync;

use ash::vk;

pub use buffer::{VulkanBuffer, VulkanImage, VulkanStaging};
pub use command::VulkanContext;
pub use compositor::HeadlessCompositor;
pub use device::VulkanDevice;
pub use queue::VulkanQueue;
pub use swapchain::{SwapchainSync, VulkanSurface};
pub use sync::TimelineFence;

use crate::error::FrameError;
use crate::frame::Backend;

pub struct VulkanBackend;

impl Backend for VulkanBackend {
    type Fence = TimelineFence;
    type Queue = VulkanQueue;
    type Context = VulkanContext;
    type Surface = VulkanSurface;
    type Device = VulkanDevice;
    type Image = VulkanImage;
    type Buffer = VulkanBuffer;
    type StagingBuffer = VulkanStaging;
    type FrameSync = SwapchainSync;
}

/// Map a failed Vulkan call onto the frame error taxonomy.
pub(crate) fn vk_error(call: &'static str) -> impl Fn(vk::Result) -> FrameError {
    move |result| match result {
        vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR => FrameError::SurfaceOutOfDate,
        other => FrameError::backend(call, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_loss_is_not_a_generic_backend_error() {
        assert!(matches!(
            vk_error("vkQueueSubmit")(vk::Result::ERROR_DEVICE_LOST),
            FrameError::DeviceLost
        ));
        assert!(matches!(
            vk_error("vkAcquireNextImageKHR")(vk::Result::ERROR_OUT_OF_DATE_KHR),
            FrameError::SurfaceOutOfDate
        ));
        assert!(matches!(
            vk_error("vkQueueSubmit")(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            FrameError::Backend { call: "vkQueueSubmit", .. }
        ));
    }
}
