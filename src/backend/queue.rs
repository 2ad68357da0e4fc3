// Queue submission
//
// Command buffers and the timeline signal go in separate vkQueueSubmit
// calls. Submission order makes the signal cover everything before it.

use ash::vk;
use std::sync::Arc;

use super::{vk_error, SwapchainSync, TimelineFence, VulkanBackend, VulkanContext, VulkanDevice};
use crate::error::FrameResult;
use crate::frame::SubmissionQueue;

pub struct VulkanQueue {
    device: Arc<VulkanDevice>,
    index: usize,
}

impl VulkanQueue {
    pub(crate) fn new(device: Arc<VulkanDevice>, index: usize) -> Self {
        Self { device, index }
    }

    /// Run `f` with exclusive access to the raw queue handle.
    pub(crate) fn with_raw<T>(&self, f: impl FnOnce(vk::Queue) -> T) -> T {
        let queue = self.device.lock_queue(self.index);
        f(*queue)
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl SubmissionQueue<VulkanBackend> for VulkanQueue {
    fn execute(&self, contexts: &[&VulkanContext], frame_sync: Option<&SwapchainSync>) -> FrameResult<()> {
        let command_buffers: Vec<vk::CommandBuffer> = contexts.iter().map(|c| c.command_buffer()).collect();

        let (wait, signal) = match frame_sync {
            Some(sync) => (vec![sync.image_available], vec![sync.render_finished]),
            None => (Vec::new(), Vec::new()),
        };
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait.len()];

        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal)
            .build();

        self.with_raw(|queue| unsafe {
            self.device
                .device
                .queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null())
        })
        .map_err(vk_error("vkQueueSubmit"))
    }

    fn signal(&self, fence: &TimelineFence, value: u64) -> FrameResult<()> {
        let semaphores = [fence.semaphore()];
        let values = [value];
        let mut timeline = vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&values);
        let submit = vk::SubmitInfo::builder()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline)
            .build();

        self.with_raw(|queue| unsafe {
            self.device
                .device
                .queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null())
        })
        .map_err(vk_error("vkQueueSubmit"))
    }
}
