// Synchronization primitives
//
// The frame fence is a single timeline semaphore: the queue signals
// increasing values and the CPU reads or waits on the counter.

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::{vk_error, VulkanDevice};
use crate::error::FrameResult;
use crate::frame::FencePrimitive;

struct Timeline {
    device: Arc<VulkanDevice>,
    semaphore: vk::Semaphore,
}

impl Drop for Timeline {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_semaphore(self.semaphore, None) };
    }
}

/// Timeline semaphore; clones share the same counter.
#[derive(Clone)]
pub struct TimelineFence {
    inner: Arc<Timeline>,
}

impl TimelineFence {
    pub fn new(device: &Arc<VulkanDevice>) -> FrameResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);

        let semaphore = unsafe { device.device.create_semaphore(&create_info, None) }
            .map_err(vk_error("vkCreateSemaphore"))?;

        Ok(Self {
            inner: Arc::new(Timeline {
                device: Arc::clone(device),
                semaphore,
            }),
        })
    }

    pub fn semaphore(&self) -> vk::Semaphore {
        self.inner.semaphore
    }
}

impl FencePrimitive for TimelineFence {
    fn completed_value(&self) -> FrameResult<u64> {
        unsafe { self.inner.device.device.get_semaphore_counter_value(self.inner.semaphore) }
            .map_err(vk_error("vkGetSemaphoreCounterValue"))
    }

    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> FrameResult<bool> {
        let semaphores = [self.inner.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);
        let timeout_ns = timeout.map_or(u64::MAX, |t| t.as_nanos().min(u64::MAX as u128) as u64);

        match unsafe { self.inner.device.device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(vk_error("vkWaitSemaphores")(e)),
        }
    }
}
