// Swapchain - Window presentation
//
// Acquire is issued eagerly: as soon as a frame is presented the next
// image is requested, so the scheduler can pick the slot by image index.
//
// SEMAPHORES:
// ┌──────────────────────────────────────────────────────────────────────┐
// │  acquire ring (images + 1)  ── signaled by acquire, waited by submit │
// │  render_finished (per image) ─ signaled by submit, waited by present │
// └──────────────────────────────────────────────────────────────────────┘
// An acquire semaphore is reused only once the frame that waited on it
// has reached its fence value. Both that wait and the acquire itself are
// bounded by the scheduler's wait timeout.

use anyhow::Result;
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::buffer::create_view;
use super::{vk_error, TimelineFence, VulkanBackend, VulkanDevice, VulkanImage, VulkanQueue};
use crate::error::{FrameError, FrameResult};
use crate::frame::{Extent, FencePrimitive, PresentStatus, PresentationSurface};

/// Semaphore pair tying one submission to its swapchain image.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

struct AcquireSemaphore {
    semaphore: vk::Semaphore,
    /// Frame fence value after which the last wait on it has executed.
    retire_value: u64,
}

struct Acquired {
    image: u32,
    semaphore: usize,
    suboptimal: bool,
}

pub struct VulkanSurface {
    device: Arc<VulkanDevice>,
    loader: khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    images: Vec<VulkanImage>,
    format: vk::Format,
    extent: Extent,
    present_mode: vk::PresentModeKHR,
    /// Present mode requested by the configuration.
    preferred_mode: vk::PresentModeKHR,
    vsync_interval: u32,

    acquire: Vec<AcquireSemaphore>,
    next_acquire: usize,
    render_finished: Vec<vk::Semaphore>,
    current: Option<Acquired>,
    frame_fence: TimelineFence,
    /// `None` waits forever.
    wait_timeout: Option<Duration>,
}

impl VulkanSurface {
    pub fn new(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        preferred_mode: vk::PresentModeKHR,
        vsync_interval: u32,
        frame_fence: TimelineFence,
        wait_timeout: Option<Duration>,
    ) -> Result<Self> {
        let loader = khr::Swapchain::new(&device.instance, &device.device);
        let mut surface = Self {
            device,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: Extent::default(),
            present_mode: preferred_mode,
            preferred_mode,
            vsync_interval,
            acquire: Vec::new(),
            next_acquire: 0,
            render_finished: Vec::new(),
            current: None,
            frame_fence,
            wait_timeout,
        };
        surface.create(width, height)?;
        Ok(surface)
    }

    fn choose_present_mode(&self, available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
        // FIFO is always supported and is the only mode that honors a vsync interval.
        if self.vsync_interval > 0 {
            return vk::PresentModeKHR::FIFO;
        }
        [self.preferred_mode, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
            .into_iter()
            .find(|mode| available.contains(mode))
            .unwrap_or(vk::PresentModeKHR::FIFO)
    }

    /// Build the swapchain and everything sized by its image count.
    fn create(&mut self, width: u32, height: u32) -> FrameResult<()> {
        let device = Arc::clone(&self.device);
        let physical = device.physical_device;
        let surface = device.surface;
        let (caps, formats, modes) = unsafe {
            (
                device
                    .surface_loader
                    .get_physical_device_surface_capabilities(physical, surface)
                    .map_err(vk_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?,
                device
                    .surface_loader
                    .get_physical_device_surface_formats(physical, surface)
                    .map_err(vk_error("vkGetPhysicalDeviceSurfaceFormatsKHR"))?,
                device
                    .surface_loader
                    .get_physical_device_surface_present_modes(physical, surface)
                    .map_err(vk_error("vkGetPhysicalDeviceSurfacePresentModesKHR"))?,
            )
        };

        let surface_format = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| FrameError::backend("vkGetPhysicalDeviceSurfaceFormatsKHR", "no surface formats"))?;

        let present_mode = self.choose_present_mode(&modes);

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };

        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(self.swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .map_err(vk_error("vkCreateSwapchainKHR"))?;
        self.destroy();
        self.swapchain = swapchain;
        self.format = surface_format.format;
        self.present_mode = present_mode;
        self.extent = Extent::new(extent.width, extent.height);

        let raw_images = unsafe { self.loader.get_swapchain_images(swapchain) }
            .map_err(vk_error("vkGetSwapchainImagesKHR"))?;
        for raw in raw_images {
            let view = create_view(&device, raw, self.format)?;
            self.images.push(VulkanImage::borrowed(raw, view, self.extent));
        }

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        for _ in 0..self.images.len() {
            let semaphore = unsafe { device.device.create_semaphore(&semaphore_info, None) }
                .map_err(vk_error("vkCreateSemaphore"))?;
            self.render_finished.push(semaphore);
        }
        for _ in 0..=self.images.len() {
            let semaphore = unsafe { device.device.create_semaphore(&semaphore_info, None) }
                .map_err(vk_error("vkCreateSemaphore"))?;
            self.acquire.push(AcquireSemaphore {
                semaphore,
                retire_value: 0,
            });
        }

        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}",
            self.extent.width,
            self.extent.height,
            self.images.len(),
            self.present_mode
        );
        Ok(())
    }

    /// Release everything except the swapchain handle being replaced.
    fn destroy(&mut self) {
        let device = &self.device.device;
        unsafe {
            for image in self.images.drain(..) {
                device.destroy_image_view(image.view, None);
            }
            for semaphore in self.render_finished.drain(..) {
                device.destroy_semaphore(semaphore, None);
            }
            for acquire in self.acquire.drain(..) {
                device.destroy_semaphore(acquire.semaphore, None);
            }
        }
        self.current = None;
        self.next_acquire = 0;
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

/// Block until `value` retires an acquire semaphore, or fail with `WaitTimeout`.
fn wait_retired(fence: &impl FencePrimitive, value: u64, timeout: Option<Duration>) -> FrameResult<()> {
    if fence.wait_value(value, timeout)? {
        return Ok(());
    }
    let completed = fence.completed_value()?;
    log::error!("Acquire semaphore wait for {} timed out at {}", value, completed);
    Err(FrameError::WaitTimeout {
        value,
        completed,
        timeout: timeout.unwrap_or(Duration::MAX),
    })
}

/// vkAcquireNextImageKHR takes nanoseconds; `u64::MAX` never expires.
fn acquire_timeout_ns(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
}

/// TIMEOUT and NOT_READY mean no image became available within the bound.
fn acquire_error(result: vk::Result, timeout: Option<Duration>, value: u64, completed: u64) -> FrameError {
    match result {
        vk::Result::TIMEOUT | vk::Result::NOT_READY => {
            log::error!("No swapchain image within {:?}", timeout);
            FrameError::WaitTimeout {
                value,
                completed,
                timeout: timeout.unwrap_or(Duration::MAX),
            }
        }
        other => vk_error("vkAcquireNextImageKHR")(other),
    }
}

impl PresentationSurface<VulkanBackend> for VulkanSurface {
    fn current_image_index(&mut self) -> FrameResult<usize> {
        if let Some(acquired) = &self.current {
            return Ok(acquired.image as usize);
        }

        let slot = self.next_acquire;
        let retire_value = self.acquire[slot].retire_value;
        if retire_value > 0 {
            wait_retired(&self.frame_fence, retire_value, self.wait_timeout)?;
        }

        let semaphore = self.acquire[slot].semaphore;
        let acquired = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                acquire_timeout_ns(self.wait_timeout),
                semaphore,
                vk::Fence::null(),
            )
        };
        let (image, suboptimal) = match acquired {
            Ok(acquired) => acquired,
            Err(result) => {
                let completed = self.frame_fence.completed_value().unwrap_or(retire_value);
                return Err(acquire_error(result, self.wait_timeout, retire_value, completed));
            }
        };

        self.next_acquire = (slot + 1) % self.acquire.len();
        self.current = Some(Acquired {
            image,
            semaphore: slot,
            suboptimal,
        });
        Ok(image as usize)
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn image(&self, index: usize) -> VulkanImage {
        self.images[index].clone()
    }

    fn extent(&self) -> Extent {
        self.extent
    }

    fn frame_sync(&self) -> Option<SwapchainSync> {
        self.current.as_ref().map(|acquired| SwapchainSync {
            image_available: self.acquire[acquired.semaphore].semaphore,
            render_finished: self.render_finished[acquired.image as usize],
        })
    }

    /// Callers drain the GPU before resizing.
    fn resize(&mut self, width: u32, height: u32) -> FrameResult<()> {
        // An acquired but unsubmitted image leaves its semaphore signaled.
        self.device.wait_idle()?;
        let old = self.swapchain;
        self.create(width, height)?;
        unsafe { self.loader.destroy_swapchain(old, None) };
        Ok(())
    }

    fn present(&mut self, queue: &VulkanQueue, vsync_interval: u32) -> FrameResult<PresentStatus> {
        let acquired = self
            .current
            .take()
            .ok_or_else(|| FrameError::backend("vkQueuePresentKHR", "no image was acquired"))?;

        let wait = [self.render_finished[acquired.image as usize]];
        let swapchains = [self.swapchain];
        let indices = [acquired.image];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = queue.with_raw(|raw| unsafe { self.loader.queue_present(raw, &present_info) });

        // The present mode is baked into the swapchain; a new interval needs a rebuild.
        let interval_changed = vsync_interval != self.vsync_interval;
        self.vsync_interval = vsync_interval;

        match result {
            Ok(false) if !acquired.suboptimal && !interval_changed => Ok(PresentStatus::Presented),
            Ok(_) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(vk_error("vkQueuePresentKHR")(e)),
        }
    }

    fn submitted(&mut self, fence_value: u64) {
        if let Some(acquired) = &self.current {
            self.acquire[acquired.semaphore].retire_value = fence_value;
        }
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        self.destroy();
        unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::mock::MockGpu;
    use crate::frame::SubmissionQueue;
    use pretty_assertions::assert_eq;

    #[test]
    fn acquire_timeout_follows_the_wait_bound() {
        assert_eq!(acquire_timeout_ns(None), u64::MAX);
        assert_eq!(acquire_timeout_ns(Some(Duration::from_millis(5))), 5_000_000);
        assert_eq!(acquire_timeout_ns(Some(Duration::MAX)), u64::MAX);
    }

    #[test]
    fn expired_acquire_is_a_wait_timeout() {
        for result in [vk::Result::TIMEOUT, vk::Result::NOT_READY] {
            let err = acquire_error(result, Some(Duration::from_millis(5)), 7, 6);
            assert!(matches!(err, FrameError::WaitTimeout { value: 7, completed: 6, .. }));
            assert!(err.is_device_lost());
        }
        assert!(matches!(
            acquire_error(vk::Result::ERROR_OUT_OF_DATE_KHR, None, 0, 0),
            FrameError::SurfaceOutOfDate
        ));
    }

    #[test]
    fn retire_wait_gives_up_after_the_timeout() {
        let gpu = MockGpu::new();
        let fence = gpu.fence();
        gpu.queue().signal(&fence, 3).unwrap();
        gpu.complete_through(1);

        let err = wait_retired(&fence, 3, Some(Duration::from_millis(5))).unwrap_err();
        assert!(matches!(
            err,
            FrameError::WaitTimeout { value: 3, completed: 1, .. }
        ));

        gpu.complete_through(3);
        wait_retired(&fence, 3, Some(Duration::from_millis(5))).unwrap();
    }
}
