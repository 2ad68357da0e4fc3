// GPU memory resources
//
// Buffers and off-screen images allocated through gpu-allocator. Every
// resource holds the device alive and frees its memory on drop; the
// caller guarantees the GPU is done with it (fence or drain) first.

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::fmt;
use std::sync::Arc;

use super::{vk_error, VulkanBackend, VulkanContext, VulkanDevice};
use crate::error::{FrameError, FrameResult};
use crate::frame::{BufferDesc, BufferUsage, Extent, ResourceFactory, StagingBuffer};

/// Format of the off-screen eye targets.
pub const RENDER_TARGET_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

pub(crate) const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

pub struct VulkanBuffer {
    device: Arc<VulkanDevice>,
    raw: vk::Buffer,
    size: u64,
    allocation: Option<Allocation>,
}

impl VulkanBuffer {
    fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> FrameResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { device.device.create_buffer(&buffer_info, None) }
            .map_err(vk_error("vkCreateBuffer"))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(raw) };
        let allocation = match device.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(raw, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(raw, allocation.memory(), allocation.offset())
        };
        let buffer = Self {
            device,
            raw,
            size,
            allocation: Some(allocation),
        };
        bound.map_err(vk_error("vkBindBufferMemory"))?;
        Ok(buffer)
    }

    /// Host-visible buffer for per-frame constants; stays mapped for its lifetime.
    pub fn mapped_constants(device: &Arc<VulkanDevice>, size: u64) -> FrameResult<Self> {
        Self::new(
            Arc::clone(device),
            "frame constants",
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mapped_mut(&mut self) -> FrameResult<&mut [u8]> {
        self.allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| FrameError::backend("map", "buffer memory is not host visible"))
    }
}

impl fmt::Debug for VulkanBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanBuffer")
            .field("raw", &self.raw)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.raw, None) };
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

/// CPU-written source of buffer copies.
pub struct VulkanStaging {
    buffer: VulkanBuffer,
}

impl StagingBuffer<VulkanBackend> for VulkanStaging {
    fn capacity(&self) -> u64 {
        self.buffer.size
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> FrameResult<()> {
        let capacity = self.buffer.size;
        let end = offset + data.len() as u64;
        if end > capacity {
            return Err(FrameError::UploadTooLarge {
                requested: end,
                capacity,
            });
        }
        let mapped = self.buffer.mapped_mut()?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn buffer(&self) -> &VulkanBuffer {
        &self.buffer
    }
}

/// Owned image memory behind render targets.
struct ImageMemory {
    device: Arc<VulkanDevice>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
}

impl Drop for ImageMemory {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

/// Swapchain image or render target. Swapchain images are owned by the
/// surface; render targets free themselves when the last clone drops.
#[derive(Clone)]
pub struct VulkanImage {
    pub raw: vk::Image,
    pub view: vk::ImageView,
    pub extent: Extent,
    memory: Option<Arc<ImageMemory>>,
}

impl VulkanImage {
    pub(crate) fn borrowed(raw: vk::Image, view: vk::ImageView, extent: Extent) -> Self {
        Self {
            raw,
            view,
            extent,
            memory: None,
        }
    }
}

impl fmt::Debug for VulkanImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanImage")
            .field("raw", &self.raw)
            .field("extent", &self.extent)
            .field("owned", &self.memory.is_some())
            .finish()
    }
}

pub(crate) fn create_view(device: &VulkanDevice, image: vk::Image, format: vk::Format) -> FrameResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(COLOR_RANGE);
    unsafe { device.device.create_image_view(&create_info, None) }.map_err(vk_error("vkCreateImageView"))
}

fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let input = match usage {
        BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferUsage::Constant => vk::BufferUsageFlags::UNIFORM_BUFFER,
    };
    input | vk::BufferUsageFlags::TRANSFER_DST
}

impl ResourceFactory<VulkanBackend> for VulkanDevice {
    fn create_context(&self) -> FrameResult<VulkanContext> {
        VulkanContext::new(self.arc()?)
    }

    fn create_staging(&self, bytes: u64) -> FrameResult<VulkanStaging> {
        let buffer = VulkanBuffer::new(
            self.arc()?,
            "upload staging",
            bytes,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        Ok(VulkanStaging { buffer })
    }

    fn create_buffer(&self, desc: &BufferDesc) -> FrameResult<VulkanBuffer> {
        VulkanBuffer::new(
            self.arc()?,
            "resident buffer",
            desc.size,
            buffer_usage(desc.usage),
            MemoryLocation::GpuOnly,
        )
    }

    fn create_render_target(&self, extent: Extent) -> FrameResult<VulkanImage> {
        let device = self.arc()?;
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(RENDER_TARGET_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .map_err(vk_error("vkCreateImage"))?;
        // From here on ImageMemory's Drop cleans up partial state.
        let mut memory = ImageMemory {
            device: Arc::clone(&device),
            image,
            view: vk::ImageView::null(),
            allocation: None,
        };

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = device.allocate("render target", requirements, MemoryLocation::GpuOnly, false)?;
        let (block, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        memory.allocation = Some(allocation);
        unsafe { device.device.bind_image_memory(image, block, offset) }
            .map_err(vk_error("vkBindImageMemory"))?;
        memory.view = create_view(&device, image, RENDER_TARGET_FORMAT)?;

        Ok(VulkanImage {
            raw: image,
            view: memory.view,
            extent,
            memory: Some(Arc::new(memory)),
        })
    }
}
