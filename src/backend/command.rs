// Command recording
//
// One pool + one primary command buffer per context. Resetting the pool
// recycles every buffer allocated from it, which is why the scheduler
// only resets a context after its fence value has been reached.

use ash::vk;
use std::sync::Arc;

use super::buffer::COLOR_RANGE;
use super::{vk_error, VulkanBackend, VulkanBuffer, VulkanDevice, VulkanImage};
use crate::error::FrameResult;
use crate::frame::{BufferDesc, BufferUsage, Extent, Rect, RecordingContext, ResourceState, Transition};

pub struct VulkanContext {
    device: Arc<VulkanDevice>,
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
}

impl VulkanContext {
    pub(crate) fn new(device: Arc<VulkanDevice>) -> FrameResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(vk_error("vkCreateCommandPool"))?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(vk_error("vkAllocateCommandBuffers")(e));
            }
        };

        Ok(Self {
            device,
            pool,
            command_buffer,
        })
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    fn raw(&self) -> &ash::Device {
        &self.device.device
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

/// Layout an image must be in for `state`.
pub fn image_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
        ResourceState::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDest => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        ResourceState::GenericRead
        | ResourceState::VertexBuffer
        | ResourceState::IndexBuffer
        | ResourceState::ConstantBuffer => vk::ImageLayout::GENERAL,
    }
}

/// Accesses and stages that touch a resource in `state`.
pub fn access_scope(state: ResourceState) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match state {
        // Acquire and present synchronize through semaphores waited at ALL_COMMANDS.
        ResourceState::Undefined | ResourceState::Present => {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::ALL_COMMANDS)
        }
        ResourceState::GenericRead => (vk::AccessFlags::MEMORY_READ, vk::PipelineStageFlags::ALL_COMMANDS),
        ResourceState::CopySource => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        ResourceState::CopyDest => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        ResourceState::RenderTarget => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        ResourceState::ShaderRead => (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER),
        ResourceState::VertexBuffer => (
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            vk::PipelineStageFlags::VERTEX_INPUT,
        ),
        ResourceState::IndexBuffer => (vk::AccessFlags::INDEX_READ, vk::PipelineStageFlags::VERTEX_INPUT),
        ResourceState::ConstantBuffer => (
            vk::AccessFlags::UNIFORM_READ,
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
    }
}

fn offset(x: i32, y: i32) -> vk::Offset3D {
    vk::Offset3D { x, y, z: 0 }
}

impl RecordingContext<VulkanBackend> for VulkanContext {
    fn reset(&mut self) -> FrameResult<()> {
        unsafe {
            self.raw()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .map_err(vk_error("vkResetCommandPool"))?;
            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.raw()
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(vk_error("vkBeginCommandBuffer"))
        }
    }

    fn close(&mut self) -> FrameResult<()> {
        unsafe { self.raw().end_command_buffer(self.command_buffer) }.map_err(vk_error("vkEndCommandBuffer"))
    }

    fn copy_buffer(&mut self, src: &VulkanBuffer, dst: &VulkanBuffer, bytes: u64) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: bytes,
        };
        unsafe {
            self.raw()
                .cmd_copy_buffer(self.command_buffer, src.raw(), dst.raw(), &[region])
        };
    }

    fn buffer_barrier(&mut self, buffer: &VulkanBuffer, transition: Transition) {
        let (src_access, src_stage) = access_scope(transition.before);
        let (dst_access, dst_stage) = access_scope(transition.after);
        let barrier = vk::BufferMemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer.raw())
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build();

        unsafe {
            self.raw().cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
    }

    fn image_barrier(&mut self, image: &VulkanImage, transition: Transition) {
        let (src_access, src_stage) = access_scope(transition.before);
        let (dst_access, dst_stage) = access_scope(transition.after);
        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(image_layout(transition.before))
            .new_layout(image_layout(transition.after))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.raw)
            .subresource_range(COLOR_RANGE)
            .build();

        unsafe {
            self.raw().cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// The image must be in the RenderTarget state.
    fn clear_image(&mut self, image: &VulkanImage, rgba: [f32; 4]) {
        let attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(image.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: rgba },
            })
            .build();
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: image.extent.width,
                    height: image.extent.height,
                },
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&attachment));

        unsafe {
            self.raw().cmd_begin_rendering(self.command_buffer, &rendering_info);
            self.raw().cmd_end_rendering(self.command_buffer);
        }
    }

    /// `src` must be a copy source and `dst` a copy destination.
    fn blit_image(&mut self, src: &VulkanImage, src_extent: Extent, dst: &VulkanImage, dst_rect: Rect) {
        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageBlit {
            src_subresource: layers,
            src_offsets: [
                offset(0, 0),
                vk::Offset3D {
                    x: src_extent.width as i32,
                    y: src_extent.height as i32,
                    z: 1,
                },
            ],
            dst_subresource: layers,
            dst_offsets: [
                offset(dst_rect.x, dst_rect.y),
                vk::Offset3D {
                    x: dst_rect.x + dst_rect.width as i32,
                    y: dst_rect.y + dst_rect.height as i32,
                    z: 1,
                },
            ],
        };

        unsafe {
            self.raw().cmd_blit_image(
                self.command_buffer,
                src.raw,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );
        }
    }

    fn bind_buffer(&mut self, buffer: &VulkanBuffer, desc: &BufferDesc) {
        unsafe {
            match desc.usage {
                BufferUsage::Vertex => {
                    self.raw()
                        .cmd_bind_vertex_buffers(self.command_buffer, 0, &[buffer.raw()], &[0])
                }
                BufferUsage::Index => {
                    let index_type = if desc.stride == 4 {
                        vk::IndexType::UINT32
                    } else {
                        vk::IndexType::UINT16
                    };
                    self.raw()
                        .cmd_bind_index_buffer(self.command_buffer, buffer.raw(), 0, index_type)
                }
                // Constant buffers are bound through descriptor sets by the pipeline owner.
                BufferUsage::Constant => {}
            }
        }
    }
}
