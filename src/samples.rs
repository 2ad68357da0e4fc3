// Demo samples - what each frame records
//
// All three samples share the scheduler; only the recorded commands and
// the extra hand-off after submit differ.
//
//   clear  : backbuffer cleared to the configured color
//   upload : cube geometry streamed through the uploader and a staged
//            in-frame copy, bound once both are resident
//   stereo : two eye targets handed to the compositor and mirrored into
//            the window

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use frame_scheduler::backend::{
    HeadlessCompositor, TimelineFence, VulkanBackend, VulkanBuffer, VulkanContext, VulkanDevice, VulkanImage,
};
use frame_scheduler::config::{Config, Sample};
use frame_scheduler::frame::stereo::load_render_model;
use frame_scheduler::frame::{
    BufferDesc, BufferUsage, Compositor, ConstantLayout, Extent, Eye, EyeConstants, FrameInfo, GpuFrameScheduler,
    PresentStatus, PresentationSurface, RecordingContext, ResourceState, StereoRenderer, Transition,
    UploadResource, UploadState, Uploader,
};
use frame_scheduler::{FrameError, FrameResult};

type Scheduler = GpuFrameScheduler<VulkanBackend>;

const EYE_COLORS: [[f32; 4]; 2] = [[0.8, 0.2, 0.2, 1.0], [0.2, 0.8, 0.2, 1.0]];

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 3],
}

const fn vertex(x: f32, y: f32, z: f32) -> Vertex {
    Vertex {
        position: [x, y, z],
        color: [(x + 1.0) * 0.5, (y + 1.0) * 0.5, (z + 1.0) * 0.5],
    }
}

const CUBE_VERTICES: [Vertex; 8] = [
    vertex(-1.0, -1.0, -1.0),
    vertex(1.0, -1.0, -1.0),
    vertex(1.0, 1.0, -1.0),
    vertex(-1.0, 1.0, -1.0),
    vertex(-1.0, -1.0, 1.0),
    vertex(1.0, -1.0, 1.0),
    vertex(1.0, 1.0, 1.0),
    vertex(-1.0, 1.0, 1.0),
];

#[rustfmt::skip]
const CUBE_INDICES: [u16; 36] = [
    0, 2, 1, 0, 3, 2, // back
    4, 5, 6, 4, 6, 7, // front
    0, 4, 7, 0, 7, 3, // left
    1, 2, 6, 1, 6, 5, // right
    3, 7, 6, 3, 6, 2, // top
    0, 1, 5, 0, 5, 4, // bottom
];

/// Backbuffer: discard -> clear -> present.
fn record_clear(ctx: &mut VulkanContext, backbuffer: &VulkanImage, color: [f32; 4]) {
    ctx.image_barrier(backbuffer, Transition::new(ResourceState::Undefined, ResourceState::RenderTarget));
    ctx.clear_image(backbuffer, color);
    ctx.image_barrier(backbuffer, Transition::new(ResourceState::RenderTarget, ResourceState::Present));
}

pub struct UploadSample {
    uploader: Uploader<VulkanBackend>,
    vertices: UploadResource<VulkanBackend>,
    indices: UploadResource<VulkanBackend>,
    bound: bool,
}

impl UploadSample {
    fn new(device: &Arc<VulkanDevice>, config: &Config) -> Result<Self> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&CUBE_VERTICES);
        let index_bytes: &[u8] = bytemuck::cast_slice(&CUBE_INDICES);

        let mut uploader = Uploader::<VulkanBackend>::new(
            Arc::clone(device),
            device.upload_queue(config.upload.dedicated_queue),
            TimelineFence::new(device)?,
            config.uploader_config(),
        )?;

        // Vertices go through the background uploader's own queue and fence.
        let vertices = UploadResource::<VulkanBackend>::create_streamed(
            device,
            BufferDesc {
                size: vertex_bytes.len() as u64,
                usage: BufferUsage::Vertex,
                stride: std::mem::size_of::<Vertex>() as u32,
            },
        )?;
        uploader.enqueue(&vertices, vertex_bytes.to_vec())?;

        // Indices are copied inside the first frame's command list.
        let mut indices = UploadResource::<VulkanBackend>::create(
            device,
            BufferDesc {
                size: index_bytes.len() as u64,
                usage: BufferUsage::Index,
                stride: 2,
            },
        )?;
        indices.stage(index_bytes)?;

        Ok(Self {
            uploader,
            vertices,
            indices,
            bound: false,
        })
    }

    fn record(&mut self, scheduler: &mut Scheduler, info: &FrameInfo<VulkanBackend>, color: [f32; 4]) -> FrameResult<()> {
        let mut recorder = scheduler.recorder();
        if self.indices.state() == UploadState::Uninitialized {
            self.indices.enqueue_upload(&mut recorder)?;
        }

        let ctx = recorder.context();
        record_clear(ctx, &info.backbuffer, color);

        if self.vertices.is_ready() && self.indices.is_ready() {
            ctx.bind_buffer(self.vertices.bind(), self.vertices.desc());
            ctx.bind_buffer(self.indices.bind(), self.indices.desc());
            if !self.bound {
                log::info!("Cube geometry resident and bound at frame {}", info.frame_number);
                self.indices.reclaim_staging();
                self.bound = true;
            }
        }
        Ok(())
    }
}

pub struct StereoSample {
    stereo: StereoRenderer<VulkanBackend>,
    compositor: HeadlessCompositor,
    device: Arc<VulkanDevice>,
    layout: ConstantLayout,
    constants: VulkanBuffer,
}

impl StereoSample {
    fn new(device: &Arc<VulkanDevice>, config: &Config, slots: usize) -> Result<Self> {
        let eye_extent = Extent::new(config.stereo.eye_width, config.stereo.eye_height);
        let mut compositor = HeadlessCompositor::new(eye_extent);
        let stereo = StereoRenderer::<VulkanBackend>::new(device, compositor.recommended_extent())
            .context("Failed to create eye targets")?;

        match load_render_model::<VulkanBackend>(&mut compositor, "controller", &config.retry_policy()) {
            Ok(model) => log::info!("Controller model: {} vertices", model.vertex_count),
            Err(e @ FrameError::StillLoading { .. }) => log::warn!("{}; drawing without controllers", e),
            Err(e) => return Err(e.into()),
        }

        let (layout, constants) = Self::constant_ring(device, slots)?;
        Ok(Self {
            stereo,
            compositor,
            device: Arc::clone(device),
            layout,
            constants,
        })
    }

    /// One constant block per (slot, eye).
    fn constant_ring(device: &Arc<VulkanDevice>, slots: usize) -> FrameResult<(ConstantLayout, VulkanBuffer)> {
        let layout = ConstantLayout::new(
            slots,
            Eye::BOTH.len(),
            std::mem::size_of::<EyeConstants>(),
            device.min_uniform_alignment().max(1),
        );
        let buffer = VulkanBuffer::mapped_constants(device, layout.total_size() as u64)?;
        Ok((layout, buffer))
    }

    fn record(&mut self, scheduler: &mut Scheduler, info: &FrameInfo<VulkanBackend>) -> FrameResult<()> {
        let poses = self.compositor.wait_get_poses()?;

        // begin_frame already waited for this slot, so its blocks are free.
        let mapped = self.constants.mapped_mut()?;
        for eye in Eye::BOTH {
            self.layout
                .write(mapped, info.slot, eye.index(), &EyeConstants::from(poses.eye(eye)));
        }

        let ctx = scheduler.context_mut();
        for eye in Eye::BOTH {
            let color = EYE_COLORS[eye.index()];
            self.stereo
                .record_eye(ctx, eye, |ctx, target| ctx.clear_image(&target.image, color));
        }

        ctx.image_barrier(&info.backbuffer, Transition::new(ResourceState::Undefined, ResourceState::CopyDest));
        self.stereo.record_mirror(ctx, &info.backbuffer, info.extent);
        ctx.image_barrier(&info.backbuffer, Transition::new(ResourceState::CopyDest, ResourceState::Present));
        Ok(())
    }
}

pub enum SampleState {
    Clear,
    Upload(UploadSample),
    Stereo(StereoSample),
}

/// Scheduler plus the selected sample.
pub struct Renderer {
    scheduler: Scheduler,
    sample: SampleState,
    clear_color: [f32; 4],
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(device: Arc<VulkanDevice>, scheduler: Scheduler, config: &Config) -> Result<Self> {
        let sample = match config.sample() {
            Sample::Clear => SampleState::Clear,
            Sample::Upload => SampleState::Upload(UploadSample::new(&device, config).context("Upload sample setup failed")?),
            Sample::Stereo => SampleState::Stereo(
                StereoSample::new(&device, config, scheduler.slots().len()).context("VR setup failed")?,
            ),
        };
        log::info!("Running {:?} sample", config.sample());

        Ok(Self {
            scheduler,
            sample,
            clear_color: config.graphics.clear_color,
            device,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Record, submit and present one frame.
    pub fn frame(&mut self) -> FrameResult<PresentStatus> {
        if let SampleState::Upload(upload) = &mut self.sample {
            upload.uploader.tick()?;
        }

        let info = self.scheduler.begin_frame()?;
        let recorded = match &mut self.sample {
            SampleState::Clear => {
                record_clear(self.scheduler.context_mut(), &info.backbuffer, self.clear_color);
                Ok(())
            }
            SampleState::Upload(upload) => upload.record(&mut self.scheduler, &info, self.clear_color),
            SampleState::Stereo(stereo) => stereo.record(&mut self.scheduler, &info),
        };
        if let Err(e) = recorded.and_then(|()| self.scheduler.submit()) {
            self.abandon_frame()?;
            return Err(e);
        }

        if let SampleState::Stereo(stereo) = &mut self.sample {
            stereo
                .stereo
                .submit_to_compositor(&mut stereo.compositor, self.scheduler.queue())?;
        }
        self.scheduler.present()
    }

    /// Drop the frame being recorded, including the eye states it declared.
    fn abandon_frame(&mut self) -> FrameResult<()> {
        if let SampleState::Stereo(stereo) = &mut self.sample {
            stereo.stereo.abandon_frame();
        }
        self.scheduler.abandon_frame()
    }

    pub fn resize(&mut self, width: u32, height: u32) -> FrameResult<()> {
        self.abandon_frame()?;
        self.scheduler.resize(width, height)?;
        if let SampleState::Stereo(stereo) = &mut self.sample {
            // The slot count may have changed; the GPU is idle after the resize.
            let (layout, constants) = StereoSample::constant_ring(&stereo.device, self.scheduler.slots().len())?;
            stereo.layout = layout;
            stereo.constants = constants;
        }
        log::debug!(
            "Surface now {}x{}",
            self.scheduler.surface().extent().width,
            self.scheduler.surface().extent().height
        );
        Ok(())
    }

    /// Stop the frame loop and wait for the GPU before anything is dropped.
    pub fn shutdown(&mut self) -> FrameResult<()> {
        self.scheduler.cancel_token().cancel();
        self.abandon_frame()?;
        match &mut self.sample {
            SampleState::Upload(upload) => upload.uploader.flush()?,
            SampleState::Stereo(stereo) => {
                log::info!("Compositor received {} eye images", stereo.compositor.submitted());
            }
            SampleState::Clear => {}
        }
        self.scheduler.drain()?;
        let stats = self.scheduler.stats();
        log::info!(
            "Frames: {} presented, {} stalled, {} resizes",
            stats.frames_presented,
            stats.stalls,
            stats.resizes
        );
        self.device.wait_idle()
    }
}
