// Collaborator interfaces consumed by the frame protocol
//
// A backend supplies the GPU primitives; the scheduler, fence and
// uploader only ever talk to these traits.

use std::fmt;
use std::time::Duration;

use super::barrier::Transition;
use crate::error::FrameResult;

/// Bundle of handle types a GPU backend provides.
pub trait Backend: Sized + 'static {
    type Fence: FencePrimitive;
    type Queue: SubmissionQueue<Self>;
    type Context: RecordingContext<Self>;
    type Surface: PresentationSurface<Self>;
    type Device: ResourceFactory<Self>;
    /// Image handle (backbuffer or off-screen target).
    type Image: Clone + fmt::Debug;
    /// Shared with fence continuations until the copies using it complete.
    type Buffer: fmt::Debug + Send + Sync;
    type StagingBuffer: StagingBuffer<Self> + Send + Sync;
    /// Binary wait/signal pair linking acquire, submit and present.
    type FrameSync: Clone + fmt::Debug;
}

/// CPU-observable monotonic counter advanced by the GPU.
pub trait FencePrimitive {
    fn completed_value(&self) -> FrameResult<u64>;

    /// Block until the counter reaches `value`.
    ///
    /// Returns `Ok(false)` if `timeout` expired first. `None` waits forever.
    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> FrameResult<bool>;
}

pub trait SubmissionQueue<B: Backend> {
    /// Enqueue closed recording contexts for execution.
    ///
    /// `frame_sync` ties the submission to the surface image it renders into.
    fn execute(&self, contexts: &[&B::Context], frame_sync: Option<&B::FrameSync>) -> FrameResult<()>;

    /// Enqueue a "reach this value" marker for `fence`.
    fn signal(&self, fence: &B::Fence, value: u64) -> FrameResult<()>;
}

/// Command allocator + list pair.
pub trait RecordingContext<B: Backend> {
    /// Reset the allocator and reopen the list for recording.
    fn reset(&mut self) -> FrameResult<()>;
    fn close(&mut self) -> FrameResult<()>;

    fn copy_buffer(&mut self, src: &B::Buffer, dst: &B::Buffer, bytes: u64);
    fn buffer_barrier(&mut self, buffer: &B::Buffer, transition: Transition);
    fn image_barrier(&mut self, image: &B::Image, transition: Transition);
    fn clear_image(&mut self, image: &B::Image, rgba: [f32; 4]);
    /// Scaled copy of the whole of `src` into `dst_rect` of `dst`.
    fn blit_image(&mut self, src: &B::Image, src_extent: Extent, dst: &B::Image, dst_rect: Rect);
    /// Bind a vertex or index buffer as pipeline input.
    fn bind_buffer(&mut self, buffer: &B::Buffer, desc: &BufferDesc);
}

pub trait PresentationSurface<B: Backend> {
    /// Index of the image the presentation engine hands out next.
    fn current_image_index(&mut self) -> FrameResult<usize>;
    fn image_count(&self) -> usize;
    fn image(&self, index: usize) -> B::Image;
    fn extent(&self) -> Extent;
    /// Sync pair for the current image, if the backend needs one.
    fn frame_sync(&self) -> Option<B::FrameSync>;
    fn resize(&mut self, width: u32, height: u32) -> FrameResult<()>;
    fn present(&mut self, queue: &B::Queue, vsync_interval: u32) -> FrameResult<PresentStatus>;

    /// Called after every frame submission with the fence value that bounds it.
    fn submitted(&mut self, _fence_value: u64) {}
}

/// Host-visible buffer the CPU writes before a GPU copy.
pub trait StagingBuffer<B: Backend> {
    fn capacity(&self) -> u64;
    fn write(&mut self, offset: u64, data: &[u8]) -> FrameResult<()>;
    fn buffer(&self) -> &B::Buffer;
}

pub trait ResourceFactory<B: Backend> {
    fn create_context(&self) -> FrameResult<B::Context>;
    fn create_staging(&self, bytes: u64) -> FrameResult<B::StagingBuffer>;
    fn create_buffer(&self, desc: &BufferDesc) -> FrameResult<B::Buffer>;
    /// Colour target usable as render target, blit source and shader input.
    fn create_render_target(&self, extent: Extent) -> FrameResult<B::Image>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    /// Element stride in bytes (vertex size, index size, or 0).
    pub stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// Still presentable, but the surface should be recreated.
    Suboptimal,
    OutOfDate,
}

impl PresentStatus {
    pub fn needs_resize(self) -> bool {
        !matches!(self, Self::Presented)
    }
}
