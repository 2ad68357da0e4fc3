// Instrumented fake backend for protocol tests
//
// The "GPU" here never runs anything: tests decide when each fence
// timeline advances. Every call is appended to an event log so tests can
// assert on ordering, and context resets are checked against the fence
// value of the last submission that used the context.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::barrier::Transition;
use super::hal::{
    Backend, BufferDesc, Extent, FencePrimitive, PresentStatus, PresentationSurface, Rect,
    RecordingContext, ResourceFactory, StagingBuffer, SubmissionQueue,
};
use crate::error::{FrameError, FrameResult};

pub struct MockBackend;

impl Backend for MockBackend {
    type Fence = MockFence;
    type Queue = MockQueue;
    type Context = MockContext;
    type Surface = MockSurface;
    type Device = MockDevice;
    type Image = MockImage;
    type Buffer = MockBuffer;
    type StagingBuffer = MockStaging;
    type FrameSync = ();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Reset { context: usize },
    Close { context: usize },
    Execute { queue: usize, contexts: Vec<usize> },
    Signal { timeline: usize, value: u64 },
    Wait { timeline: usize, value: u64 },
    Copy { src: usize, dst: usize, bytes: u64 },
    BufferBarrier { buffer: usize, transition: Transition },
    ImageBarrier { image: MockImage, transition: Transition },
    Clear { image: MockImage },
    Blit { src: MockImage, dst: MockImage, dst_rect: Rect },
    Bind { buffer: usize },
    Present { index: usize },
    Resize { width: u32, height: u32 },
}

#[derive(Default)]
struct GpuState {
    completed: Vec<u64>,
    signaled: Vec<u64>,
    lost: bool,
    /// The next `execute` fails with a backend error.
    fail_execute: bool,
    complete_on_wait: bool,
    events: Vec<Event>,
    blocking_waits: usize,
    next_id: usize,
    /// Contexts executed since the last signal on a timeline.
    unfenced: Vec<usize>,
    context_fence: HashMap<usize, (usize, u64)>,
    violations: Vec<String>,
}

struct Shared {
    state: Mutex<GpuState>,
    progress: Condvar,
}

/// Handle to the simulated GPU; clones share state.
#[derive(Clone)]
pub struct MockGpu {
    shared: Arc<Shared>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(GpuState::default()),
                progress: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.shared.state.lock()
    }

    fn next_id(&self) -> usize {
        let mut state = self.lock();
        state.next_id += 1;
        state.next_id
    }

    /// A new independent fence timeline. The first one created is timeline 0.
    pub fn fence(&self) -> MockFence {
        let mut state = self.lock();
        state.completed.push(0);
        state.signaled.push(0);
        MockFence {
            gpu: self.clone(),
            timeline: state.completed.len() - 1,
        }
    }

    pub fn queue(&self) -> MockQueue {
        MockQueue {
            gpu: self.clone(),
            id: self.next_id(),
        }
    }

    pub fn device(&self) -> Arc<MockDevice> {
        Arc::new(MockDevice { gpu: self.clone() })
    }

    pub fn surface(&self, image_count: usize) -> MockSurface {
        MockSurface {
            gpu: self.clone(),
            image_count,
            generation: 0,
            current: 0,
            script: VecDeque::new(),
            extent: Extent::new(640, 480),
            next_status: PresentStatus::Presented,
            submitted: Vec::new(),
        }
    }

    /// Complete timeline 0 through `value`.
    pub fn complete_through(&self, value: u64) {
        self.complete(0, value);
    }

    pub fn complete(&self, timeline: usize, value: u64) {
        let mut state = self.lock();
        let signaled = state.signaled[timeline];
        let target = value.min(signaled);
        if target > state.completed[timeline] {
            state.completed[timeline] = target;
        }
        drop(state);
        self.shared.progress.notify_all();
    }

    /// Complete everything signaled so far on every timeline.
    pub fn finish_all(&self) {
        let mut state = self.lock();
        state.completed = state.signaled.clone();
        drop(state);
        self.shared.progress.notify_all();
    }

    pub fn completed(&self, timeline: usize) -> u64 {
        self.lock().completed[timeline]
    }

    pub fn lose_device(&self) {
        self.lock().lost = true;
        self.shared.progress.notify_all();
    }

    /// Make the next queue submission fail without touching the GPU.
    pub fn fail_next_execute(&self) {
        self.lock().fail_execute = true;
    }

    /// When set, a blocking wait completes its timeline up to exactly the
    /// waited value, as if the GPU finished that work during the wait.
    pub fn set_complete_on_wait(&self, enabled: bool) {
        self.lock().complete_on_wait = enabled;
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut self.lock().events)
    }

    pub fn blocking_waits(&self) -> usize {
        self.lock().blocking_waits
    }

    pub fn waits(&self) -> Vec<(usize, u64)> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Wait { timeline, value } => Some((*timeline, *value)),
                _ => None,
            })
            .collect()
    }

    /// Context resets that happened while their last submission was in flight.
    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }
}

pub struct MockFence {
    gpu: MockGpu,
    timeline: usize,
}

impl MockFence {
    pub fn timeline(&self) -> usize {
        self.timeline
    }
}

impl FencePrimitive for MockFence {
    fn completed_value(&self) -> FrameResult<u64> {
        let state = self.gpu.lock();
        if state.lost {
            return Err(FrameError::DeviceLost);
        }
        Ok(state.completed[self.timeline])
    }

    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> FrameResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.gpu.lock();
        state.blocking_waits += 1;
        state.events.push(Event::Wait {
            timeline: self.timeline,
            value,
        });
        if state.complete_on_wait && state.signaled[self.timeline] >= value {
            state.completed[self.timeline] = state.completed[self.timeline].max(value);
        }

        loop {
            if state.lost {
                return Err(FrameError::DeviceLost);
            }
            if state.completed[self.timeline] >= value {
                return Ok(true);
            }
            match deadline {
                Some(deadline) => {
                    if self.gpu.shared.progress.wait_until(&mut state, deadline).timed_out() {
                        return Ok(state.completed[self.timeline] >= value);
                    }
                }
                None => self.gpu.shared.progress.wait(&mut state),
            }
        }
    }
}

pub struct MockQueue {
    gpu: MockGpu,
    id: usize,
}

impl SubmissionQueue<MockBackend> for MockQueue {
    fn execute(&self, contexts: &[&MockContext], _frame_sync: Option<&()>) -> FrameResult<()> {
        let mut state = self.gpu.lock();
        if state.lost {
            return Err(FrameError::DeviceLost);
        }
        if std::mem::take(&mut state.fail_execute) {
            return Err(FrameError::backend("vkQueueSubmit", "ERROR_OUT_OF_DEVICE_MEMORY"));
        }
        let ids: Vec<usize> = contexts.iter().map(|c| c.id).collect();
        for ctx in contexts {
            assert!(!ctx.open, "executing context {} that was never closed", ctx.id);
        }
        state.unfenced.extend(ids.iter().copied());
        state.events.push(Event::Execute {
            queue: self.id,
            contexts: ids,
        });
        Ok(())
    }

    fn signal(&self, fence: &MockFence, value: u64) -> FrameResult<()> {
        let mut state = self.gpu.lock();
        if state.lost {
            return Err(FrameError::DeviceLost);
        }
        state.signaled[fence.timeline] = value;
        for ctx in std::mem::take(&mut state.unfenced) {
            state.context_fence.insert(ctx, (fence.timeline, value));
        }
        state.events.push(Event::Signal {
            timeline: fence.timeline,
            value,
        });
        Ok(())
    }
}

pub struct MockContext {
    gpu: MockGpu,
    id: usize,
    open: bool,
}

impl MockContext {
    pub fn id(&self) -> usize {
        self.id
    }

    fn record(&self, event: Event) {
        assert!(self.open, "recording into closed context {}", self.id);
        self.gpu.lock().events.push(event);
    }
}

impl RecordingContext<MockBackend> for MockContext {
    fn reset(&mut self) -> FrameResult<()> {
        let mut state = self.gpu.lock();
        if let Some(&(timeline, value)) = state.context_fence.get(&self.id) {
            let completed = state.completed[timeline];
            if completed < value {
                let msg = format!(
                    "context {} reset at completed {} before its fence value {}",
                    self.id, completed, value
                );
                state.violations.push(msg);
            }
        }
        state.events.push(Event::Reset { context: self.id });
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> FrameResult<()> {
        self.gpu.lock().events.push(Event::Close { context: self.id });
        self.open = false;
        Ok(())
    }

    fn copy_buffer(&mut self, src: &MockBuffer, dst: &MockBuffer, bytes: u64) {
        self.record(Event::Copy {
            src: src.id,
            dst: dst.id,
            bytes,
        });
    }

    fn buffer_barrier(&mut self, buffer: &MockBuffer, transition: Transition) {
        self.record(Event::BufferBarrier {
            buffer: buffer.id,
            transition,
        });
    }

    fn image_barrier(&mut self, image: &MockImage, transition: Transition) {
        self.record(Event::ImageBarrier {
            image: *image,
            transition,
        });
    }

    fn clear_image(&mut self, image: &MockImage, _rgba: [f32; 4]) {
        self.record(Event::Clear { image: *image });
    }

    fn blit_image(&mut self, src: &MockImage, _src_extent: Extent, dst: &MockImage, dst_rect: Rect) {
        self.record(Event::Blit {
            src: *src,
            dst: *dst,
            dst_rect,
        });
    }

    fn bind_buffer(&mut self, buffer: &MockBuffer, _desc: &BufferDesc) {
        self.record(Event::Bind { buffer: buffer.id });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MockImage {
    pub id: usize,
    pub generation: u32,
}

#[derive(Debug)]
pub struct MockBuffer {
    pub id: usize,
    pub size: u64,
}

pub struct MockStaging {
    buffer: MockBuffer,
    pub data: Vec<u8>,
}

impl StagingBuffer<MockBackend> for MockStaging {
    fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> FrameResult<()> {
        let start = offset as usize;
        let end = start + data.len();
        if end > self.data.len() {
            return Err(FrameError::UploadTooLarge {
                requested: end as u64,
                capacity: self.data.len() as u64,
            });
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn buffer(&self) -> &MockBuffer {
        &self.buffer
    }
}

pub struct MockDevice {
    gpu: MockGpu,
}

impl ResourceFactory<MockBackend> for MockDevice {
    fn create_context(&self) -> FrameResult<MockContext> {
        Ok(MockContext {
            gpu: self.gpu.clone(),
            id: self.gpu.next_id(),
            open: false,
        })
    }

    fn create_staging(&self, bytes: u64) -> FrameResult<MockStaging> {
        Ok(MockStaging {
            buffer: MockBuffer {
                id: self.gpu.next_id(),
                size: bytes,
            },
            data: vec![0; bytes as usize],
        })
    }

    fn create_buffer(&self, desc: &BufferDesc) -> FrameResult<MockBuffer> {
        Ok(MockBuffer {
            id: self.gpu.next_id(),
            size: desc.size,
        })
    }

    fn create_render_target(&self, _extent: Extent) -> FrameResult<MockImage> {
        // Off-screen targets never collide with surface images.
        Ok(MockImage {
            id: self.gpu.next_id(),
            generation: u32::MAX,
        })
    }
}

pub struct MockSurface {
    gpu: MockGpu,
    image_count: usize,
    generation: u32,
    current: usize,
    /// Upcoming image indices; round-robin when empty.
    script: VecDeque<usize>,
    extent: Extent,
    next_status: PresentStatus,
    pub submitted: Vec<u64>,
}

impl MockSurface {
    /// Hand out images in this order after the next presents.
    pub fn script(&mut self, order: impl IntoIterator<Item = usize>) {
        self.script.extend(order);
    }

    pub fn set_next_status(&mut self, status: PresentStatus) {
        self.next_status = status;
    }

    pub fn set_image_count(&mut self, count: usize) {
        self.image_count = count;
    }
}

impl PresentationSurface<MockBackend> for MockSurface {
    fn current_image_index(&mut self) -> FrameResult<usize> {
        Ok(self.current)
    }

    fn image_count(&self) -> usize {
        self.image_count
    }

    fn image(&self, index: usize) -> MockImage {
        assert!(index < self.image_count);
        MockImage {
            id: index,
            generation: self.generation,
        }
    }

    fn extent(&self) -> Extent {
        self.extent
    }

    fn frame_sync(&self) -> Option<()> {
        None
    }

    fn resize(&mut self, width: u32, height: u32) -> FrameResult<()> {
        let mut state = self.gpu.lock();
        // Releasing the old images is only sound once the frame timeline is idle.
        let (done, signaled) = (state.completed[0], state.signaled[0]);
        if done < signaled {
            let msg = format!("surface resized at completed {} with {} in flight", done, signaled);
            state.violations.push(msg);
        }
        state.events.push(Event::Resize { width, height });
        drop(state);

        self.extent = Extent::new(width, height);
        self.generation += 1;
        self.current = 0;
        self.script.clear();
        Ok(())
    }

    fn present(&mut self, _queue: &MockQueue, _vsync_interval: u32) -> FrameResult<PresentStatus> {
        self.gpu.lock().events.push(Event::Present { index: self.current });
        self.current = self
            .script
            .pop_front()
            .unwrap_or((self.current + 1) % self.image_count);
        Ok(std::mem::replace(&mut self.next_status, PresentStatus::Presented))
    }

    fn submitted(&mut self, fence_value: u64) {
        self.submitted.push(fence_value);
    }
}
