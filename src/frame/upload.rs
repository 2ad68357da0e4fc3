// Upload resources - staging to GPU-resident copies gated on a fence
//
// Recording a copy is not the same as the copy being visible. A resource
// flips to Ready only from a fence continuation, so a draw can never bind
// data the GPU has not finished writing. That continuation also holds the
// resident and staging buffers, which therefore outlive their owner until
// the copy has executed.
//
// Two paths feed resident buffers:
// - UploadResource::stage + enqueue_upload, recorded into any frame
// - Uploader, a bounded queue drained one request per tick on its own
//   queue/fence pair, reusing a single staging buffer

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::barrier::{ResourceState, Transition};
use super::fence::Fence;
use super::hal::{
    Backend, BufferDesc, BufferUsage, RecordingContext, ResourceFactory, StagingBuffer,
    SubmissionQueue,
};
use super::scheduler::{CommandRecorder, Recorded};
use crate::error::{FrameError, FrameResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Uninitialized,
    Uploading,
    Ready,
}

impl UploadState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Uploading => "uploading",
            Self::Ready => "ready",
        }
    }
}

/// Pipeline-input state a resident buffer settles in after its copy.
pub fn usage_state(usage: BufferUsage) -> ResourceState {
    match usage {
        BufferUsage::Vertex => ResourceState::VertexBuffer,
        BufferUsage::Index => ResourceState::IndexBuffer,
        BufferUsage::Constant => ResourceState::ConstantBuffer,
    }
}

pub struct UploadResource<B: Backend> {
    desc: BufferDesc,
    resident: Arc<B::Buffer>,
    state: Arc<Mutex<UploadState>>,
    staging: Option<Arc<B::StagingBuffer>>,
    staged_len: u64,
}

impl<B: Backend> UploadResource<B> {
    /// Resident buffer plus a staging buffer of the same size.
    pub fn create(device: &B::Device, desc: BufferDesc) -> FrameResult<Self> {
        let mut resource = Self::create_streamed(device, desc)?;
        resource.staging = Some(Arc::new(device.create_staging(desc.size)?));
        Ok(resource)
    }

    /// Resident buffer only; data arrives through an `Uploader`.
    pub fn create_streamed(device: &B::Device, desc: BufferDesc) -> FrameResult<Self> {
        Ok(Self {
            desc,
            resident: Arc::new(device.create_buffer(&desc)?),
            state: Arc::new(Mutex::new(UploadState::Uninitialized)),
            staging: None,
            staged_len: 0,
        })
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    pub fn state(&self) -> UploadState {
        *self.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == UploadState::Ready
    }

    /// Copy `data` into the CPU-writable staging buffer.
    ///
    /// Does not change the state; only `enqueue_upload` does.
    pub fn stage(&mut self, data: &[u8]) -> FrameResult<()> {
        if self.state() == UploadState::Uploading {
            return Err(FrameError::UploadInFlight);
        }
        let len = data.len() as u64;
        if len > self.desc.size {
            return Err(FrameError::UploadTooLarge {
                requested: len,
                capacity: self.desc.size,
            });
        }
        let staging = self.staging.as_mut().ok_or(FrameError::StagingReleased)?;
        // Shared only while a completed copy's continuation has not run yet.
        let staging = Arc::get_mut(staging).ok_or(FrameError::UploadInFlight)?;
        staging.write(0, data)?;
        self.staged_len = len;
        Ok(())
    }

    /// Record the staging -> resident copy and its state transitions.
    ///
    /// The resource turns Ready once the submission carrying `recorder`
    /// is observed complete.
    pub fn enqueue_upload(&mut self, recorder: &mut CommandRecorder<'_, B>) -> FrameResult<()> {
        assert!(self.staged_len > 0, "enqueue_upload before stage");
        let staging = self.staging.as_ref().ok_or(FrameError::StagingReleased)?;
        record_upload::<B>(
            &self.resident,
            self.desc.usage,
            &self.state,
            staging,
            self.staged_len,
            recorder,
        )
    }

    /// The resident buffer, if its upload has completed.
    pub fn try_bind(&self) -> FrameResult<&B::Buffer> {
        match self.state() {
            UploadState::Ready => Ok(&self.resident),
            other => Err(FrameError::NotReady { state: other.name() }),
        }
    }

    /// The resident buffer for a draw. Binding before Ready is a caller defect.
    pub fn bind(&self) -> &B::Buffer {
        let state = self.state();
        assert_eq!(
            state,
            UploadState::Ready,
            "buffer bound before its upload completed"
        );
        &self.resident
    }

    /// Hand back the staging buffer once the resident copy is complete.
    pub fn reclaim_staging(&mut self) -> Option<B::StagingBuffer> {
        if !self.is_ready() {
            return None;
        }
        match Arc::try_unwrap(self.staging.take()?) {
            Ok(staging) => Some(staging),
            Err(shared) => {
                self.staging = Some(shared);
                None
            }
        }
    }

    fn stream_target(&self) -> StreamTarget<B> {
        StreamTarget {
            resident: Arc::clone(&self.resident),
            state: Arc::clone(&self.state),
            usage: self.desc.usage,
        }
    }
}

fn record_upload<B: Backend>(
    resident: &Arc<B::Buffer>,
    usage: BufferUsage,
    state: &Arc<Mutex<UploadState>>,
    staging: &Arc<B::StagingBuffer>,
    len: u64,
    recorder: &mut CommandRecorder<'_, B>,
) -> FrameResult<()> {
    let (previous, before) = {
        let mut current = state.lock();
        let previous = *current;
        let before = match previous {
            UploadState::Uploading => return Err(FrameError::UploadInFlight),
            UploadState::Uninitialized => ResourceState::Undefined,
            UploadState::Ready => usage_state(usage),
        };
        *current = UploadState::Uploading;
        (previous, before)
    };

    let settled = usage_state(usage);
    let ctx = recorder.context();
    ctx.buffer_barrier(resident, Transition::new(before, ResourceState::CopyDest));
    ctx.copy_buffer(staging.buffer(), resident, len);
    ctx.buffer_barrier(resident, Transition::new(ResourceState::CopyDest, settled));

    let done = Arc::clone(state);
    let buffers = (Arc::clone(resident), Arc::clone(staging));
    recorder.on_complete(move || {
        *done.lock() = UploadState::Ready;
        drop(buffers);
    });

    let undo = Arc::clone(state);
    recorder.on_abandon(move || *undo.lock() = previous);
    Ok(())
}

struct StreamTarget<B: Backend> {
    resident: Arc<B::Buffer>,
    state: Arc<Mutex<UploadState>>,
    usage: BufferUsage,
}

struct PendingUpload<B: Backend> {
    target: StreamTarget<B>,
    data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploaderConfig {
    /// Maximum number of queued requests.
    pub queue_capacity: usize,
    pub wait_timeout: Option<Duration>,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            wait_timeout: Some(Duration::from_secs(5)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTick {
    /// Nothing queued.
    Idle,
    /// The previous copy is still running on the GPU.
    Busy,
    Submitted { fence_value: u64 },
}

/// Background uploader with its own queue and fence timeline.
pub struct Uploader<B: Backend> {
    device: Arc<B::Device>,
    queue: B::Queue,
    fence: Fence<B>,
    context: B::Context,
    staging: Option<Arc<B::StagingBuffer>>,
    pending: VecDeque<PendingUpload<B>>,
    in_flight: Option<u64>,
    recorded: Recorded,
    config: UploaderConfig,
}

impl<B: Backend> Uploader<B> {
    pub fn new(
        device: Arc<B::Device>,
        queue: B::Queue,
        fence: B::Fence,
        config: UploaderConfig,
    ) -> FrameResult<Self> {
        let context = device.create_context()?;
        Ok(Self {
            device,
            queue,
            fence: Fence::new(fence, config.wait_timeout),
            context,
            staging: None,
            pending: VecDeque::with_capacity(config.queue_capacity),
            in_flight: None,
            recorded: Recorded::default(),
            config,
        })
    }

    /// Queue `data` for upload into `resource`.
    pub fn enqueue(&mut self, resource: &UploadResource<B>, data: Vec<u8>) -> FrameResult<()> {
        if self.pending.len() >= self.config.queue_capacity {
            return Err(FrameError::UploadQueueFull {
                capacity: self.config.queue_capacity,
            });
        }
        let len = data.len() as u64;
        if len > resource.desc.size {
            return Err(FrameError::UploadTooLarge {
                requested: len,
                capacity: resource.desc.size,
            });
        }
        self.pending.push_back(PendingUpload {
            target: resource.stream_target(),
            data,
        });
        Ok(())
    }

    /// Submit at most one queued request.
    ///
    /// A request whose submission fails goes back to the front of the queue
    /// with its resource state restored.
    pub fn tick(&mut self) -> FrameResult<UploadTick> {
        let completed = self.fence.poll()?;
        if let Some(value) = self.in_flight {
            if completed < value {
                return Ok(UploadTick::Busy);
            }
            self.in_flight = None;
        }

        let Some(next) = self.pending.pop_front() else {
            return Ok(UploadTick::Idle);
        };

        match self.submit_upload(&next) {
            Ok(value) => {
                self.in_flight = Some(value);
                log::trace!("Upload of {} bytes submitted at fence {}", next.data.len(), value);
                Ok(UploadTick::Submitted { fence_value: value })
            }
            Err(e) => {
                self.recorded.discard();
                log::warn!("Upload of {} bytes not submitted, requeued: {}", next.data.len(), e);
                self.pending.push_front(next);
                Err(e)
            }
        }
    }

    fn submit_upload(&mut self, next: &PendingUpload<B>) -> FrameResult<u64> {
        // No copy is in flight and its continuation has run, so a staging
        // buffer held only here can be rewritten. Anything else is replaced.
        let needed = self
            .pending
            .iter()
            .map(|p| p.data.len())
            .fold(next.data.len(), usize::max) as u64;
        let reusable = matches!(
            self.staging.as_mut().and_then(Arc::get_mut),
            Some(staging) if staging.capacity() >= needed
        );
        if !reusable {
            log::debug!("Allocating upload staging buffer of {} bytes", needed);
            self.staging = Some(Arc::new(self.device.create_staging(needed)?));
        }
        let staging = self.staging.as_mut().ok_or(FrameError::StagingReleased)?;
        Arc::get_mut(staging)
            .ok_or(FrameError::UploadInFlight)?
            .write(0, &next.data)?;

        self.context.reset()?;
        let recorded = {
            let mut recorder = self.recorded.recorder::<B>(&mut self.context);
            record_upload::<B>(
                &next.target.resident,
                next.target.usage,
                &next.target.state,
                staging,
                next.data.len() as u64,
                &mut recorder,
            )
        };
        self.context.close()?;
        recorded?;

        self.queue.execute(&[&self.context], None)?;
        let value = self.fence.signal(&self.queue)?;
        self.recorded.commit(&self.fence, value);
        Ok(value)
    }

    /// Submit and complete everything queued, blocking as needed.
    pub fn flush(&mut self) -> FrameResult<()> {
        loop {
            match self.tick()? {
                UploadTick::Idle => {
                    if let Some(value) = self.in_flight.take() {
                        self.fence.wait_until_timeout(value, None)?;
                    }
                    return Ok(());
                }
                UploadTick::Busy => {
                    if let Some(value) = self.in_flight {
                        self.fence.wait_until(value)?;
                    }
                }
                UploadTick::Submitted { .. } => {}
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }

    pub fn staging_capacity(&self) -> u64 {
        self.staging.as_ref().map_or(0, |s| s.capacity())
    }

    pub fn fence(&self) -> &Fence<B> {
        &self.fence
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::frame::mock::{Event, MockBackend, MockGpu};
    use crate::frame::scheduler::{GpuFrameScheduler, SchedulerConfig};
    use pretty_assertions::assert_eq;

    fn vertex_desc(size: u64) -> BufferDesc {
        BufferDesc {
            size,
            usage: BufferUsage::Vertex,
            stride: 16,
        }
    }

    fn scheduler(gpu: &MockGpu) -> GpuFrameScheduler<MockBackend> {
        let config = SchedulerConfig {
            vsync_interval: 0,
            wait_timeout: None,
        };
        GpuFrameScheduler::new(gpu.device(), gpu.queue(), gpu.surface(2), gpu.fence(), config).unwrap()
    }

    #[test]
    fn binding_in_the_same_tick_is_rejected() {
        let gpu = MockGpu::new();
        let mut sched = scheduler(&gpu);
        let mut mesh = UploadResource::<MockBackend>::create(&gpu.device(), vertex_desc(64)).unwrap();

        mesh.stage(&[7u8; 64]).unwrap();
        assert_eq!(mesh.state(), UploadState::Uninitialized);

        sched.begin_frame().unwrap();
        mesh.enqueue_upload(&mut sched.recorder()).unwrap();

        assert_eq!(mesh.state(), UploadState::Uploading);
        assert!(matches!(
            mesh.try_bind(),
            Err(FrameError::NotReady { state: "uploading" })
        ));
    }

    #[test]
    #[should_panic(expected = "before its upload completed")]
    fn bind_before_ready_is_a_defect() {
        let gpu = MockGpu::new();
        let mesh = UploadResource::<MockBackend>::create(&gpu.device(), vertex_desc(64)).unwrap();
        let _ = mesh.bind();
    }

    #[test]
    fn ready_only_after_the_frame_fence() {
        let gpu = MockGpu::new();
        let mut sched = scheduler(&gpu);
        let mut mesh = UploadResource::<MockBackend>::create(&gpu.device(), vertex_desc(64)).unwrap();
        mesh.stage(&[1u8; 64]).unwrap();

        sched.begin_frame().unwrap();
        mesh.enqueue_upload(&mut sched.recorder()).unwrap();
        let value = sched.submit().unwrap();
        sched.present().unwrap();

        sched.fence().poll().unwrap();
        assert_eq!(mesh.state(), UploadState::Uploading);

        gpu.complete_through(value);
        assert_eq!(mesh.state(), UploadState::Uploading);
        sched.fence().poll().unwrap();
        assert_eq!(mesh.state(), UploadState::Ready);
        assert!(mesh.try_bind().is_ok());

        sched.begin_frame().unwrap();
        gpu.take_events();
        sched.context_mut().bind_buffer(mesh.bind(), mesh.desc());
        assert_eq!(gpu.take_events(), vec![Event::Bind { buffer: mesh.resident.id }]);
    }

    #[test]
    fn copy_is_wrapped_in_transitions() {
        let gpu = MockGpu::new();
        let mut sched = scheduler(&gpu);
        let mut mesh = UploadResource::<MockBackend>::create(&gpu.device(), vertex_desc(64)).unwrap();
        mesh.stage(&[1u8; 48]).unwrap();

        sched.begin_frame().unwrap();
        gpu.take_events();
        mesh.enqueue_upload(&mut sched.recorder()).unwrap();

        let resident = mesh.resident.id;
        let staging = mesh.staging.as_ref().unwrap().buffer().id;
        assert_eq!(
            gpu.take_events(),
            vec![
                Event::BufferBarrier {
                    buffer: resident,
                    transition: Transition::new(ResourceState::Undefined, ResourceState::CopyDest),
                },
                Event::Copy { src: staging, dst: resident, bytes: 48 },
                Event::BufferBarrier {
                    buffer: resident,
                    transition: Transition::new(ResourceState::CopyDest, ResourceState::VertexBuffer),
                },
            ]
        );
    }

    #[test]
    fn staging_rejects_oversized_and_in_flight_data() {
        let gpu = MockGpu::new();
        let mut sched = scheduler(&gpu);
        let mut mesh = UploadResource::<MockBackend>::create(&gpu.device(), vertex_desc(32)).unwrap();

        assert!(matches!(
            mesh.stage(&[0u8; 33]),
            Err(FrameError::UploadTooLarge { requested: 33, capacity: 32 })
        ));

        mesh.stage(&[0u8; 32]).unwrap();
        sched.begin_frame().unwrap();
        mesh.enqueue_upload(&mut sched.recorder()).unwrap();
        assert!(matches!(mesh.stage(&[0u8; 8]), Err(FrameError::UploadInFlight)));
    }

    #[test]
    fn staging_is_reclaimed_only_when_ready() {
        let gpu = MockGpu::new();
        let mut sched = scheduler(&gpu);
        let mut mesh = UploadResource::<MockBackend>::create(&gpu.device(), vertex_desc(16)).unwrap();
        mesh.stage(&[9u8; 16]).unwrap();

        sched.begin_frame().unwrap();
        mesh.enqueue_upload(&mut sched.recorder()).unwrap();
        let value = sched.submit().unwrap();
        assert!(mesh.reclaim_staging().is_none());

        gpu.complete_through(value);
        sched.fence().poll().unwrap();
        let staging = mesh.reclaim_staging().unwrap();
        assert_eq!(staging.data, vec![9u8; 16]);
        assert!(matches!(mesh.stage(&[1]), Err(FrameError::StagingReleased)));
    }

    #[test]
    fn ready_never_precedes_its_fence_value() {
        let mut rng = StdRng::seed_from_u64(0xfeed);

        for _ in 0..20 {
            let gpu = MockGpu::new();
            gpu.set_complete_on_wait(true);
            let device = gpu.device();
            let mut sched = scheduler(&gpu);
            let mut uploads = Vec::new();

            for _ in 0..rng.gen_range(1..12) {
                let size = rng.gen_range(1..256);
                let mut mesh = UploadResource::<MockBackend>::create(&device, vertex_desc(size)).unwrap();
                mesh.stage(&vec![0xab; size as usize]).unwrap();

                sched.begin_frame().unwrap();
                mesh.enqueue_upload(&mut sched.recorder()).unwrap();
                let value = sched.submit().unwrap();
                sched.present().unwrap();
                uploads.push((mesh, value));

                if rng.gen_bool(0.5) {
                    let upto = rng.gen_range(0..=value);
                    gpu.complete_through(upto);
                }
                if rng.gen_bool(0.5) {
                    sched.fence().poll().unwrap();
                }

                let completed = gpu.completed(0);
                for (mesh, v) in &uploads {
                    if mesh.is_ready() {
                        assert!(completed >= *v, "ready at {} before fence {}", completed, v);
                    }
                }
            }

            let last = uploads.iter().map(|(_, v)| *v).max().unwrap();
            let mut order: Vec<u64> = (1..=last).collect();
            order.shuffle(&mut rng);
            for target in order {
                gpu.complete_through(target);
                sched.fence().poll().unwrap();
                let completed = gpu.completed(0);
                for (mesh, v) in &uploads {
                    assert_eq!(mesh.is_ready(), completed >= *v);
                }
            }
        }
    }

    #[test]
    fn uploader_queue_is_bounded() {
        let gpu = MockGpu::new();
        let device = gpu.device();
        let config = UploaderConfig {
            queue_capacity: 2,
            wait_timeout: None,
        };
        let mut uploader = Uploader::<MockBackend>::new(device.clone(), gpu.queue(), gpu.fence(), config).unwrap();
        let mesh = UploadResource::<MockBackend>::create_streamed(&device, vertex_desc(64)).unwrap();

        uploader.enqueue(&mesh, vec![0; 8]).unwrap();
        uploader.enqueue(&mesh, vec![0; 8]).unwrap();
        assert!(matches!(
            uploader.enqueue(&mesh, vec![0; 8]),
            Err(FrameError::UploadQueueFull { capacity: 2 })
        ));
    }

    #[test]
    fn uploader_submits_one_request_per_tick() {
        let gpu = MockGpu::new();
        let device = gpu.device();
        let _graphics = gpu.fence();
        let copy_fence = gpu.fence();
        let timeline = copy_fence.timeline();
        let mut uploader =
            Uploader::<MockBackend>::new(device.clone(), gpu.queue(), copy_fence, UploaderConfig::default()).unwrap();

        let a = UploadResource::<MockBackend>::create_streamed(&device, vertex_desc(64)).unwrap();
        let b = UploadResource::<MockBackend>::create_streamed(&device, vertex_desc(256)).unwrap();
        uploader.enqueue(&a, vec![1; 32]).unwrap();
        uploader.enqueue(&b, vec![2; 200]).unwrap();

        let first = uploader.tick().unwrap();
        assert_eq!(first, UploadTick::Submitted { fence_value: 1 });
        assert_eq!(a.state(), UploadState::Uploading);
        assert_eq!(b.state(), UploadState::Uninitialized);
        // Sized for the largest queued request up front.
        assert_eq!(uploader.staging_capacity(), 200);

        assert_eq!(uploader.tick().unwrap(), UploadTick::Busy);
        assert_eq!(gpu.completed(0), 0);

        gpu.complete(timeline, 1);
        assert_eq!(uploader.tick().unwrap(), UploadTick::Submitted { fence_value: 2 });
        assert!(a.is_ready());
        assert_eq!(uploader.staging_capacity(), 200);

        gpu.complete(timeline, 2);
        assert_eq!(uploader.tick().unwrap(), UploadTick::Idle);
        assert!(b.is_ready());
        assert!(uploader.is_idle());
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn uploader_flush_completes_everything() {
        let gpu = MockGpu::new();
        gpu.set_complete_on_wait(true);
        let device = gpu.device();
        let mut uploader =
            Uploader::<MockBackend>::new(device.clone(), gpu.queue(), gpu.fence(), UploaderConfig::default()).unwrap();

        let meshes: Vec<_> = (0..4)
            .map(|i| UploadResource::<MockBackend>::create_streamed(&device, vertex_desc(16 * (i + 1))).unwrap())
            .collect();
        for (i, mesh) in meshes.iter().enumerate() {
            uploader.enqueue(mesh, vec![i as u8; 16 * (i + 1)]).unwrap();
        }

        uploader.flush().unwrap();
        assert!(meshes.iter().all(|m| m.is_ready()));
        assert!(uploader.is_idle());
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn failed_upload_submit_is_requeued_not_marked_ready() {
        let gpu = MockGpu::new();
        let device = gpu.device();
        let copy_fence = gpu.fence();
        let timeline = copy_fence.timeline();
        let mut uploader =
            Uploader::<MockBackend>::new(device.clone(), gpu.queue(), copy_fence, UploaderConfig::default()).unwrap();

        let a = UploadResource::<MockBackend>::create_streamed(&device, vertex_desc(64)).unwrap();
        let b = UploadResource::<MockBackend>::create_streamed(&device, vertex_desc(64)).unwrap();
        uploader.enqueue(&a, vec![1; 16]).unwrap();
        uploader.enqueue(&b, vec![2; 16]).unwrap();

        gpu.fail_next_execute();
        assert!(matches!(
            uploader.tick(),
            Err(FrameError::Backend { call: "vkQueueSubmit", .. })
        ));
        assert_eq!(a.state(), UploadState::Uninitialized);
        assert_eq!(uploader.pending(), 2);
        assert!(uploader.recorded.completions.is_empty());

        // The retry of `a` is the only continuation on its fence value.
        gpu.take_events();
        assert_eq!(uploader.tick().unwrap(), UploadTick::Submitted { fence_value: 1 });
        assert_eq!(uploader.fence().pending_completions(), 1);
        let copy = Event::Copy {
            src: uploader.staging.as_ref().unwrap().buffer().id,
            dst: a.resident.id,
            bytes: 16,
        };
        assert!(gpu.take_events().contains(&copy));

        gpu.complete(timeline, 1);
        assert_eq!(uploader.tick().unwrap(), UploadTick::Submitted { fence_value: 2 });
        assert!(a.is_ready());
        assert_eq!(b.state(), UploadState::Uploading);

        gpu.complete(timeline, 2);
        assert_eq!(uploader.tick().unwrap(), UploadTick::Idle);
        assert!(b.is_ready());
    }

    #[test]
    fn failed_frame_submit_rolls_back_the_upload() {
        let gpu = MockGpu::new();
        let mut sched = scheduler(&gpu);
        let mut mesh = UploadResource::<MockBackend>::create(&gpu.device(), vertex_desc(64)).unwrap();
        mesh.stage(&[3u8; 64]).unwrap();

        sched.begin_frame().unwrap();
        mesh.enqueue_upload(&mut sched.recorder()).unwrap();
        gpu.fail_next_execute();
        assert!(sched.submit().is_err());
        assert_eq!(mesh.state(), UploadState::Uninitialized);
        assert_eq!(sched.fence().pending_completions(), 0);

        sched.begin_frame().unwrap();
        mesh.enqueue_upload(&mut sched.recorder()).unwrap();
        let value = sched.submit().unwrap();
        sched.present().unwrap();
        gpu.complete_through(value);
        sched.fence().poll().unwrap();
        assert!(mesh.is_ready());
    }

    #[test]
    fn abandoned_frame_restores_a_ready_resource() {
        let gpu = MockGpu::new();
        gpu.set_complete_on_wait(true);
        let mut sched = scheduler(&gpu);
        let mut mesh = UploadResource::<MockBackend>::create(&gpu.device(), vertex_desc(32)).unwrap();
        mesh.stage(&[1u8; 32]).unwrap();

        sched.begin_frame().unwrap();
        mesh.enqueue_upload(&mut sched.recorder()).unwrap();
        let value = sched.submit().unwrap();
        sched.present().unwrap();
        gpu.complete_through(value);
        sched.fence().poll().unwrap();

        mesh.stage(&[2u8; 32]).unwrap();
        sched.begin_frame().unwrap();
        mesh.enqueue_upload(&mut sched.recorder()).unwrap();
        assert_eq!(mesh.state(), UploadState::Uploading);
        sched.abandon_frame().unwrap();
        assert_eq!(mesh.state(), UploadState::Ready);
    }

    #[test]
    fn dropping_a_resource_mid_copy_keeps_its_buffers_alive() {
        let gpu = MockGpu::new();
        let mut sched = scheduler(&gpu);
        let mut mesh = UploadResource::<MockBackend>::create(&gpu.device(), vertex_desc(64)).unwrap();
        mesh.stage(&[5u8; 64]).unwrap();

        sched.begin_frame().unwrap();
        mesh.enqueue_upload(&mut sched.recorder()).unwrap();
        let value = sched.submit().unwrap();
        sched.present().unwrap();

        let resident = Arc::downgrade(&mesh.resident);
        let staging = Arc::downgrade(mesh.staging.as_ref().unwrap());
        drop(mesh);
        sched.fence().poll().unwrap();
        assert!(resident.upgrade().is_some());
        assert!(staging.upgrade().is_some());

        gpu.complete_through(value);
        sched.fence().poll().unwrap();
        assert!(resident.upgrade().is_none());
        assert!(staging.upgrade().is_none());
    }

    #[test]
    fn uploader_keeps_buffers_alive_until_the_copy_completes() {
        let gpu = MockGpu::new();
        let device = gpu.device();
        let copy_fence = gpu.fence();
        let timeline = copy_fence.timeline();
        let mut uploader =
            Uploader::<MockBackend>::new(device.clone(), gpu.queue(), copy_fence, UploaderConfig::default()).unwrap();

        let mesh = UploadResource::<MockBackend>::create_streamed(&device, vertex_desc(64)).unwrap();
        uploader.enqueue(&mesh, vec![1; 64]).unwrap();
        assert_eq!(uploader.tick().unwrap(), UploadTick::Submitted { fence_value: 1 });

        let resident = Arc::downgrade(&mesh.resident);
        let staging = Arc::downgrade(uploader.staging.as_ref().unwrap());
        drop(mesh);
        assert!(resident.upgrade().is_some());

        // A larger request replaces the staging buffer once the copy is done.
        let big = UploadResource::<MockBackend>::create_streamed(&device, vertex_desc(256)).unwrap();
        uploader.enqueue(&big, vec![2; 256]).unwrap();
        assert_eq!(uploader.tick().unwrap(), UploadTick::Busy);
        assert!(resident.upgrade().is_some());
        assert!(staging.upgrade().is_some());

        gpu.complete(timeline, 1);
        assert_eq!(uploader.tick().unwrap(), UploadTick::Submitted { fence_value: 2 });
        assert!(resident.upgrade().is_none());
        assert!(staging.upgrade().is_none());
        assert_eq!(uploader.staging_capacity(), 256);
    }
}
