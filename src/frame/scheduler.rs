// GpuFrameScheduler - frame-slot rotation over a single fence
//
// FRAME FLOW:
// ┌──────────────────────────────────────────────────────────────────────┐
// │  begin_frame ─> (caller records) ─> submit ─> present ─> begin_frame │
// │                                                                      │
// │  (wait only on    (commands into     (execute,   (no wait; next      │
// │   the reused       the slot's         signal,     slot comes from    │
// │   slot's value)    context)           remember)   the surface)       │
// └──────────────────────────────────────────────────────────────────────┘
//
// The wait in begin_frame is the only steady-state stall, so the CPU can
// run at most N-1 frames ahead of the GPU with N slots.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::fence::{Completion, Fence};
use super::hal::{Backend, Extent, PresentStatus, PresentationSurface, ResourceFactory, SubmissionQueue};
use super::slot::FrameSlot;
use crate::error::{FrameError, FrameResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Passed straight to the surface on present (0 = no vsync).
    pub vsync_interval: u32,
    /// Upper bound on the per-frame slot wait; `None` waits forever.
    pub wait_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            vsync_interval: 1,
            wait_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Shared shutdown request, checked at the start of every frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What the caller renders into this frame.
pub struct FrameInfo<B: Backend> {
    pub slot: usize,
    /// 1 for the first frame of the session.
    pub frame_number: u64,
    pub backbuffer: B::Image,
    pub extent: Extent,
}

impl<B: Backend> fmt::Debug for FrameInfo<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameInfo")
            .field("slot", &self.slot)
            .field("frame_number", &self.frame_number)
            .field("backbuffer", &self.backbuffer)
            .field("extent", &self.extent)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_begun: u64,
    /// Frames whose begin_frame had to block on the GPU.
    pub stalls: u64,
    pub frames_submitted: u64,
    pub frames_presented: u64,
    pub resizes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Recording,
    Submitted,
}

/// A recording context plus the continuations that belong to its submission.
pub struct CommandRecorder<'a, B: Backend> {
    context: &'a mut B::Context,
    completions: &'a mut Vec<Completion>,
    rollbacks: &'a mut Vec<Completion>,
}

impl<'a, B: Backend> CommandRecorder<'a, B> {
    pub fn new(
        context: &'a mut B::Context,
        completions: &'a mut Vec<Completion>,
        rollbacks: &'a mut Vec<Completion>,
    ) -> Self {
        Self {
            context,
            completions,
            rollbacks,
        }
    }

    pub fn context(&mut self) -> &mut B::Context {
        self.context
    }

    /// Run `f` once the submission containing these commands has completed on the GPU.
    pub fn on_complete(&mut self, f: impl FnOnce() + Send + 'static) {
        self.completions.push(Box::new(f));
    }

    /// Run `f` if these commands are thrown away instead of reaching the GPU.
    pub fn on_abandon(&mut self, f: impl FnOnce() + Send + 'static) {
        self.rollbacks.push(Box::new(f));
    }
}

/// Continuations collected while recording one submission.
#[derive(Default)]
pub(crate) struct Recorded {
    pub(crate) completions: Vec<Completion>,
    rollbacks: Vec<Completion>,
}

impl Recorded {
    pub(crate) fn recorder<'a, B: Backend>(&'a mut self, context: &'a mut B::Context) -> CommandRecorder<'a, B> {
        CommandRecorder::new(context, &mut self.completions, &mut self.rollbacks)
    }

    /// The submission reached the queue at `value`.
    pub(crate) fn commit<B: Backend>(&mut self, fence: &Fence<B>, value: u64) {
        self.rollbacks.clear();
        for completion in self.completions.drain(..) {
            fence.on_reached(value, completion);
        }
    }

    /// The commands never reached the GPU; undo what recording promised.
    pub(crate) fn discard(&mut self) {
        self.completions.clear();
        for rollback in self.rollbacks.drain(..) {
            rollback();
        }
    }
}

pub struct GpuFrameScheduler<B: Backend> {
    device: Arc<B::Device>,
    queue: B::Queue,
    surface: B::Surface,
    fence: Fence<B>,
    slots: Vec<FrameSlot<B>>,
    current: usize,
    phase: Phase,
    recorded: Recorded,
    cancel: CancelToken,
    config: SchedulerConfig,
    frame_number: u64,
    stats: FrameStats,
}

impl<B: Backend> GpuFrameScheduler<B> {
    /// Build one slot per surface image.
    pub fn new(
        device: Arc<B::Device>,
        queue: B::Queue,
        mut surface: B::Surface,
        fence: B::Fence,
        config: SchedulerConfig,
    ) -> FrameResult<Self> {
        let count = surface.image_count();
        assert!(count > 0, "presentation surface has no images");

        let slots = (0..count)
            .map(|i| Ok(FrameSlot::new(i, device.create_context()?, surface.image(i))))
            .collect::<FrameResult<Vec<_>>>()?;
        let current = surface.current_image_index()?;

        log::info!(
            "Frame scheduler: {} slots, vsync interval {}, wait timeout {:?}",
            count,
            config.vsync_interval,
            config.wait_timeout
        );

        Ok(Self {
            device,
            queue,
            surface,
            fence: Fence::new(fence, config.wait_timeout),
            slots,
            current,
            phase: Phase::Idle,
            recorded: Recorded::default(),
            cancel: CancelToken::new(),
            config,
            frame_number: 0,
            stats: FrameStats::default(),
        })
    }

    /// Wait for the slot the surface hands out next and open it for recording.
    pub fn begin_frame(&mut self) -> FrameResult<FrameInfo<B>> {
        if self.cancel.is_cancelled() {
            return Err(FrameError::Cancelled);
        }
        assert_eq!(self.phase, Phase::Idle, "begin_frame called inside a frame");

        self.fence.poll()?;
        self.current = self.surface.current_image_index()?;
        assert!(
            self.current < self.slots.len(),
            "surface image {} has no slot",
            self.current
        );

        let slot = &mut self.slots[self.current];
        let stalled = slot.begin(&self.fence)?;
        let backbuffer = slot
            .backbuffer()
            .cloned()
            .unwrap_or_else(|| self.surface.image(self.current));

        self.phase = Phase::Recording;
        self.frame_number += 1;
        self.stats.frames_begun += 1;
        if stalled {
            self.stats.stalls += 1;
        }

        Ok(FrameInfo {
            slot: self.current,
            frame_number: self.frame_number,
            backbuffer,
            extent: self.surface.extent(),
        })
    }

    pub fn recorder(&mut self) -> CommandRecorder<'_, B> {
        assert_eq!(self.phase, Phase::Recording, "no frame is being recorded");
        self.recorded.recorder::<B>(self.slots[self.current].context_mut())
    }

    pub fn context_mut(&mut self) -> &mut B::Context {
        assert_eq!(self.phase, Phase::Recording, "no frame is being recorded");
        self.slots[self.current].context_mut()
    }

    /// Close and execute the current slot, then signal the fence.
    ///
    /// Returns the fence value that bounds the submitted work. On failure
    /// the frame is dropped as if abandoned and the next `begin_frame` may
    /// follow.
    pub fn submit(&mut self) -> FrameResult<u64> {
        assert_eq!(self.phase, Phase::Recording, "submit without begin_frame");

        let value = match self.execute_current() {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Frame {} was not submitted: {}", self.frame_number, e);
                self.recorded.discard();
                self.phase = Phase::Idle;
                self.slots[self.current].abandon()?;
                return Err(e);
            }
        };

        self.slots[self.current].mark_submitted(value);
        self.recorded.commit(&self.fence, value);
        self.surface.submitted(value);

        self.phase = Phase::Submitted;
        self.stats.frames_submitted += 1;
        log::trace!("Frame {} submitted on slot {} at fence {}", self.frame_number, self.current, value);
        Ok(value)
    }

    fn execute_current(&mut self) -> FrameResult<u64> {
        let slot = &mut self.slots[self.current];
        slot.close()?;
        let sync = self.surface.frame_sync();
        self.queue.execute(&[slot.context()], sync.as_ref())?;

        // Captured after execute so it covers the work just queued.
        self.fence.signal(&self.queue)
    }

    /// Hand the rendered image to the presentation engine without waiting.
    pub fn present(&mut self) -> FrameResult<PresentStatus> {
        assert_eq!(self.phase, Phase::Submitted, "present without submit");

        let mut status = self.surface.present(&self.queue, self.config.vsync_interval)?;
        self.phase = Phase::Idle;
        self.stats.frames_presented += 1;

        if status != PresentStatus::OutOfDate {
            match self.surface.current_image_index() {
                Ok(index) => self.current = index,
                Err(FrameError::SurfaceOutOfDate) => status = PresentStatus::OutOfDate,
                Err(e) => return Err(e),
            }
        }
        Ok(status)
    }

    /// Leave the current frame without submitting anything.
    pub fn abandon_frame(&mut self) -> FrameResult<()> {
        if self.phase == Phase::Recording {
            self.slots[self.current].abandon()?;
            self.recorded.discard();
            self.phase = Phase::Idle;
        }
        Ok(())
    }

    /// Wait until no slot has GPU work in flight.
    pub fn drain(&mut self) -> FrameResult<()> {
        log::info!("Draining {} frame slots", self.slots.len());
        for slot in &mut self.slots {
            slot.drain(&self.fence)?;
        }
        self.fence.poll()?;
        Ok(())
    }

    /// Drain, release every backbuffer, resize the surface, then rebuild the slots.
    pub fn resize(&mut self, width: u32, height: u32) -> FrameResult<()> {
        log::info!("Resizing frame scheduler to {}x{}", width, height);
        self.abandon_frame()?;
        if self.phase == Phase::Submitted {
            self.phase = Phase::Idle;
        }
        self.drain()?;

        for slot in &mut self.slots {
            slot.release_backbuffer();
        }
        self.surface.resize(width, height)?;

        let count = self.surface.image_count();
        self.slots.truncate(count);
        for i in self.slots.len()..count {
            self.slots
                .push(FrameSlot::new(i, self.device.create_context()?, self.surface.image(i)));
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.set_backbuffer(self.surface.image(i));
        }

        self.current = self.surface.current_image_index()?;
        self.stats.resizes += 1;
        Ok(())
    }

    /// Submissions the GPU has not finished yet.
    pub fn frames_in_flight(&self) -> FrameResult<usize> {
        let completed = self.fence.completed_value()?;
        Ok(self
            .slots
            .iter()
            .filter(|slot| slot.wait_value() > completed)
            .count())
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn current_slot_index(&self) -> usize {
        self.current
    }

    pub fn slots(&self) -> &[FrameSlot<B>] {
        &self.slots
    }

    pub fn fence(&self) -> &Fence<B> {
        &self.fence
    }

    pub fn queue(&self) -> &B::Queue {
        &self.queue
    }

    pub fn surface(&self) -> &B::Surface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut B::Surface {
        &mut self.surface
    }

    pub fn device(&self) -> &Arc<B::Device> {
        &self.device
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}
