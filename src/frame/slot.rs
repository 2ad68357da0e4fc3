// FrameSlot - per-backbuffer recording state
//
// Idle -> Recording -> Submitted -> (fence reached) -> Idle

use super::fence::Fence;
use super::hal::{Backend, RecordingContext};
use crate::error::FrameResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
}

impl SlotState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Submitted => "submitted",
        }
    }
}

pub struct FrameSlot<B: Backend> {
    index: usize,
    context: B::Context,
    /// Fence value bounding this slot's last submission; 0 = never submitted.
    wait_value: u64,
    /// Released while the surface is being resized.
    backbuffer: Option<B::Image>,
    state: SlotState,
    /// The context accepts commands; cleared once a close was attempted.
    open: bool,
}

impl<B: Backend> FrameSlot<B> {
    pub fn new(index: usize, context: B::Context, backbuffer: B::Image) -> Self {
        Self {
            index,
            context,
            wait_value: 0,
            backbuffer: Some(backbuffer),
            state: SlotState::Idle,
            open: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn wait_value(&self) -> u64 {
        self.wait_value
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn backbuffer(&self) -> Option<&B::Image> {
        self.backbuffer.as_ref()
    }

    pub fn context_mut(&mut self) -> &mut B::Context {
        assert_eq!(
            self.state,
            SlotState::Recording,
            "slot {} is not recording",
            self.index
        );
        &mut self.context
    }

    pub(crate) fn context(&self) -> &B::Context {
        &self.context
    }

    /// Wait out the previous submission, then reopen the context.
    ///
    /// Returns whether the CPU had to block.
    pub(crate) fn begin(&mut self, fence: &Fence<B>) -> FrameResult<bool> {
        assert_ne!(
            self.state,
            SlotState::Recording,
            "slot {} is already recording",
            self.index
        );

        let mut stalled = false;
        if self.wait_value != 0 {
            stalled = !fence.is_reached(self.wait_value)?;
            fence.wait_until(self.wait_value)?;
        }
        self.state = SlotState::Idle;

        // Only now is the allocator free of in-flight GPU references.
        self.context.reset()?;
        self.open = true;
        self.state = SlotState::Recording;
        Ok(stalled)
    }

    pub(crate) fn close(&mut self) -> FrameResult<()> {
        assert_eq!(
            self.state,
            SlotState::Recording,
            "slot {} submitted without begin_frame",
            self.index
        );
        assert!(self.open, "slot {} closed twice", self.index);
        // A failed close still ends recording; it is never retried.
        self.open = false;
        self.context.close()
    }

    pub(crate) fn mark_submitted(&mut self, fence_value: u64) {
        debug_assert!(fence_value > self.wait_value);
        self.wait_value = fence_value;
        self.state = SlotState::Submitted;
    }

    /// Drop out of `Recording` without submitting.
    ///
    /// Closes the context unless a failed submit already did; the last
    /// successful submission stays the one to wait for.
    pub(crate) fn abandon(&mut self) -> FrameResult<()> {
        if self.state == SlotState::Recording {
            if self.open {
                self.open = false;
                self.context.close()?;
            }
            self.state = if self.wait_value == 0 {
                SlotState::Idle
            } else {
                SlotState::Submitted
            };
        }
        Ok(())
    }

    /// Block until this slot's last submission is done.
    pub(crate) fn drain(&mut self, fence: &Fence<B>) -> FrameResult<()> {
        if self.wait_value != 0 {
            fence.wait_until_timeout(self.wait_value, None)?;
        }
        if self.state == SlotState::Submitted {
            self.state = SlotState::Idle;
        }
        Ok(())
    }

    pub(crate) fn release_backbuffer(&mut self) -> Option<B::Image> {
        self.backbuffer.take()
    }

    pub(crate) fn set_backbuffer(&mut self, image: B::Image) {
        self.backbuffer = Some(image);
    }
}
