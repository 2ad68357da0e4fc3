// Fence - monotonic GPU progress counter
//
// Wraps a backend counter with the last value we asked the queue to
// signal, a bounded wait, and a list of continuations that run only
// once the GPU is observed past their value.

use std::time::Duration;

use parking_lot::Mutex;

use super::hal::{Backend, FencePrimitive, SubmissionQueue};
use crate::error::{FrameError, FrameResult};

/// Continuation run once its fence value has been observed complete.
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

pub struct Fence<B: Backend> {
    raw: B::Fence,
    last_signaled: Mutex<u64>,
    /// `None` waits forever.
    timeout: Option<Duration>,
    pending: Mutex<Vec<(u64, Completion)>>,
}

impl<B: Backend> Fence<B> {
    pub fn new(raw: B::Fence, timeout: Option<Duration>) -> Self {
        Self {
            raw,
            last_signaled: Mutex::new(0),
            timeout,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn raw(&self) -> &B::Fence {
        &self.raw
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Ask `queue` to reach a fresh value once everything submitted so far is done.
    ///
    /// Returns the new value; values strictly increase across calls.
    pub fn signal(&self, queue: &B::Queue) -> FrameResult<u64> {
        let mut last = self.last_signaled.lock();
        let value = *last + 1;
        queue.signal(&self.raw, value)?;
        *last = value;
        Ok(value)
    }

    pub fn last_signaled(&self) -> u64 {
        *self.last_signaled.lock()
    }

    /// Non-blocking read of GPU progress.
    pub fn completed_value(&self) -> FrameResult<u64> {
        self.raw.completed_value()
    }

    pub fn is_reached(&self, value: u64) -> FrameResult<bool> {
        Ok(self.completed_value()? >= value)
    }

    /// Block until the GPU reaches `value`, bounded by the configured timeout.
    pub fn wait_until(&self, value: u64) -> FrameResult<()> {
        self.wait_until_timeout(value, self.timeout)
    }

    /// Block until the GPU reaches `value` or `timeout` expires.
    ///
    /// Runs every continuation whose value is now complete before returning.
    pub fn wait_until_timeout(&self, value: u64, timeout: Option<Duration>) -> FrameResult<()> {
        assert!(
            value <= self.last_signaled(),
            "waiting for fence value {value} that was never signaled"
        );

        if self.completed_value()? < value {
            log::trace!("Waiting for fence value {}", value);
            if !self.raw.wait_value(value, timeout)? {
                let completed = self.completed_value()?;
                log::error!(
                    "Fence wait for {} timed out at {} (timeout {:?})",
                    value,
                    completed,
                    timeout
                );
                return Err(FrameError::WaitTimeout {
                    value,
                    completed,
                    timeout: timeout.unwrap_or(Duration::MAX),
                });
            }
        }

        self.poll()?;
        Ok(())
    }

    /// Run `completion` once the GPU has passed `value`.
    ///
    /// Nothing runs from inside this call, even if `value` is already reached;
    /// continuations only fire from `poll` or a completed wait.
    pub fn on_reached(&self, value: u64, completion: Completion) {
        self.pending.lock().push((value, completion));
    }

    pub fn pending_completions(&self) -> usize {
        self.pending.lock().len()
    }

    /// Read GPU progress and fire every continuation it satisfies, in value order.
    pub fn poll(&self) -> FrameResult<u64> {
        let completed = self.completed_value()?;

        let mut ready = {
            let mut pending = self.pending.lock();
            let (ready, waiting): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|(value, _)| *value <= completed);
            *pending = waiting;
            ready
        };

        ready.sort_by_key(|(value, _)| *value);
        for (_, completion) in ready {
            completion();
        }

        Ok(completed)
    }
}
