// Bounded polling for external "still loading" operations
//
// VR runtimes report render models and textures as loading with no
// blocking primitive to wait on, so we poll with a capped exponential
// backoff and give up after a fixed number of attempts.

use std::time::Duration;

use crate::error::{FrameError, FrameResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus<T> {
    Loaded(T),
    Loading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (attempts count from 1).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Poll until `poll` reports `Loaded`, sleeping between attempts.
pub fn poll_until_loaded<T>(
    what: &'static str,
    policy: &RetryPolicy,
    poll: impl FnMut() -> FrameResult<LoadStatus<T>>,
) -> FrameResult<T> {
    poll_until_loaded_with(what, policy, poll, std::thread::sleep)
}

pub fn poll_until_loaded_with<T>(
    what: &'static str,
    policy: &RetryPolicy,
    mut poll: impl FnMut() -> FrameResult<LoadStatus<T>>,
    mut sleep: impl FnMut(Duration),
) -> FrameResult<T> {
    for attempt in 1..=policy.max_attempts {
        if let LoadStatus::Loaded(value) = poll()? {
            if attempt > 1 {
                log::debug!("{} loaded after {} attempts", what, attempt);
            }
            return Ok(value);
        }
        if attempt < policy.max_attempts {
            sleep(policy.delay_after(attempt));
        }
    }

    log::warn!("{} still loading after {} attempts", what, policy.max_attempts);
    Err(FrameError::StillLoading {
        what,
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let p = policy(10);
        let delays: Vec<u64> = (1..=5).map(|a| p.delay_after(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);
        assert_eq!(p.delay_after(200), Duration::from_millis(10));
    }

    #[test]
    fn returns_once_loaded() {
        let mut calls = 0;
        let mut slept = Vec::new();
        let value = poll_until_loaded_with(
            "render model",
            &policy(5),
            || {
                calls += 1;
                Ok(if calls < 3 { LoadStatus::Loading } else { LoadStatus::Loaded(calls) })
            },
            |d| slept.push(d),
        )
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(slept, vec![Duration::from_millis(2), Duration::from_millis(4)]);
    }

    #[test]
    fn gives_up_after_the_budget() {
        let mut sleeps = 0;
        let err = poll_until_loaded_with(
            "texture",
            &policy(4),
            || Ok(LoadStatus::<()>::Loading),
            |_| sleeps += 1,
        )
        .unwrap_err();

        assert!(matches!(err, FrameError::StillLoading { what: "texture", attempts: 4 }));
        assert_eq!(sleeps, 3);
    }

    #[test]
    fn errors_are_not_retried() {
        let mut calls = 0;
        let err = poll_until_loaded_with(
            "render model",
            &policy(5),
            || -> FrameResult<LoadStatus<()>> {
                calls += 1;
                Err(FrameError::DeviceLost)
            },
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::DeviceLost));
        assert_eq!(calls, 1);
    }
}
