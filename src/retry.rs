//! Replaces the source's ad-hoc `while True: try/except sleep` retry loops
//! (see `SPEC_FULL.md` S9, "Retry policy as type") with a small reusable
//! policy object. `profile`/`card-details` calls get `attempts = None`
//! (unbounded); log endpoints get `attempts = Some(1)`.

use std::thread;
use std::time::Duration;

use log::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// `None` means retry forever.
    pub attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn forever(base_delay: Duration) -> Self {
        Self {
            attempts: None,
            base_delay,
            max_delay: base_delay,
        }
    }

    #[must_use]
    pub fn once() -> Self {
        Self {
            attempts: Some(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Runs `op` until it succeeds or the attempt budget is exhausted.
    /// Sleeps `base_delay` between attempts (flat backoff -- the source
    /// never escalates beyond a fixed per-call delay, so `max_delay` exists
    /// only to bound future callers that do want growth).
    pub fn run<T, E: std::fmt::Display>(&self, label: &str, mut op: impl FnMut() -> Result<T, E>) -> Option<T> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Some(value),
                Err(err) => {
                    warn!("{label}: attempt {attempt} failed: {err}");
                    if let Some(limit) = self.attempts {
                        if attempt >= limit {
                            return None;
                        }
                    }
                    thread::sleep(self.base_delay.min(self.max_delay.max(self.base_delay)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_gives_up_after_first_failure() {
        let policy = RetryPolicy::once();
        let mut calls = 0;
        let result = policy.run("test", || {
            calls += 1;
            Err::<(), _>("boom")
        });
        assert!(result.is_none());
        assert_eq!(calls, 1);
    }

    #[test]
    fn forever_retries_until_success() {
        let policy = RetryPolicy::forever(Duration::from_millis(1));
        let mut calls = 0;
        let result = policy.run("test", || {
            calls += 1;
            if calls < 3 {
                Err("not yet")
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Some(42));
        assert_eq!(calls, 3);
    }
}
