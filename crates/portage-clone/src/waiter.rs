//! Bounded polling against external state.
//!
//! Every subsystem that blocks on the outside world (stack status, volume
//! status, server termination, port reachability, transfer progress) goes
//! through [`Waiter`]. Cancellation is observed between polls and comes
//! back as a distinct outcome, not a timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation flag shared with watchers.
#[derive(Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        AbortFlag::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What one poll observed.
pub enum Tick<T> {
    Done(T),
    Continue,
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Done(T),
    Aborted,
    TimedOut,
}

impl<T> WaitOutcome<T> {
    pub fn into_done(self) -> Option<T> {
        match self {
            WaitOutcome::Done(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    pub interval: Duration,
    /// None polls until done or aborted.
    pub max_attempts: Option<u32>,
}

impl Waiter {
    pub fn new(interval: Duration) -> Self {
        Waiter {
            interval,
            max_attempts: None,
        }
    }

    pub fn with_attempts(interval: Duration, max_attempts: u32) -> Self {
        Waiter {
            interval,
            max_attempts: Some(max_attempts),
        }
    }

    /// Poll until `poll` reports done, the abort flag is raised, or the
    /// attempt budget runs out. Errors from the poll itself propagate.
    pub async fn wait_for<T, E, F, Fut>(
        &self,
        abort: &AbortFlag,
        mut poll: F,
    ) -> Result<WaitOutcome<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Tick<T>, E>>,
    {
        let mut attempts: u32 = 0;
        loop {
            if abort.is_set() {
                return Ok(WaitOutcome::Aborted);
            }
            match poll().await? {
                Tick::Done(value) => return Ok(WaitOutcome::Done(value)),
                Tick::Continue => {}
            }
            attempts += 1;
            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    return Ok(WaitOutcome::TimedOut);
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
