//! Idle timer engine
//!
//! One timer per controller, scheduled with an absolute deadline on the tokio
//! runtime. Arming replaces any pending firing. Every arm bumps a generation
//! counter; the fired task hands its generation to the owner, which must call
//! [`IdleTimer::claim`] under the controller lock before acting. Cancelling
//! under that same lock therefore guarantees that no stale firing is observed
//! once the cancel returns.

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Callback run by the timer task with the generation it was armed with
pub type FireFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Recurring, cancellable idle timer
pub struct IdleTimer {
    runtime: Handle,
    on_fire: FireFn,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    /// Deadline of the last scheduling attempt. While a firing is pending
    /// this is its deadline; after a skipped idle request it is the time
    /// of that request.
    last_attempt: Option<Instant>,
}

impl IdleTimer {
    pub fn new(runtime: Handle, on_fire: FireFn) -> Self {
        Self {
            runtime,
            on_fire,
            generation: 0,
            pending: None,
            last_attempt: None,
        }
    }

    /// Schedule a firing at `deadline`, replacing any pending one
    pub fn arm(&mut self, deadline: Instant) {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let on_fire = self.on_fire.clone();

        let task = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_fire(generation);
        });

        trace!("Idle timer armed, generation {}", generation);
        self.pending = Some(task);
        self.last_attempt = Some(deadline);
    }

    /// Drop the pending firing, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(task) => {
                task.abort();
                // A task already past its sleep is fenced off by the generation
                self.generation = self.generation.wrapping_add(1);
                true
            }
            None => false,
        }
    }

    /// Accept a firing. Returns false for firings that were replaced or cancelled.
    pub fn claim(&mut self, generation: u64) -> bool {
        if self.pending.is_none() || generation != self.generation {
            debug!("Dropping stale idle timer firing (generation {})", generation);
            return false;
        }
        self.pending = None;
        true
    }

    /// Scheduling request from try_idle.
    ///
    /// A request no later than the last attempt replaces a pending firing;
    /// a later one leaves the nearer pending firing in place. Deadlines in
    /// the past fire immediately. Returns whether the timer was (re)armed.
    pub fn request(&mut self, deadline: Instant, now: Instant) -> bool {
        if self.pending.is_some() && self.last_attempt.is_some_and(|last| last <= deadline) {
            debug!("Nearer idle timer already pending, ignoring");
            return false;
        }
        self.arm(deadline.max(now));
        true
    }

    /// Cancel and record `now` as the last attempt
    pub fn reset(&mut self, now: Instant) {
        self.cancel();
        self.last_attempt = Some(now);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Deadline of the pending firing
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().and(self.last_attempt)
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
