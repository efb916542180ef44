//! Client liveness watchdog.
//!
//! The watchdog stays disarmed until the client sends its first `Ping`, so
//! clients that never ping are never timed out. Once armed, any inbound
//! message pushes the deadline out by the client timeout interval.

use std::future::pending;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

#[derive(Debug)]
pub(crate) struct ClientTimeout {
    interval: Duration,
    armed: bool,
    deadline: Instant,
}

impl ClientTimeout {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            armed: false,
            deadline: Instant::now() + interval,
        }
    }

    /// Record inbound activity.
    pub(crate) fn touch(&mut self) {
        self.deadline = Instant::now() + self.interval;
    }

    /// Start enforcing the deadline.
    pub(crate) fn arm(&mut self) {
        if !self.armed {
            self.armed = true;
            self.touch();
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.armed.then_some(self.deadline)
    }
}

/// Resolves at `deadline`, or never.
pub(crate) async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}
