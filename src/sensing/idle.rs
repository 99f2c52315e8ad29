use std::time::Duration;

use tokio::time::Instant;

/// Single re-armable idle deadline.
///
/// Every qualifying input moves the deadline; once it fires the tracker stays
/// disarmed until the next input, so one idle period yields one signal.
#[derive(Debug)]
pub struct IdleTracker {
    timeout: Duration,
    last_input_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl IdleTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_input_at: None,
            deadline: None,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_input_at = Some(now);
        self.deadline = Some(now + self.timeout);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns how long the user has been idle if the deadline has passed,
    /// disarming the tracker.
    pub fn fire(&mut self, now: Instant) -> Option<Duration> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                let since = self.last_input_at.unwrap_or(deadline - self.timeout);
                Some(now.saturating_duration_since(since))
            }
            _ => None,
        }
    }
}

/// Sleep until `deadline`, or forever when there is none. Lets a
/// `tokio::select!` branch stand in for a cancellable one-shot timer.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
