//! A `DateTime<Utc>` source anchored to tokio's time driver rather than the
//! OS wall clock, so the Job Store's chrono-based backoff/lease scheduling
//! advances in lockstep with `tokio::time::pause()`/`advance()` in tests
//! instead of requiring real multi-second sleeps.
//!
//! Outside of a paused runtime this behaves exactly like `Utc::now()`:
//! `tokio::time::Instant` tracks real elapsed time unless the clock is
//! explicitly paused.

use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant as TokioInstant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch_utc: DateTime<Utc>,
    epoch_instant: TokioInstant,
}

impl Clock {
    /// Anchor a clock to the current moment. One `Clock` should be shared
    /// by everything that needs a consistent notion of "now" for a given
    /// `JobStore` (the store itself and the worker pool polling it).
    pub fn anchor_now() -> Self {
        Self {
            epoch_utc: Utc::now(),
            epoch_instant: TokioInstant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = TokioInstant::now().saturating_duration_since(self.epoch_instant);
        self.epoch_utc + Duration::from_std(elapsed).unwrap_or_else(|_| Duration::zero())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::anchor_now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn now_advances_with_tokios_paused_clock() {
        let clock = Clock::anchor_now();
        let before = clock.now();
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        let after = clock.now();
        assert!(after - before >= Duration::seconds(5));
    }
}
