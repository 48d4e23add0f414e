use std::time::{Duration, Instant};

use super::clock::Clock;

/// Paces frames against an absolute schedule.
///
/// Tick `n` is due at `start + n * period`. A late tick fires at once and
/// later ticks keep their original deadlines, so timing error never
/// accumulates. Nothing is dropped when running behind.
pub struct FrameScheduler<C: Clock> {
    clock: C,
    start: Instant,
    period: Duration,
    frame_index: u64,
}

impl<C: Clock> FrameScheduler<C> {
    /// Start the schedule now
    pub fn new(clock: C, period: Duration) -> Self {
        let start = clock.now();
        Self {
            clock,
            start,
            period,
            frame_index: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn clock(&self) -> &C {
        &self.clock
    }

    /// Absolute deadline of tick `index`
    pub fn target_time(&self, index: u64) -> Instant {
        let nanos = self.period.as_nanos().saturating_mul(index as u128);
        self.start + Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// Wait until the current tick is due. Returns its index, or `None` once cancelled.
    pub fn wait_for_tick(&mut self) -> Option<u64> {
        let target = self.target_time(self.frame_index);
        let ready = if self.clock.now() < target {
            self.clock.sleep_until(target)
        } else {
            !self.clock.is_cancelled()
        };
        ready.then_some(self.frame_index)
    }

    /// Move on to the next tick once the current frame is sent
    pub fn advance(&mut self) {
        self.frame_index += 1;
    }

    /// How far behind schedule the current tick is
    pub fn lag(&self) -> Duration {
        self.clock
            .now()
            .saturating_duration_since(self.target_time(self.frame_index))
    }
}
