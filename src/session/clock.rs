use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

/// Monotonic time source with a cancellable suspend, driving the frame scheduler
pub trait Clock {
    fn now(&self) -> Instant;

    /// Suspend until `deadline`. Returns false if woken early by cancellation.
    fn sleep_until(&self, deadline: Instant) -> bool;

    /// Non-blocking cancellation check
    fn is_cancelled(&self) -> bool;
}

/// Wall clock. Sleeps wait on a channel, so a message or a dropped
/// sender wakes the scheduler immediately.
pub struct SystemClock {
    cancel: Receiver<()>,
}

impl SystemClock {
    pub fn cancellable(cancel: Receiver<()>) -> Self {
        Self { cancel }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if deadline <= now {
            return !self.is_cancelled();
        }
        matches!(
            self.cancel.recv_timeout(deadline - now),
            Err(RecvTimeoutError::Timeout)
        )
    }

    fn is_cancelled(&self) -> bool {
        !matches!(self.cancel.try_recv(), Err(TryRecvError::Empty))
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;
