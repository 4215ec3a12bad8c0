use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::service::Shared;

/// Self-correcting pacing of the producer thread.
///
/// Every tick is expected exactly one resolution after the previous expected
/// tick. After a wake-up, the deviation between the actual and the expected
/// wake time is subtracted from the next sleep, so scheduler jitter does not
/// accumulate into drift. A wake-up later than a whole resolution yields
/// zero-length sleeps until the backlog of ticks has been produced.
#[derive(Debug, Clone)]
pub(crate) struct Pacer {
    resolution: Duration,
    expected: Instant,
}

impl Pacer {
    /// First tick is expected one resolution after `start`.
    pub(crate) fn new(resolution: Duration, start: Instant) -> Self {
        Self {
            resolution,
            expected: start + resolution,
        }
    }

    /// When the next tick is due.
    #[inline]
    pub(crate) fn expected(&self) -> Instant {
        self.expected
    }

    /// Record a wake-up at `actual` and return the sleep before the next one.
    pub(crate) fn next_sleep(&mut self, actual: Instant) -> Duration {
        let sleep = if actual >= self.expected {
            let late = actual - self.expected;
            self.resolution.saturating_sub(late)
        } else {
            let early = self.expected - actual;
            self.resolution + early
        };
        self.expected += self.resolution;
        sleep
    }
}

/// Producer loop: one tick per resolution until the service stops.
pub(crate) fn produce(shared: &Shared) {
    let resolution = shared.resolution();
    let mut pacer = Pacer::new(resolution, Instant::now());
    let mut deadline = pacer.expected();

    debug!(resolution = ?resolution, "time producer running");

    let mut state = shared.state.lock();
    loop {
        while !state.stopping && Instant::now() < deadline {
            shared.producer_cv.wait_until(&mut state, deadline);
        }
        if state.stopping {
            break;
        }

        let now = Instant::now();
        let sleep = pacer.next_sleep(now);
        deadline = now + sleep;

        state.pending_ticks += 1;
        trace!(pending_ticks = state.pending_ticks, "tick");
        shared.tick_cv.notify_one();
    }

    debug!("time producer stopped");
}
