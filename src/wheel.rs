use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use rustc_hash::FxHashMap;

use crate::{EventId, TimeError, TimeEvent, TimeResult, slot::Slot};

/// Largest bucket count a wheel may allocate.
pub const MAX_QUANTUM_COUNT: usize = 1 << 20;

/// Bucket count for `max_time / resolution`, rounded up.
///
/// Rejects a zero resolution, a resolution not below `max_time`, and ratios
/// above [`MAX_QUANTUM_COUNT`].
pub(crate) fn quantum_count_for(max_time: Duration, resolution: Duration) -> TimeResult<usize> {
    if resolution.is_zero() || resolution >= max_time {
        return Err(TimeError::InvalidConfig {
            resolution,
            max_time,
        });
    }

    let count = max_time.as_nanos().div_ceil(resolution.as_nanos());
    match usize::try_from(count) {
        Ok(count) if count <= MAX_QUANTUM_COUNT => Ok(count),
        _ => Err(TimeError::WheelTooLarge {
            resolution,
            max_time,
            limit: MAX_QUANTUM_COUNT,
        }),
    }
}

/// Where an indexed event is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Table { quantum: usize, key: usize },
    Staging { key: usize },
}

/// An event removed from the wheel by [`TimeWheel::advance`].
#[derive(Debug, Clone)]
pub struct Fired {
    pub event: Arc<TimeEvent>,
    /// The event was periodical and has already been filed again.
    pub rearmed: bool,
}

/// Single-level timing wheel.
///
/// `time_table[current_quantum]` is the bucket drained by the next
/// [`advance`](Self::advance). An event whose timeout is `k` resolutions long
/// is filed `k` buckets ahead of it (truncating), so it fires on the
/// `k + 1`-th advance. When the target wraps back onto the current bucket the
/// event is held in a staging bucket and only moved into the current bucket
/// after that bucket was drained, which defers it by exactly one full pass.
///
/// The wheel is not synchronized; the service keeps it behind one mutex.
pub struct TimeWheel {
    max_time: Duration,
    resolution: Duration,
    time_table: Box<[Slot<Arc<TimeEvent>>]>,
    temporary_quantum: Slot<Arc<TimeEvent>>,
    current_quantum: usize,
    events: FxHashMap<EventId, Location>,
}

impl TimeWheel {
    pub fn new(max_time: Duration, resolution: Duration) -> TimeResult<Self> {
        let max_quantum = quantum_count_for(max_time, resolution)?;

        Ok(Self {
            max_time,
            resolution,
            time_table: (0..max_quantum).map(|_| Slot::new()).collect(),
            temporary_quantum: Slot::new(),
            current_quantum: 0,
            events: FxHashMap::default(),
        })
    }

    #[inline]
    pub fn max_time(&self) -> Duration {
        self.max_time
    }

    #[inline]
    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    /// Number of buckets.
    #[inline]
    pub fn quantum_count(&self) -> usize {
        self.time_table.len()
    }

    #[inline]
    pub fn current_quantum(&self) -> usize {
        self.current_quantum
    }

    /// Number of filed events, staged ones included.
    #[inline]
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: EventId) -> bool {
        self.events.contains_key(&id)
    }

    /// Number of events waiting in the staging bucket.
    #[inline]
    pub fn staged(&self) -> usize {
        self.temporary_quantum.len()
    }

    pub fn check_timeout(&self, timeout: Duration) -> TimeResult<()> {
        if timeout < self.resolution || timeout > self.max_time {
            return Err(TimeError::TimeoutOutOfRange {
                timeout,
                resolution: self.resolution,
                max_time: self.max_time,
            });
        }
        Ok(())
    }

    /// Bucket an event with `timeout` would be filed into right now.
    #[inline]
    pub fn target_quantum(&self, timeout: Duration) -> usize {
        let ahead = (timeout.as_nanos() / self.resolution.as_nanos()) as usize;
        (self.current_quantum + ahead) % self.quantum_count()
    }

    /// File an event.
    ///
    /// Fails without touching the wheel when the timeout is out of range or
    /// an event with the same id is already filed.
    pub fn insert(&mut self, event: Arc<TimeEvent>) -> TimeResult<()> {
        self.check_timeout(event.timeout())?;
        if self.contains(event.id()) {
            return Err(TimeError::AlreadyActive(event.id()));
        }
        self.file(event);
        Ok(())
    }

    /// Unfile an event. Returns `None` if it is not filed.
    pub fn remove(&mut self, id: EventId) -> Option<Arc<TimeEvent>> {
        let location = self.events.remove(&id)?;
        let removed = match location {
            Location::Table { quantum, key } => self.time_table[quantum].remove(key),
            Location::Staging { key } => self.temporary_quantum.remove(key),
        };
        debug_assert!(removed.is_some(), "index out of sync for {id}");
        removed
    }

    /// Drain the current bucket, then move one bucket forward.
    ///
    /// Every drained event is stamped with `now` and unindexed. Periodical
    /// events are filed again from the current position when `rearm` is set.
    /// Returns the drained events in filing order.
    pub fn advance(&mut self, now: Instant, rearm: bool) -> Vec<Fired> {
        let current = self.current_quantum;
        let mut fired = Vec::with_capacity(self.time_table[current].len());

        while let Some(event) = self.time_table[current].pop_front() {
            self.events.remove(&event.id());
            event.mark_fired(now);

            let rearmed = rearm && event.is_periodical();
            if rearmed {
                self.file(Arc::clone(&event));
            }
            fired.push(Fired { event, rearmed });
        }

        while let Some(event) = self.temporary_quantum.pop_front() {
            let id = event.id();
            let key = self.time_table[current].push_back(event);
            self.events.insert(
                id,
                Location::Table {
                    quantum: current,
                    key,
                },
            );
        }

        self.current_quantum = (current + 1) % self.quantum_count();
        fired
    }

    /// Empty the wheel, returning every filed event in wheel order starting
    /// at the current bucket, staged events last.
    pub fn drain_all(&mut self) -> Vec<Arc<TimeEvent>> {
        let mut drained = Vec::with_capacity(self.events.len());
        let count = self.quantum_count();

        for offset in 0..count {
            let bucket = &mut self.time_table[(self.current_quantum + offset) % count];
            while let Some(event) = bucket.pop_front() {
                drained.push(event);
            }
        }
        while let Some(event) = self.temporary_quantum.pop_front() {
            drained.push(event);
        }

        self.events.clear();
        drained
    }

    fn file(&mut self, event: Arc<TimeEvent>) {
        let id = event.id();
        let target = self.target_quantum(event.timeout());

        let location = if target == self.current_quantum {
            Location::Staging {
                key: self.temporary_quantum.push_back(event),
            }
        } else {
            Location::Table {
                quantum: target,
                key: self.time_table[target].push_back(event),
            }
        };
        self.events.insert(id, location);
    }
}

impl fmt::Debug for TimeWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeWheel")
            .field("max_time", &self.max_time)
            .field("resolution", &self.resolution)
            .field("quantum_count", &self.quantum_count())
            .field("current_quantum", &self.current_quantum)
            .field("pending", &self.pending())
            .field("staged", &self.staged())
            .finish()
    }
}
