use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`TimeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    fn next() -> Self {
        Self(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Stamps {
    init_time: Option<Instant>,
    end_time: Option<Instant>,
}

/// A deadline handed to the time service.
///
/// Events are shared between the caller and the wheel through an
/// `Arc<TimeEvent>`. The identity, timeout and periodicity are fixed at
/// construction; the filing and firing timestamps are written by the
/// service only.
#[derive(Debug)]
pub struct TimeEvent {
    id: EventId,
    timeout: Duration,
    periodical: bool,
    label: Option<String>,
    stamps: Mutex<Stamps>,
}

impl TimeEvent {
    pub fn new(timeout: Duration, periodical: bool) -> Self {
        Self {
            id: EventId::next(),
            timeout,
            periodical,
            label: None,
            stamps: Mutex::new(Stamps::default()),
        }
    }

    pub fn one_shot(timeout: Duration) -> Self {
        Self::new(timeout, false)
    }

    pub fn periodical(timeout: Duration) -> Self {
        Self::new(timeout, true)
    }

    /// Attach a name shown in diagnostics and logs.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[inline]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn is_periodical(&self) -> bool {
        self.periodical
    }

    #[inline]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// When the event was last filed into the wheel.
    pub fn init_time(&self) -> Option<Instant> {
        self.stamps.lock().init_time
    }

    /// When the event last fired. Cleared by every activation.
    pub fn end_time(&self) -> Option<Instant> {
        self.stamps.lock().end_time
    }

    /// Time between filing and firing, once the event has fired.
    ///
    /// A rearmed periodical event has its filing time moved to the firing
    /// instant once its notification completed.
    pub fn elapsed(&self) -> Option<Duration> {
        let stamps = *self.stamps.lock();
        match (stamps.init_time, stamps.end_time) {
            (Some(init), Some(end)) => Some(end.saturating_duration_since(init)),
            _ => None,
        }
    }

    pub(crate) fn mark_filed(&self, now: Instant) {
        let mut stamps = self.stamps.lock();
        stamps.init_time = Some(now);
        stamps.end_time = None;
    }

    pub(crate) fn mark_fired(&self, now: Instant) {
        self.stamps.lock().end_time = Some(now);
    }

    /// No-op when the event was activated again since it fired at `fired_at`.
    pub(crate) fn mark_rearmed(&self, fired_at: Instant) {
        let mut stamps = self.stamps.lock();
        if stamps.end_time == Some(fired_at) {
            stamps.init_time = Some(fired_at);
        }
    }
}

impl fmt::Display for TimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeEvent({}", self.id)?;
        if let Some(label) = &self.label {
            write!(f, " {label:?}")?;
        }
        write!(f, ", timeout={:?}", self.timeout)?;
        if self.periodical {
            f.write_str(", periodical")?;
        }
        f.write_str(")")
    }
}
