//! Threaded timing-wheel time service.
//!
//! A [`TimeService`] keeps `ceil(max_time / resolution)` buckets. A producer
//! thread ticks once per `resolution`; a consumer thread drains one bucket per
//! tick, notifies the subscribed [`TimeObserver`]s of every due
//! [`TimeEvent`], and rearms periodical events.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use quantum_wheel::{Scheduler, TimeEvent, TimeService, TimeServiceConfig};
//!
//! let service = TimeService::new(TimeServiceConfig::default()).unwrap();
//! service.subscribe_fn(|_: &Scheduler, event: &Arc<TimeEvent>| {
//!     println!("{event} fired");
//!     Ok(())
//! });
//! service.start().unwrap();
//!
//! let event = Arc::new(TimeEvent::one_shot(Duration::from_millis(250)));
//! service.activate(&event).unwrap();
//! ```

use std::time::Duration;

mod config;
mod event;
#[cfg(test)]
mod latency;
mod lifecycle;
mod observer;
mod service;
mod slot;
mod ticker;
mod wheel;

pub use config::{DEFAULT_MAX_TIME, DEFAULT_RESOLUTION, DEFAULT_THREAD_NAME, TimeServiceConfig};
pub use event::{EventId, TimeEvent};
pub use lifecycle::{LifecycleState, Service};
pub use observer::{ObserverError, ObserverId, TimeObserver};
pub use service::{Scheduler, TimeService, WheelStats};
pub use wheel::{Fired, MAX_QUANTUM_COUNT, TimeWheel};

pub type TimeResult<T> = Result<T, TimeError>;

#[derive(Debug, thiserror::Error)]
pub enum TimeError {
    #[error("resolution {resolution:?} must be non-zero and below max time {max_time:?}")]
    InvalidConfig {
        resolution: Duration,
        max_time: Duration,
    },

    #[error("resolution {resolution:?} over max time {max_time:?} needs more than {limit} buckets")]
    WheelTooLarge {
        resolution: Duration,
        max_time: Duration,
        limit: usize,
    },

    #[error("timeout {timeout:?} outside [{resolution:?}, {max_time:?}]")]
    TimeoutOutOfRange {
        timeout: Duration,
        resolution: Duration,
        max_time: Duration,
    },

    #[error("event {0} is already active")]
    AlreadyActive(EventId),

    #[error("time service is stopped")]
    Stopped,

    #[error("time service already started")]
    AlreadyStarted,

    #[error("failed to spawn time service thread")]
    Spawn(#[source] std::io::Error),
}
