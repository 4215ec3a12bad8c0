use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::{Scheduler, TimeEvent};

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Subscriber notified on the consumer thread every time an event fires.
///
/// Notifications run while no wheel lock is held, so an observer may
/// activate or cancel events through the [`Scheduler`] it receives. A slow
/// observer delays every event due after it.
pub trait TimeObserver: Send + Sync {
    fn on_time_event(&self, scheduler: &Scheduler, event: &Arc<TimeEvent>)
    -> Result<(), ObserverError>;
}

impl<F> TimeObserver for F
where
    F: Fn(&Scheduler, &Arc<TimeEvent>) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_time_event(
        &self,
        scheduler: &Scheduler,
        event: &Arc<TimeEvent>,
    ) -> Result<(), ObserverError> {
        self(scheduler, event)
    }
}

/// Registration returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

type Registry = Arc<Vec<(ObserverId, Arc<dyn TimeObserver>)>>;

/// Copy-on-write observer list.
///
/// Notifying clones the current list handle only, so observers may
/// subscribe or unsubscribe while being notified. Changes apply from the
/// next notified event.
pub(crate) struct Observers {
    next_id: AtomicU64,
    registry: RwLock<Registry>,
}

impl Observers {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            registry: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub(crate) fn subscribe(&self, observer: Arc<dyn TimeObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry.write();
        let mut next = Vec::clone(&registry);
        next.push((id, observer));
        *registry = Arc::new(next);
        id
    }

    pub(crate) fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut registry = self.registry.write();
        if !registry.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next = registry
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *registry = Arc::new(next);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.registry.read().len()
    }

    /// Deliver `event` to every observer in subscription order.
    ///
    /// Errors and panics are logged and do not stop delivery to the
    /// remaining observers. Returns the number of failed observers.
    pub(crate) fn notify(&self, scheduler: &Scheduler, event: &Arc<TimeEvent>) -> usize {
        let registry = Arc::clone(&self.registry.read());
        let mut failures = 0;

        for (id, observer) in registry.iter() {
            match catch_unwind(AssertUnwindSafe(|| observer.on_time_event(scheduler, event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    warn!(observer = %id, event = %event, error = %err, "time observer failed");
                }
                Err(panic) => {
                    failures += 1;
                    error!(
                        observer = %id,
                        event = %event,
                        panic = panic_message(panic.as_ref()),
                        "time observer panicked"
                    );
                }
            }
        }

        failures
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
