use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{TimeError, TimeResult};

/// Contract between a service and the framework that starts it.
///
/// Dependants use [`wait_effective_running`](Service::wait_effective_running)
/// to block until the service's threads are live.
pub trait Service {
    type Error: std::error::Error;

    /// Bring the service up. Called once by the owning framework.
    fn initialize(&self) -> Result<(), Self::Error>;

    fn is_running(&self) -> bool;

    fn is_stopped(&self) -> bool;

    /// Declare the service effectively running and wake every waiter.
    fn notify_effective_running(&self);

    /// Block until the service runs. Returns `false` on timeout or when the
    /// service stopped instead.
    fn wait_effective_running(&self, timeout: Duration) -> bool;

    fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    /// Stop was requested; threads are being joined.
    Stopping,
    Stopped,
}

/// `Idle -> Starting -> Running -> Stopping -> Stopped` state with waiters.
///
/// Any state may move to `Stopping` or `Stopped`; nothing leaves `Stopped`.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<LifecycleState>,
    changed: Condvar,
}

impl Lifecycle {
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Idle),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// `Idle -> Starting`.
    pub(crate) fn begin_start(&self) -> TimeResult<()> {
        let mut state = self.state.lock();
        match *state {
            LifecycleState::Idle => {
                *state = LifecycleState::Starting;
                Ok(())
            }
            LifecycleState::Stopping | LifecycleState::Stopped => Err(TimeError::Stopped),
            LifecycleState::Starting | LifecycleState::Running => Err(TimeError::AlreadyStarted),
        }
    }

    /// `Starting -> Running`. Returns `false`, leaving the state untouched,
    /// from any other state.
    pub(crate) fn mark_running(&self) -> bool {
        let mut state = self.state.lock();
        if *state != LifecycleState::Starting {
            return false;
        }
        *state = LifecycleState::Running;
        self.changed.notify_all();
        true
    }

    /// Move to `Stopping` unless already stopped. Returns the previous state.
    pub(crate) fn begin_stop(&self) -> LifecycleState {
        let mut state = self.state.lock();
        let previous = *state;
        if previous != LifecycleState::Stopped {
            *state = LifecycleState::Stopping;
            self.changed.notify_all();
        }
        previous
    }

    /// Move to `Stopped`. Returns the previous state.
    pub(crate) fn mark_stopped(&self) -> LifecycleState {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, LifecycleState::Stopped);
        self.changed.notify_all();
        previous
    }

    pub(crate) fn wait_running(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            match *state {
                LifecycleState::Running => return true,
                LifecycleState::Stopping | LifecycleState::Stopped => return false,
                LifecycleState::Idle | LifecycleState::Starting => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return *state == LifecycleState::Running;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn test_happy_path() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Idle);

        lifecycle.begin_start().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Starting);

        assert!(lifecycle.mark_running());
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        assert_eq!(lifecycle.begin_stop(), LifecycleState::Running);
        assert_eq!(lifecycle.state(), LifecycleState::Stopping);

        assert_eq!(lifecycle.mark_stopped(), LifecycleState::Stopping);
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_begin_start_twice() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_start().unwrap();

        assert!(matches!(
            lifecycle.begin_start(),
            Err(TimeError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_no_restart_after_stop() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_stopped();

        assert!(matches!(lifecycle.begin_start(), Err(TimeError::Stopped)));
        assert!(!lifecycle.mark_running());
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_stopping_blocks_start_and_running() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_start().unwrap();
        lifecycle.begin_stop();

        assert!(!lifecycle.mark_running());
        assert!(matches!(lifecycle.begin_start(), Err(TimeError::Stopped)));
        assert!(!lifecycle.wait_running(Duration::from_secs(5)));
    }

    #[test]
    fn test_begin_stop_keeps_stopped() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_stopped();

        assert_eq!(lifecycle.begin_stop(), LifecycleState::Stopped);
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_wait_running_times_out() {
        let lifecycle = Lifecycle::new();
        let start = Instant::now();

        assert!(!lifecycle.wait_running(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_running_wakes_on_running() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.begin_start().unwrap();

        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            thread::spawn(move || lifecycle.wait_running(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(10));
        assert!(lifecycle.mark_running());

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_running_wakes_on_stop() {
        let lifecycle = Arc::new(Lifecycle::new());

        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            thread::spawn(move || lifecycle.wait_running(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(10));
        lifecycle.mark_stopped();

        assert!(!waiter.join().unwrap());
    }
}
