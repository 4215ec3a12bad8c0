use std::{
    fmt,
    sync::{Arc, mpsc},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace};

use crate::{
    EventId, LifecycleState, ObserverError, ObserverId, Service, TimeError, TimeEvent,
    TimeObserver, TimeResult, TimeServiceConfig, TimeWheel, lifecycle::Lifecycle,
    observer::Observers, ticker,
};

/// State shared by callers, the producer and the consumer, behind one lock.
pub(crate) struct WheelState {
    pub(crate) wheel: TimeWheel,
    pub(crate) pending_ticks: u64,
    pub(crate) stopping: bool,
    ticks: u64,
    activated: u64,
    cancelled: u64,
    fired: u64,
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<WheelState>,
    /// Signals the consumer that a tick is pending or the service stops.
    pub(crate) tick_cv: Condvar,
    /// Interrupts the producer's sleep on stop.
    pub(crate) producer_cv: Condvar,
    observers: Observers,
    lifecycle: Lifecycle,
    config: TimeServiceConfig,
}

impl Shared {
    #[inline]
    pub(crate) fn resolution(&self) -> Duration {
        self.config.resolution
    }
}

/// Point-in-time counters of a time service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelStats {
    pub max_time: Duration,
    pub resolution: Duration,
    pub quantum_count: usize,
    pub current_quantum: usize,
    /// Events filed and not yet fired or cancelled.
    pub pending: usize,
    pub staged: usize,
    /// Ticks produced but not yet consumed.
    pub backlog: u64,
    pub ticks: u64,
    pub activated: u64,
    pub cancelled: u64,
    pub fired: u64,
}

/// Cloneable handle to activate, cancel and observe events of a
/// [`TimeService`].
///
/// Observers receive the scheduler of the service that fired the event.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// File `event` to fire once its timeout elapsed.
    ///
    /// Fails without touching the wheel when the service is stopped, the
    /// timeout is outside `[resolution, max_time]`, or an event with the same
    /// id is already active. Returns once the event is filed.
    pub fn activate(&self, event: &Arc<TimeEvent>) -> TimeResult<()> {
        let now = Instant::now();
        {
            let mut state = self.shared.state.lock();
            if state.stopping {
                return Err(TimeError::Stopped);
            }
            state.wheel.insert(Arc::clone(event))?;
            event.mark_filed(now);
            state.activated += 1;
        }
        debug!(event = %event, "time event activated");
        Ok(())
    }

    /// Unfile `event`. Returns `false` if it is not active, which includes
    /// an event that is firing right now or has already fired.
    pub fn cancel(&self, event: &TimeEvent) -> bool {
        self.cancel_id(event.id())
    }

    pub fn cancel_id(&self, id: EventId) -> bool {
        let removed = {
            let mut state = self.shared.state.lock();
            let removed = state.wheel.remove(id);
            if removed.is_some() {
                state.cancelled += 1;
            }
            removed
        };

        match removed {
            Some(event) => {
                debug!(event = %event, "time event cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, id: EventId) -> bool {
        self.shared.state.lock().wheel.contains(id)
    }

    /// Number of active events.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().wheel.pending()
    }

    pub fn max_time(&self) -> Duration {
        self.shared.config.max_time
    }

    pub fn resolution(&self) -> Duration {
        self.shared.config.resolution
    }

    pub fn quantum_count(&self) -> usize {
        self.shared.config.quantum_count()
    }

    pub fn stats(&self) -> WheelStats {
        let state = self.shared.state.lock();
        WheelStats {
            max_time: state.wheel.max_time(),
            resolution: state.wheel.resolution(),
            quantum_count: state.wheel.quantum_count(),
            current_quantum: state.wheel.current_quantum(),
            pending: state.wheel.pending(),
            staged: state.wheel.staged(),
            backlog: state.pending_ticks,
            ticks: state.ticks,
            activated: state.activated,
            cancelled: state.cancelled,
            fired: state.fired,
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn TimeObserver>) -> ObserverId {
        self.shared.observers.subscribe(observer)
    }

    pub fn subscribe_fn<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Scheduler, &Arc<TimeEvent>) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(observer))
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.shared.observers.unsubscribe(id)
    }

    pub fn observer_count(&self) -> usize {
        self.shared.observers.len()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.shared.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle_state() == LifecycleState::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.lifecycle_state() == LifecycleState::Stopped
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        write!(
            f,
            "TimeService[max_time={:?}, resolution={:?}, quantums={}, current={}, pending={}, ticks={}, fired={}]",
            stats.max_time,
            stats.resolution,
            stats.quantum_count,
            stats.current_quantum,
            stats.pending,
            stats.ticks,
            stats.fired,
        )
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("state", &self.lifecycle_state())
            .field("stats", &self.stats())
            .finish()
    }
}

struct Threads {
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

/// Timing-wheel time service owning its producer and consumer threads.
///
/// Events may be activated before [`start`](Self::start); the wheel only
/// turns once started. Dropping the service stops it.
pub struct TimeService {
    scheduler: Scheduler,
    threads: Mutex<Option<Threads>>,
}

impl TimeService {
    pub fn new(config: TimeServiceConfig) -> TimeResult<Self> {
        config.validate()?;
        let wheel = TimeWheel::new(config.max_time, config.resolution)?;

        let shared = Arc::new(Shared {
            state: Mutex::new(WheelState {
                wheel,
                pending_ticks: 0,
                stopping: false,
                ticks: 0,
                activated: 0,
                cancelled: 0,
                fired: 0,
            }),
            tick_cv: Condvar::new(),
            producer_cv: Condvar::new(),
            observers: Observers::new(),
            lifecycle: Lifecycle::new(),
            config,
        });

        Ok(Self {
            scheduler: Scheduler { shared },
            threads: Mutex::new(None),
        })
    }

    pub fn with_limits(max_time: Duration, resolution: Duration) -> TimeResult<Self> {
        Self::new(TimeServiceConfig::new(max_time, resolution))
    }

    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    pub fn config(&self) -> &TimeServiceConfig {
        &self.scheduler.shared.config
    }

    /// Spawn the producer and consumer threads.
    ///
    /// Returns once both threads run, after declaring the service
    /// effectively running. Fails with [`TimeError::Stopped`] when a
    /// concurrent [`stop`](Self::stop) won the race; the threads are joined
    /// before returning.
    pub fn start(&self) -> TimeResult<()> {
        let shared = &self.scheduler.shared;
        shared.lifecycle.begin_start()?;

        // Held until the handles are stored so a concurrent stop joins them.
        let mut threads = self.threads.lock();

        let name = &shared.config.thread_name;
        let (ready_tx, ready_rx) = mpsc::channel();

        let producer = {
            let shared = Arc::clone(shared);
            let ready = ready_tx.clone();
            thread::Builder::new()
                .name(format!("{name}-producer"))
                .spawn(move || {
                    let _ = ready.send(());
                    drop(ready);
                    ticker::produce(&shared);
                })
        };
        let producer = match producer {
            Ok(handle) => handle,
            Err(err) => {
                self.abort_start(None);
                return Err(TimeError::Spawn(err));
            }
        };

        let consumer = {
            let scheduler = self.scheduler.clone();
            thread::Builder::new()
                .name(format!("{name}-consumer"))
                .spawn(move || {
                    let _ = ready_tx.send(());
                    drop(ready_tx);
                    consume(&scheduler);
                })
        };
        let consumer = match consumer {
            Ok(handle) => handle,
            Err(err) => {
                self.abort_start(Some(producer));
                return Err(TimeError::Spawn(err));
            }
        };

        // Both senders are gone once the threads started or died.
        while ready_rx.recv().is_ok() {}

        if !shared.lifecycle.mark_running() {
            // An observer may be stopping the service from the consumer
            // thread and waiting for this lock.
            drop(threads);
            join("producer", producer);
            join("consumer", consumer);
            debug!("time service stopped while starting");
            return Err(TimeError::Stopped);
        }
        *threads = Some(Threads { producer, consumer });
        drop(threads);

        info!(
            max_time = ?shared.config.max_time,
            resolution = ?shared.config.resolution,
            quantums = shared.config.quantum_count(),
            "time service started"
        );
        Ok(())
    }

    /// Stop both threads and abandon every active event.
    ///
    /// The service reports [`LifecycleState::Stopping`] from the moment
    /// activations are refused until both threads are joined. Pending ticks
    /// are discarded. Events still filed are logged as on air and are not
    /// notified. Idempotent.
    pub fn stop(&self) {
        let shared = &self.scheduler.shared;
        {
            let mut state = shared.state.lock();
            if state.stopping {
                return;
            }
            state.stopping = true;
            state.pending_ticks = 0;
            shared.lifecycle.begin_stop();
        }
        shared.tick_cv.notify_all();
        shared.producer_cv.notify_all();

        let threads = self.threads.lock().take();
        if let Some(threads) = threads {
            join("producer", threads.producer);
            join("consumer", threads.consumer);
        }

        let on_air = shared.state.lock().wheel.drain_all();
        shared.lifecycle.mark_stopped();

        info!(on_air = on_air.len(), "time service stopped");
        for event in &on_air {
            debug!(event = %event, "time event on air at stop");
        }
    }

    fn abort_start(&self, producer: Option<JoinHandle<()>>) {
        let shared = &self.scheduler.shared;
        {
            let mut state = shared.state.lock();
            state.stopping = true;
            shared.lifecycle.begin_stop();
        }
        shared.producer_cv.notify_all();
        if let Some(producer) = producer {
            join("producer", producer);
        }
        shared.lifecycle.mark_stopped();
    }

    // ==================== Scheduler delegation ====================

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn is_stopped(&self) -> bool {
        self.scheduler.is_stopped()
    }

    pub fn activate(&self, event: &Arc<TimeEvent>) -> TimeResult<()> {
        self.scheduler.activate(event)
    }

    pub fn cancel(&self, event: &TimeEvent) -> bool {
        self.scheduler.cancel(event)
    }

    pub fn cancel_id(&self, id: EventId) -> bool {
        self.scheduler.cancel_id(id)
    }

    pub fn is_active(&self, id: EventId) -> bool {
        self.scheduler.is_active(id)
    }

    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn stats(&self) -> WheelStats {
        self.scheduler.stats()
    }

    pub fn subscribe(&self, observer: Arc<dyn TimeObserver>) -> ObserverId {
        self.scheduler.subscribe(observer)
    }

    pub fn subscribe_fn<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Scheduler, &Arc<TimeEvent>) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.scheduler.subscribe_fn(observer)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.scheduler.unsubscribe(id)
    }
}

impl Service for TimeService {
    type Error = TimeError;

    fn initialize(&self) -> TimeResult<()> {
        self.start()
    }

    fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    fn is_stopped(&self) -> bool {
        self.scheduler.is_stopped()
    }

    fn notify_effective_running(&self) {
        if !self.scheduler.shared.lifecycle.mark_running() {
            debug!(state = ?self.scheduler.lifecycle_state(), "effective running ignored");
        }
    }

    fn wait_effective_running(&self, timeout: Duration) -> bool {
        self.scheduler.shared.lifecycle.wait_running(timeout)
    }

    fn stop(&self) {
        TimeService::stop(self);
    }
}

impl Drop for TimeService {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Display for TimeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.scheduler, f)
    }
}

impl fmt::Debug for TimeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeService")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

/// Consumer loop: drain one bucket per tick, then notify outside the lock.
fn consume(scheduler: &Scheduler) {
    let shared = &scheduler.shared;
    debug!("time consumer running");

    loop {
        let (now, fired) = {
            let mut state = shared.state.lock();
            while state.pending_ticks == 0 && !state.stopping {
                shared.tick_cv.wait(&mut state);
            }
            if state.stopping {
                break;
            }

            state.pending_ticks -= 1;
            let now = Instant::now();
            let fired = state.wheel.advance(now, true);
            state.ticks += 1;
            state.fired += fired.len() as u64;

            trace!(
                quantum = state.wheel.current_quantum(),
                fired = fired.len(),
                backlog = state.pending_ticks,
                "quantum drained"
            );
            (now, fired)
        };

        for fired in &fired {
            shared.observers.notify(scheduler, &fired.event);
            if fired.rearmed {
                fired.event.mark_rearmed(now);
            }
        }
    }

    debug!("time consumer stopped");
}

fn join(role: &str, handle: JoinHandle<()>) {
    // A stop issued from an observer runs on the consumer thread itself.
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        error!(role, "time service thread panicked");
    }
}
