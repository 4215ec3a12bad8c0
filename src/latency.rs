//! Latency reports for the wheel and the threaded service.
//!
//! Run with `cargo test --release -- --ignored --nocapture latency`.

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::{Scheduler, TimeEvent, TimeObserver, TimeService, TimeServiceConfig, TimeWheel};

const WARMUP: u64 = 100_000;
const ITERATIONS: u64 = 1_000_000;

const QUANTILES: [(&str, f64); 5] = [
    ("p50", 0.50),
    ("p90", 0.90),
    ("p99", 0.99),
    ("p99.9", 0.999),
    ("p99.99", 0.9999),
];

/// One-line summary followed by the tail quantiles.
fn report(name: &str, unit: &str, hist: &Histogram<u64>) {
    println!(
        "\n{name}: {} samples, {}..{} {unit}, mean {:.1} {unit}",
        hist.len(),
        hist.min(),
        hist.max(),
        hist.mean()
    );
    let tail: Vec<String> = QUANTILES
        .iter()
        .map(|(label, q)| format!("{label}={}", hist.value_at_quantile(*q)))
        .collect();
    println!("  {} ({unit})", tail.join(" "));
}

/// Share of deliveries that landed within each whole resolution of their
/// due time. With truncating slots everything should fall in the first one.
fn report_resolution_buckets(hist: &Histogram<u64>, resolution: Duration) {
    let step = resolution.as_micros() as u64;
    let total = hist.len().max(1) as f64;
    for n in 1..=3u64 {
        let within = hist.count_between(0, n * step - 1);
        println!(
            "  within {n} x {resolution:?}: {:.2}%",
            100.0 * within as f64 / total
        );
    }
}

fn timeout(i: u64) -> Duration {
    Duration::from_millis((i % 500) + 10)
}

// ============================================================
// Wheel operations
// ============================================================

#[test]
#[ignore]
fn latency_wheel_insert() {
    let mut wheel = TimeWheel::new(Duration::from_secs(1), Duration::from_millis(1)).unwrap();
    let events: Vec<_> = (0..1024)
        .map(|i| Arc::new(TimeEvent::one_shot(timeout(i))))
        .collect();
    let mut hist = Histogram::<u64>::new(3).unwrap();

    for i in 0..WARMUP {
        let event = &events[(i % 1024) as usize];
        wheel.insert(Arc::clone(event)).unwrap();
        wheel.remove(event.id());
    }

    for i in 0..ITERATIONS {
        let event = &events[(i % 1024) as usize];

        let start = Instant::now();
        wheel.insert(Arc::clone(event)).unwrap();
        let elapsed = start.elapsed().as_nanos() as u64;

        hist.record(elapsed).unwrap();
        wheel.remove(event.id());
    }

    report("wheel insert", "ns", &hist);
}

#[test]
#[ignore]
fn latency_wheel_cancel() {
    let mut wheel = TimeWheel::new(Duration::from_secs(1), Duration::from_millis(1)).unwrap();
    let events: Vec<_> = (0..1024)
        .map(|i| Arc::new(TimeEvent::one_shot(timeout(i))))
        .collect();
    let mut hist = Histogram::<u64>::new(3).unwrap();

    for i in 0..(WARMUP + ITERATIONS) {
        let event = &events[(i % 1024) as usize];
        wheel.insert(Arc::clone(event)).unwrap();

        let start = Instant::now();
        wheel.remove(event.id());
        let elapsed = start.elapsed().as_nanos() as u64;

        if i >= WARMUP {
            hist.record(elapsed).unwrap();
        }
    }

    report("wheel cancel", "ns", &hist);
}

#[test]
#[ignore]
fn latency_wheel_advance_loaded() {
    let mut wheel = TimeWheel::new(Duration::from_secs(1), Duration::from_millis(1)).unwrap();
    let mut hist = Histogram::<u64>::new(3).unwrap();

    // Roughly 50 periodical events per bucket
    for i in 0..50_000u64 {
        let event = Arc::new(TimeEvent::periodical(Duration::from_millis(1 + i % 1000)));
        wheel.insert(event).unwrap();
    }

    let now = Instant::now();
    for i in 0..100_000u64 {
        let start = Instant::now();
        let fired = wheel.advance(now, true);
        let elapsed = start.elapsed().as_nanos() as u64;

        if i >= 10_000 {
            hist.record(elapsed).unwrap();
        }
        std::hint::black_box(fired);
    }

    report("wheel advance, 50k periodical", "ns", &hist);
}

// ============================================================
// Threaded delivery
// ============================================================

/// Records how late each notification arrived relative to its timeout.
struct LatenessObserver {
    lateness: Mutex<Histogram<u64>>,
}

impl TimeObserver for LatenessObserver {
    fn on_time_event(
        &self,
        _scheduler: &Scheduler,
        event: &Arc<TimeEvent>,
    ) -> Result<(), crate::ObserverError> {
        if let Some(init) = event.init_time() {
            let due = init + event.timeout();
            let late = Instant::now().saturating_duration_since(due);
            self.lateness
                .lock()
                .record(late.as_micros() as u64)
                .map_err(|err| format!("{err:?}"))?;
        }
        Ok(())
    }
}

#[test]
#[ignore]
fn latency_service_delivery() {
    let resolution = Duration::from_millis(1);
    let service =
        TimeService::new(TimeServiceConfig::new(Duration::from_secs(2), resolution)).unwrap();
    let observer = Arc::new(LatenessObserver {
        lateness: Mutex::new(Histogram::<u64>::new(3).unwrap()),
    });
    service.subscribe(Arc::clone(&observer) as Arc<dyn TimeObserver>);
    service.start().unwrap();

    for i in 0..20_000u64 {
        let event = Arc::new(TimeEvent::one_shot(Duration::from_millis(1 + i % 1000)));
        service.activate(&event).unwrap();
    }

    thread::sleep(Duration::from_millis(1200));
    service.stop();

    let lateness = observer.lateness.lock();
    report("service delivery lateness, 20k one-shot", "us", &lateness);
    report_resolution_buckets(&lateness, resolution);
}
