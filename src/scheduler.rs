//! Background check-in monitor: periodic scan trigger.
//!
//! Spawns a thread that runs a monitoring pass right away and then once
//! per interval. Events reach the engine's alert sink. The thread stops
//! on `shutdown()` or when the handle is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::CareEngine;

/// Sleep granularity for shutdown responsiveness.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(250);

/// Handle for the background monitor thread.
///
/// Supports graceful shutdown via `shutdown()` or automatic cleanup on `Drop`.
pub struct MonitorHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl MonitorHandle {
    /// Request graceful shutdown. A pass in progress completes first.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Start the background monitor, scanning every `interval`.
pub fn start_background_monitor(engine: Arc<CareEngine>, interval: Duration) -> MonitorHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = std::thread::spawn(move || {
        tracing::info!(interval_secs = interval.as_secs(), "Background check-in monitor started");
        monitor_loop(&engine, interval, &flag);
        tracing::info!("Background check-in monitor shutting down");
    });

    MonitorHandle {
        shutdown,
        handle: Some(handle),
    }
}

/// Start the background monitor with the engine's configured interval.
pub fn start_configured_monitor(engine: Arc<CareEngine>) -> MonitorHandle {
    let interval = engine.config().scan_interval();
    start_background_monitor(engine, interval)
}

fn monitor_loop(engine: &CareEngine, interval: Duration, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        match engine.scan_now() {
            Ok(report) if !report.failures.is_empty() => {
                tracing::warn!(failures = report.failures.len(), "Monitor pass finished with failures");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Monitor pass failed"),
        }

        let deadline = Instant::now() + interval;
        while Instant::now() < deadline {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(SLEEP_GRANULARITY.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::CollectingSink;
    use crate::config::EngineConfig;
    use crate::models::enums::AlertEventKind;
    use crate::models::CircleConfig;

    fn watched_engine(sink: Arc<CollectingSink>) -> Arc<CareEngine> {
        let engine = CareEngine::open_in_memory(EngineConfig::default())
            .unwrap()
            .with_sink(sink);
        let recipient = engine.register_user("Grandpa").unwrap();
        let member = engine.register_user("Lee").unwrap();
        // Threshold 0 with no check-in on record: overdue immediately.
        let config = CircleConfig {
            missed_check_in_threshold: 0,
            ..Default::default()
        };
        engine
            .create_circle(recipient.id, &[member.id], Some(config))
            .unwrap();
        Arc::new(engine)
    }

    #[test]
    fn first_pass_runs_immediately() {
        let sink = Arc::new(CollectingSink::new());
        let engine = watched_engine(sink.clone());
        let handle = start_background_monitor(engine, Duration::from_secs(3600));

        let started = Instant::now();
        while sink.is_empty() && started.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(10));
        }
        drop(handle);

        let events = sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::MissedCheckInCreated);
    }

    #[test]
    fn shutdown_stops_the_thread() {
        let sink = Arc::new(CollectingSink::new());
        let engine = watched_engine(sink);
        let handle = start_background_monitor(engine, Duration::from_secs(3600));
        handle.shutdown();

        let started = Instant::now();
        while handle.is_running() && started.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!handle.is_running());
    }

    #[test]
    fn repeated_passes_do_not_duplicate_alerts() {
        let sink = Arc::new(CollectingSink::new());
        let engine = watched_engine(sink.clone());
        let handle = start_background_monitor(engine.clone(), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(200));
        drop(handle);

        let circles = engine.list_monitored_circles().unwrap();
        let alerts = engine.list_alerts_for_circle(&circles[0].id).unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(!alerts[0].acknowledged);
    }
}
