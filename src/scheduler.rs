use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use log::{error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

use crate::collector::{Collector, CycleReport};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::store::Store;

/// Pause before the next cycle: whatever is left of the interval,
/// but never less than `minimum`.
pub fn sleep_time(interval: Duration, minimum: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(minimum)
}

/// Result of one scheduler iteration.
#[derive(Debug)]
pub struct CycleSummary {
    pub reports: Vec<CycleReport>,
    pub reconcile: Option<ReconcileReport>,
    pub elapsed: Duration,
}

// ------------------------------------------------------------
// Scheduler
// ------------------------------------------------------------
//
// Drives the whole pipeline:
//
//   loop {
//     all collectors, concurrently
//     reconcile
//     sleep (interruptible)
//   }
//
// An in-flight cycle is never aborted; shutdown is observed
// before each cycle and during the sleep.
//
pub struct Scheduler {
    collectors: Vec<Collector>,
    reconciler: Reconciler,
    store: Arc<dyn Store>,
    interval: Duration,
    minimum_sleep: Duration,
    reporter: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        collectors: Vec<Collector>,
        store: Arc<dyn Store>,
        interval: Duration,
        minimum_sleep: Duration,
    ) -> Self {
        Self {
            collectors,
            reconciler: Reconciler::new(store.clone()),
            store,
            interval,
            minimum_sleep,
            reporter: None,
        }
    }

    /// Hands over the health reporter task so teardown can join it.
    pub fn with_reporter(mut self, reporter: JoinHandle<()>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// One iteration: every collector, then reconciliation.
    pub async fn run_cycle(&self) -> CycleSummary {
        let started = Instant::now();

        let reports = join_all(self.collectors.iter().map(|c| c.run_cycle())).await;

        let reconcile = match self.reconciler.run().await {
            Ok(report) => Some(report),
            Err(err) => {
                error!("scheduler: reconciliation failed: {}", err);
                None
            }
        };

        let failed: Vec<&str> = reports
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.exchange.as_str())
            .collect();
        if !failed.is_empty() {
            warn!("scheduler: cycle finished with failures exchanges={}", failed.join(","));
        }

        CycleSummary {
            reports,
            reconcile,
            elapsed: started.elapsed(),
        }
    }

    /// Runs until `shutdown` flips to true (or its sender is dropped),
    /// then tears everything down. Returns the number of cycles run.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> usize {
        info!(
            "scheduler: starting collectors={} interval_secs={} minimum_sleep_secs={}",
            self.collectors.len(),
            self.interval.as_secs(),
            self.minimum_sleep.as_secs()
        );

        let mut cycles = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let summary = self.run_cycle().await;
            cycles += 1;

            let pause = sleep_time(self.interval, self.minimum_sleep, summary.elapsed);
            info!(
                "scheduler: cycle={} took_ms={} next_in_ms={}",
                cycles,
                summary.elapsed.as_millis(),
                pause.as_millis()
            );

            tokio::select! {
                _ = sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        cycles
    }

    /// Teardown order: reporter, adapters, store.
    async fn shutdown(&mut self) {
        info!("scheduler: shutting down");

        if let Some(reporter) = self.reporter.take() {
            if let Err(err) = reporter.await {
                warn!("scheduler: health reporter ended abnormally: {}", err);
            }
        }

        for collector in &self.collectors {
            collector.close().await;
        }

        if let Err(err) = self.store.close().await {
            error!("scheduler: failed to close store: {}", err);
        }

        info!("scheduler: stopped");
    }
}
