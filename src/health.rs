use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Number of latency samples kept per exchange.
pub const LATENCY_WINDOW: usize = 100;

/// Number of error entries kept per exchange.
pub const ERROR_WINDOW: usize = 20;

/// Limits used to classify an exchange.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Consecutive failures that mark an exchange as down
    pub consecutive_errors: u32,

    /// Error ratio above which an exchange is degraded
    pub error_rate: f64,

    /// Average latency (ms) above which an exchange is degraded
    pub max_latency_ms: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            consecutive_errors: 3,
            error_rate: 0.3,
            max_latency_ms: 2000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Down,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub message: Option<String>,
}

// ------------------------------------------------------------
// Per-exchange record
// ------------------------------------------------------------
//
// Lives for the whole process, never persisted. Windows are
// bounded so a long-running process keeps constant memory.
//
#[derive(Debug, Clone, Default)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub latencies: VecDeque<f64>,
    pub errors: VecDeque<ErrorEntry>,
    pub consecutive_errors: u32,
    pub request_count: u64,
    pub error_count: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl HealthRecord {
    pub fn average_latency(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        self.latencies.iter().sum::<f64>() / self.latencies.len() as f64
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.request_count as f64
    }

    fn record(&mut self, success: bool, latency_ms: f64, error: Option<&str>) {
        self.request_count += 1;

        self.latencies.push_back(latency_ms);
        if self.latencies.len() > LATENCY_WINDOW {
            self.latencies.pop_front();
        }

        let now = Utc::now();
        if success {
            self.consecutive_errors = 0;
            self.last_success = Some(now);
        } else {
            self.error_count += 1;
            self.consecutive_errors += 1;
            self.last_failure = Some(now);
            self.errors.push_back(ErrorEntry {
                at: now,
                message: error.map(str::to_string),
            });
            if self.errors.len() > ERROR_WINDOW {
                self.errors.pop_front();
            }
        }
    }

    /// Precedence: consecutive failures, then error rate, then latency.
    fn classify(&self, limits: &Thresholds) -> HealthStatus {
        if self.consecutive_errors >= limits.consecutive_errors {
            HealthStatus::Down
        } else if self.request_count > 0 && self.error_rate() > limits.error_rate {
            HealthStatus::Degraded
        } else if self.average_latency() > limits.max_latency_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Aggregate view logged by the reporter task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSummary {
    pub healthy: usize,
    pub unknown: usize,
    pub degraded: Vec<String>,
    pub down: Vec<String>,
}

// ------------------------------------------------------------
// Health monitor
// ------------------------------------------------------------
//
// Created once at startup and shared as Arc<HealthMonitor> with
// every request executor and collector.
//
// Locking:
// - The outer map lock is only held to find or insert a record.
// - Each exchange record has its own mutex, so exchanges never
//   contend with each other.
// - No lock is held across an await point.
//
#[derive(Debug, Default)]
pub struct HealthMonitor {
    thresholds: Thresholds,
    records: RwLock<HashMap<String, Arc<Mutex<HealthRecord>>>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Starts tracking an exchange. Calling it twice is a no-op.
    pub fn register(&self, exchange: &str) {
        self.record_for(exchange);
    }

    fn record_for(&self, exchange: &str) -> Arc<Mutex<HealthRecord>> {
        if let Some(rec) = self.records.read().get(exchange) {
            return rec.clone();
        }

        let mut records = self.records.write();
        records
            .entry(exchange.to_string())
            .or_insert_with(|| {
                info!("health: tracking exchange={}", exchange);
                Arc::new(Mutex::new(HealthRecord::default()))
            })
            .clone()
    }

    /// Records the outcome of a single request and recomputes status.
    pub fn record_request(
        &self,
        exchange: &str,
        success: bool,
        latency_ms: f64,
        error: Option<&str>,
    ) {
        let rec = self.record_for(exchange);
        let mut rec = rec.lock();

        let previous = rec.status;
        rec.record(success, latency_ms, error);
        rec.status = rec.classify(&self.thresholds);

        if rec.status != previous {
            match rec.status {
                HealthStatus::Down => warn!(
                    "health: exchange={} is down after {} consecutive errors",
                    exchange, rec.consecutive_errors
                ),
                HealthStatus::Degraded => warn!(
                    "health: exchange={} degraded error_rate={:.1}% avg_latency_ms={:.1}",
                    exchange,
                    rec.error_rate() * 100.0,
                    rec.average_latency()
                ),
                HealthStatus::Healthy if previous != HealthStatus::Unknown => {
                    info!("health: exchange={} recovered", exchange)
                }
                _ => {}
            }
        }
    }

    pub fn status_of(&self, exchange: &str) -> HealthStatus {
        self.records
            .read()
            .get(exchange)
            .map(|rec| rec.lock().status)
            .unwrap_or_default()
    }

    /// Full copy of an exchange's record.
    pub fn snapshot(&self, exchange: &str) -> Option<HealthRecord> {
        self.records
            .read()
            .get(exchange)
            .map(|rec| rec.lock().clone())
    }

    pub fn statuses(&self) -> BTreeMap<String, HealthStatus> {
        self.records
            .read()
            .iter()
            .map(|(name, rec)| (name.clone(), rec.lock().status))
            .collect()
    }

    pub fn summary(&self) -> HealthSummary {
        let mut summary = HealthSummary::default();
        for (name, status) in self.statuses() {
            match status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Unknown => summary.unknown += 1,
                HealthStatus::Degraded => summary.degraded.push(name),
                HealthStatus::Down => summary.down.push(name),
            }
        }
        summary
    }

    /// Logs one summary line (plus degraded/down names when present).
    pub fn report(&self) {
        let summary = self.summary();

        info!(
            "[HEALTH] healthy={} degraded={} down={} unknown={}",
            summary.healthy,
            summary.degraded.len(),
            summary.down.len(),
            summary.unknown,
        );

        if !summary.degraded.is_empty() {
            warn!("[HEALTH] degraded exchanges: {}", summary.degraded.join(", "));
        }
        if !summary.down.is_empty() {
            error!("[HEALTH] unavailable exchanges: {}", summary.down.join(", "));
        }
    }

    /// Spawns the periodic reporter.
    ///
    /// The task only logs. It exits as soon as `shutdown` flips to
    /// true or its sender is dropped.
    pub fn spawn_reporter(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            info!("health: reporter started interval_secs={}", every.as_secs());
            let mut ticker = tokio::time::interval(every);

            loop {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => monitor.report(),
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            info!("health: reporter stopped");
        })
    }
}
