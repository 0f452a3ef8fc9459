use std::sync::Arc;

use log::{debug, error, info};
use tokio::time::Instant;

use crate::{
    config::ExchangeConfig,
    error::{FetchError, StoreError},
    exchanges::adapter::ExchangeAdapter,
    health::HealthMonitor,
    store::Store,
};

use super::{CycleReport, StepOutcome};

/// Runs collection cycles for a single exchange.
///
/// One cycle walks a fixed sequence:
///   pairs → fees → networks → balance
/// where each step is fetch-then-persist.
///
/// DESIGN:
/// - Every step is guarded on its own
/// - A failed fetch skips only its own persist
/// - `FetchError::Unsupported` means "nothing to do", not a failure
///
/// This type does NOT:
/// - Retry (the adapter's request executor does that)
/// - Reconcile dictionaries (runs once per cycle set, see `reconcile`)
///
pub struct Collector {
    adapter: Arc<dyn ExchangeAdapter>,
    store: Arc<dyn Store>,
    health: Arc<HealthMonitor>,
    maker_fee: f64,
    taker_fee: f64,
}

impl Collector {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        store: Arc<dyn Store>,
        health: Arc<HealthMonitor>,
        cfg: &ExchangeConfig,
    ) -> Self {
        health.register(adapter.name());
        Self {
            adapter,
            store,
            health,
            maker_fee: cfg.maker_fee,
            taker_fee: cfg.taker_fee,
        }
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    /// Runs one full cycle. Never fails; failures land in the report.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let name = self.name().to_string();

        let report = match self
            .store
            .get_or_create_exchange(&name, self.maker_fee, self.taker_fee)
            .await
        {
            Ok(exchange_id) => CycleReport {
                pairs: self.collect_pairs(exchange_id).await,
                fees: self.collect_fees(exchange_id).await,
                networks: self.collect_networks(exchange_id).await,
                balance: self.collect_balance(exchange_id).await,
                exchange: name,
                elapsed: started.elapsed(),
            },
            Err(err) => {
                // nothing can be persisted without the exchange row
                error!("collector: exchange={} cannot resolve exchange row: {}", name, err);
                let failed = StepOutcome::Failed(err.to_string());
                CycleReport {
                    pairs: failed.clone(),
                    fees: failed.clone(),
                    networks: failed.clone(),
                    balance: failed,
                    exchange: name,
                    elapsed: started.elapsed(),
                }
            }
        };

        let latency_ms = report.elapsed.as_secs_f64() * 1000.0;
        let failure = report.first_failure();
        self.health
            .record_request(&report.exchange, report.succeeded(), latency_ms, failure.as_deref());

        info!(
            "collector: exchange={} cycle done pairs={} fees={} networks={} balance={} elapsed_ms={:.0}",
            report.exchange, report.pairs, report.fees, report.networks, report.balance, latency_ms
        );

        report
    }

    /// Releases the adapter's transport. Call once, at teardown.
    pub async fn close(&self) {
        self.adapter.close_session().await;
    }

    // --------------------------------------------------
    // Steps
    // --------------------------------------------------

    async fn collect_pairs(&self, exchange_id: i64) -> StepOutcome {
        let pairs = match self.adapter.fetch_trading_pairs().await {
            Ok(pairs) => pairs,
            Err(err) => return self.fetch_failed("pairs", err),
        };

        let written = match self.store.upsert_pairs(exchange_id, &pairs).await {
            Ok(n) => n,
            Err(err) => return self.persist_failed("pairs", err),
        };

        // every pair gets a fee row, even before fees are fetched
        match self.store.seed_fees_from_pairs(exchange_id).await {
            Ok(0) => {}
            Ok(seeded) => debug!("collector: exchange={} seeded {} fee rows", self.name(), seeded),
            Err(err) => return self.persist_failed("fee seeding", err),
        }

        StepOutcome::Succeeded(written)
    }

    async fn collect_fees(&self, exchange_id: i64) -> StepOutcome {
        let known = match self.store.original_pairs(exchange_id).await {
            Ok(known) => known,
            Err(err) => return self.persist_failed("fees", err),
        };

        let fees = match self.adapter.fetch_exchange_fees(&known).await {
            Ok(fees) => fees,
            Err(err) => return self.fetch_failed("fees", err),
        };

        match self.store.upsert_fees(exchange_id, &fees).await {
            Ok(n) => StepOutcome::Succeeded(n),
            Err(err) => self.persist_failed("fees", err),
        }
    }

    async fn collect_networks(&self, exchange_id: i64) -> StepOutcome {
        let networks = match self.adapter.fetch_currency_networks().await {
            Ok(networks) => networks,
            Err(err) => return self.fetch_failed("networks", err),
        };

        match self.store.upsert_networks(exchange_id, &networks).await {
            Ok(n) => StepOutcome::Succeeded(n),
            Err(err) => self.persist_failed("networks", err),
        }
    }

    async fn collect_balance(&self, exchange_id: i64) -> StepOutcome {
        let balance = match self.adapter.fetch_account_balance().await {
            Ok(balance) => balance,
            Err(err) => return self.fetch_failed("balance", err),
        };

        match self.store.update_balance(exchange_id, &balance).await {
            Ok(()) => StepOutcome::Succeeded(1),
            Err(err) => self.persist_failed("balance", err),
        }
    }

    fn fetch_failed(&self, step: &str, err: FetchError) -> StepOutcome {
        match err {
            FetchError::Unsupported(what) => {
                debug!("collector: exchange={} step={} skipped: {} is not supported", self.name(), step, what);
                StepOutcome::Skipped(what.to_string())
            }
            err => {
                error!("collector: exchange={} step={} fetch failed: {}", self.name(), step, err);
                StepOutcome::Failed(err.to_string())
            }
        }
    }

    fn persist_failed(&self, step: &str, err: StoreError) -> StepOutcome {
        error!("collector: exchange={} step={} persist failed: {}", self.name(), step, err);
        StepOutcome::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::health::HealthStatus;
    use crate::store::{
        ExchangeRepository, FeeRepository, MemoryStore, NetworkRepository, PairRepository, Store,
    };
    use crate::testing::{FakeAdapter, exchange_config, network, pair};

    fn collector(adapter: Arc<FakeAdapter>, store: Arc<MemoryStore>) -> (Collector, Arc<HealthMonitor>) {
        let health = Arc::new(HealthMonitor::new());
        let cfg = exchange_config(adapter.name());
        (Collector::new(adapter, store, health.clone(), &cfg), health)
    }

    #[tokio::test]
    async fn fee_failure_does_not_stop_later_steps() {
        let adapter = Arc::new(
            FakeAdapter::new("binance")
                .with_pairs(vec![pair("BTCUSDT", "BTC", "USDT"), pair("ETHUSDT", "ETH", "USDT")])
                .failing_fees(FailureKind::Exhausted)
                .with_networks(vec![network("USDT", "TRX")])
                .with_balance(250.0),
        );
        let store = Arc::new(MemoryStore::new());
        let (collector, health) = collector(adapter.clone(), store.clone());

        let report = collector.run_cycle().await;

        assert_eq!(report.pairs, StepOutcome::Succeeded(2));
        assert!(report.fees.is_failed());
        assert_eq!(report.networks, StepOutcome::Succeeded(1));
        assert_eq!(report.balance, StepOutcome::Succeeded(1));
        assert!(!report.succeeded());

        assert_eq!(
            adapter.calls(),
            vec!["pairs", "fees", "networks", "balance"]
        );

        let id = store.get_exchange("binance").await.unwrap().unwrap().id;
        assert_eq!(store.list_pairs(Some(id)).await.unwrap().len(), 2);
        assert_eq!(store.list_networks().await.unwrap().len(), 1);

        let exchange = store.get_exchange("binance").await.unwrap().unwrap();
        assert_eq!(exchange.balance.unwrap().usdt_balance, 250.0);

        let rec = health.snapshot("binance").unwrap();
        assert_eq!(rec.error_count, 1);
    }

    #[tokio::test]
    async fn fees_are_fetched_for_seeded_pairs() {
        let adapter = Arc::new(
            FakeAdapter::new("binance").with_pairs(vec![pair("BTCUSDT", "BTC", "USDT")]),
        );
        let store = Arc::new(MemoryStore::new());
        let (collector, _) = collector(adapter.clone(), store.clone());

        collector.run_cycle().await;

        assert_eq!(adapter.known_pairs(), vec!["BTCUSDT".to_string()]);
        let fees = store.list_fees(None).await.unwrap();
        assert_eq!(fees.len(), 1);
        assert_eq!(fees[0].fee.maker_fee, Some(0.001));
    }

    #[tokio::test]
    async fn unsupported_steps_are_skipped() {
        let adapter = Arc::new(
            FakeAdapter::new("kucoin").with_pairs(vec![pair("BTC-USDT", "BTC", "USDT")]),
        );
        let store = Arc::new(MemoryStore::new());
        let (collector, health) = collector(adapter, store);

        let report = collector.run_cycle().await;

        assert!(matches!(report.networks, StepOutcome::Skipped(_)));
        assert!(matches!(report.balance, StepOutcome::Skipped(_)));
        assert!(report.succeeded());
        assert_eq!(health.status_of("kucoin"), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn pair_failure_skips_persist_but_not_the_rest() {
        let adapter = Arc::new(
            FakeAdapter::new("binance")
                .failing_pairs(FailureKind::Malformed)
                .with_networks(vec![network("BTC", "BTC")]),
        );
        let store = Arc::new(MemoryStore::new());
        let (collector, _) = collector(adapter.clone(), store.clone());

        let report = collector.run_cycle().await;

        assert!(report.pairs.is_failed());
        // no pairs means no seeded fee rows, so the fee fetch sees nothing
        assert_eq!(report.fees, StepOutcome::Succeeded(0));
        assert_eq!(report.networks, StepOutcome::Succeeded(1));
        assert!(store.list_pairs(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_store_fails_every_step() {
        let adapter = Arc::new(FakeAdapter::new("binance"));
        let store = Arc::new(MemoryStore::new());
        store.close().await.unwrap();
        let (collector, _) = collector(adapter.clone(), store);

        let report = collector.run_cycle().await;

        assert!(report.steps().iter().all(|(_, s)| s.is_failed()));
        assert!(adapter.calls().is_empty());
    }

}
