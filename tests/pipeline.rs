use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::sleep;

use metadata_collector::{
    collector::{Collector, StepOutcome},
    config::ExchangeConfig,
    error::FetchError,
    exchanges::adapter::ExchangeAdapter,
    health::{HealthMonitor, HealthStatus},
    request::{RequestExecutor, RetryPolicy},
    scheduler::Scheduler,
    schema::{BalanceSnapshot, ExchangeFee, Network, NormalizedPair},
    store::{ExchangeRepository, FeeRepository, MemoryStore, PairRepository, Store},
    util,
};

// ------------------------------------------------------------
// Scripted exchange
// ------------------------------------------------------------
//
// Pair fetches go through a real RequestExecutor so retries and
// health bookkeeping behave exactly as in production. Each call
// takes `latency` and fails with a transport error while `down`
// is set.
//
struct ScriptedExchange {
    name: &'static str,
    executor: RequestExecutor,
    pairs: Vec<NormalizedPair>,
    latency: Duration,
    down: AtomicBool,
    fees_down: bool,
}

impl ScriptedExchange {
    fn new(
        name: &'static str,
        health: &Arc<HealthMonitor>,
        pairs: Vec<NormalizedPair>,
        latency: Duration,
    ) -> Self {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        Self {
            name,
            executor: RequestExecutor::new(name, policy, health.clone()),
            pairs,
            latency,
            down: AtomicBool::new(false),
            fees_down: false,
        }
    }

    async fn call<T: Clone>(&self, value: &T) -> Result<T, FetchError> {
        sleep(self.latency).await;
        if self.down.load(Ordering::SeqCst) {
            return Err(FetchError::Connection("connection refused".into()));
        }
        Ok(value.clone())
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for ScriptedExchange {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_trading_pairs(&self) -> Result<Vec<NormalizedPair>, FetchError> {
        self.executor
            .execute("pairs", || self.call(&self.pairs))
            .await
    }

    async fn fetch_exchange_fees(&self, known: &[String]) -> Result<Vec<ExchangeFee>, FetchError> {
        if self.fees_down {
            return Err(FetchError::ExhaustedRetries {
                attempts: 3,
                last_error: Box::new(FetchError::Status {
                    status: 502,
                    body: "bad gateway".into(),
                }),
            });
        }
        Ok(self
            .pairs
            .iter()
            .filter(|p| known.contains(&p.original_pair))
            .map(|p| ExchangeFee {
                maker_fee: Some(0.0002),
                taker_fee: Some(0.0004),
                timestamp: Some(util::now()),
                ..ExchangeFee::seed_from(p)
            })
            .collect())
    }

    async fn fetch_currency_networks(&self) -> Result<Vec<Network>, FetchError> {
        Ok(vec![Network {
            currency: "USDT".into(),
            network: format!("{}-TRX", self.name),
            name: "Tron".into(),
            withdraw_fee: 1.0,
            min_withdraw: 10.0,
            deposit_enabled: true,
            withdraw_enabled: true,
            timestamp: util::now(),
        }])
    }

    async fn fetch_account_balance(&self) -> Result<BalanceSnapshot, FetchError> {
        Err(FetchError::Unsupported("scripted account balance"))
    }

    async fn close_session(&self) {}
}

fn pair(original: &str, base: &str, quote: &str) -> NormalizedPair {
    NormalizedPair {
        original_pair: original.to_string(),
        standardized_pair: util::standardize_pair(original),
        base_currency: base.to_string(),
        quote_currency: quote.to_string(),
        price: 1.0,
        volume: 1.0,
        bid: 1.0,
        ask: 1.0,
        bid_volume: 1.0,
        ask_volume: 1.0,
        timestamp: util::now(),
    }
}

fn exchange_config(name: &str) -> ExchangeConfig {
    ExchangeConfig {
        name: name.to_string(),
        enabled: true,
        maker_fee: 0.001,
        taker_fee: 0.001,
    }
}

// ------------------------------------------------------------
// Scenarios
// ------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failing_exchange_goes_down_while_healthy_one_keeps_flowing() {
    let health = Arc::new(HealthMonitor::new());
    let store = Arc::new(MemoryStore::new());

    let a = Arc::new(ScriptedExchange::new(
        "alpha",
        &health,
        vec![pair("BTC_USDT", "BTC", "USDT")],
        Duration::from_millis(50),
    ));
    let b = Arc::new(ScriptedExchange::new(
        "beta",
        &health,
        vec![pair("BTC-USDT", "BTC", "USDT"), pair("SOL-USDT", "SOL", "USDT")],
        Duration::from_millis(50),
    ));

    let collectors = vec![
        Collector::new(a.clone(), store.clone(), health.clone(), &exchange_config("alpha")),
        Collector::new(b.clone(), store.clone(), health.clone(), &exchange_config("beta")),
    ];
    let scheduler = Scheduler::new(
        collectors,
        store.clone(),
        Duration::from_secs(5),
        Duration::from_secs(1),
    );

    // cycle 1: both exchanges answer
    let first = scheduler.run_cycle().await;
    assert!(first.reports.iter().all(|r| r.succeeded()));

    let alpha_id = store.get_exchange("alpha").await.unwrap().unwrap().id;
    let alpha_rows = store.list_pairs(Some(alpha_id)).await.unwrap();
    assert_eq!(alpha_rows.len(), 1);
    assert!(alpha_rows[0].pair_id.is_some());

    // cycles 2..=5: alpha refuses every connection
    a.down.store(true, Ordering::SeqCst);
    for _ in 0..4 {
        let summary = scheduler.run_cycle().await;
        let alpha = summary.reports.iter().find(|r| r.exchange == "alpha").unwrap();
        assert!(alpha.pairs.is_failed());
        // later steps still ran
        assert_eq!(alpha.networks, StepOutcome::Succeeded(1));
    }

    assert_eq!(health.status_of("alpha"), HealthStatus::Down);
    let alpha_health = health.snapshot("alpha").unwrap();
    assert!(alpha_health.consecutive_errors >= 4);

    // beta: one request plus one cycle record per cycle, all at 50 ms
    assert_eq!(health.status_of("beta"), HealthStatus::Healthy);
    let beta_health = health.snapshot("beta").unwrap();
    assert_eq!(beta_health.request_count, 10);
    assert_eq!(beta_health.error_count, 0);
    assert!((beta_health.average_latency() - 50.0).abs() < 1.0);

    // alpha's rows from cycle 1 are exactly as they were
    assert_eq!(store.list_pairs(Some(alpha_id)).await.unwrap(), alpha_rows);

    // beta's rows are persisted and reconciled
    let beta_id = store.get_exchange("beta").await.unwrap().unwrap().id;
    let beta_rows = store.list_pairs(Some(beta_id)).await.unwrap();
    assert_eq!(beta_rows.len(), 2);
    for row in &beta_rows {
        assert!(row.base_currency_id.is_some());
        assert!(row.quote_currency_id.is_some());
        assert!(row.pair_id.is_some());
    }

    // BTC_USDT on alpha and BTC-USDT on beta share one canonical pair
    let beta_btc = beta_rows
        .iter()
        .find(|r| r.pair.standardized_pair == "BTCUSDT")
        .unwrap();
    assert_eq!(beta_btc.pair_id, alpha_rows[0].pair_id);

    let fees = store.list_fees(Some(beta_id)).await.unwrap();
    assert_eq!(fees.len(), 2);
    assert!(fees.iter().all(|f| f.fee.maker_fee == Some(0.0002) && f.pair_id.is_some()));
}

#[tokio::test(start_paused = true)]
async fn fee_outage_keeps_pairs_and_networks() {
    let health = Arc::new(HealthMonitor::new());
    let store = Arc::new(MemoryStore::new());

    let mut exchange = ScriptedExchange::new(
        "gamma",
        &health,
        vec![pair("ETH-USDT", "ETH", "USDT")],
        Duration::from_millis(10),
    );
    exchange.fees_down = true;

    let collector = Collector::new(
        Arc::new(exchange),
        store.clone(),
        health.clone(),
        &exchange_config("gamma"),
    );
    let report = collector.run_cycle().await;

    assert_eq!(report.pairs, StepOutcome::Succeeded(1));
    assert!(report.fees.is_failed());
    assert_eq!(report.networks, StepOutcome::Succeeded(1));
    assert!(matches!(report.balance, StepOutcome::Skipped(_)));

    // seeded fee row exists, without fee values
    let fees = store.list_fees(None).await.unwrap();
    assert_eq!(fees.len(), 1);
    assert_eq!(fees[0].fee.maker_fee, None);

    store.close().await.unwrap();
}
