//! Scripted adapters and fixtures shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ExchangeConfig;
use crate::error::{FailureKind, FetchError};
use crate::exchanges::adapter::ExchangeAdapter;
use crate::schema::{BalanceSnapshot, ExchangeFee, Network, NormalizedPair};
use crate::util;

pub(crate) fn pair(original: &str, base: &str, quote: &str) -> NormalizedPair {
    NormalizedPair {
        original_pair: original.to_string(),
        standardized_pair: util::standardize_pair(original),
        base_currency: base.to_string(),
        quote_currency: quote.to_string(),
        price: 100.0,
        volume: 10.0,
        bid: 99.5,
        ask: 100.5,
        bid_volume: 1.0,
        ask_volume: 2.0,
        timestamp: util::now(),
    }
}

pub(crate) fn network(currency: &str, net: &str) -> Network {
    Network {
        currency: currency.to_string(),
        network: net.to_string(),
        name: net.to_string(),
        withdraw_fee: 1.0,
        min_withdraw: 10.0,
        deposit_enabled: true,
        withdraw_enabled: true,
        timestamp: util::now(),
    }
}

pub(crate) fn exchange_config(name: &str) -> ExchangeConfig {
    ExchangeConfig {
        name: name.to_string(),
        enabled: true,
        maker_fee: 0.001,
        taker_fee: 0.001,
    }
}

pub(crate) fn error_of(kind: FailureKind) -> FetchError {
    match kind {
        FailureKind::Connection => FetchError::Connection("connection reset".into()),
        FailureKind::Timeout => FetchError::Timeout(Duration::from_secs(10)),
        FailureKind::HttpStatus => FetchError::Status {
            status: 503,
            body: "unavailable".into(),
        },
        FailureKind::Malformed => FetchError::missing("symbols"),
        FailureKind::Unsupported => FetchError::Unsupported("scripted operation"),
        FailureKind::Exhausted => FetchError::ExhaustedRetries {
            attempts: 3,
            last_error: Box::new(FetchError::Connection("connection reset".into())),
        },
    }
}

/// Adapter whose answers are fixed up front.
///
/// Defaults: no pairs, a 0.001/0.001 fee for every known pair,
/// networks and balance unsupported.
pub(crate) struct FakeAdapter {
    name: String,
    pairs: Result<Vec<NormalizedPair>, FailureKind>,
    fees: Option<FailureKind>,
    networks: Result<Vec<Network>, FailureKind>,
    balance: Result<f64, FailureKind>,
    calls: Mutex<Vec<&'static str>>,
    known: Mutex<Vec<String>>,
    closed: AtomicUsize,
}

impl FakeAdapter {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pairs: Ok(Vec::new()),
            fees: None,
            networks: Err(FailureKind::Unsupported),
            balance: Err(FailureKind::Unsupported),
            calls: Mutex::new(Vec::new()),
            known: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_pairs(mut self, pairs: Vec<NormalizedPair>) -> Self {
        self.pairs = Ok(pairs);
        self
    }

    pub(crate) fn failing_pairs(mut self, kind: FailureKind) -> Self {
        self.pairs = Err(kind);
        self
    }

    pub(crate) fn failing_fees(mut self, kind: FailureKind) -> Self {
        self.fees = Some(kind);
        self
    }

    pub(crate) fn with_networks(mut self, networks: Vec<Network>) -> Self {
        self.networks = Ok(networks);
        self
    }

    pub(crate) fn with_balance(mut self, usdt: f64) -> Self {
        self.balance = Ok(usdt);
        self
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub(crate) fn known_pairs(&self) -> Vec<String> {
        self.known.lock().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_trading_pairs(&self) -> Result<Vec<NormalizedPair>, FetchError> {
        self.calls.lock().push("pairs");
        self.pairs.clone().map_err(error_of)
    }

    async fn fetch_exchange_fees(&self, known: &[String]) -> Result<Vec<ExchangeFee>, FetchError> {
        self.calls.lock().push("fees");
        *self.known.lock() = known.to_vec();

        if let Some(kind) = self.fees {
            return Err(error_of(kind));
        }

        let pairs = self.pairs.clone().unwrap_or_default();
        Ok(pairs
            .iter()
            .filter(|p| known.contains(&p.original_pair))
            .map(|p| ExchangeFee {
                maker_fee: Some(0.001),
                taker_fee: Some(0.001),
                timestamp: Some(util::now()),
                ..ExchangeFee::seed_from(p)
            })
            .collect())
    }

    async fn fetch_currency_networks(&self) -> Result<Vec<Network>, FetchError> {
        self.calls.lock().push("networks");
        self.networks.clone().map_err(error_of)
    }

    async fn fetch_account_balance(&self) -> Result<BalanceSnapshot, FetchError> {
        self.calls.lock().push("balance");
        self.balance
            .map(|usdt| BalanceSnapshot {
                usdt_balance: usdt,
                spot_balance_usdt: usdt,
                futures_balance_usdt: None,
                fetched_at: util::now(),
            })
            .map_err(error_of)
    }

    async fn close_session(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
