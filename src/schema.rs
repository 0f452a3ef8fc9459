use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------
// Exchange
// ------------------------------------------------------------
//
// One row per exchange, created the first time a collector
// references it and updated on every balance fetch. Never
// deleted.
//
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: i64,

    /// Unique exchange name as reported by the adapter
    pub name: String,

    /// Default maker fee used until per-pair fees are known
    pub maker_fee: f64,

    /// Default taker fee used until per-pair fees are known
    pub taker_fee: f64,

    /// Latest balance snapshot, if credentials allowed fetching one
    pub balance: Option<BalanceSnapshot>,
}

/// Account balance totals, all expressed in USDT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Free USDT only
    pub usdt_balance: f64,

    /// All spot assets (free + locked) valued in USDT
    pub spot_balance_usdt: f64,

    /// Futures wallet total, when the adapter can see it
    pub futures_balance_usdt: Option<f64>,

    pub fetched_at: DateTime<Utc>,
}

// ------------------------------------------------------------
// Trading pair snapshot
// ------------------------------------------------------------
//
// Produced by adapters, one per listed symbol. The table is a
// current-snapshot cache keyed by (exchange, original_pair), so
// every cycle overwrites the previous values in place.
//
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPair {
    /// Exchange-specific symbol, e.g. "BTC-USDT"
    pub original_pair: String,

    /// Cross-exchange symbol, e.g. "BTCUSDT"
    pub standardized_pair: String,

    pub base_currency: String,
    pub quote_currency: String,

    pub price: f64,
    pub volume: f64,
    pub bid: f64,
    pub ask: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,

    pub timestamp: DateTime<Utc>,
}

/// A stored pair plus the references filled in by reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRow {
    pub exchange_id: i64,
    pub pair: NormalizedPair,
    pub base_currency_id: Option<i64>,
    pub quote_currency_id: Option<i64>,
    pub pair_id: Option<i64>,
}

// ------------------------------------------------------------
// Trading fees
// ------------------------------------------------------------
//
// Fee rows are seeded from the pair table before any fee fetch
// succeeds, which is why the fee values are optional.
//
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeFee {
    pub original_pair: String,
    pub standardized_pair: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub maker_fee: Option<f64>,
    pub taker_fee: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ExchangeFee {
    /// Fee row with identity copied from a pair and no fee values yet.
    pub fn seed_from(pair: &NormalizedPair) -> Self {
        Self {
            original_pair: pair.original_pair.clone(),
            standardized_pair: pair.standardized_pair.clone(),
            base_currency: pair.base_currency.clone(),
            quote_currency: pair.quote_currency.clone(),
            maker_fee: None,
            taker_fee: None,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRow {
    pub exchange_id: i64,
    pub fee: ExchangeFee,
    pub base_currency_id: Option<i64>,
    pub quote_currency_id: Option<i64>,
    pub pair_id: Option<i64>,
}

// ------------------------------------------------------------
// Withdrawal networks
// ------------------------------------------------------------
//
// NOTE:
// Rows are unique on (currency, network) only. Two exchanges
// reporting the same currency/network overwrite each other.
//
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub currency: String,

    /// Exchange network identifier, e.g. "TRX", "ETH", "BSC"
    pub network: String,

    /// Human readable network name
    pub name: String,

    pub withdraw_fee: f64,
    pub min_withdraw: f64,
    pub deposit_enabled: bool,
    pub withdraw_enabled: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRow {
    /// Exchange that last wrote this (currency, network) row
    pub exchange_id: i64,
    pub network: Network,
    pub currency_id: Option<i64>,
}

// ------------------------------------------------------------
// Global dictionaries
// ------------------------------------------------------------

/// Append-only currency dictionary entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub id: i64,
    pub name: String,
}

/// Append-only canonical pair dictionary entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalPair {
    pub id: i64,
    pub symbol: String,
}

/// Pair table columns that reconciliation scans for distinct values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairColumn {
    BaseCurrency,
    QuoteCurrency,
    StandardizedPair,
}

impl PairColumn {
    pub fn value_of<'a>(&self, pair: &'a NormalizedPair) -> &'a str {
        match self {
            PairColumn::BaseCurrency => &pair.base_currency,
            PairColumn::QuoteCurrency => &pair.quote_currency,
            PairColumn::StandardizedPair => &pair.standardized_pair,
        }
    }
}
