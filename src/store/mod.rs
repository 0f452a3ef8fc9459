//! Persistence contracts and backends.
//!
//! Each entity gets its own repository trait; `Store` bundles them
//! so collectors and the reconciler can share one handle.
//!
//! Upserts are keyed by natural uniqueness:
//! - pairs and fees by (exchange_id, original_pair)
//! - networks by (currency, network)
//! - dictionaries by currency name / pair symbol
//!
//! Upserts never touch reference columns, and reconciliation never
//! touches data columns, so both can run at the same time.

pub mod memory;
pub mod redis;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::StoreResult;
use crate::schema::{
    BalanceSnapshot, CanonicalPair, Currency, Exchange, ExchangeFee, FeeRow, Network, NetworkRow,
    NormalizedPair, PairColumn, PairRow,
};

/// Result of one dictionary reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DictionaryOutcome {
    /// Entries added to the dictionary by this pass, in id order
    pub inserted: Vec<String>,

    /// Dictionary size after the pass
    pub dictionary_size: usize,

    /// Rows whose references changed
    pub rows_updated: usize,
}

#[async_trait]
pub trait ExchangeRepository: Send + Sync {
    /// Returns the exchange id, creating the row with the given fee
    /// defaults on first reference.
    async fn get_or_create_exchange(
        &self,
        name: &str,
        maker_fee: f64,
        taker_fee: f64,
    ) -> StoreResult<i64>;

    async fn update_balance(&self, exchange_id: i64, balance: &BalanceSnapshot) -> StoreResult<()>;

    async fn get_exchange(&self, name: &str) -> StoreResult<Option<Exchange>>;
}

#[async_trait]
pub trait PairRepository: Send + Sync {
    /// Insert-or-update; returns the number of pairs written.
    async fn upsert_pairs(&self, exchange_id: i64, pairs: &[NormalizedPair]) -> StoreResult<usize>;

    /// All pair rows, or only those of one exchange.
    async fn list_pairs(&self, exchange_id: Option<i64>) -> StoreResult<Vec<PairRow>>;

    /// Distinct non-empty values of `column` across every exchange, sorted.
    async fn list_distinct(&self, column: PairColumn) -> StoreResult<Vec<String>>;
}

#[async_trait]
pub trait FeeRepository: Send + Sync {
    /// Creates an empty fee row for every pair of the exchange that has
    /// none yet. Returns the number of rows created.
    async fn seed_fees_from_pairs(&self, exchange_id: i64) -> StoreResult<usize>;

    /// Original symbols of the exchange's fee rows.
    async fn original_pairs(&self, exchange_id: i64) -> StoreResult<Vec<String>>;

    /// Updates fee values on existing rows, inserts the rest.
    async fn upsert_fees(&self, exchange_id: i64, fees: &[ExchangeFee]) -> StoreResult<usize>;

    async fn list_fees(&self, exchange_id: Option<i64>) -> StoreResult<Vec<FeeRow>>;
}

#[async_trait]
pub trait NetworkRepository: Send + Sync {
    async fn upsert_networks(&self, exchange_id: i64, networks: &[Network]) -> StoreResult<usize>;

    async fn list_networks(&self) -> StoreResult<Vec<NetworkRow>>;
}

#[async_trait]
pub trait DictionaryRepository: Send + Sync {
    async fn currencies(&self) -> StoreResult<Vec<Currency>>;

    async fn canonical_pairs(&self) -> StoreResult<Vec<CanonicalPair>>;

    /// Inserts absent currency names, then rewrites the currency
    /// references of every pair, fee and network row. Atomic.
    async fn reconcile_currencies(&self, names: &[String]) -> StoreResult<DictionaryOutcome>;

    /// Inserts absent pair symbols, then rewrites the pair reference
    /// of every pair and fee row. Atomic.
    async fn reconcile_canonical_pairs(&self, symbols: &[String]) -> StoreResult<DictionaryOutcome>;
}

/// Everything the pipeline needs from persistence.
#[async_trait]
pub trait Store:
    ExchangeRepository + PairRepository + FeeRepository + NetworkRepository + DictionaryRepository
{
    /// Flushes and releases the backend. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> StoreResult<()>;
}
