use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info};

use crate::error::StoreResult;
use crate::schema::PairColumn;
use crate::store::{DictionaryOutcome, Store};

/// Outcome of both reconciliation passes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub currencies: DictionaryOutcome,
    pub canonical_pairs: DictionaryOutcome,
}

impl ReconcileReport {
    /// True when the run inserted nothing and rewrote nothing.
    pub fn is_noop(&self) -> bool {
        self.currencies.inserted.is_empty()
            && self.currencies.rows_updated == 0
            && self.canonical_pairs.inserted.is_empty()
            && self.canonical_pairs.rows_updated == 0
    }
}

/// Maintains the global currency and canonical pair dictionaries
/// and points every stored row at them.
///
/// Each pass reads all distinct values first, then hands them to a
/// single store call that inserts and rewrites atomically. Rows that
/// collectors add while a pass runs are picked up by the next one.
pub struct Reconciler {
    store: Arc<dyn Store>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> StoreResult<ReconcileReport> {
        let currencies = self.reconcile_currencies().await?;
        let canonical_pairs = self.reconcile_canonical_pairs().await?;

        let report = ReconcileReport {
            currencies,
            canonical_pairs,
        };

        info!(
            "reconcile: currencies={} (+{}) pairs={} (+{}) rows_updated={}",
            report.currencies.dictionary_size,
            report.currencies.inserted.len(),
            report.canonical_pairs.dictionary_size,
            report.canonical_pairs.inserted.len(),
            report.currencies.rows_updated + report.canonical_pairs.rows_updated,
        );
        if !report.currencies.inserted.is_empty() {
            debug!("reconcile: new currencies: {}", report.currencies.inserted.join(", "));
        }
        if !report.canonical_pairs.inserted.is_empty() {
            debug!("reconcile: new pairs: {}", report.canonical_pairs.inserted.join(", "));
        }

        Ok(report)
    }

    async fn reconcile_currencies(&self) -> StoreResult<DictionaryOutcome> {
        let bases = self.store.list_distinct(PairColumn::BaseCurrency).await?;
        let quotes = self.store.list_distinct(PairColumn::QuoteCurrency).await?;

        let names: Vec<String> = bases
            .into_iter()
            .chain(quotes)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.store.reconcile_currencies(&names).await
    }

    async fn reconcile_canonical_pairs(&self) -> StoreResult<DictionaryOutcome> {
        let symbols = self.store.list_distinct(PairColumn::StandardizedPair).await?;
        self.store.reconcile_canonical_pairs(&symbols).await
    }
}
