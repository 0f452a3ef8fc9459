use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;

use super::{
    DictionaryOutcome, DictionaryRepository, ExchangeRepository, FeeRepository, NetworkRepository,
    PairRepository, Store,
};
use crate::error::{StoreError, StoreResult};
use crate::schema::{
    BalanceSnapshot, CanonicalPair, Currency, Exchange, ExchangeFee, FeeRow, Network, NetworkRow,
    NormalizedPair, PairColumn, PairRow,
};

#[derive(Debug, Default)]
struct Tables {
    exchanges: BTreeMap<String, Exchange>,
    pairs: BTreeMap<(i64, String), PairRow>,
    fees: BTreeMap<(i64, String), FeeRow>,
    networks: BTreeMap<(String, String), NetworkRow>,
    currencies: BTreeMap<String, i64>,
    canonical_pairs: BTreeMap<String, i64>,
    closed: bool,
}

/// Process-local store.
///
/// All tables sit behind one mutex that is never held across an
/// await, so every method is a single atomic step. Used by tests
/// and by `"backend": "memory"` deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> StoreResult<T> {
        let mut tables = self.tables.lock();
        if tables.closed {
            return Err(StoreError::Closed);
        }
        Ok(f(&mut *tables))
    }
}

/// Appends absent names with the next free ids, in sorted order.
fn extend_dictionary(dict: &mut BTreeMap<String, i64>, names: &[String]) -> Vec<String> {
    let wanted: BTreeSet<&String> = names.iter().filter(|n| !n.is_empty()).collect();
    let mut next = dict.values().copied().max().unwrap_or(0) + 1;
    let mut inserted = Vec::new();

    for name in wanted {
        if !dict.contains_key(name) {
            dict.insert(name.clone(), next);
            inserted.push(name.clone());
            next += 1;
        }
    }
    inserted
}

fn assign(slot: &mut Option<i64>, value: Option<i64>) -> bool {
    if *slot != value {
        *slot = value;
        true
    } else {
        false
    }
}

#[async_trait]
impl ExchangeRepository for MemoryStore {
    async fn get_or_create_exchange(
        &self,
        name: &str,
        maker_fee: f64,
        taker_fee: f64,
    ) -> StoreResult<i64> {
        self.with(|t| {
            if let Some(ex) = t.exchanges.get(name) {
                return ex.id;
            }
            let id = t.exchanges.len() as i64 + 1;
            t.exchanges.insert(
                name.to_string(),
                Exchange {
                    id,
                    name: name.to_string(),
                    maker_fee,
                    taker_fee,
                    balance: None,
                },
            );
            debug!("store: created exchange={} id={}", name, id);
            id
        })
    }

    async fn update_balance(&self, exchange_id: i64, balance: &BalanceSnapshot) -> StoreResult<()> {
        self.with(|t| {
            if let Some(ex) = t.exchanges.values_mut().find(|e| e.id == exchange_id) {
                ex.balance = Some(balance.clone());
            }
        })
    }

    async fn get_exchange(&self, name: &str) -> StoreResult<Option<Exchange>> {
        self.with(|t| t.exchanges.get(name).cloned())
    }
}

#[async_trait]
impl PairRepository for MemoryStore {
    async fn upsert_pairs(&self, exchange_id: i64, pairs: &[NormalizedPair]) -> StoreResult<usize> {
        self.with(|t| {
            for pair in pairs {
                let key = (exchange_id, pair.original_pair.clone());
                match t.pairs.get_mut(&key) {
                    Some(row) => row.pair = pair.clone(),
                    None => {
                        t.pairs.insert(
                            key,
                            PairRow {
                                exchange_id,
                                pair: pair.clone(),
                                base_currency_id: None,
                                quote_currency_id: None,
                                pair_id: None,
                            },
                        );
                    }
                }
            }
            pairs.len()
        })
    }

    async fn list_pairs(&self, exchange_id: Option<i64>) -> StoreResult<Vec<PairRow>> {
        self.with(|t| {
            t.pairs
                .values()
                .filter(|r| exchange_id.is_none_or(|id| r.exchange_id == id))
                .cloned()
                .collect()
        })
    }

    async fn list_distinct(&self, column: PairColumn) -> StoreResult<Vec<String>> {
        self.with(|t| {
            let values: BTreeSet<&str> = t
                .pairs
                .values()
                .map(|r| column.value_of(&r.pair))
                .filter(|v| !v.is_empty())
                .collect();
            values.into_iter().map(str::to_string).collect()
        })
    }
}

#[async_trait]
impl FeeRepository for MemoryStore {
    async fn seed_fees_from_pairs(&self, exchange_id: i64) -> StoreResult<usize> {
        self.with(|t| {
            let mut seeded = 0;
            for ((ex, original), row) in &t.pairs {
                if *ex != exchange_id {
                    continue;
                }
                let key = (exchange_id, original.clone());
                if t.fees.contains_key(&key) {
                    continue;
                }
                t.fees.insert(
                    key,
                    FeeRow {
                        exchange_id,
                        fee: ExchangeFee::seed_from(&row.pair),
                        base_currency_id: None,
                        quote_currency_id: None,
                        pair_id: None,
                    },
                );
                seeded += 1;
            }
            seeded
        })
    }

    async fn original_pairs(&self, exchange_id: i64) -> StoreResult<Vec<String>> {
        self.with(|t| {
            t.fees
                .keys()
                .filter(|(ex, _)| *ex == exchange_id)
                .map(|(_, original)| original.clone())
                .collect()
        })
    }

    async fn upsert_fees(&self, exchange_id: i64, fees: &[ExchangeFee]) -> StoreResult<usize> {
        self.with(|t| {
            for fee in fees {
                let key = (exchange_id, fee.original_pair.clone());
                match t.fees.get_mut(&key) {
                    Some(row) => {
                        row.fee.maker_fee = fee.maker_fee;
                        row.fee.taker_fee = fee.taker_fee;
                        row.fee.timestamp = fee.timestamp;
                    }
                    None => {
                        t.fees.insert(
                            key,
                            FeeRow {
                                exchange_id,
                                fee: fee.clone(),
                                base_currency_id: None,
                                quote_currency_id: None,
                                pair_id: None,
                            },
                        );
                    }
                }
            }
            fees.len()
        })
    }

    async fn list_fees(&self, exchange_id: Option<i64>) -> StoreResult<Vec<FeeRow>> {
        self.with(|t| {
            t.fees
                .values()
                .filter(|r| exchange_id.is_none_or(|id| r.exchange_id == id))
                .cloned()
                .collect()
        })
    }
}

#[async_trait]
impl NetworkRepository for MemoryStore {
    async fn upsert_networks(&self, exchange_id: i64, networks: &[Network]) -> StoreResult<usize> {
        self.with(|t| {
            let mut shared = 0;
            for net in networks {
                let key = (net.currency.clone(), net.network.clone());
                match t.networks.get_mut(&key) {
                    Some(row) => {
                        if row.exchange_id != exchange_id {
                            shared += 1;
                        }
                        row.exchange_id = exchange_id;
                        row.network = net.clone();
                    }
                    None => {
                        t.networks.insert(
                            key,
                            NetworkRow {
                                exchange_id,
                                network: net.clone(),
                                currency_id: None,
                            },
                        );
                    }
                }
            }
            if shared > 0 {
                warn!(
                    "store: {} network rows previously written by another exchange were overwritten by exchange_id={}",
                    shared, exchange_id
                );
            }
            networks.len()
        })
    }

    async fn list_networks(&self) -> StoreResult<Vec<NetworkRow>> {
        self.with(|t| t.networks.values().cloned().collect())
    }
}

#[async_trait]
impl DictionaryRepository for MemoryStore {
    async fn currencies(&self) -> StoreResult<Vec<Currency>> {
        self.with(|t| {
            let mut out: Vec<Currency> = t
                .currencies
                .iter()
                .map(|(name, id)| Currency {
                    id: *id,
                    name: name.clone(),
                })
                .collect();
            out.sort_by_key(|c| c.id);
            out
        })
    }

    async fn canonical_pairs(&self) -> StoreResult<Vec<CanonicalPair>> {
        self.with(|t| {
            let mut out: Vec<CanonicalPair> = t
                .canonical_pairs
                .iter()
                .map(|(symbol, id)| CanonicalPair {
                    id: *id,
                    symbol: symbol.clone(),
                })
                .collect();
            out.sort_by_key(|p| p.id);
            out
        })
    }

    async fn reconcile_currencies(&self, names: &[String]) -> StoreResult<DictionaryOutcome> {
        self.with(|t| {
            let inserted = extend_dictionary(&mut t.currencies, names);
            let dict = &t.currencies;
            let lookup = |name: &str| dict.get(name).copied();
            let mut rows_updated = 0;

            for row in t.pairs.values_mut() {
                let base = assign(&mut row.base_currency_id, lookup(&row.pair.base_currency));
                let quote = assign(&mut row.quote_currency_id, lookup(&row.pair.quote_currency));
                rows_updated += usize::from(base || quote);
            }
            for row in t.fees.values_mut() {
                let base = assign(&mut row.base_currency_id, lookup(&row.fee.base_currency));
                let quote = assign(&mut row.quote_currency_id, lookup(&row.fee.quote_currency));
                rows_updated += usize::from(base || quote);
            }
            for row in t.networks.values_mut() {
                rows_updated +=
                    usize::from(assign(&mut row.currency_id, lookup(&row.network.currency)));
            }

            DictionaryOutcome {
                inserted,
                dictionary_size: dict.len(),
                rows_updated,
            }
        })
    }

    async fn reconcile_canonical_pairs(&self, symbols: &[String]) -> StoreResult<DictionaryOutcome> {
        self.with(|t| {
            let inserted = extend_dictionary(&mut t.canonical_pairs, symbols);
            let dict = &t.canonical_pairs;
            let lookup = |symbol: &str| dict.get(symbol).copied();
            let mut rows_updated = 0;

            for row in t.pairs.values_mut() {
                rows_updated +=
                    usize::from(assign(&mut row.pair_id, lookup(&row.pair.standardized_pair)));
            }
            for row in t.fees.values_mut() {
                rows_updated +=
                    usize::from(assign(&mut row.pair_id, lookup(&row.fee.standardized_pair)));
            }

            DictionaryOutcome {
                inserted,
                dictionary_size: dict.len(),
                rows_updated,
            }
        })
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn close(&self) -> StoreResult<()> {
        self.tables.lock().closed = true;
        debug!("store: memory store closed");
        Ok(())
    }
}
