use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use ::redis::{Pipeline, aio::ConnectionManager};
use async_trait::async_trait;
use log::{debug, info, warn};

use super::{
    DictionaryOutcome, DictionaryRepository, ExchangeRepository, FeeRepository, NetworkRepository,
    PairRepository, Store,
};
use crate::error::{StoreError, StoreResult};
use crate::schema::{
    BalanceSnapshot, CanonicalPair, Currency, Exchange, ExchangeFee, FeeRow, Network, NetworkRow,
    NormalizedPair, PairColumn, PairRow,
};
use crate::util;

// ------------------------------------------------------------
// Key layout
// ------------------------------------------------------------
//
// {p}:exchanges                    hash  name -> Exchange JSON
// {p}:exchange:seq                 counter
// {p}:pair:{exchange_id}:{symbol}  hash  data, exchange_id, *_id refs
// {p}:pairs, {p}:pairs:{id}        sets of pair row keys
// {p}:fee:{exchange_id}:{symbol}   hash  same shape as pair rows
// {p}:fees, {p}:fees:{id}          sets of fee row keys
// {p}:network:{currency}:{net}     hash  data, exchange_id, currency_id
// {p}:networks                     set of network row keys
// {p}:currencies                   hash  name -> id
// {p}:canonical_pairs              hash  symbol -> id
//
// Data lives in the `data` field as JSON, references in their own
// fields. Upserts only ever write `data`, reconciliation only ever
// writes references.
//

const DATA: &str = "data";
const EXCHANGE_ID: &str = "exchange_id";
const BASE_ID: &str = "base_currency_id";
const QUOTE_ID: &str = "quote_currency_id";
const PAIR_ID: &str = "pair_id";
const CURRENCY_ID: &str = "currency_id";
const READABLE_TIME: &str = "readable_time";

type Fields = HashMap<String, String>;

/// Redis-backed store.
///
/// Uses a `ConnectionManager`, which reconnects on its own and is
/// cheap to clone per call.
pub struct RedisStore {
    con: ConnectionManager,
    prefix: String,
    closed: AtomicBool,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: &str) -> StoreResult<Self> {
        let client = ::redis::Client::open(url)?;
        let con = client.get_connection_manager().await?;
        info!("store: connected to redis prefix={}", prefix);

        Ok(Self {
            con,
            prefix: prefix.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    fn con(&self) -> StoreResult<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.con.clone())
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn pair_key(&self, exchange_id: i64, original: &str) -> String {
        format!("{}:pair:{}:{}", self.prefix, exchange_id, original)
    }

    fn fee_key(&self, exchange_id: i64, original: &str) -> String {
        format!("{}:fee:{}:{}", self.prefix, exchange_id, original)
    }

    fn network_key(&self, currency: &str, network: &str) -> String {
        format!("{}:network:{}:{}", self.prefix, currency, network)
    }

    /// HGETALL for every member of an index set.
    async fn load_rows(&self, index: &str) -> StoreResult<Vec<(String, Fields)>> {
        let mut con = self.con()?;
        let keys: Vec<String> = ::redis::cmd("SMEMBERS")
            .arg(index)
            .query_async(&mut con)
            .await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = ::redis::pipe();
        for key in &keys {
            pipe.cmd("HGETALL").arg(key);
        }
        let rows: Vec<Fields> = pipe.query_async(&mut con).await?;

        Ok(keys.into_iter().zip(rows).collect())
    }

    async fn pair_rows(&self, exchange_id: Option<i64>) -> StoreResult<Vec<(String, PairRow)>> {
        let index = match exchange_id {
            Some(id) => self.key(&format!("pairs:{id}")),
            None => self.key("pairs"),
        };
        let mut out = Vec::new();
        for (key, fields) in self.load_rows(&index).await? {
            if let Some(row) = decode_pair(&fields)? {
                out.push((key, row));
            }
        }
        out.sort_by(|a, b| {
            (a.1.exchange_id, &a.1.pair.original_pair).cmp(&(b.1.exchange_id, &b.1.pair.original_pair))
        });
        Ok(out)
    }

    async fn fee_rows(&self, exchange_id: Option<i64>) -> StoreResult<Vec<(String, FeeRow)>> {
        let index = match exchange_id {
            Some(id) => self.key(&format!("fees:{id}")),
            None => self.key("fees"),
        };
        let mut out = Vec::new();
        for (key, fields) in self.load_rows(&index).await? {
            if let Some(row) = decode_fee(&fields)? {
                out.push((key, row));
            }
        }
        out.sort_by(|a, b| {
            (a.1.exchange_id, &a.1.fee.original_pair).cmp(&(b.1.exchange_id, &b.1.fee.original_pair))
        });
        Ok(out)
    }

    async fn network_rows(&self) -> StoreResult<Vec<(String, NetworkRow)>> {
        let mut out = Vec::new();
        for (key, fields) in self.load_rows(&self.key("networks")).await? {
            if let Some(row) = decode_network(&fields)? {
                out.push((key, row));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// Appends absent names to a dictionary hash, in sorted order.
    ///
    /// Returns the inserted names and the dictionary after the insert.
    async fn extend_dictionary(
        &self,
        dict: &str,
        seq: &str,
        names: &[String],
    ) -> StoreResult<(Vec<String>, HashMap<String, i64>)> {
        let mut con = self.con()?;
        let dict_key = self.key(dict);
        let seq_key = self.key(seq);

        let existing: HashMap<String, i64> = ::redis::cmd("HGETALL")
            .arg(&dict_key)
            .query_async(&mut con)
            .await?;

        let wanted: BTreeSet<&String> = names
            .iter()
            .filter(|n| !n.is_empty() && !existing.contains_key(*n))
            .collect();

        let mut inserted = Vec::new();
        for name in wanted {
            let id: i64 = ::redis::cmd("INCR").arg(&seq_key).query_async(&mut con).await?;
            let created: bool = ::redis::cmd("HSETNX")
                .arg(&dict_key)
                .arg(name)
                .arg(id)
                .query_async(&mut con)
                .await?;
            if created {
                inserted.push(name.clone());
            }
        }

        let dictionary: HashMap<String, i64> = ::redis::cmd("HGETALL")
            .arg(&dict_key)
            .query_async(&mut con)
            .await?;
        Ok((inserted, dictionary))
    }

    async fn exec(&self, pipe: &Pipeline) -> StoreResult<()> {
        let mut con = self.con()?;
        let (): () = pipe.query_async(&mut con).await?;
        Ok(())
    }
}

// ------------------------------------------------------------
// Row codecs
// ------------------------------------------------------------

fn field_id(fields: &Fields, name: &str) -> Option<i64> {
    fields.get(name).and_then(|v| v.parse().ok())
}

fn decode_pair(fields: &Fields) -> StoreResult<Option<PairRow>> {
    let (Some(data), Some(exchange_id)) = (fields.get(DATA), field_id(fields, EXCHANGE_ID)) else {
        return Ok(None);
    };
    Ok(Some(PairRow {
        exchange_id,
        pair: serde_json::from_str(data)?,
        base_currency_id: field_id(fields, BASE_ID),
        quote_currency_id: field_id(fields, QUOTE_ID),
        pair_id: field_id(fields, PAIR_ID),
    }))
}

fn decode_fee(fields: &Fields) -> StoreResult<Option<FeeRow>> {
    let (Some(data), Some(exchange_id)) = (fields.get(DATA), field_id(fields, EXCHANGE_ID)) else {
        return Ok(None);
    };
    Ok(Some(FeeRow {
        exchange_id,
        fee: serde_json::from_str(data)?,
        base_currency_id: field_id(fields, BASE_ID),
        quote_currency_id: field_id(fields, QUOTE_ID),
        pair_id: field_id(fields, PAIR_ID),
    }))
}

fn decode_network(fields: &Fields) -> StoreResult<Option<NetworkRow>> {
    let (Some(data), Some(exchange_id)) = (fields.get(DATA), field_id(fields, EXCHANGE_ID)) else {
        return Ok(None);
    };
    Ok(Some(NetworkRow {
        exchange_id,
        network: serde_json::from_str(data)?,
        currency_id: field_id(fields, CURRENCY_ID),
    }))
}

/// Queues a reference rewrite when the stored value differs.
fn set_ref(pipe: &mut Pipeline, key: &str, field: &str, current: Option<i64>, wanted: Option<i64>) -> bool {
    if current == wanted {
        return false;
    }
    match wanted {
        Some(id) => pipe.cmd("HSET").arg(key).arg(field).arg(id).ignore(),
        None => pipe.cmd("HDEL").arg(key).arg(field).ignore(),
    };
    true
}

#[async_trait]
impl ExchangeRepository for RedisStore {
    async fn get_or_create_exchange(
        &self,
        name: &str,
        maker_fee: f64,
        taker_fee: f64,
    ) -> StoreResult<i64> {
        if let Some(ex) = self.get_exchange(name).await? {
            return Ok(ex.id);
        }

        let mut con = self.con()?;
        let id: i64 = ::redis::cmd("INCR")
            .arg(self.key("exchange:seq"))
            .query_async(&mut con)
            .await?;
        let exchange = Exchange {
            id,
            name: name.to_string(),
            maker_fee,
            taker_fee,
            balance: None,
        };
        let created: bool = ::redis::cmd("HSETNX")
            .arg(self.key("exchanges"))
            .arg(name)
            .arg(serde_json::to_string(&exchange)?)
            .query_async(&mut con)
            .await?;

        if created {
            debug!("store: created exchange={} id={}", name, id);
            return Ok(id);
        }

        // another writer created it between the read and the insert
        match self.get_exchange(name).await? {
            Some(ex) => Ok(ex.id),
            None => Ok(id),
        }
    }

    async fn update_balance(&self, exchange_id: i64, balance: &BalanceSnapshot) -> StoreResult<()> {
        let mut con = self.con()?;
        let all: HashMap<String, String> = ::redis::cmd("HGETALL")
            .arg(self.key("exchanges"))
            .query_async(&mut con)
            .await?;

        for (name, data) in all {
            let mut exchange: Exchange = serde_json::from_str(&data)?;
            if exchange.id != exchange_id {
                continue;
            }
            exchange.balance = Some(balance.clone());
            let (): () = ::redis::cmd("HSET")
                .arg(self.key("exchanges"))
                .arg(&name)
                .arg(serde_json::to_string(&exchange)?)
                .query_async(&mut con)
                .await?;
            break;
        }
        Ok(())
    }

    async fn get_exchange(&self, name: &str) -> StoreResult<Option<Exchange>> {
        let mut con = self.con()?;
        let data: Option<String> = ::redis::cmd("HGET")
            .arg(self.key("exchanges"))
            .arg(name)
            .query_async(&mut con)
            .await?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PairRepository for RedisStore {
    async fn upsert_pairs(&self, exchange_id: i64, pairs: &[NormalizedPair]) -> StoreResult<usize> {
        if pairs.is_empty() {
            return Ok(0);
        }

        let all = self.key("pairs");
        let per_exchange = self.key(&format!("pairs:{exchange_id}"));

        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for pair in pairs {
            let key = self.pair_key(exchange_id, &pair.original_pair);
            pipe.cmd("HSET")
                .arg(&key)
                .arg(DATA)
                .arg(serde_json::to_string(pair)?)
                .arg(EXCHANGE_ID)
                .arg(exchange_id)
                .arg(READABLE_TIME)
                .arg(util::readable_time(&pair.timestamp))
                .ignore();
            pipe.cmd("SADD").arg(&all).arg(&key).ignore();
            pipe.cmd("SADD").arg(&per_exchange).arg(&key).ignore();
        }
        self.exec(&pipe).await?;

        Ok(pairs.len())
    }

    async fn list_pairs(&self, exchange_id: Option<i64>) -> StoreResult<Vec<PairRow>> {
        Ok(self
            .pair_rows(exchange_id)
            .await?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    async fn list_distinct(&self, column: PairColumn) -> StoreResult<Vec<String>> {
        let rows = self.pair_rows(None).await?;
        let values: BTreeSet<&str> = rows
            .iter()
            .map(|(_, r)| column.value_of(&r.pair))
            .filter(|v| !v.is_empty())
            .collect();
        Ok(values.into_iter().map(str::to_string).collect())
    }
}

#[async_trait]
impl FeeRepository for RedisStore {
    async fn seed_fees_from_pairs(&self, exchange_id: i64) -> StoreResult<usize> {
        let pairs = self.pair_rows(Some(exchange_id)).await?;
        if pairs.is_empty() {
            return Ok(0);
        }

        let all = self.key("fees");
        let per_exchange = self.key(&format!("fees:{exchange_id}"));

        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for (_, row) in &pairs {
            let key = self.fee_key(exchange_id, &row.pair.original_pair);
            let seed = ExchangeFee::seed_from(&row.pair);
            // HSETNX keeps fee values written by an earlier fetch
            pipe.cmd("HSETNX").arg(&key).arg(DATA).arg(serde_json::to_string(&seed)?);
            pipe.cmd("HSET").arg(&key).arg(EXCHANGE_ID).arg(exchange_id).ignore();
            pipe.cmd("SADD").arg(&all).arg(&key).ignore();
            pipe.cmd("SADD").arg(&per_exchange).arg(&key).ignore();
        }

        let mut con = self.con()?;
        let created: Vec<i64> = pipe.query_async(&mut con).await?;
        Ok(created.into_iter().filter(|c| *c == 1).count())
    }

    async fn original_pairs(&self, exchange_id: i64) -> StoreResult<Vec<String>> {
        Ok(self
            .fee_rows(Some(exchange_id))
            .await?
            .into_iter()
            .map(|(_, row)| row.fee.original_pair)
            .collect())
    }

    async fn upsert_fees(&self, exchange_id: i64, fees: &[ExchangeFee]) -> StoreResult<usize> {
        if fees.is_empty() {
            return Ok(0);
        }

        let existing: HashMap<String, ExchangeFee> = self
            .fee_rows(Some(exchange_id))
            .await?
            .into_iter()
            .map(|(_, row)| (row.fee.original_pair.clone(), row.fee))
            .collect();

        let all = self.key("fees");
        let per_exchange = self.key(&format!("fees:{exchange_id}"));

        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for fee in fees {
            let key = self.fee_key(exchange_id, &fee.original_pair);
            let data = match existing.get(&fee.original_pair) {
                Some(current) => ExchangeFee {
                    maker_fee: fee.maker_fee,
                    taker_fee: fee.taker_fee,
                    timestamp: fee.timestamp,
                    ..current.clone()
                },
                None => fee.clone(),
            };
            pipe.cmd("HSET")
                .arg(&key)
                .arg(DATA)
                .arg(serde_json::to_string(&data)?)
                .arg(EXCHANGE_ID)
                .arg(exchange_id)
                .ignore();
            pipe.cmd("SADD").arg(&all).arg(&key).ignore();
            pipe.cmd("SADD").arg(&per_exchange).arg(&key).ignore();
        }
        self.exec(&pipe).await?;

        Ok(fees.len())
    }

    async fn list_fees(&self, exchange_id: Option<i64>) -> StoreResult<Vec<FeeRow>> {
        Ok(self
            .fee_rows(exchange_id)
            .await?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }
}

#[async_trait]
impl NetworkRepository for RedisStore {
    async fn upsert_networks(&self, exchange_id: i64, networks: &[Network]) -> StoreResult<usize> {
        if networks.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = networks
            .iter()
            .map(|n| self.network_key(&n.currency, &n.network))
            .collect();

        let mut con = self.con()?;
        let mut owners = ::redis::pipe();
        for key in &keys {
            owners.cmd("HGET").arg(key).arg(EXCHANGE_ID);
        }
        let previous: Vec<Option<i64>> = owners.query_async(&mut con).await?;
        let shared = previous
            .iter()
            .filter(|owner| owner.is_some_and(|id| id != exchange_id))
            .count();
        if shared > 0 {
            warn!(
                "store: {} network rows previously written by another exchange were overwritten by exchange_id={}",
                shared, exchange_id
            );
        }

        let index = self.key("networks");
        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for (key, net) in keys.iter().zip(networks) {
            pipe.cmd("HSET")
                .arg(key)
                .arg(DATA)
                .arg(serde_json::to_string(net)?)
                .arg(EXCHANGE_ID)
                .arg(exchange_id)
                .ignore();
            pipe.cmd("SADD").arg(&index).arg(key).ignore();
        }
        self.exec(&pipe).await?;

        Ok(networks.len())
    }

    async fn list_networks(&self) -> StoreResult<Vec<NetworkRow>> {
        Ok(self
            .network_rows()
            .await?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }
}

#[async_trait]
impl DictionaryRepository for RedisStore {
    async fn currencies(&self) -> StoreResult<Vec<Currency>> {
        let mut con = self.con()?;
        let dict: HashMap<String, i64> = ::redis::cmd("HGETALL")
            .arg(self.key("currencies"))
            .query_async(&mut con)
            .await?;

        let mut out: Vec<Currency> = dict
            .into_iter()
            .map(|(name, id)| Currency { id, name })
            .collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    async fn canonical_pairs(&self) -> StoreResult<Vec<CanonicalPair>> {
        let mut con = self.con()?;
        let dict: HashMap<String, i64> = ::redis::cmd("HGETALL")
            .arg(self.key("canonical_pairs"))
            .query_async(&mut con)
            .await?;

        let mut out: Vec<CanonicalPair> = dict
            .into_iter()
            .map(|(symbol, id)| CanonicalPair { id, symbol })
            .collect();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    /// The reference rewrite is a single MULTI/EXEC, so readers never
    /// see a half-applied pass.
    async fn reconcile_currencies(&self, names: &[String]) -> StoreResult<DictionaryOutcome> {
        let (inserted, dict) = self
            .extend_dictionary("currencies", "currency:seq", names)
            .await?;
        let lookup = |name: &str| dict.get(name).copied();

        let mut pipe = ::redis::pipe();
        pipe.atomic();
        let mut rows_updated = 0;

        for (key, row) in self.pair_rows(None).await? {
            let base = set_ref(&mut pipe, &key, BASE_ID, row.base_currency_id, lookup(&row.pair.base_currency));
            let quote = set_ref(&mut pipe, &key, QUOTE_ID, row.quote_currency_id, lookup(&row.pair.quote_currency));
            rows_updated += usize::from(base || quote);
        }
        for (key, row) in self.fee_rows(None).await? {
            let base = set_ref(&mut pipe, &key, BASE_ID, row.base_currency_id, lookup(&row.fee.base_currency));
            let quote = set_ref(&mut pipe, &key, QUOTE_ID, row.quote_currency_id, lookup(&row.fee.quote_currency));
            rows_updated += usize::from(base || quote);
        }
        for (key, row) in self.network_rows().await? {
            rows_updated += usize::from(set_ref(
                &mut pipe,
                &key,
                CURRENCY_ID,
                row.currency_id,
                lookup(&row.network.currency),
            ));
        }

        if rows_updated > 0 {
            self.exec(&pipe).await?;
        }

        Ok(DictionaryOutcome {
            inserted,
            dictionary_size: dict.len(),
            rows_updated,
        })
    }

    async fn reconcile_canonical_pairs(&self, symbols: &[String]) -> StoreResult<DictionaryOutcome> {
        let (inserted, dict) = self
            .extend_dictionary("canonical_pairs", "canonical_pair:seq", symbols)
            .await?;
        let lookup = |symbol: &str| dict.get(symbol).copied();

        let mut pipe = ::redis::pipe();
        pipe.atomic();
        let mut rows_updated = 0;

        for (key, row) in self.pair_rows(None).await? {
            rows_updated += usize::from(set_ref(
                &mut pipe,
                &key,
                PAIR_ID,
                row.pair_id,
                lookup(&row.pair.standardized_pair),
            ));
        }
        for (key, row) in self.fee_rows(None).await? {
            rows_updated += usize::from(set_ref(
                &mut pipe,
                &key,
                PAIR_ID,
                row.pair_id,
                lookup(&row.fee.standardized_pair),
            ));
        }

        if rows_updated > 0 {
            self.exec(&pipe).await?;
        }

        Ok(DictionaryOutcome {
            inserted,
            dictionary_size: dict.len(),
            rows_updated,
        })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn close(&self) -> StoreResult<()> {
        // ConnectionManager drops its socket with the last clone
        self.closed.store(true, Ordering::Release);
        info!("store: redis store closed");
        Ok(())
    }
}
