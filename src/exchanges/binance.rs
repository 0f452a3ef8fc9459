use std::collections::HashMap;

use hmac::{Hmac, Mac};
use log::{debug, info};
use parking_lot::Mutex;
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::OnceCell;

use crate::{
    config::Credentials,
    error::FetchError,
    schema::{BalanceSnapshot, ExchangeFee, Network, NormalizedPair},
    util,
};

use super::{adapter::ExchangeAdapter, http::HttpClient};

type HmacSha256 = Hmac<Sha256>;

pub const BASE_URL: &str = "https://api.binance.com";

/// Binance spot REST adapter.
///
/// Public endpoints (pairs) need no credentials. Fees, networks and
/// balances use signed endpoints and report `Unsupported` when no
/// API key is configured.
///
/// REST docs:
/// https://developers.binance.com/docs/binance-spot-api-docs/rest-api
pub struct BinanceAdapter {
    http: HttpClient,
    credentials: Option<Credentials>,

    /// Server minus local clock, fetched once before the first signed call
    time_offset_ms: OnceCell<i64>,

    /// symbol -> (base, quote), refreshed by every pair fetch
    assets: Mutex<HashMap<String, (String, String)>>,
}

impl BinanceAdapter {
    pub fn new(http: HttpClient, credentials: Option<Credentials>) -> Self {
        Self {
            http,
            credentials,
            time_offset_ms: OnceCell::new(),
            assets: Mutex::new(HashMap::new()),
        }
    }

    fn credentials(&self, what: &'static str) -> Result<&Credentials, FetchError> {
        self.credentials.as_ref().ok_or(FetchError::Unsupported(what))
    }

    async fn time_offset(&self) -> Result<i64, FetchError> {
        self.time_offset_ms
            .get_or_try_init(|| async {
                let body = self.http.get("time", "/api/v3/time").await?;
                let server = body["serverTime"]
                    .as_i64()
                    .ok_or_else(|| FetchError::missing("serverTime"))?;
                let offset = server - util::now_ms();
                info!("binance: server time offset_ms={}", offset);
                Ok(offset)
            })
            .await
            .copied()
    }

    /// Signed GET: appends timestamp and HMAC-SHA256 signature.
    async fn signed_get(
        &self,
        what: &'static str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, FetchError> {
        let creds = self.credentials(what)?;
        let offset = self.time_offset().await?;
        let url = self.http.url(path);

        self.http
            .get_json(what, |c| {
                let query = signed_query(params, util::now_ms() + offset, &creds.api_secret);
                c.get(format!("{url}?{query}"))
                    .header("X-MBX-APIKEY", creds.api_key.as_str())
            })
            .await
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for BinanceAdapter {

    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_trading_pairs(&self) -> Result<Vec<NormalizedPair>, FetchError> {
        let info = self.http.get("exchangeInfo", "/api/v3/exchangeInfo").await?;
        let book = self.http.get("bookTicker", "/api/v3/ticker/bookTicker").await?;
        let daily = self.http.get("ticker24hr", "/api/v3/ticker/24hr").await?;

        let pairs = parse_trading_pairs(&info, &book, &daily)?;

        let mut assets = self.assets.lock();
        assets.clear();
        for p in &pairs {
            assets.insert(
                p.original_pair.clone(),
                (p.base_currency.clone(), p.quote_currency.clone()),
            );
        }

        info!("binance: fetched {} trading pairs", pairs.len());
        Ok(pairs)
    }

    async fn fetch_exchange_fees(
        &self,
        known_original_pairs: &[String],
    ) -> Result<Vec<ExchangeFee>, FetchError> {
        let body = self
            .signed_get("tradeFee", "/sapi/v1/asset/tradeFee", &[])
            .await?;
        let assets = self.assets.lock().clone();
        parse_fees(&body, known_original_pairs, &assets)
    }

    async fn fetch_currency_networks(&self) -> Result<Vec<Network>, FetchError> {
        let body = self
            .signed_get("capitalConfig", "/sapi/v1/capital/config/getall", &[])
            .await?;
        parse_networks(&body)
    }

    async fn fetch_account_balance(&self) -> Result<BalanceSnapshot, FetchError> {
        let account = self.signed_get("account", "/api/v3/account", &[]).await?;
        let prices = self.http.get("tickerPrice", "/api/v3/ticker/price").await?;
        parse_balance(&account, &prices)
    }

    async fn close_session(&self) {
        // reqwest pools close when the last client handle drops
        debug!("binance: session closed");
    }
}

// ------------------------------------------------------------
// Signing
// ------------------------------------------------------------

fn signed_query(params: &[(&str, String)], timestamp: i64, secret: &str) -> String {
    let mut query: String = params
        .iter()
        .map(|(k, v)| format!("{k}={v}&"))
        .collect();
    query.push_str(&format!("timestamp={timestamp}"));

    let signature = sign(&query, secret);
    format!("{query}&signature={signature}")
}

fn sign(payload: &str, secret: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac key length is unrestricted"));
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

// ------------------------------------------------------------
// Payload parsing
// ------------------------------------------------------------
//
// Kept free of I/O so payload fixtures can be tested directly.
//

fn array<'a>(v: &'a Value, field: &str) -> Result<&'a Vec<Value>, FetchError> {
    v.as_array().ok_or_else(|| FetchError::missing(field))
}

fn str_field<'a>(v: &'a Value, field: &str) -> Result<&'a str, FetchError> {
    v[field].as_str().ok_or_else(|| FetchError::missing(field))
}

fn num_field(v: &Value, field: &str) -> Result<f64, FetchError> {
    util::parse_f64(&v[field]).ok_or_else(|| FetchError::missing(field))
}

fn parse_trading_pairs(
    info: &Value,
    book: &Value,
    daily: &Value,
) -> Result<Vec<NormalizedPair>, FetchError> {
    let mut symbols = HashMap::new();
    for s in array(&info["symbols"], "symbols")? {
        if s["status"].as_str() == Some("TRADING") {
            symbols.insert(str_field(s, "symbol")?, s);
        }
    }

    let mut books = HashMap::new();
    for t in array(book, "bookTicker")? {
        books.insert(str_field(t, "symbol")?, t);
    }

    let now = util::now();
    let mut pairs = Vec::new();

    for t in array(daily, "ticker24hr")? {
        let symbol = str_field(t, "symbol")?;
        let (Some(meta), Some(quote)) = (symbols.get(symbol), books.get(symbol)) else {
            continue;
        };

        pairs.push(NormalizedPair {
            original_pair: symbol.to_string(),
            standardized_pair: util::standardize_pair(symbol),
            base_currency: str_field(meta, "baseAsset")?.to_string(),
            quote_currency: str_field(meta, "quoteAsset")?.to_string(),
            price: num_field(t, "lastPrice")?,
            volume: num_field(t, "volume")?,
            bid: num_field(quote, "bidPrice")?,
            ask: num_field(quote, "askPrice")?,
            bid_volume: num_field(quote, "bidQty")?,
            ask_volume: num_field(quote, "askQty")?,
            timestamp: now,
        });
    }

    Ok(pairs)
}

fn parse_fees(
    body: &Value,
    known: &[String],
    assets: &HashMap<String, (String, String)>,
) -> Result<Vec<ExchangeFee>, FetchError> {
    let now = util::now();
    let mut fees = Vec::new();

    for item in array(body, "tradeFee")? {
        let symbol = str_field(item, "symbol")?;
        if !known.iter().any(|k| k == symbol) {
            continue;
        }

        let (base, quote) = assets.get(symbol).cloned().unwrap_or_default();
        fees.push(ExchangeFee {
            original_pair: symbol.to_string(),
            standardized_pair: util::standardize_pair(symbol),
            base_currency: base,
            quote_currency: quote,
            maker_fee: Some(num_field(item, "makerCommission")?),
            taker_fee: Some(num_field(item, "takerCommission")?),
            timestamp: Some(now),
        });
    }

    info!("binance: fetched {} exchange fees", fees.len());
    Ok(fees)
}

fn parse_networks(body: &Value) -> Result<Vec<Network>, FetchError> {
    let now = util::now();
    let mut networks = Vec::new();

    for coin in array(body, "coins")? {
        let currency = str_field(coin, "coin")?;
        for net in array(&coin["networkList"], "networkList")? {
            let id = str_field(net, "network")?;
            networks.push(Network {
                currency: currency.to_string(),
                network: id.to_string(),
                name: net["name"].as_str().unwrap_or(id).to_string(),
                withdraw_fee: num_field(net, "withdrawFee")?,
                min_withdraw: num_field(net, "withdrawMin")?,
                deposit_enabled: net["depositEnable"].as_bool().unwrap_or(false),
                withdraw_enabled: net["withdrawEnable"].as_bool().unwrap_or(false),
                timestamp: now,
            });
        }
    }

    info!("binance: fetched network info for {} networks", networks.len());
    Ok(networks)
}

fn parse_balance(account: &Value, prices: &Value) -> Result<BalanceSnapshot, FetchError> {
    let mut price_of = HashMap::new();
    for p in array(prices, "tickerPrice")? {
        price_of.insert(str_field(p, "symbol")?, num_field(p, "price")?);
    }

    let mut usdt_balance = 0.0;
    let mut spot_balance_usdt = 0.0;

    for b in array(&account["balances"], "balances")? {
        let asset = str_field(b, "asset")?;
        let free = num_field(b, "free")?;
        let amount = free + num_field(b, "locked")?;

        if asset == "USDT" {
            usdt_balance += free;
            spot_balance_usdt += amount;
        } else if let Some(price) = price_of.get(format!("{asset}USDT").as_str()) {
            spot_balance_usdt += amount * price;
        }
    }

    Ok(BalanceSnapshot {
        usdt_balance,
        spot_balance_usdt,
        futures_balance_usdt: None,
        fetched_at: util::now(),
    })
}
