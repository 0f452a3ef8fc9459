use std::collections::HashMap;

use log::{debug, info};
use serde_json::Value;

use crate::{
    error::FetchError,
    schema::{BalanceSnapshot, ExchangeFee, Network, NormalizedPair},
    util,
};

use super::{adapter::ExchangeAdapter, http::HttpClient};

pub const BASE_URL: &str = "https://api.kucoin.com";

/// KuCoin spot REST adapter (public market data only).
///
/// KuCoin symbols use a dash separator ("BTC-USDT"); the
/// standardized form strips it ("BTCUSDT").
pub struct KucoinAdapter {
    http: HttpClient,
}

impl KucoinAdapter {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for KucoinAdapter {

    fn name(&self) -> &str {
        "kucoin"
    }

    async fn fetch_trading_pairs(&self) -> Result<Vec<NormalizedPair>, FetchError> {
        let symbols = self.http.get("symbols", "/api/v1/symbols").await?;
        let tickers = self.http.get("allTickers", "/api/v1/market/allTickers").await?;

        let pairs = parse_trading_pairs(&symbols, &tickers)?;
        info!("kucoin: fetched {} trading pairs", pairs.len());
        Ok(pairs)
    }

    async fn fetch_exchange_fees(&self, _known: &[String]) -> Result<Vec<ExchangeFee>, FetchError> {
        Err(FetchError::Unsupported("kucoin trade fees"))
    }

    async fn fetch_currency_networks(&self) -> Result<Vec<Network>, FetchError> {
        Err(FetchError::Unsupported("kucoin currency networks"))
    }

    async fn fetch_account_balance(&self) -> Result<BalanceSnapshot, FetchError> {
        Err(FetchError::Unsupported("kucoin account balance"))
    }

    async fn close_session(&self) {
        debug!("kucoin: session closed");
    }
}

fn parse_trading_pairs(symbols: &Value, tickers: &Value) -> Result<Vec<NormalizedPair>, FetchError> {
    let list = symbols["data"]
        .as_array()
        .ok_or_else(|| FetchError::missing("data"))?;

    let mut tradable = HashMap::new();
    for s in list {
        if s["enableTrading"].as_bool() != Some(true) {
            continue;
        }
        let symbol = s["symbol"].as_str().ok_or_else(|| FetchError::missing("symbol"))?;
        tradable.insert(symbol, s);
    }

    let ticker = tickers["data"]["ticker"]
        .as_array()
        .ok_or_else(|| FetchError::missing("data.ticker"))?;

    let now = util::now();
    let mut pairs = Vec::new();

    for t in ticker {
        let Some(symbol) = t["symbol"].as_str() else {
            continue;
        };
        let Some(meta) = tradable.get(symbol) else {
            continue;
        };

        // Illiquid markets report null prices; skip rather than store zeros
        let (Some(price), Some(bid), Some(ask)) = (
            util::parse_f64(&t["last"]),
            util::parse_f64(&t["buy"]),
            util::parse_f64(&t["sell"]),
        ) else {
            continue;
        };

        let base = meta["baseCurrency"]
            .as_str()
            .ok_or_else(|| FetchError::missing("baseCurrency"))?;
        let quote = meta["quoteCurrency"]
            .as_str()
            .ok_or_else(|| FetchError::missing("quoteCurrency"))?;

        pairs.push(NormalizedPair {
            original_pair: symbol.to_string(),
            standardized_pair: util::standardize_pair(symbol),
            base_currency: base.to_string(),
            quote_currency: quote.to_string(),
            price,
            volume: util::parse_f64(&t["vol"]).unwrap_or(0.0),
            bid,
            ask,
            bid_volume: util::parse_f64(&t["bestBidSize"]).unwrap_or(0.0),
            ask_volume: util::parse_f64(&t["bestAskSize"]).unwrap_or(0.0),
            timestamp: now,
        });
    }

    Ok(pairs)
}
