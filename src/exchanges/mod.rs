//! Exchange adapter registry and factory
//!
//! This module provides:
//! - Central registration of all supported exchanges
//! - A factory function to resolve adapters by name
//!
//! All exchange-specific logic must live in dedicated adapter modules.
//! The rest of the application must interact exclusively through
//! the `ExchangeAdapter` trait.

pub mod adapter;
pub mod binance;
pub mod http;
pub mod kucoin;

use std::sync::Arc;
use std::time::Duration;

use adapter::ExchangeAdapter;
use http::HttpClient;

use crate::{
    config::Credentials,
    error::FetchError,
    health::HealthMonitor,
    request::{RequestExecutor, RetryPolicy},
};

/// Shared construction inputs for every adapter.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub policy: RetryPolicy,
    pub timeout: Duration,
    pub health: Arc<HealthMonitor>,
}

impl AdapterContext {
    fn http(&self, name: &str, base_url: &str) -> Result<HttpClient, FetchError> {
        let executor = RequestExecutor::new(name, self.policy.clone(), self.health.clone());
        HttpClient::new(base_url, self.timeout, executor)
    }
}

/// Returns an exchange adapter instance by name.
///
/// RETURNS:
/// - `Ok(Some(adapter))` if the exchange is supported
/// - `Ok(None)` if the exchange is unknown
/// - `Err` if the HTTP client could not be built
///
/// CONTRACT:
/// - `name` MUST match the `exchange.name` field in config.json
/// - Adapter names must be lowercase and stable
///
pub fn get_adapter(
    name: &str,
    ctx: &AdapterContext,
    credentials: Option<Credentials>,
) -> Result<Option<Arc<dyn ExchangeAdapter>>, FetchError> {
    let adapter: Arc<dyn ExchangeAdapter> = match name {
        "binance" => Arc::new(binance::BinanceAdapter::new(
            ctx.http(name, binance::BASE_URL)?,
            credentials,
        )),
        "kucoin" => Arc::new(kucoin::KucoinAdapter::new(ctx.http(name, kucoin::BASE_URL)?)),
        _ => return Ok(None),
    };
    Ok(Some(adapter))
}
