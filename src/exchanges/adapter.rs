use crate::error::FetchError;
use crate::schema::{BalanceSnapshot, ExchangeFee, Network, NormalizedPair};

/// ExchangeAdapter is the core abstraction layer between:
/// - The generic collector runtime
/// - Exchange-specific REST APIs
///
/// Each exchange implementation must:
/// - Fetch its raw payloads through its `RequestExecutor`
/// - Normalize them into the shared schema types
///
/// DESIGN GOALS:
/// - Zero exchange-specific logic outside adapters
/// - One adapter per exchange
/// - Uniform output format across all exchanges
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Adapter instances are shared across tasks
///
#[async_trait::async_trait]
pub trait ExchangeAdapter: Send + Sync {

    /// Returns the canonical exchange name.
    ///
    /// CONTRACT:
    /// - Must match `exchange.name` in configuration
    /// - Used as the exchange key in the store and health monitor
    ///
    fn name(&self) -> &str;

    /// Fetches every tradable pair with its current price snapshot.
    async fn fetch_trading_pairs(&self) -> Result<Vec<NormalizedPair>, FetchError>;

    /// Fetches trading fees for the given exchange-specific symbols.
    ///
    /// Symbols the exchange reports but that are not in
    /// `known_original_pairs` are dropped.
    async fn fetch_exchange_fees(
        &self,
        known_original_pairs: &[String],
    ) -> Result<Vec<ExchangeFee>, FetchError>;

    /// Fetches deposit/withdraw network details for every currency.
    async fn fetch_currency_networks(&self) -> Result<Vec<Network>, FetchError>;

    /// Fetches the account balance snapshot.
    async fn fetch_account_balance(&self) -> Result<BalanceSnapshot, FetchError>;

    /// Releases transport resources.
    ///
    /// Called exactly once, during teardown.
    async fn close_session(&self);
}
