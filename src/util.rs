/// Utility helpers shared by adapters, collectors and the store.
///
/// IMPORTANT:
/// - No exchange-specific business logic should live here.
/// - This module must remain lightweight and deterministic.
///
use chrono::{DateTime, Utc};

/// Separators exchanges put between base and quote assets.
const PAIR_SEPARATORS: [char; 4] = ['-', '_', '/', ':'];

/// Normalize an exchange symbol into the canonical pair format.
///
/// Target format:
///     BASEQUOTE (uppercase, no separator)
///
/// Examples:
/// - "BTC-USDT"  -> "BTCUSDT"
/// - "eth_usdt"  -> "ETHUSDT"
/// - "BTCUSDT"   -> "BTCUSDT"
///
pub fn standardize_pair(raw: &str) -> String {
    raw.chars()
        .filter(|c| !PAIR_SEPARATORS.contains(c))
        .flat_map(char::to_uppercase)
        .collect()
}

/// Current wall-clock time in UTC.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Returns the current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render a timestamp the way operators read it in the store.
pub fn readable_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a numeric field that exchanges send as a JSON string.
pub fn parse_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
