// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:     Configuration structs loaded from JSON
// - error:      Fetch, store and config error types
// - schema:     Strongly typed records shared by adapters and store
// - util:       Shared helper utilities (time, symbol handling, etc.)
// - health:     Per-exchange health tracking and periodic report
// - request:    Retrying request executor
// - exchanges:  Exchange adapters and adapter registry
// - store:      Persistence contracts plus memory and redis backends
// - collector:  Per-exchange collection cycle
// - reconcile:  Currency / canonical pair dictionaries
// - scheduler:  Cycle loop, shutdown and teardown
//
pub mod config;
pub mod error;
pub mod schema;
pub mod util;
pub mod health;
pub mod request;
pub mod exchanges;
pub mod store;
pub mod collector;
pub mod reconcile;
pub mod scheduler;

#[cfg(test)]
mod testing;
