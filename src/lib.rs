//! chartfeed
//!
//! Worker library behind a candlestick chart frontend: ingests live trades
//! from seven exchanges over supervised WebSocket connections, normalizes
//! them into fixed-point canonical trades, emits rolling VWAP/volume
//! aggregates on a 250 ms cadence, and serves historical candle backfills
//! with deterministic up-aggregation. Driven over a length-delimited JSON
//! message port.

pub mod controller;
pub mod exchanges;
pub mod market_data;
pub mod port;
pub mod state_store;

// Re-export main types for easy access
pub use controller::Controller;
pub use exchanges::{
    AdapterEvent, AggregatedDataPoint, Candle, CanonicalSymbol, ExchangeAdapter, ExchangeError,
    NormalizedTrade, Timeframe, Venue,
};
pub use market_data::{Aggregator, Fx, SymbolMap};
pub use state_store::StateStore;
