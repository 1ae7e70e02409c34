//! Market data processing: fixed-point codec, symbol translation,
//! aggregation and candle roll-up

pub mod aggregator;
pub mod candles;
pub mod fixed;
pub mod symbol_map;

pub use aggregator::Aggregator;
pub use candles::up_aggregate;
pub use fixed::Fx;
pub use symbol_map::SymbolMap;
