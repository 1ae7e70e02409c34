//! Exchange connectivity modules

pub mod binance;
pub mod bitget;
pub mod bitstamp;
pub mod bitvavo;
pub mod coinbase;
pub mod connector;
pub mod kraken;
pub mod okx;
pub mod supervisor;
pub mod types;

pub use binance::BinanceAdapter;
pub use bitget::BitgetAdapter;
pub use bitstamp::BitstampAdapter;
pub use bitvavo::BitvavoAdapter;
pub use coinbase::CoinbaseAdapter;
pub use connector::{make_adapter, AdapterResult, ExchangeAdapter, ExchangeError};
pub use kraken::KrakenAdapter;
pub use okx::OkxAdapter;
pub use supervisor::{AdapterEvent, ConnectionSupervisor, StreamMetrics};
pub use types::{
    bucket_open, now_utc_ns, AggregatedDataPoint, Candle, CanonicalSymbol, NormalizedTrade,
    Timeframe, Venue,
};
