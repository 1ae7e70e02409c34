//! Exchange adapter contract and shared helpers

use crate::exchanges::types::{Candle, CanonicalSymbol, NormalizedTrade, Timeframe, Venue};
use crate::market_data::fixed::Fx;
use crate::market_data::symbol_map::SymbolMap;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;

/// Custom result type for adapter operations
pub type AdapterResult<T> = Result<T, ExchangeError>;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Error types for adapter operations
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("pair {symbol} is not offered on {venue}")]
    UnsupportedPair { venue: Venue, symbol: CanonicalSymbol },

    #[error("inactivity timeout")]
    Inactive,
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(err: url::ParseError) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Capability contract every venue adapter implements.
///
/// The connection supervisor drives the streaming half (`ws_url`,
/// `subscribe_frames`, `ping_frame`, `parse_message`); the backfill planner
/// uses `fetch_historical_candles`. Parsing is pure: malformed or non-trade
/// payloads yield an empty vector and are dropped silently.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// WebSocket endpoint for the given pair.
    fn ws_url(&self, symbol: CanonicalSymbol) -> AdapterResult<String>;

    /// Frames sent right after the socket opens. Empty when the venue
    /// subscribes through the URL path.
    fn subscribe_frames(&self, symbol: CanonicalSymbol) -> Vec<Message>;

    /// Application-level keepalive frame.
    fn ping_frame(&self) -> Message {
        Message::Ping(Vec::new())
    }

    /// Parse one WebSocket payload into zero or more normalized trades.
    fn parse_message(&self, symbol: CanonicalSymbol, text: &str) -> Vec<NormalizedTrade>;

    /// One-shot REST fetch over `[start_s, end_s]`, relabelled with the
    /// requested timeframe. A non-200 response yields the candles collected
    /// so far; transport failures are returned as errors.
    async fn fetch_historical_candles(
        &self,
        symbol: CanonicalSymbol,
        timeframe: Timeframe,
        start_s: i64,
        end_s: i64,
    ) -> AdapterResult<Vec<Candle>>;
}

/// Instantiate the adapter for a venue.
pub fn make_adapter(venue: Venue, symbols: Arc<SymbolMap>) -> Arc<dyn ExchangeAdapter> {
    use crate::exchanges::{binance, bitget, bitstamp, bitvavo, coinbase, kraken, okx};
    match venue {
        Venue::Binance => Arc::new(binance::BinanceAdapter::new(symbols)),
        Venue::Okx => Arc::new(okx::OkxAdapter::new(symbols)),
        Venue::Bitget => Arc::new(bitget::BitgetAdapter::new(symbols)),
        Venue::Coinbase => Arc::new(coinbase::CoinbaseAdapter::new(symbols)),
        Venue::Bitstamp => Arc::new(bitstamp::BitstampAdapter::new(symbols)),
        Venue::Kraken => Arc::new(kraken::KrakenAdapter::new(symbols)),
        Venue::Bitvavo => Arc::new(bitvavo::BitvavoAdapter::new(symbols)),
    }
}

/// Shared REST client configuration.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("chartfeed/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Coerce a JSON string or number field into a fixed-point value.
pub(crate) fn fx_field(value: &Value) -> Option<Fx> {
    match value {
        Value::String(s) => Fx::parse(s),
        Value::Number(n) => Fx::parse(&n.to_string()),
        _ => None,
    }
}

/// Coerce a JSON string or number field into an integer.
pub(crate) fn i64_field(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
