//! Kraken adapter

use crate::exchanges::connector::{
    fx_field, http_client, AdapterResult, ExchangeAdapter, ExchangeError,
};
use crate::exchanges::types::{Candle, CanonicalSymbol, NormalizedTrade, Timeframe, Venue};
use crate::market_data::symbol_map::SymbolMap;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

pub const WS_BASE_KRAKEN: &str = "wss://ws.kraken.com";
pub const REST_BASE_KRAKEN: &str = "https://api.kraken.com";

pub struct KrakenAdapter {
    symbols: Arc<SymbolMap>,
    client: reqwest::Client,
}

impl KrakenAdapter {
    pub fn new(symbols: Arc<SymbolMap>) -> Self {
        Self {
            symbols,
            client: http_client(),
        }
    }

    fn native_ws(&self, symbol: CanonicalSymbol) -> AdapterResult<&'static str> {
        self.symbols
            .ws_symbol(symbol, Venue::Kraken)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Kraken,
                symbol,
            })
    }

    /// WS trade rows are `[price, volume, time, side, type, misc]` strings;
    /// time is fractional seconds.
    fn parse_trade_row(symbol: CanonicalSymbol, row: &Value) -> Option<NormalizedTrade> {
        let row = row.as_array()?;
        let price = fx_field(row.first()?)?;
        let size = fx_field(row.get(1)?)?;
        if !price.is_positive() || size.raw() < 0 {
            return None;
        }
        let time_s: f64 = row.get(2)?.as_str()?.parse().ok()?;
        if !time_s.is_finite() || time_s < 0.0 {
            return None;
        }
        Some(NormalizedTrade {
            symbol,
            venue: Venue::Kraken,
            price,
            size,
            timestamp_utc_ns: (time_s * 1e9) as i64,
        })
    }

    /// REST OHLC rows are `[time, o, h, l, c, vwap, volume, count]`; the
    /// volume sits at index 6.
    fn parse_ohlc_row(symbol: CanonicalSymbol, timeframe: Timeframe, row: &Value) -> Option<Candle> {
        let row = row.as_array()?;
        Some(Candle {
            symbol,
            timeframe,
            open_time_utc_s: row.first()?.as_i64()?,
            open: fx_field(row.get(1)?)?,
            high: fx_field(row.get(2)?)?,
            low: fx_field(row.get(3)?)?,
            close: fx_field(row.get(4)?)?,
            volume: fx_field(row.get(6)?)?,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for KrakenAdapter {
    fn venue(&self) -> Venue {
        Venue::Kraken
    }

    fn ws_url(&self, symbol: CanonicalSymbol) -> AdapterResult<String> {
        self.native_ws(symbol)?;
        Ok(WS_BASE_KRAKEN.to_string())
    }

    fn subscribe_frames(&self, symbol: CanonicalSymbol) -> Vec<Message> {
        let Ok(native) = self.native_ws(symbol) else {
            return Vec::new();
        };
        vec![Message::Text(
            json!({
                "event": "subscribe",
                "pair": [native],
                "subscription": {"name": "trade"},
            })
            .to_string(),
        )]
    }

    fn parse_message(&self, symbol: CanonicalSymbol, text: &str) -> Vec<NormalizedTrade> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };
        // Event objects (systemStatus, subscriptionStatus, heartbeat) are
        // control traffic; trades arrive as
        // [chanId, [[price, volume, time, ...], ...], "trade", pair].
        let Some(parts) = value.as_array() else {
            return Vec::new();
        };
        if parts.len() < 4 || parts.get(2).and_then(Value::as_str) != Some("trade") {
            return Vec::new();
        }
        let Some(rows) = parts.get(1).and_then(Value::as_array) else {
            return Vec::new();
        };
        rows.iter()
            .filter_map(|row| Self::parse_trade_row(symbol, row))
            .collect()
    }

    async fn fetch_historical_candles(
        &self,
        symbol: CanonicalSymbol,
        timeframe: Timeframe,
        start_s: i64,
        end_s: i64,
    ) -> AdapterResult<Vec<Candle>> {
        let native = self
            .symbols
            .rest_symbol(symbol, Venue::Kraken)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Kraken,
                symbol,
            })?;
        let url = format!(
            "{REST_BASE_KRAKEN}/0/public/OHLC?pair={native}&interval={}&since={start_s}",
            timeframe.seconds() / 60,
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "kraken ohlc request failed");
            return Ok(Vec::new());
        }
        let body: Value = response.json().await?;
        if body["error"].as_array().is_some_and(|errors| !errors.is_empty()) {
            warn!(errors = %body["error"], "kraken ohlc response reported errors");
            return Ok(Vec::new());
        }
        // The result object holds one array keyed by the pair plus a "last"
        // cursor, which is ignored.
        let Some(result) = body["result"].as_object() else {
            return Ok(Vec::new());
        };
        let Some(rows) = result
            .iter()
            .find(|(key, value)| key.as_str() != "last" && value.is_array())
            .and_then(|(_, value)| value.as_array())
        else {
            return Ok(Vec::new());
        };

        let mut out: Vec<Candle> = rows
            .iter()
            .filter_map(|row| Self::parse_ohlc_row(symbol, timeframe, row))
            .filter(|candle| candle.open_time_utc_s >= start_s && candle.open_time_utc_s <= end_s)
            .collect();
        out.sort_by_key(|candle| candle.open_time_utc_s);
        Ok(out)
    }
}
