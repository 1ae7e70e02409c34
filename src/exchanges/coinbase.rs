//! Coinbase Exchange adapter

use crate::exchanges::connector::{
    fx_field, http_client, AdapterResult, ExchangeAdapter, ExchangeError,
};
use crate::exchanges::types::{Candle, CanonicalSymbol, NormalizedTrade, Timeframe, Venue};
use crate::market_data::candles::up_aggregate;
use crate::market_data::fixed::Fx;
use crate::market_data::symbol_map::SymbolMap;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

pub const WS_BASE_COINBASE: &str = "wss://ws-feed.exchange.coinbase.com";
pub const REST_BASE_COINBASE: &str = "https://api.exchange.coinbase.com";

/// Granularities the candle endpoint accepts, in seconds.
const NATIVE_GRANULARITIES: [i64; 6] = [60, 300, 900, 3_600, 21_600, 86_400];

pub struct CoinbaseAdapter {
    symbols: Arc<SymbolMap>,
    client: reqwest::Client,
}

impl CoinbaseAdapter {
    pub fn new(symbols: Arc<SymbolMap>) -> Self {
        Self {
            symbols,
            client: http_client(),
        }
    }

    fn native(&self, symbol: CanonicalSymbol) -> AdapterResult<&'static str> {
        self.symbols
            .ws_symbol(symbol, Venue::Coinbase)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Coinbase,
                symbol,
            })
    }

    /// Rows are `[time, low, high, open, close, volume]`.
    fn parse_candle_row(symbol: CanonicalSymbol, timeframe: Timeframe, row: &Value) -> Option<Candle> {
        let row = row.as_array()?;
        Some(Candle {
            symbol,
            timeframe,
            open_time_utc_s: row.first()?.as_i64()?,
            low: fx_field(row.get(1)?)?,
            high: fx_field(row.get(2)?)?,
            open: fx_field(row.get(3)?)?,
            close: fx_field(row.get(4)?)?,
            volume: fx_field(row.get(5)?)?,
        })
    }

    async fn fetch_granularity(
        &self,
        symbol: CanonicalSymbol,
        label: Timeframe,
        granularity_s: i64,
        start_s: i64,
        end_s: i64,
    ) -> AdapterResult<Vec<Candle>> {
        let native = self
            .symbols
            .rest_symbol(symbol, Venue::Coinbase)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Coinbase,
                symbol,
            })?;
        let start = iso_second(start_s);
        let end = iso_second(end_s);
        let url = format!(
            "{REST_BASE_COINBASE}/products/{native}/candles?granularity={granularity_s}&start={start}&end={end}"
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "coinbase candle request failed");
            return Ok(Vec::new());
        }
        let body: Value = response.json().await?;
        let Some(rows) = body.as_array() else {
            return Ok(Vec::new());
        };

        // Response is newest-first; re-sort ascending and filter.
        let mut out: Vec<Candle> = rows
            .iter()
            .filter_map(|row| Self::parse_candle_row(symbol, label, row))
            .filter(|candle| candle.open_time_utc_s >= start_s && candle.open_time_utc_s <= end_s)
            .collect();
        out.sort_by_key(|candle| candle.open_time_utc_s);
        Ok(out)
    }
}

#[async_trait]
impl ExchangeAdapter for CoinbaseAdapter {
    fn venue(&self) -> Venue {
        Venue::Coinbase
    }

    fn ws_url(&self, symbol: CanonicalSymbol) -> AdapterResult<String> {
        self.native(symbol)?;
        Ok(WS_BASE_COINBASE.to_string())
    }

    fn subscribe_frames(&self, symbol: CanonicalSymbol) -> Vec<Message> {
        let Ok(native) = self.native(symbol) else {
            return Vec::new();
        };
        vec![Message::Text(
            json!({
                "type": "subscribe",
                "product_ids": [native],
                "channels": ["matches"],
            })
            .to_string(),
        )]
    }

    fn parse_message(&self, symbol: CanonicalSymbol, text: &str) -> Vec<NormalizedTrade> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };
        // Only "match" messages are trades; "last_match", "subscriptions"
        // and heartbeats are control traffic.
        if value["type"].as_str() != Some("match") {
            return Vec::new();
        }
        let (Some(price), Some(size)) = (fx_field(&value["price"]), fx_field(&value["size"]))
        else {
            return Vec::new();
        };
        if !price.is_positive() || size.raw() < 0 {
            return Vec::new();
        }
        let Some(timestamp_utc_ns) = value["time"]
            .as_str()
            .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
            .and_then(|time| time.timestamp_nanos_opt())
        else {
            return Vec::new();
        };
        vec![NormalizedTrade {
            symbol,
            venue: Venue::Coinbase,
            price,
            size,
            timestamp_utc_ns,
        }]
    }

    async fn fetch_historical_candles(
        &self,
        symbol: CanonicalSymbol,
        timeframe: Timeframe,
        start_s: i64,
        end_s: i64,
    ) -> AdapterResult<Vec<Candle>> {
        let tf_s = timeframe.seconds();
        if NATIVE_GRANULARITIES.contains(&tf_s) {
            return self
                .fetch_granularity(symbol, timeframe, tf_s, start_s, end_s)
                .await;
        }
        // The endpoint does not offer this timeframe; fetch minutes and
        // roll them up.
        let minutes = self
            .fetch_granularity(symbol, Timeframe::M1, 60, start_s, end_s)
            .await?;
        Ok(up_aggregate(&minutes, timeframe))
    }
}

fn iso_second(ts_s: i64) -> String {
    Utc.timestamp_opt(ts_s, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}
