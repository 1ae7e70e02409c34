//! Bitstamp adapter

use crate::exchanges::connector::{
    fx_field, http_client, i64_field, AdapterResult, ExchangeAdapter, ExchangeError,
};
use crate::exchanges::types::{Candle, CanonicalSymbol, NormalizedTrade, Timeframe, Venue};
use crate::market_data::symbol_map::SymbolMap;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

pub const WS_BASE_BITSTAMP: &str = "wss://ws.bitstamp.net";
pub const REST_BASE_BITSTAMP: &str = "https://www.bitstamp.net";

const CANDLE_LIMIT: usize = 1000;

pub struct BitstampAdapter {
    symbols: Arc<SymbolMap>,
    client: reqwest::Client,
}

impl BitstampAdapter {
    pub fn new(symbols: Arc<SymbolMap>) -> Self {
        Self {
            symbols,
            client: http_client(),
        }
    }

    fn native(&self, symbol: CanonicalSymbol) -> AdapterResult<&'static str> {
        self.symbols
            .ws_symbol(symbol, Venue::Bitstamp)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Bitstamp,
                symbol,
            })
    }

    fn parse_ohlc_row(symbol: CanonicalSymbol, timeframe: Timeframe, row: &Value) -> Option<Candle> {
        Some(Candle {
            symbol,
            timeframe,
            open_time_utc_s: i64_field(row.get("timestamp")?)?,
            open: fx_field(row.get("open")?)?,
            high: fx_field(row.get("high")?)?,
            low: fx_field(row.get("low")?)?,
            close: fx_field(row.get("close")?)?,
            volume: fx_field(row.get("volume")?)?,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BitstampAdapter {
    fn venue(&self) -> Venue {
        Venue::Bitstamp
    }

    fn ws_url(&self, symbol: CanonicalSymbol) -> AdapterResult<String> {
        self.native(symbol)?;
        Ok(WS_BASE_BITSTAMP.to_string())
    }

    fn subscribe_frames(&self, symbol: CanonicalSymbol) -> Vec<Message> {
        let Ok(native) = self.native(symbol) else {
            return Vec::new();
        };
        vec![Message::Text(
            json!({
                "event": "bts:subscribe",
                "data": {"channel": format!("live_trades_{native}")},
            })
            .to_string(),
        )]
    }

    fn parse_message(&self, symbol: CanonicalSymbol, text: &str) -> Vec<NormalizedTrade> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };
        // "bts:subscription_succeeded" and heartbeats are control traffic.
        if value["event"].as_str() != Some("trade") {
            return Vec::new();
        }
        let data = &value["data"];
        let (Some(price), Some(size)) = (fx_field(&data["price"]), fx_field(&data["amount"]))
        else {
            return Vec::new();
        };
        if !price.is_positive() || size.raw() < 0 {
            return Vec::new();
        }
        let Some(ts_s) = i64_field(&data["timestamp"]) else {
            return Vec::new();
        };
        vec![NormalizedTrade {
            symbol,
            venue: Venue::Bitstamp,
            price,
            size,
            timestamp_utc_ns: ts_s.saturating_mul(1_000_000_000),
        }]
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
            .rest_symbol(symbol, Venue::Bitstamp)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Bitstamp,
                symbol,
            })?;
        let url = format!(
            "{REST_BASE_BITSTAMP}/api/v2/ohlc/{native}/?step={}&limit={CANDLE_LIMIT}&start={start_s}&end={end_s}",
            timeframe.seconds(),
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "bitstamp ohlc request failed");
            return Ok(Vec::new());
        }
        let body: Value = response.json().await?;
        let Some(rows) = body["data"]["ohlc"].as_array() else {
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
