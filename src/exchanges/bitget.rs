//! Bitget adapter

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

pub const WS_BASE_BITGET: &str = "wss://ws.bitget.com/v2/ws/public";
pub const REST_BASE_BITGET: &str = "https://api.bitget.com";

const CANDLE_LIMIT: usize = 1000;

pub struct BitgetAdapter {
    symbols: Arc<SymbolMap>,
    client: reqwest::Client,
}

impl BitgetAdapter {
    pub fn new(symbols: Arc<SymbolMap>) -> Self {
        Self {
            symbols,
            client: http_client(),
        }
    }

    fn native(&self, symbol: CanonicalSymbol) -> AdapterResult<&'static str> {
        self.symbols
            .ws_symbol(symbol, Venue::Bitget)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Bitget,
                symbol,
            })
    }

    fn granularity(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M1 => "1min",
            Timeframe::M5 => "5min",
            Timeframe::M15 => "15min",
            Timeframe::M30 => "30min",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1day",
            Timeframe::W1 => "1week",
        }
    }

    /// Trade entries arrive either as objects `{p, q, t}` or as arrays
    /// `[p, q, t]`.
    fn parse_trade_entry(symbol: CanonicalSymbol, entry: &Value) -> Option<NormalizedTrade> {
        let (price, size, ts_ms) = match entry {
            Value::Object(fields) => (
                fx_field(fields.get("p")?)?,
                fx_field(fields.get("q")?)?,
                i64_field(fields.get("t")?)?,
            ),
            Value::Array(fields) => (
                fx_field(fields.first()?)?,
                fx_field(fields.get(1)?)?,
                i64_field(fields.get(2)?)?,
            ),
            _ => return None,
        };
        if !price.is_positive() || size.raw() < 0 {
            return None;
        }
        Some(NormalizedTrade {
            symbol,
            venue: Venue::Bitget,
            price,
            size,
            timestamp_utc_ns: ts_ms.saturating_mul(1_000_000),
        })
    }

    fn parse_candle_row(symbol: CanonicalSymbol, timeframe: Timeframe, row: &Value) -> Option<Candle> {
        let row = row.as_array()?;
        Some(Candle {
            symbol,
            timeframe,
            open_time_utc_s: i64_field(row.first()?)?.div_euclid(1_000),
            open: fx_field(row.get(1)?)?,
            high: fx_field(row.get(2)?)?,
            low: fx_field(row.get(3)?)?,
            close: fx_field(row.get(4)?)?,
            volume: fx_field(row.get(5)?)?,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BitgetAdapter {
    fn venue(&self) -> Venue {
        Venue::Bitget
    }

    fn ws_url(&self, symbol: CanonicalSymbol) -> AdapterResult<String> {
        self.native(symbol)?;
        Ok(WS_BASE_BITGET.to_string())
    }

    fn subscribe_frames(&self, symbol: CanonicalSymbol) -> Vec<Message> {
        let Ok(native) = self.native(symbol) else {
            return Vec::new();
        };
        vec![Message::Text(
            json!({
                "op": "subscribe",
                "args": [{"instType": "SPOT", "channel": "trade", "instId": native}],
            })
            .to_string(),
        )]
    }

    fn parse_message(&self, symbol: CanonicalSymbol, text: &str) -> Vec<NormalizedTrade> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };
        // Subscription acknowledgements carry an "event" field.
        if value.get("event").is_some() {
            return Vec::new();
        }
        if value["arg"]["channel"].as_str() != Some("trade") {
            return Vec::new();
        }
        let Some(rows) = value["data"].as_array() else {
            return Vec::new();
        };
        rows.iter()
            .filter_map(|entry| Self::parse_trade_entry(symbol, entry))
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
            .rest_symbol(symbol, Venue::Bitget)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Bitget,
                symbol,
            })?;
        let url = format!(
            "{REST_BASE_BITGET}/api/v2/spot/market/candles?symbol={native}&granularity={}&limit={CANDLE_LIMIT}",
            Self::granularity(timeframe),
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "bitget candle request failed");
            return Ok(Vec::new());
        }
        let body: Value = response.json().await?;
        let Some(rows) = body["data"].as_array() else {
            return Ok(Vec::new());
        };

        // Row order is not documented reliably; sort ascending before
        // filtering.
        let mut out: Vec<Candle> = rows
            .iter()
            .filter_map(|row| Self::parse_candle_row(symbol, timeframe, row))
            .collect();
        out.sort_by_key(|candle| candle.open_time_utc_s);
        out.retain(|candle| candle.open_time_utc_s >= start_s && candle.open_time_utc_s <= end_s);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::fixed::Fx;

    fn adapter() -> BitgetAdapter {
        BitgetAdapter::new(Arc::new(SymbolMap::new()))
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let frames = adapter().subscribe_frames(CanonicalSymbol::BtcUsdt);
        assert_eq!(frames.len(), 1);
        let Message::Text(text) = &frames[0] else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["args"][0]["instType"], "SPOT");
        assert_eq!(value["args"][0]["channel"], "trade");
        assert_eq!(value["args"][0]["instId"], "BTCUSDT");
    }

    #[test]
    fn test_parse_object_and_array_entries() {
        let payload = r#"
        {
            "arg": {"instType": "SPOT", "channel": "trade", "instId": "BTCUSDT"},
            "data": [
                {"p": "42219.9", "q": "0.12", "t": 1629386781174},
                ["42220.1", "0.5", "1629386781201"]
            ]
        }
        "#;
        let trades = adapter().parse_message(CanonicalSymbol::BtcUsdt, payload);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, Fx::parse("42219.9").unwrap());
        assert_eq!(trades[1].price, Fx::parse("42220.1").unwrap());
        assert_eq!(trades[1].timestamp_utc_ns, 1_629_386_781_201_000_000);
    }

    #[test]
    fn test_control_frames_produce_no_trades() {
        let adapter = adapter();
        assert!(adapter
            .parse_message(
                CanonicalSymbol::BtcUsdt,
                r#"{"event":"subscribe","arg":{"instType":"SPOT","channel":"trade","instId":"BTCUSDT"}}"#
            )
            .is_empty());
        assert!(adapter.parse_message(CanonicalSymbol::BtcUsdt, "pong").is_empty());
        assert!(adapter
            .parse_message(CanonicalSymbol::BtcUsdt, r#"{"arg":{"channel":"ticker"},"data":[]}"#)
            .is_empty());
    }

    #[test]
    fn test_malformed_entries_are_dropped() {
        let payload = r#"
        {
            "arg": {"channel": "trade"},
            "data": [
                {"p": "not-a-number", "q": "1", "t": 1},
                {"p": "0", "q": "1", "t": 1},
                42
            ]
        }
        "#;
        assert!(adapter().parse_message(CanonicalSymbol::BtcUsdt, payload).is_empty());
    }

    #[test]
    fn test_granularity_names() {
        assert_eq!(BitgetAdapter::granularity(Timeframe::M1), "1min");
        assert_eq!(BitgetAdapter::granularity(Timeframe::D1), "1day");
        assert_eq!(BitgetAdapter::granularity(Timeframe::W1), "1week");
    }
}
