//! Bitvavo adapter

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

pub const WS_BASE_BITVAVO: &str = "wss://ws.bitvavo.com/v2/";
pub const REST_BASE_BITVAVO: &str = "https://api.bitvavo.com/v2";

/// Timestamps with more than 13 digits are already nanoseconds.
const NS_THRESHOLD: i64 = 10_000_000_000_000;

pub struct BitvavoAdapter {
    symbols: Arc<SymbolMap>,
    client: reqwest::Client,
}

impl BitvavoAdapter {
    pub fn new(symbols: Arc<SymbolMap>) -> Self {
        Self {
            symbols,
            client: http_client(),
        }
    }

    fn native(&self, symbol: CanonicalSymbol) -> AdapterResult<&'static str> {
        self.symbols
            .ws_symbol(symbol, Venue::Bitvavo)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Bitvavo,
                symbol,
            })
    }

    fn promote_timestamp(ts: i64) -> i64 {
        if ts >= NS_THRESHOLD {
            ts
        } else {
            ts.saturating_mul(1_000_000)
        }
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
impl ExchangeAdapter for BitvavoAdapter {
    fn venue(&self) -> Venue {
        Venue::Bitvavo
    }

    fn ws_url(&self, symbol: CanonicalSymbol) -> AdapterResult<String> {
        self.native(symbol)?;
        Ok(WS_BASE_BITVAVO.to_string())
    }

    fn subscribe_frames(&self, symbol: CanonicalSymbol) -> Vec<Message> {
        let Ok(native) = self.native(symbol) else {
            return Vec::new();
        };
        vec![Message::Text(
            json!({
                "action": "subscribe",
                "channels": [{"name": "trades", "markets": [native]}],
            })
            .to_string(),
        )]
    }

    fn parse_message(&self, symbol: CanonicalSymbol, text: &str) -> Vec<NormalizedTrade> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };
        if value["event"].as_str() != Some("trade") {
            return Vec::new();
        }
        let (Some(price), Some(size)) = (fx_field(&value["price"]), fx_field(&value["amount"]))
        else {
            return Vec::new();
        };
        if !price.is_positive() || size.raw() < 0 {
            return Vec::new();
        }
        let Some(ts) = i64_field(&value["timestamp"]) else {
            return Vec::new();
        };
        vec![NormalizedTrade {
            symbol,
            venue: Venue::Bitvavo,
            price,
            size,
            timestamp_utc_ns: Self::promote_timestamp(ts),
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
            .rest_symbol(symbol, Venue::Bitvavo)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Bitvavo,
                symbol,
            })?;
        let url = format!(
            "{REST_BASE_BITVAVO}/{native}/candles?interval={}&start={}&end={}",
            timeframe.as_str(),
            start_s.saturating_mul(1_000),
            end_s.saturating_mul(1_000),
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "bitvavo candle request failed");
            return Ok(Vec::new());
        }
        let body: Value = response.json().await?;
        let Some(rows) = body.as_array() else {
            return Ok(Vec::new());
        };

        let mut out: Vec<Candle> = rows
            .iter()
            .filter_map(|row| Self::parse_candle_row(symbol, timeframe, row))
            .filter(|candle| candle.open_time_utc_s >= start_s && candle.open_time_utc_s <= end_s)
            .collect();
        out.sort_by_key(|candle| candle.open_time_utc_s);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::fixed::Fx;

    fn adapter() -> BitvavoAdapter {
        BitvavoAdapter::new(Arc::new(SymbolMap::new()))
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let frames = adapter().subscribe_frames(CanonicalSymbol::BtcEur);
        assert_eq!(frames.len(), 1);
        let Message::Text(text) = &frames[0] else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["action"], "subscribe");
        assert_eq!(value["channels"][0]["name"], "trades");
        assert_eq!(value["channels"][0]["markets"][0], "BTC-EUR");
    }

    #[test]
    fn test_parse_trade_with_millisecond_timestamp() {
        let payload = r#"
        {
            "event": "trade",
            "timestamp": 1672515782136,
            "market": "BTC-EUR",
            "id": "108c3633-0276-4480-a902-17b01829deae",
            "amount": "0.005",
            "price": "15587.6",
            "side": "buy"
        }
        "#;
        let trades = adapter().parse_message(CanonicalSymbol::BtcEur, payload);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, Fx::parse("15587.6").unwrap());
        assert_eq!(trades[0].timestamp_utc_ns, 1_672_515_782_136_000_000);
    }

    #[test]
    fn test_parse_trade_with_nanosecond_timestamp() {
        let payload = r#"
        {
            "event": "trade",
            "timestamp": 1672515782136000000,
            "market": "BTC-EUR",
            "amount": "0.005",
            "price": "15587.6",
            "side": "buy"
        }
        "#;
        let trades = adapter().parse_message(CanonicalSymbol::BtcEur, payload);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].timestamp_utc_ns, 1_672_515_782_136_000_000);
    }

    #[test]
    fn test_control_frames_produce_no_trades() {
        let adapter = adapter();
        assert!(adapter
            .parse_message(
                CanonicalSymbol::BtcEur,
                r#"{"event":"subscribed","subscriptions":{"trades":["BTC-EUR"]}}"#
            )
            .is_empty());
        assert!(adapter.parse_message(CanonicalSymbol::BtcEur, "garbage").is_empty());
    }

    #[test]
    fn test_parse_candle_row() {
        let row = json!([1672515780000i64, "15587.6", "15590.0", "15580.0", "15585.0", "3.25"]);
        let candle =
            BitvavoAdapter::parse_candle_row(CanonicalSymbol::BtcEur, Timeframe::M30, &row).unwrap();
        assert_eq!(candle.open_time_utc_s, 1_672_515_780);
        assert_eq!(candle.volume, Fx::parse("3.25").unwrap());
    }
}
