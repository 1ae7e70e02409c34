//! OKX adapter

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

pub const WS_BASE_OKX: &str = "wss://ws.okx.com:8443/ws/v5/public";
pub const REST_BASE_OKX: &str = "https://www.okx.com";

const CANDLE_LIMIT: usize = 300;

pub struct OkxAdapter {
    symbols: Arc<SymbolMap>,
    client: reqwest::Client,
}

impl OkxAdapter {
    pub fn new(symbols: Arc<SymbolMap>) -> Self {
        Self {
            symbols,
            client: http_client(),
        }
    }

    fn native(&self, symbol: CanonicalSymbol) -> AdapterResult<&'static str> {
        self.symbols
            .ws_symbol(symbol, Venue::Okx)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Okx,
                symbol,
            })
    }

    fn bar(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1H",
            Timeframe::H4 => "4H",
            Timeframe::D1 => "1D",
            Timeframe::W1 => "1W",
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
impl ExchangeAdapter for OkxAdapter {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    fn ws_url(&self, symbol: CanonicalSymbol) -> AdapterResult<String> {
        self.native(symbol)?;
        Ok(WS_BASE_OKX.to_string())
    }

    fn subscribe_frames(&self, symbol: CanonicalSymbol) -> Vec<Message> {
        let Ok(native) = self.native(symbol) else {
            return Vec::new();
        };
        vec![Message::Text(
            json!({
                "op": "subscribe",
                "args": [{"channel": "trades", "instId": native}],
            })
            .to_string(),
        )]
    }

    // OKX expects an application-level text ping; its "pong" reply is a
    // non-trade control frame.
    fn ping_frame(&self) -> Message {
        Message::Text("ping".to_string())
    }

    fn parse_message(&self, symbol: CanonicalSymbol, text: &str) -> Vec<NormalizedTrade> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return Vec::new(), // includes the raw "pong" reply
        };
        if value["arg"]["channel"].as_str() != Some("trades") {
            return Vec::new();
        }
        let Some(rows) = value["data"].as_array() else {
            return Vec::new();
        };

        rows.iter()
            .filter_map(|row| {
                let price = fx_field(&row["px"])?;
                let size = fx_field(&row["sz"])?;
                if !price.is_positive() || size.raw() < 0 {
                    return None;
                }
                let ts_ms = i64_field(&row["ts"])?;
                Some(NormalizedTrade {
                    symbol,
                    venue: Venue::Okx,
                    price,
                    size,
                    timestamp_utc_ns: ts_ms.saturating_mul(1_000_000),
                })
            })
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
            .rest_symbol(symbol, Venue::Okx)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Okx,
                symbol,
            })?;
        let url = format!(
            "{REST_BASE_OKX}/api/v5/market/candles?instId={native}&bar={}&limit={CANDLE_LIMIT}",
            Self::bar(timeframe),
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "okx candle request failed");
            return Ok(Vec::new());
        }
        let body: Value = response.json().await?;
        let Some(rows) = body["data"].as_array() else {
            return Ok(Vec::new());
        };

        // Response is newest-first.
        let mut out: Vec<Candle> = rows
            .iter()
            .rev()
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

    fn adapter() -> OkxAdapter {
        OkxAdapter::new(Arc::new(SymbolMap::new()))
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let frames = adapter().subscribe_frames(CanonicalSymbol::BtcUsdt);
        assert_eq!(frames.len(), 1);
        let Message::Text(text) = &frames[0] else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["op"], "subscribe");
        assert_eq!(value["args"][0]["channel"], "trades");
        assert_eq!(value["args"][0]["instId"], "BTC-USDT");
    }

    #[test]
    fn test_parse_trade_batch() {
        let payload = r#"
        {
            "arg": {"channel": "trades", "instId": "BTC-USDT"},
            "data": [
                {"instId": "BTC-USDT", "tradeId": "130639474", "px": "42219.9",
                 "sz": "0.12060306", "side": "buy", "ts": "1629386781174"},
                {"instId": "BTC-USDT", "tradeId": "130639475", "px": "42220.1",
                 "sz": "0.5", "side": "sell", "ts": "1629386781201"}
            ]
        }
        "#;
        let trades = adapter().parse_message(CanonicalSymbol::BtcUsdt, payload);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, Fx::parse("42219.9").unwrap());
        assert_eq!(trades[0].timestamp_utc_ns, 1_629_386_781_174_000_000);
        assert_eq!(trades[1].size, Fx::parse("0.5").unwrap());
    }

    #[test]
    fn test_control_frames_produce_no_trades() {
        let adapter = adapter();
        assert!(adapter.parse_message(CanonicalSymbol::BtcUsdt, "pong").is_empty());
        assert!(adapter
            .parse_message(
                CanonicalSymbol::BtcUsdt,
                r#"{"event":"subscribe","arg":{"channel":"trades","instId":"BTC-USDT"}}"#
            )
            .is_empty());
        assert!(adapter
            .parse_message(
                CanonicalSymbol::BtcUsdt,
                r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"data":[{"px":"1","sz":"1","ts":"1"}]}"#
            )
            .is_empty());
    }

    #[test]
    fn test_parse_candle_row_from_strings() {
        let row = serde_json::json!([
            "1629386700000", "42219.9", "42230.0", "42210.1", "42225.5", "120.5", "5090000"
        ]);
        let candle =
            OkxAdapter::parse_candle_row(CanonicalSymbol::BtcUsdt, Timeframe::M1, &row).unwrap();
        assert_eq!(candle.open_time_utc_s, 1_629_386_700);
        assert_eq!(candle.volume, Fx::parse("120.5").unwrap());
    }

    #[test]
    fn test_bar_names() {
        assert_eq!(OkxAdapter::bar(Timeframe::M1), "1m");
        assert_eq!(OkxAdapter::bar(Timeframe::H1), "1H");
        assert_eq!(OkxAdapter::bar(Timeframe::W1), "1W");
    }
}
