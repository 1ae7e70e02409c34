//! Binance adapter

use crate::exchanges::connector::{
    http_client, AdapterResult, ExchangeAdapter, ExchangeError,
};
use crate::exchanges::types::{Candle, CanonicalSymbol, NormalizedTrade, Timeframe, Venue};
use crate::market_data::fixed::Fx;
use crate::market_data::symbol_map::SymbolMap;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

pub const WS_BASE_BINANCE: &str = "wss://stream.binance.com:9443/ws";
pub const REST_BASE_BINANCE: &str = "https://api.binance.com";

const PAGE_LIMIT: usize = 1000;
const PAGE_DELAY: Duration = Duration::from_millis(200);

/// Binance trade stream message.
///
/// See docs: <https://binance-docs.github.io/apidocs/spot/en/#trade-streams>
#[derive(Debug, Clone, Deserialize)]
struct BinanceTradeMessage {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time_ms: i64,
}

pub struct BinanceAdapter {
    symbols: Arc<SymbolMap>,
    client: reqwest::Client,
}

impl BinanceAdapter {
    pub fn new(symbols: Arc<SymbolMap>) -> Self {
        Self {
            symbols,
            client: http_client(),
        }
    }

    fn native(&self, symbol: CanonicalSymbol) -> AdapterResult<&'static str> {
        self.symbols
            .ws_symbol(symbol, Venue::Binance)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Binance,
                symbol,
            })
    }

    fn parse_kline_row(symbol: CanonicalSymbol, timeframe: Timeframe, row: &Value) -> Option<Candle> {
        let row = row.as_array()?;
        let open_time_ms = row.first()?.as_i64()?;
        Some(Candle {
            symbol,
            timeframe,
            open_time_utc_s: open_time_ms.div_euclid(1_000),
            open: Fx::parse(row.get(1)?.as_str()?)?,
            high: Fx::parse(row.get(2)?.as_str()?)?,
            low: Fx::parse(row.get(3)?.as_str()?)?,
            close: Fx::parse(row.get(4)?.as_str()?)?,
            volume: Fx::parse(row.get(5)?.as_str()?)?,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn ws_url(&self, symbol: CanonicalSymbol) -> AdapterResult<String> {
        let native = self.native(symbol)?;
        Ok(format!("{WS_BASE_BINANCE}/{}@trade", native.to_lowercase()))
    }

    // Binance subscribes through the URL path.
    fn subscribe_frames(&self, _symbol: CanonicalSymbol) -> Vec<Message> {
        Vec::new()
    }

    fn parse_message(&self, symbol: CanonicalSymbol, text: &str) -> Vec<NormalizedTrade> {
        let message: BinanceTradeMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(_) => return Vec::new(),
        };
        if message.event_type != "trade" {
            return Vec::new();
        }
        let (Some(price), Some(size)) = (Fx::parse(&message.price), Fx::parse(&message.quantity))
        else {
            return Vec::new();
        };
        if !price.is_positive() || size.raw() < 0 {
            return Vec::new();
        }
        vec![NormalizedTrade {
            symbol,
            venue: Venue::Binance,
            price,
            size,
            timestamp_utc_ns: message.trade_time_ms.saturating_mul(1_000_000),
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
            .rest_symbol(symbol, Venue::Binance)
            .ok_or(ExchangeError::UnsupportedPair {
                venue: Venue::Binance,
                symbol,
            })?;
        let end_ms = end_s.saturating_mul(1_000);
        let mut cursor_ms = start_s.saturating_mul(1_000);
        let mut out = Vec::new();

        loop {
            let url = format!(
                "{REST_BASE_BINANCE}/api/v3/klines?symbol={native}&interval={}&startTime={cursor_ms}&limit={PAGE_LIMIT}",
                timeframe.as_str(),
            );
            let response = self.client.get(&url).send().await?;
            if !response.status().is_success() {
                warn!(status = %response.status(), "binance kline request failed");
                return Ok(out);
            }
            let body: Value = response.json().await?;
            let Some(rows) = body.as_array() else {
                return Ok(out);
            };

            let count = rows.len();
            let mut last_open_ms = cursor_ms;
            for row in rows {
                if let Some(candle) = Self::parse_kline_row(symbol, timeframe, row) {
                    last_open_ms = candle.open_time_utc_s * 1_000;
                    if candle.open_time_utc_s >= start_s && candle.open_time_utc_s <= end_s {
                        out.push(candle);
                    }
                }
            }

            if count < PAGE_LIMIT {
                break;
            }
            cursor_ms = last_open_ms + 1;
            if cursor_ms > end_ms {
                break;
            }
            tokio::time::sleep(PAGE_DELAY).await;
        }

        Ok(out)
    }
}
