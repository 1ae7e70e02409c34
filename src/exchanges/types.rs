//! Canonical market data types shared across venues

use crate::market_data::fixed::Fx;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Venue identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Venue {
    Binance,
    Okx,
    Bitget,
    Coinbase,
    Bitstamp,
    Kraken,
    Bitvavo,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Okx => "okx",
            Venue::Bitget => "bitget",
            Venue::Coinbase => "coinbase",
            Venue::Bitstamp => "bitstamp",
            Venue::Kraken => "kraken",
            Venue::Bitvavo => "bitvavo",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Venue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Exchange-independent pair identifier of the form `BASE/QUOTE`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonicalSymbol {
    BtcUsdt,
    BtcUsd,
    BtcEur,
}

impl CanonicalSymbol {
    pub const ALL: [CanonicalSymbol; 3] = [
        CanonicalSymbol::BtcUsdt,
        CanonicalSymbol::BtcUsd,
        CanonicalSymbol::BtcEur,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalSymbol::BtcUsdt => "BTC/USDT",
            CanonicalSymbol::BtcUsd => "BTC/USD",
            CanonicalSymbol::BtcEur => "BTC/EUR",
        }
    }
}

impl fmt::Display for CanonicalSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported symbol: {0}")]
pub struct ParseSymbolError(String);

impl FromStr for CanonicalSymbol {
    type Err = ParseSymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BTC/USDT" => Ok(CanonicalSymbol::BtcUsdt),
            "BTC/USD" => Ok(CanonicalSymbol::BtcUsd),
            "BTC/EUR" => Ok(CanonicalSymbol::BtcEur),
            other => Err(ParseSymbolError(other.to_string())),
        }
    }
}

impl Serialize for CanonicalSymbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CanonicalSymbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Chart timeframe with a fixed second-count per bucket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
    ];

    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
            Timeframe::W1 => 604_800,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported timeframe: {0}")]
pub struct ParseTimeframeError(String);

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| ParseTimeframeError(s.to_string()))
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A single venue trade normalized to the canonical representation.
///
/// `price > 0` and `size >= 0`; the timestamp is UTC nanoseconds since the
/// Unix epoch, promoted from whatever precision the venue reports.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTrade {
    pub symbol: CanonicalSymbol,
    pub venue: Venue,
    pub price: Fx,
    pub size: Fx,
    pub timestamp_utc_ns: i64,
}

/// Rolling aggregate for one bucket, emitted on the 250 ms cadence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedDataPoint {
    pub symbol: CanonicalSymbol,
    pub timeframe: Timeframe,
    pub timestamp_utc_s: i64,
    pub vwap: Fx,
    pub volume: Fx,
    pub last_price: Fx,
    pub amend: bool,
}

/// OHLCV candle labelled with the timeframe it was requested at.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub symbol: CanonicalSymbol,
    pub timeframe: Timeframe,
    pub open_time_utc_s: i64,
    pub open: Fx,
    pub high: Fx,
    pub low: Fx,
    pub close: Fx,
    pub volume: Fx,
}

/// Open second of the bucket containing `ts_s`, aligned on `tf_s` boundaries.
pub fn bucket_open(ts_s: i64, tf_s: i64) -> i64 {
    ts_s.div_euclid(tf_s) * tf_s
}

/// Current UTC time in nanoseconds since the Unix epoch.
pub fn now_utc_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_round_trip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("2m".parse::<Timeframe>().is_err());
        assert!("".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_symbol_round_trip() {
        for symbol in CanonicalSymbol::ALL {
            assert_eq!(symbol.as_str().parse::<CanonicalSymbol>().unwrap(), symbol);
        }
        assert!("ETH/USD".parse::<CanonicalSymbol>().is_err());
    }

    #[test]
    fn test_bucket_alignment() {
        for tf in Timeframe::ALL {
            let tf_s = tf.seconds();
            for ts in [0i64, 1, 59, 1_700_000_123, 1_700_000_000_000 / 1_000] {
                let open = bucket_open(ts, tf_s);
                assert!(open <= ts, "open {open} > ts {ts}");
                assert!(ts < open + tf_s, "ts {ts} outside bucket [{open}, {})", open + tf_s);
                assert_eq!(open % tf_s, 0);
            }
        }
    }

    #[test]
    fn test_aggregate_serializes_camel_case() {
        let point = AggregatedDataPoint {
            symbol: CanonicalSymbol::BtcUsdt,
            timeframe: Timeframe::M1,
            timestamp_utc_s: 1_700_000_100,
            vwap: Fx::parse("101.33333333").unwrap(),
            volume: Fx::parse("3").unwrap(),
            last_price: Fx::parse("102").unwrap(),
            amend: false,
        };
        let value = serde_json::to_value(point).unwrap();
        assert_eq!(value["symbol"], "BTC/USDT");
        assert_eq!(value["timeframe"], "1m");
        assert_eq!(value["timestampUtcS"], 1_700_000_100);
        assert_eq!(value["vwap"], "101.33333333");
        assert_eq!(value["lastPrice"], "102.00000000");
        assert_eq!(value["amend"], false);
    }
}
