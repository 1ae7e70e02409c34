//! Deterministic candle roll-up

use crate::exchanges::types::{bucket_open, Candle, Timeframe};
use crate::market_data::fixed::Fx;

/// Roll lower-granularity candles up into `target` buckets.
///
/// Input must be sorted ascending by open time; the target second-count is
/// expected to be an integer multiple of the input granularity. Each output
/// bucket opens on a `target` boundary and takes the first row's open, the
/// last row's close, the extreme high/low, and the summed volume. Output is
/// ascending and labelled with `target`.
pub fn up_aggregate(candles: &[Candle], target: Timeframe) -> Vec<Candle> {
    let target_s = target.seconds();
    let mut out: Vec<Candle> = Vec::new();

    for row in candles {
        let open_time = bucket_open(row.open_time_utc_s, target_s);
        match out.last_mut() {
            Some(current) if current.open_time_utc_s == open_time => {
                current.high = current.high.max(row.high);
                current.low = current.low.min(row.low);
                current.close = row.close;
                current.volume = current.volume.saturating_add(row.volume);
            }
            _ => out.push(Candle {
                symbol: row.symbol,
                timeframe: target,
                open_time_utc_s: open_time,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            }),
        }
    }

    out
}
