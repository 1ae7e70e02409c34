//! Rolling trade aggregation
//!
//! Trades are queued lock-free of the tick path and folded into the current
//! bucket every 250 ms. A bucket is emitted once its boundary passes; late
//! trades for the previously emitted bucket may republish it as an amend for
//! up to two seconds after the close.

use crate::exchanges::types::{
    bucket_open, AggregatedDataPoint, CanonicalSymbol, NormalizedTrade, Timeframe,
};
use crate::market_data::fixed::Fx;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cadence at which [`Aggregator::tick_at`] is driven.
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Intake bound; the oldest trade is dropped once it is exceeded.
const QUEUE_CAPACITY: usize = 65_536;

/// Grace window after a bucket close during which late trades amend it.
const AMEND_GRACE_S: i64 = 2;

/// Trades older than this are considered corrupt and discarded.
const MAX_TRADE_AGE_S: i64 = 7 * 86_400;

const NANOS_PER_SEC: i64 = 1_000_000_000;

struct EmittedBucket {
    point: AggregatedDataPoint,
    pv_sum: i128,
    v_sum: i128,
}

struct AggState {
    bucket_open_s: Option<i64>,
    /// Running `Σ price·size / 10^8` in raw Fx units, widened to 128 bits.
    pv_sum: i128,
    /// Running `Σ size` in raw Fx units, widened to 128 bits.
    v_sum: i128,
    last_price: Fx,
    last_emitted: Option<EmittedBucket>,
}

/// Per-selection aggregator. Changing the symbol or timeframe replaces the
/// whole instance; no bucket state carries across.
pub struct Aggregator {
    symbol: CanonicalSymbol,
    timeframe: Timeframe,
    queue: Mutex<VecDeque<NormalizedTrade>>,
    dropped: AtomicU64,
    state: Mutex<AggState>,
}

impl Aggregator {
    pub fn new(symbol: CanonicalSymbol, timeframe: Timeframe) -> Self {
        Self {
            symbol,
            timeframe,
            queue: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            state: Mutex::new(AggState {
                bucket_open_s: None,
                pv_sum: 0,
                v_sum: 0,
                last_price: Fx::ZERO,
                last_emitted: None,
            }),
        }
    }

    pub fn symbol(&self) -> CanonicalSymbol {
        self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Non-blocking intake; safe to call concurrently with [`tick_at`].
    pub fn enqueue(&self, trade: NormalizedTrade) {
        let mut queue = self.queue.lock();
        if queue.len() >= QUEUE_CAPACITY {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(trade);
    }

    /// Trades dropped by the intake bound since construction.
    pub fn dropped_trades(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain the queue, fold the batch in arrival order, and emit any bucket
    /// whose boundary has passed. `now_ns` is the wall clock; the periodic
    /// driver passes the current time, tests pass a synthetic one.
    pub fn tick_at(&self, now_ns: i64) -> Vec<AggregatedDataPoint> {
        let batch: Vec<NormalizedTrade> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };

        let now_s = now_ns.div_euclid(NANOS_PER_SEC);
        let tf_s = self.timeframe.seconds();
        let mut state = self.state.lock();
        let mut out = Vec::new();

        for trade in batch {
            if trade.timestamp_utc_ns < now_ns.saturating_sub(MAX_TRADE_AGE_S * NANOS_PER_SEC) {
                continue;
            }
            let ts_s = trade.timestamp_utc_ns.div_euclid(NANOS_PER_SEC);
            let bucket = bucket_open(ts_s, tf_s);

            if self.try_amend(&mut state, &mut out, trade, bucket, now_s, tf_s) {
                continue;
            }

            match state.bucket_open_s {
                None => state.bucket_open_s = Some(bucket),
                Some(current) if bucket > current => {
                    state.pv_sum = 0;
                    state.v_sum = 0;
                    state.bucket_open_s = Some(bucket);
                }
                Some(current) if bucket < current => {
                    // Stale beyond the amend window; folding it would skew
                    // the in-progress bucket.
                    continue;
                }
                Some(_) => {}
            }
            state.pv_sum += scaled_product(trade.price, trade.size);
            state.v_sum += trade.size.raw() as i128;
            state.last_price = trade.price;
        }

        if let Some(current) = state.bucket_open_s {
            if now_s >= current + tf_s {
                let point = AggregatedDataPoint {
                    symbol: self.symbol,
                    timeframe: self.timeframe,
                    timestamp_utc_s: current,
                    vwap: vwap(state.pv_sum, state.v_sum, state.last_price),
                    volume: Fx::from_raw(clamp(state.v_sum)),
                    last_price: state.last_price,
                    amend: false,
                };
                out.push(point);
                state.last_emitted = Some(EmittedBucket {
                    point,
                    pv_sum: state.pv_sum,
                    v_sum: state.v_sum,
                });
                // Snap to the wall-clock bucket rather than replaying every
                // empty bucket after a long stall.
                state.bucket_open_s = Some(bucket_open(now_s, tf_s));
                state.pv_sum = 0;
                state.v_sum = 0;
            }
        }

        out
    }

    /// Apply the late-trade amend policy. Returns true when the trade was
    /// consumed (folded into the emitted bucket or dropped).
    fn try_amend(
        &self,
        state: &mut AggState,
        out: &mut Vec<AggregatedDataPoint>,
        trade: NormalizedTrade,
        bucket: i64,
        now_s: i64,
        tf_s: i64,
    ) -> bool {
        let emitted_open = match &state.last_emitted {
            Some(emitted) => emitted.point.timestamp_utc_s,
            None => return false,
        };
        if bucket != emitted_open || now_s - (emitted_open + tf_s) > AMEND_GRACE_S {
            return false;
        }

        // The amend sums are only trustworthy while the live accumulation has
        // not rolled forward past the bucket that follows the emission.
        let live_clean = state.v_sum == 0 && state.bucket_open_s == Some(emitted_open + tf_s);
        if live_clean {
            if let Some(emitted) = state.last_emitted.as_mut() {
                emitted.pv_sum += scaled_product(trade.price, trade.size);
                emitted.v_sum += trade.size.raw() as i128;
                emitted.point.vwap = vwap(emitted.pv_sum, emitted.v_sum, trade.price);
                emitted.point.volume = Fx::from_raw(clamp(emitted.v_sum));
                emitted.point.last_price = trade.price;
                emitted.point.amend = true;
                out.push(emitted.point);
            }
        }
        state.last_price = trade.price;
        true
    }
}

/// `price·size / 10^8` in raw Fx units, widened.
fn scaled_product(price: Fx, size: Fx) -> i128 {
    price.raw() as i128 * size.raw() as i128 / Fx::SCALE as i128
}

/// `Σpv · 10^8 / Σv`, or the last price for an empty bucket.
fn vwap(pv_sum: i128, v_sum: i128, last_price: Fx) -> Fx {
    if v_sum > 0 {
        Fx::from_raw(clamp(pv_sum * Fx::SCALE as i128 / v_sum))
    } else {
        last_price
    }
}

fn clamp(value: i128) -> i64 {
    if value > i64::MAX as i128 {
        i64::MAX
    } else if value < i64::MIN as i128 {
        i64::MIN
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::types::Venue;

    const T0: i64 = 1_700_000_100; // aligned on 1m
    const NS: i64 = NANOS_PER_SEC;

    fn trade(price: &str, size: &str, ts_s: i64) -> NormalizedTrade {
        NormalizedTrade {
            symbol: CanonicalSymbol::BtcUsdt,
            venue: Venue::Binance,
            price: Fx::parse(price).unwrap(),
            size: Fx::parse(size).unwrap(),
            timestamp_utc_ns: ts_s * NS,
        }
    }

    #[test]
    fn test_no_emission_before_boundary() {
        let agg = Aggregator::new(CanonicalSymbol::BtcUsdt, Timeframe::M1);
        agg.enqueue(trade("100.0", "1.0", T0));
        agg.enqueue(trade("102.0", "2.0", T0 + 10));
        assert!(agg.tick_at((T0 + 30) * NS).is_empty());
    }

    #[test]
    fn test_vwap_emission_after_close() {
        let agg = Aggregator::new(CanonicalSymbol::BtcUsdt, Timeframe::M1);
        agg.enqueue(trade("100.0", "1.0", T0));
        agg.enqueue(trade("102.0", "2.0", T0 + 10));
        assert!(agg.tick_at((T0 + 30) * NS).is_empty());

        let emitted = agg.tick_at((T0 + 61) * NS);
        assert_eq!(emitted.len(), 1);
        let point = emitted[0];
        assert_eq!(point.timestamp_utc_s, T0);
        assert_eq!(point.vwap.format(8), "101.33333333");
        assert_eq!(point.volume.format(8), "3.00000000");
        assert_eq!(point.last_price.format(8), "102.00000000");
        assert!(!point.amend);

        // Exactly one amend=false event for the bucket.
        assert!(agg.tick_at((T0 + 62) * NS).is_empty());
    }

    #[test]
    fn test_amend_within_grace_window() {
        let agg = Aggregator::new(CanonicalSymbol::BtcUsdt, Timeframe::M1);
        agg.enqueue(trade("100.0", "1.0", T0));
        agg.enqueue(trade("102.0", "2.0", T0 + 10));
        agg.tick_at((T0 + 61) * NS);

        agg.enqueue(trade("98.0", "1.0", T0 + 30));
        let emitted = agg.tick_at((T0 + 61) * NS + 500_000_000);
        assert_eq!(emitted.len(), 1);
        let point = emitted[0];
        assert!(point.amend);
        assert_eq!(point.timestamp_utc_s, T0);
        assert_eq!(point.vwap.format(8), "100.50000000");
        assert_eq!(point.volume.format(8), "4.00000000");
        assert_eq!(point.last_price.format(8), "98.00000000");
    }

    #[test]
    fn test_amends_are_monotonic() {
        let agg = Aggregator::new(CanonicalSymbol::BtcUsdt, Timeframe::M1);
        agg.enqueue(trade("100.0", "1.0", T0));
        agg.tick_at((T0 + 61) * NS);

        agg.enqueue(trade("104.0", "1.0", T0 + 20));
        let first = agg.tick_at((T0 + 61) * NS)[0];
        assert_eq!(first.volume.format(8), "2.00000000");
        assert_eq!(first.vwap.format(8), "102.00000000");

        agg.enqueue(trade("104.0", "2.0", T0 + 40));
        let second = agg.tick_at((T0 + 62) * NS)[0];
        assert_eq!(second.volume.format(8), "4.00000000");
        assert_eq!(second.vwap.format(8), "103.00000000");
    }

    #[test]
    fn test_late_trade_past_grace_is_dropped() {
        let agg = Aggregator::new(CanonicalSymbol::BtcUsdt, Timeframe::M1);
        agg.enqueue(trade("100.0", "1.0", T0));
        let emitted = agg.tick_at((T0 + 61) * NS);
        assert_eq!(emitted.len(), 1);

        agg.enqueue(trade("50.0", "5.0", T0 + 30));
        assert!(agg.tick_at((T0 + 64) * NS).is_empty());

        // The next bucket is untouched by the dropped trade.
        agg.enqueue(trade("101.0", "1.0", T0 + 70));
        let next = agg.tick_at((T0 + 121) * NS);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].timestamp_utc_s, T0 + 60);
        assert_eq!(next[0].vwap.format(8), "101.00000000");
        assert_eq!(next[0].volume.format(8), "1.00000000");
    }

    #[test]
    fn test_amend_invalidated_by_newer_bucket_trade() {
        let agg = Aggregator::new(CanonicalSymbol::BtcUsdt, Timeframe::M1);
        agg.enqueue(trade("100.0", "1.0", T0));
        agg.tick_at((T0 + 61) * NS);

        // A trade folded into the following bucket rolls the live state
        // forward; the late trade then only refreshes the last price.
        agg.enqueue(trade("105.0", "1.0", T0 + 65));
        agg.enqueue(trade("90.0", "1.0", T0 + 30));
        let emitted = agg.tick_at((T0 + 61) * NS + 750_000_000);
        assert!(emitted.is_empty());

        let next = agg.tick_at((T0 + 121) * NS);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].volume.format(8), "1.00000000");
        assert_eq!(next[0].vwap.format(8), "105.00000000");
        assert_eq!(next[0].last_price.format(8), "90.00000000");
    }

    #[test]
    fn test_empty_bucket_carries_last_price() {
        let agg = Aggregator::new(CanonicalSymbol::BtcUsdt, Timeframe::M1);
        agg.enqueue(trade("100.0", "1.0", T0));
        agg.tick_at((T0 + 61) * NS);

        let empty = agg.tick_at((T0 + 121) * NS);
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].timestamp_utc_s, T0 + 60);
        assert_eq!(empty[0].volume, Fx::ZERO);
        assert_eq!(empty[0].vwap.format(8), "100.00000000");
        assert_eq!(empty[0].last_price.format(8), "100.00000000");
    }

    #[test]
    fn test_stall_snaps_to_wall_clock_bucket() {
        let agg = Aggregator::new(CanonicalSymbol::BtcUsdt, Timeframe::M1);
        agg.enqueue(trade("100.0", "1.0", T0));
        // Ten buckets pass before the next tick; only the stale bucket is
        // emitted and the state lands on the current bucket.
        let emitted = agg.tick_at((T0 + 601) * NS);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].timestamp_utc_s, T0);

        let next = agg.tick_at((T0 + 661) * NS);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].timestamp_utc_s, T0 + 600);
    }

    #[test]
    fn test_ancient_trades_are_discarded() {
        let agg = Aggregator::new(CanonicalSymbol::BtcUsdt, Timeframe::M1);
        agg.enqueue(trade("100.0", "1.0", T0 - 8 * 86_400));
        agg.enqueue(trade("101.0", "1.0", T0));
        let emitted = agg.tick_at((T0 + 61) * NS);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].volume.format(8), "1.00000000");
        assert_eq!(emitted[0].vwap.format(8), "101.00000000");
    }

    #[test]
    fn test_queue_bound_drops_oldest() {
        let agg = Aggregator::new(CanonicalSymbol::BtcUsdt, Timeframe::M1);
        for _ in 0..QUEUE_CAPACITY + 10 {
            agg.enqueue(trade("100.0", "0.001", T0));
        }
        assert_eq!(agg.dropped_trades(), 10);
    }

    #[test]
    fn test_vwap_survives_large_notional() {
        // price ~10^5, size ~10^4 per trade; the per-trade product overflows
        // a raw i64 without the widened intermediate.
        let agg = Aggregator::new(CanonicalSymbol::BtcUsdt, Timeframe::M1);
        for _ in 0..10 {
            agg.enqueue(trade("100000.0", "10000.0", T0));
        }
        let emitted = agg.tick_at((T0 + 61) * NS);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].vwap.format(8), "100000.00000000");
        assert_eq!(emitted[0].volume.format(8), "100000.00000000");
    }
}
