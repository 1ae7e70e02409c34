//! Command controller
//!
//! Owns the current selection, the persisted state store, the live venue
//! supervisors and the aggregator, and applies the command protocol coming
//! in over the message port. Everything multiplexes on one task: command
//! intake, adapter events, and aggregate emissions.

use crate::exchanges::connector::make_adapter;
use crate::exchanges::supervisor::{AdapterEvent, ConnectionSupervisor};
use crate::exchanges::types::{CanonicalSymbol, Timeframe, Venue};
use crate::market_data::aggregator::{Aggregator, TICK_INTERVAL};
use crate::market_data::symbol_map::SymbolMap;
use crate::port::{
    ack_event, aggregated_event, candle_event, error_event, status_event, Command, ErrorCode,
    Inbound,
};
use crate::state_store::StateStore;
use chrono::DateTime;
use futures_util::future;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_SYMBOL: CanonicalSymbol = CanonicalSymbol::BtcUsdt;
pub const DEFAULT_TIMEFRAME: Timeframe = Timeframe::M1;

const FEED_SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Venue set for a symbol, in backfill preference order.
pub fn venues_for(symbol: CanonicalSymbol) -> &'static [Venue] {
    match symbol {
        CanonicalSymbol::BtcUsdt => &[Venue::Binance, Venue::Okx, Venue::Bitget],
        CanonicalSymbol::BtcUsd => &[Venue::Coinbase, Venue::Bitstamp, Venue::Kraken],
        CanonicalSymbol::BtcEur => &[Venue::Kraken, Venue::Bitvavo],
    }
}

struct FeedHandle {
    venue: Venue,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct AggregatorHandle {
    aggregator: Arc<Aggregator>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Controller {
    symbol: CanonicalSymbol,
    timeframe: Timeframe,
    store: Option<StateStore>,
    symbols: Arc<SymbolMap>,
    feeds: Vec<FeedHandle>,
    aggregator: Option<AggregatorHandle>,
    backfills: Vec<JoinHandle<()>>,
    out: mpsc::Sender<Value>,
    adapter_tx: mpsc::Sender<AdapterEvent>,
    agg_tx: mpsc::Sender<crate::exchanges::types::AggregatedDataPoint>,
    debug: bool,
    initialized: bool,
}

impl Controller {
    /// Run the controller until a `shutdown` command arrives or the command
    /// channel closes.
    pub async fn run(mut commands: mpsc::Receiver<Inbound>, out: mpsc::Sender<Value>) {
        let (adapter_tx, mut adapter_rx) = mpsc::channel(1024);
        let (agg_tx, mut agg_rx) = mpsc::channel(256);
        let mut controller = Controller {
            symbol: DEFAULT_SYMBOL,
            timeframe: DEFAULT_TIMEFRAME,
            store: None,
            symbols: Arc::new(SymbolMap::new()),
            feeds: Vec::new(),
            aggregator: None,
            backfills: Vec::new(),
            out,
            adapter_tx,
            agg_tx,
            debug: false,
            initialized: false,
        };

        loop {
            tokio::select! {
                inbound = commands.recv() => match inbound {
                    Some(inbound) => {
                        if !controller.handle(inbound).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = adapter_rx.recv() => controller.on_adapter_event(event).await,
                Some(point) = agg_rx.recv() => controller.emit(aggregated_event(&point)).await,
            }
        }

        controller.teardown().await;
    }

    /// Apply one inbound frame; returns false once the controller should
    /// stop.
    async fn handle(&mut self, inbound: Inbound) -> bool {
        let (req_id, command) = match inbound {
            Inbound::Command { req_id, command } => (req_id, command),
            Inbound::Invalid {
                req_id,
                code,
                message,
            } => {
                self.emit(error_event(code, &message, req_id.as_deref())).await;
                return true;
            }
        };
        if self.debug {
            debug!(?command, ?req_id, "handling command");
        }

        match command {
            Command::Init {
                state_dir_path,
                debug,
            } => {
                self.debug = debug;
                let store = StateStore::new(&state_dir_path);
                let (saved_symbol, saved_timeframe) = store.load();
                if let Some(symbol) = saved_symbol {
                    self.symbol = symbol;
                }
                if let Some(timeframe) = saved_timeframe {
                    self.timeframe = timeframe;
                }
                self.store = Some(store);

                // Re-init restarts everything from scratch.
                self.stop_aggregator().await;
                self.stop_feeds().await;
                self.start_feeds();
                self.start_aggregator();
                self.initialized = true;
                info!(symbol = %self.symbol, timeframe = %self.timeframe, "initialized");
                self.emit(ack_event(
                    "init",
                    json!({"symbol": self.symbol, "timeframe": self.timeframe}),
                    req_id.as_deref(),
                ))
                .await;
            }

            Command::SetSymbol { symbol } => {
                if !self.require_init(&req_id).await {
                    return true;
                }
                let parsed: CanonicalSymbol = match symbol.parse() {
                    Ok(parsed) => parsed,
                    Err(_) => {
                        self.emit(error_event(
                            ErrorCode::InvalidArg,
                            &format!("unsupported symbol: {symbol}"),
                            req_id.as_deref(),
                        ))
                        .await;
                        return true;
                    }
                };
                if !self.persist(parsed, self.timeframe, &req_id).await {
                    return true;
                }
                self.stop_aggregator().await;
                self.stop_feeds().await;
                self.symbol = parsed;
                self.start_feeds();
                self.start_aggregator();
                info!(symbol = %self.symbol, "symbol changed");
                self.emit(ack_event("setSymbol", json!({}), req_id.as_deref())).await;
            }

            Command::SetTimeframe { timeframe } => {
                if !self.require_init(&req_id).await {
                    return true;
                }
                let parsed: Timeframe = match timeframe.parse() {
                    Ok(parsed) => parsed,
                    Err(_) => {
                        self.emit(error_event(
                            ErrorCode::InvalidArg,
                            &format!("unsupported timeframe: {timeframe}"),
                            req_id.as_deref(),
                        ))
                        .await;
                        return true;
                    }
                };
                if !self.persist(self.symbol, parsed, &req_id).await {
                    return true;
                }
                self.stop_aggregator().await;
                self.timeframe = parsed;
                self.start_aggregator();
                info!(timeframe = %self.timeframe, "timeframe changed");
                self.emit(ack_event("setTimeframe", json!({}), req_id.as_deref()))
                    .await;
            }

            Command::Backfill {
                symbol,
                timeframe,
                start_iso,
                end_iso,
            } => {
                if !self.require_init(&req_id).await {
                    return true;
                }
                self.start_backfill(symbol, timeframe, start_iso, end_iso, req_id)
                    .await;
            }

            Command::Shutdown => {
                self.teardown().await;
                self.emit(ack_event("shutdown", json!({}), req_id.as_deref())).await;
                info!("shutdown complete");
                return false;
            }
        }
        true
    }

    async fn on_adapter_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::Trade(trade) => {
                // Feeds being torn down may still flush trades for the
                // previous symbol.
                if trade.symbol != self.symbol {
                    return;
                }
                if let Some(handle) = &self.aggregator {
                    handle.aggregator.enqueue(trade);
                }
            }
            AdapterEvent::ConnectionChange { .. } | AdapterEvent::Status { .. } => {
                let dropped = self
                    .aggregator
                    .as_ref()
                    .map(|handle| handle.aggregator.dropped_trades())
                    .unwrap_or(0);
                self.emit(status_event(&event, dropped)).await;
            }
        }
    }

    async fn start_backfill(
        &mut self,
        symbol: Option<String>,
        timeframe: Option<String>,
        start_iso: String,
        end_iso: String,
        req_id: Option<String>,
    ) {
        let symbol = match symbol {
            Some(raw) => match raw.parse::<CanonicalSymbol>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    self.emit(error_event(
                        ErrorCode::InvalidArg,
                        &format!("unsupported symbol: {raw}"),
                        req_id.as_deref(),
                    ))
                    .await;
                    return;
                }
            },
            None => self.symbol,
        };
        let timeframe = match timeframe {
            Some(raw) => match raw.parse::<Timeframe>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    self.emit(error_event(
                        ErrorCode::InvalidArg,
                        &format!("unsupported timeframe: {raw}"),
                        req_id.as_deref(),
                    ))
                    .await;
                    return;
                }
            },
            None => self.timeframe,
        };
        let (start_s, end_s) = match (parse_iso(&start_iso), parse_iso(&end_iso)) {
            (Some(start_s), Some(end_s)) if start_s < end_s => (start_s, end_s),
            _ => {
                self.emit(error_event(
                    ErrorCode::InvalidArg,
                    "startIso/endIso must be RFC3339 with startIso < endIso",
                    req_id.as_deref(),
                ))
                .await;
                return;
            }
        };

        let out = self.out.clone();
        let symbols = self.symbols.clone();
        let task = tokio::spawn(async move {
            let mut candles = Vec::new();
            for venue in venues_for(symbol) {
                let adapter = make_adapter(*venue, symbols.clone());
                match adapter
                    .fetch_historical_candles(symbol, timeframe, start_s, end_s)
                    .await
                {
                    Ok(batch) => {
                        debug!(%venue, count = batch.len(), "backfill fetched");
                        candles = batch;
                        break;
                    }
                    Err(err) => {
                        warn!(%venue, %err, "backfill venue failed, trying next");
                    }
                }
            }
            for candle in &candles {
                if out.send(candle_event(candle, req_id.as_deref())).await.is_err() {
                    return;
                }
            }
            let _ = out
                .send(ack_event("backfill", json!({}), req_id.as_deref()))
                .await;
        });

        self.backfills.retain(|task| !task.is_finished());
        self.backfills.push(task);
    }

    async fn require_init(&mut self, req_id: &Option<String>) -> bool {
        if self.initialized {
            return true;
        }
        self.emit(error_event(
            ErrorCode::Unavailable,
            "controller is not initialized",
            req_id.as_deref(),
        ))
        .await;
        false
    }

    /// Persist a selection; on failure report `INTERNAL` and leave the
    /// current state untouched.
    async fn persist(
        &mut self,
        symbol: CanonicalSymbol,
        timeframe: Timeframe,
        req_id: &Option<String>,
    ) -> bool {
        let Some(store) = &self.store else {
            // require_init guards the callers; a missing store here is a
            // logic error surfaced as UNAVAILABLE rather than a panic.
            self.emit(error_event(
                ErrorCode::Unavailable,
                "state store is not configured",
                req_id.as_deref(),
            ))
            .await;
            return false;
        };
        if let Err(err) = store.save(symbol, timeframe) {
            warn!(%err, "failed to persist selection");
            self.emit(error_event(
                ErrorCode::Internal,
                &format!("failed to persist selection: {err}"),
                req_id.as_deref(),
            ))
            .await;
            return false;
        }
        true
    }

    fn start_feeds(&mut self) {
        for venue in venues_for(self.symbol) {
            let adapter = make_adapter(*venue, self.symbols.clone());
            let (stop_tx, stop_rx) = watch::channel(false);
            let supervisor =
                ConnectionSupervisor::new(adapter, self.symbol, self.adapter_tx.clone(), stop_rx);
            let task = tokio::spawn(supervisor.run());
            self.feeds.push(FeedHandle {
                venue: *venue,
                stop: stop_tx,
                task,
            });
        }
    }

    async fn stop_feeds(&mut self) {
        let feeds = std::mem::take(&mut self.feeds);
        let shutdowns = feeds.into_iter().map(|mut handle| async move {
            let _ = handle.stop.send(true);
            if tokio::time::timeout(FEED_SHUTDOWN_GRACE, &mut handle.task)
                .await
                .is_err()
            {
                warn!(venue = %handle.venue, "feed did not stop in time, aborting");
                handle.task.abort();
            }
        });
        future::join_all(shutdowns).await;
    }

    fn start_aggregator(&mut self) {
        let aggregator = Arc::new(Aggregator::new(self.symbol, self.timeframe));
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let ticker_aggregator = aggregator.clone();
        let emissions = self.agg_tx.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let now_ns = crate::exchanges::types::now_utc_ns();
                        for point in ticker_aggregator.tick_at(now_ns) {
                            if emissions.send(point).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });
        self.aggregator = Some(AggregatorHandle {
            aggregator,
            stop: stop_tx,
            task,
        });
    }

    async fn stop_aggregator(&mut self) {
        if let Some(mut handle) = self.aggregator.take() {
            let _ = handle.stop.send(true);
            if tokio::time::timeout(FEED_SHUTDOWN_GRACE, &mut handle.task)
                .await
                .is_err()
            {
                handle.task.abort();
            }
        }
    }

    async fn teardown(&mut self) {
        self.stop_aggregator().await;
        self.stop_feeds().await;
        for task in self.backfills.drain(..) {
            task.abort();
        }
        self.initialized = false;
    }

    async fn emit(&self, event: Value) {
        let _ = self.out.send(event).await;
    }
}

fn parse_iso(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp())
}
