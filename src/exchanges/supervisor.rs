//! Connection supervision for venue WebSocket feeds
//!
//! One supervisor task per adapter keeps a single venue connection healthy:
//! connect, subscribe, stream, and on any failure back off exponentially
//! (0.5 s doubling, 30 s cap, ±10 % jitter) before reconnecting. While
//! streaming, an inactivity check closes sockets that go quiet for 30 s and
//! a status beacon reports ingest freshness once a second.

use crate::exchanges::connector::{AdapterResult, ExchangeAdapter, ExchangeError};
use crate::exchanges::types::{now_utc_ns, CanonicalSymbol, NormalizedTrade, Venue};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub const PING_INTERVAL: Duration = Duration::from_secs(15);
pub const INACTIVITY_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);
pub const STATUS_INTERVAL: Duration = Duration::from_secs(1);

const BACKOFF_BASE_S: f64 = 0.5;
const BACKOFF_CAP_S: f64 = 30.0;
const BACKOFF_JITTER: f64 = 0.1;

/// Events surfaced by a supervisor to its owner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AdapterEvent {
    Trade(NormalizedTrade),
    ConnectionChange {
        venue: Venue,
        connected: bool,
    },
    Status {
        venue: Venue,
        last_ingest_utc_ns: i64,
        latency_ms_estimate: i64,
    },
}

/// Stream health counters.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    pub messages_received: AtomicU64,
    pub trades_parsed: AtomicU64,
    pub reconnects: AtomicU64,
}

/// Keeps one venue connection alive for one pair until stopped.
pub struct ConnectionSupervisor {
    adapter: Arc<dyn ExchangeAdapter>,
    symbol: CanonicalSymbol,
    events: mpsc::Sender<AdapterEvent>,
    stop: watch::Receiver<bool>,
    metrics: Arc<StreamMetrics>,
}

impl ConnectionSupervisor {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        symbol: CanonicalSymbol,
        events: mpsc::Sender<AdapterEvent>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            adapter,
            symbol,
            events,
            stop,
            metrics: Arc::new(StreamMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        self.metrics.clone()
    }

    /// Reconnect loop; returns once the stop flag is raised.
    pub async fn run(mut self) {
        let venue = self.adapter.venue();
        let mut attempt: u32 = 0;

        loop {
            if *self.stop.borrow() {
                break;
            }
            match self.stream_once(&mut attempt).await {
                Ok(()) => break, // stopped by the owner
                Err(err) => {
                    warn!(%venue, %err, "stream ended, scheduling reconnect");
                }
            }
            if *self.stop.borrow() {
                break;
            }

            self.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
            let delay = backoff_delay(attempt, &mut rand::thread_rng());
            attempt = attempt.saturating_add(1);
            debug!(%venue, ?delay, attempt, "backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop.changed() => break,
            }
        }

        info!(%venue, "supervisor terminated");
    }

    /// One Connecting → Subscribing → Streaming pass. `Ok(())` means the
    /// owner asked for termination; any error sends the caller to backoff.
    async fn stream_once(&mut self, attempt: &mut u32) -> AdapterResult<()> {
        let venue = self.adapter.venue();
        let url = url::Url::parse(&self.adapter.ws_url(self.symbol)?)?;

        let (mut ws, _) = connect_async(url.as_str()).await?;
        for frame in self.adapter.subscribe_frames(self.symbol) {
            ws.send(frame).await?;
        }
        info!(%venue, "connected and subscribed");
        let _ = self
            .events
            .send(AdapterEvent::ConnectionChange {
                venue,
                connected: true,
            })
            .await;

        let mut last_ingest_ns = now_utc_ns();
        let mut awaiting_first_frame = true;
        let mut ping = tokio::time::interval(PING_INTERVAL);
        let mut inactivity = tokio::time::interval(INACTIVITY_CHECK_INTERVAL);
        let mut status = tokio::time::interval(STATUS_INTERVAL);

        let outcome = loop {
            tokio::select! {
                _ = self.stop.changed() => break Ok(()),

                frame = ws.next() => match frame {
                    Some(Ok(message)) => {
                        last_ingest_ns = now_utc_ns();
                        if awaiting_first_frame {
                            // A healthy stream restarts the backoff sequence.
                            *attempt = 0;
                            awaiting_first_frame = false;
                        }
                        self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                        match message {
                            Message::Text(text) => {
                                let mut owner_gone = false;
                                for trade in self.adapter.parse_message(self.symbol, &text) {
                                    self.metrics.trades_parsed.fetch_add(1, Ordering::Relaxed);
                                    if self.events.send(AdapterEvent::Trade(trade)).await.is_err() {
                                        owner_gone = true;
                                        break;
                                    }
                                }
                                if owner_gone {
                                    break Ok(());
                                }
                            }
                            Message::Ping(payload) => {
                                let _ = ws.send(Message::Pong(payload)).await;
                            }
                            Message::Close(frame) => {
                                break Err(ExchangeError::Connection(format!(
                                    "server closed the stream: {frame:?}"
                                )));
                            }
                            _ => {}
                        }
                    }
                    Some(Err(err)) => break Err(err.into()),
                    None => break Err(ExchangeError::Connection("stream ended".to_string())),
                },

                _ = ping.tick() => {
                    if let Err(err) = ws.send(self.adapter.ping_frame()).await {
                        break Err(err.into());
                    }
                }

                _ = inactivity.tick() => {
                    let idle = now_utc_ns().saturating_sub(last_ingest_ns);
                    if idle > INACTIVITY_TIMEOUT.as_nanos() as i64 {
                        break Err(ExchangeError::Inactive);
                    }
                }

                _ = status.tick() => {
                    let latency_ms = now_utc_ns()
                        .saturating_sub(last_ingest_ns)
                        .max(0) / 1_000_000;
                    debug!(
                        %venue,
                        latency_ms,
                        frames = self.metrics.messages_received.load(Ordering::Relaxed),
                        trades = self.metrics.trades_parsed.load(Ordering::Relaxed),
                        "stream status"
                    );
                    let _ = self.events.send(AdapterEvent::Status {
                        venue,
                        last_ingest_utc_ns: last_ingest_ns,
                        latency_ms_estimate: latency_ms,
                    }).await;
                }
            }
        };

        let _ = ws.close(None).await;
        let _ = self
            .events
            .send(AdapterEvent::ConnectionChange {
                venue,
                connected: false,
            })
            .await;
        outcome
    }
}

/// Exponential backoff delay for the given attempt: `min(30, 0.5 * 2^n)`
/// seconds with ±10 % uniform jitter.
pub fn backoff_delay(attempt: u32, rng: &mut impl Rng) -> Duration {
    let base = (BACKOFF_BASE_S * 2f64.powi(attempt.min(16) as i32)).min(BACKOFF_CAP_S);
    let jitter = rng.gen_range(1.0 - BACKOFF_JITTER..=1.0 + BACKOFF_JITTER);
    Duration::from_secs_f64(base * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_bounds_over_many_attempts() {
        let mut rng = rand::thread_rng();
        for attempt in 0..1000u32 {
            let delay = backoff_delay(attempt, &mut rng).as_secs_f64();
            assert!(delay >= 0.45, "attempt {attempt} below floor: {delay}");
            assert!(delay <= 33.0, "attempt {attempt} above cap: {delay}");
        }
    }

    #[test]
    fn test_backoff_first_attempts_double() {
        let mut rng = rand::thread_rng();
        for (attempt, expected) in [(0u32, 0.5), (1, 1.0), (2, 2.0), (3, 4.0)] {
            let delay = backoff_delay(attempt, &mut rng).as_secs_f64();
            assert!(delay >= expected * 0.9 && delay <= expected * 1.1);
        }
    }

    #[test]
    fn test_backoff_caps_at_thirty() {
        let mut rng = rand::thread_rng();
        for attempt in [7u32, 10, 100, u32::MAX] {
            let delay = backoff_delay(attempt, &mut rng).as_secs_f64();
            assert!(delay >= 27.0 && delay <= 33.0);
        }
    }
}
