//! Message port: length-delimited JSON framing and the command/event
//! protocol
//!
//! Each frame on the port is a 4-byte big-endian length prefix followed by
//! that many bytes of UTF-8 JSON. Inbound frames carry commands; outbound
//! frames carry events wrapped in `{type, data, req_id?}` envelopes.

use crate::exchanges::supervisor::AdapterEvent;
use crate::exchanges::types::{AggregatedDataPoint, Candle};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Read one length-prefixed frame; `Ok(None)` signals a clean end of
/// stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte cap"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Error codes reported on the port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArg,
    UnknownCmd,
    Unavailable,
    BadPayload,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidArg => "INVALID_ARG",
            ErrorCode::UnknownCmd => "UNKNOWN_CMD",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::BadPayload => "BAD_PAYLOAD",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Recognized inbound commands. Symbol and timeframe arguments stay as raw
/// strings here; the controller validates them against the supported sets.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Init {
        state_dir_path: String,
        debug: bool,
    },
    SetSymbol {
        symbol: String,
    },
    SetTimeframe {
        timeframe: String,
    },
    Backfill {
        symbol: Option<String>,
        timeframe: Option<String>,
        start_iso: String,
        end_iso: String,
    },
    Shutdown,
}

/// One decoded inbound frame.
#[derive(Clone, Debug)]
pub enum Inbound {
    Command {
        req_id: Option<String>,
        command: Command,
    },
    Invalid {
        req_id: Option<String>,
        code: ErrorCode,
        message: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitFields {
    state_dir_path: String,
    #[serde(default)]
    debug: bool,
}

#[derive(Deserialize)]
struct SetSymbolFields {
    symbol: String,
}

#[derive(Deserialize)]
struct SetTimeframeFields {
    timeframe: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackfillFields {
    symbol: Option<String>,
    timeframe: Option<String>,
    start_iso: String,
    end_iso: String,
}

/// Decode one inbound frame. Undecodable payloads map to `BAD_PAYLOAD`,
/// unrecognized command types to `UNKNOWN_CMD`, and missing or mistyped
/// fields to `INVALID_ARG`.
pub fn decode_command(payload: &[u8]) -> Inbound {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(err) => {
            return Inbound::Invalid {
                req_id: None,
                code: ErrorCode::BadPayload,
                message: format!("undecodable command: {err}"),
            }
        }
    };
    let req_id = value
        .get("req_id")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Inbound::Invalid {
            req_id,
            code: ErrorCode::BadPayload,
            message: "command is missing a type".to_string(),
        };
    };

    fn fields<T: serde::de::DeserializeOwned>(
        value: Value,
        req_id: &Option<String>,
    ) -> Result<T, Inbound> {
        serde_json::from_value(value).map_err(|err| Inbound::Invalid {
            req_id: req_id.clone(),
            code: ErrorCode::InvalidArg,
            message: err.to_string(),
        })
    }

    let command = match kind {
        "init" => match fields::<InitFields>(value.clone(), &req_id) {
            Ok(f) => Command::Init {
                state_dir_path: f.state_dir_path,
                debug: f.debug,
            },
            Err(invalid) => return invalid,
        },
        "setSymbol" => match fields::<SetSymbolFields>(value.clone(), &req_id) {
            Ok(f) => Command::SetSymbol { symbol: f.symbol },
            Err(invalid) => return invalid,
        },
        "setTimeframe" => match fields::<SetTimeframeFields>(value.clone(), &req_id) {
            Ok(f) => Command::SetTimeframe {
                timeframe: f.timeframe,
            },
            Err(invalid) => return invalid,
        },
        "backfill" => match fields::<BackfillFields>(value.clone(), &req_id) {
            Ok(f) => Command::Backfill {
                symbol: f.symbol,
                timeframe: f.timeframe,
                start_iso: f.start_iso,
                end_iso: f.end_iso,
            },
            Err(invalid) => return invalid,
        },
        "shutdown" => Command::Shutdown,
        other => {
            return Inbound::Invalid {
                req_id,
                code: ErrorCode::UnknownCmd,
                message: format!("unknown command type: {other}"),
            }
        }
    };
    Inbound::Command { req_id, command }
}

fn envelope(kind: &str, data: Value, req_id: Option<&str>) -> Value {
    let mut event = json!({"type": kind, "data": data});
    if let Some(id) = req_id {
        event["req_id"] = json!(id);
    }
    event
}

pub fn aggregated_event(point: &AggregatedDataPoint) -> Value {
    envelope(
        "aggregated",
        serde_json::to_value(point).unwrap_or(Value::Null),
        None,
    )
}

pub fn candle_event(candle: &Candle, req_id: Option<&str>) -> Value {
    envelope(
        "candle",
        serde_json::to_value(candle).unwrap_or(Value::Null),
        req_id,
    )
}

/// Connection status event; `dropped_trades` reflects the aggregator's
/// intake bound.
pub fn status_event(event: &AdapterEvent, dropped_trades: u64) -> Value {
    let data = match event {
        AdapterEvent::ConnectionChange { venue, connected } => json!({
            "exchange": venue,
            "connected": connected,
            "droppedTrades": dropped_trades,
        }),
        AdapterEvent::Status {
            venue,
            last_ingest_utc_ns,
            latency_ms_estimate,
        } => json!({
            "exchange": venue,
            "connected": true,
            "lastIngestUtcNs": last_ingest_utc_ns,
            "latencyMsEstimate": latency_ms_estimate,
            "droppedTrades": dropped_trades,
        }),
        AdapterEvent::Trade(_) => Value::Null,
    };
    envelope("status", data, None)
}

pub fn ack_event(for_cmd: &str, mut extra: Value, req_id: Option<&str>) -> Value {
    let mut data = json!({"for": for_cmd, "ok": true});
    if let (Some(data_map), Some(extra_map)) = (data.as_object_mut(), extra.as_object_mut()) {
        data_map.append(extra_map);
    }
    envelope("ack", data, req_id)
}

pub fn error_event(code: ErrorCode, message: &str, req_id: Option<&str>) -> Value {
    envelope(
        "error",
        json!({"code": code.as_str(), "message": message}),
        req_id,
    )
}
