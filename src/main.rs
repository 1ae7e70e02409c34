//! chartfeed worker binary
//!
//! Wires the message port onto stdin/stdout: inbound command frames feed
//! the controller, outbound events are framed back to the host. Logs go to
//! stderr so stdout stays clean for the port.

use anyhow::Result;
use chartfeed::controller::Controller;
use chartfeed::port::{self, decode_command};
use tokio::io::{stdin, stdout};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    info!("starting chartfeed worker");

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (out_tx, mut out_rx) = mpsc::channel(1024);

    let reader = tokio::spawn(async move {
        let mut input = stdin();
        loop {
            match port::read_frame(&mut input).await {
                Ok(Some(payload)) => {
                    if cmd_tx.send(decode_command(&payload)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "command frame read failed");
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        let mut output = stdout();
        while let Some(event) = out_rx.recv().await {
            let payload = match serde_json::to_vec(&event) {
                Ok(payload) => payload,
                Err(_) => continue,
            };
            if port::write_frame(&mut output, &payload).await.is_err() {
                break;
            }
        }
    });

    Controller::run(cmd_rx, out_tx).await;

    reader.abort();
    let _ = writer.await;
    info!("chartfeed worker stopped");
    Ok(())
}
