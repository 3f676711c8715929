//! Foreground background-runtime.
//!
//! Reads one JSON request per line on stdin and writes one JSON response per
//! line on stdout. `POINTS_UPDATED` notifications are interleaved as they
//! happen. Ctrl-C or end of input shuts down.

use serde_json::Value;
use studycat_core::{Notification, Runtime};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::CmdResult;

pub async fn run() -> CmdResult {
    let mut rt = Runtime::open_settled().await?;
    rt.spawn_maintenance();

    let mut updates = rt.ledger().subscribe();
    let mut events = rt.timer().subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    info!("daemon ready");

    loop {
        let out = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => match serde_json::from_str::<Value>(&line) {
                    Ok(message) => rt.router().handle_value(message).await,
                    Err(e) => serde_json::json!({ "ok": false, "reason": "bad_request", "error": e.to_string() }),
                },
                None => break,
            },
            update = updates.recv() => match update {
                Ok(update) => serde_json::to_value(Notification::from(update))?,
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "points notifications lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => {
                match event {
                    Ok(event) => info!(?event, "timer event"),
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "timer events lagged"),
                    Err(RecvError::Closed) => break,
                }
                continue;
            }
            _ = signal::ctrl_c() => break,
        };
        let mut text = serde_json::to_string(&out)?;
        text.push('\n');
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
    }

    rt.shutdown();
    Ok(())
}
