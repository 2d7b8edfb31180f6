//! Stdin/stdout JSON bridge for the alarm host.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages, routes them
//! through [`AlarmCommandHandler`], and writes `ResponseEnvelope` and
//! `EventEnvelope` messages as newline-delimited JSON.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::alarm::AlarmManager;
use crate::error::{AlarmError, Result};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::host::handler::{AlarmCommandHandler, EVENT_CAPACITY};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast};

/// Run the bridge on the process stdin/stdout until stdin closes or a
/// `runtime.stop` command is received.
pub async fn run_stdio_bridge(manager: AlarmManager) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = BufWriter::new(tokio::io::stdout());
    run_bridge(manager, reader, writer).await
}

/// Run the bridge over arbitrary streams.
///
/// Two tasks operate in parallel:
///
/// 1. **Reader** -- reads command lines, routes each through the handler
///    and writes the response.
/// 2. **Event forwarder** -- writes broadcast `EventEnvelope` messages,
///    including `alarm.fired`, as they happen.
///
/// Fired-alarm forwarding is installed as the store's cloud notifier for
/// the lifetime of the bridge.
pub async fn run_bridge<R, W>(manager: AlarmManager, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let handler = AlarmCommandHandler::new(manager, event_tx);
    handler.forward_fired_alarms();

    let writer = Arc::new(Mutex::new(writer));

    let event_writer = Arc::clone(&writer);
    let mut event_rx = handler.subscribe_events();
    let event_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event_envelope) => {
                    if let Err(e) = write_event(&event_writer, &event_envelope).await {
                        tracing::warn!(
                            error = %e,
                            "failed to write event envelope; stopping event forwarder"
                        );
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("event broadcast channel closed; stopping event forwarder");
                    break;
                }
            }
        }
    });

    let reader_result = run_reader(&handler, reader, Arc::clone(&writer)).await;

    handler.manager().clear_cloud_notifier();
    event_handle.abort();
    let _ = event_handle.await;

    reader_result
}

async fn run_reader<R, W>(
    handler: &AlarmCommandHandler,
    mut reader: R,
    writer: Arc<Mutex<W>>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| AlarmError::Channel(format!("failed to read command stream: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("command stream closed (EOF); shutting down bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    raw_line = %trimmed,
                    "failed to parse command envelope"
                );
                let error_response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_response(&writer, &error_response).await?;
                continue;
            }
        };

        let is_stop = envelope.command == CommandName::RuntimeStop;
        let response = handler.handle(&envelope);
        write_response(&writer, &response).await?;

        if is_stop {
            tracing::info!("runtime.stop received; shutting down bridge");
            break;
        }
    }

    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &Mutex<W>,
    response: &ResponseEnvelope,
) -> Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| AlarmError::Contract(format!("failed to serialize response envelope: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut *w, &json).await
}

async fn write_event<W: AsyncWrite + Unpin>(writer: &Mutex<W>, event: &EventEnvelope) -> Result<()> {
    let json = serde_json::to_string(event)
        .map_err(|e| AlarmError::Contract(format!("failed to serialize event envelope: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut *w, &json).await
}

/// Write a single JSON line and flush.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| AlarmError::Channel(format!("failed to write output: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| AlarmError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| AlarmError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}
