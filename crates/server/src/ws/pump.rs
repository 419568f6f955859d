//! Reader and writer pumps: the two tasks that own a connection's socket halves.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};

use crate::config::HubConfig;
use crate::hub::{ChatHub, Client, Frame};

/// Longest inbound text echoed into the logs.
const LOG_PREVIEW_CHARS: usize = 100;

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The hub closed the outbound buffer (unregister or eviction).
    BufferClosed,
    PeerClosed,
    StreamEnded,
    IdleTimeout,
    ReadFailed(String),
    WriteFailed(String),
    WriteTimeout,
    Aborted(String),
}

/// Pull inbound frames until the peer goes away, a read fails, or no pong arrives within
/// `pong_wait`. Application frames are only logged.
pub async fn read_pump<R, E>(mut stream: R, pong_wait: Duration, client: &Client) -> PumpExit
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + pong_wait;
    loop {
        let next = match timeout_at(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => return PumpExit::IdleTimeout,
        };
        match next {
            Some(Ok(Message::Pong(_))) => {
                deadline = Instant::now() + pong_wait;
            }
            Some(Ok(Message::Text(text))) => {
                tracing::debug!(
                    user_id = client.user_id,
                    connection_id = %client.connection_id,
                    "Inbound frame: {}",
                    text.as_str().chars().take(LOG_PREVIEW_CHARS).collect::<String>()
                );
            }
            Some(Ok(Message::Binary(data))) => {
                tracing::debug!(
                    user_id = client.user_id,
                    connection_id = %client.connection_id,
                    len = data.len(),
                    "Inbound binary frame ignored"
                );
            }
            // Pongs to client pings are queued by the socket itself.
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(
                    user_id = client.user_id,
                    reason = ?frame,
                    "Client initiated close"
                );
                return PumpExit::PeerClosed;
            }
            Some(Err(e)) => return PumpExit::ReadFailed(e.to_string()),
            None => return PumpExit::StreamEnded,
        }
    }
}

/// Drain the outbound buffer into `sink` and keep the peer alive with pings.
///
/// Frames already queued behind the one just received are joined into the same text frame,
/// newline separated. When the hub closes the buffer a close frame is sent and the pump ends.
pub async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<Frame>, config: &HubConfig) -> PumpExit
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut keepalive = interval_at(Instant::now() + config.ping_period, config.ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    let _ = timeout(config.write_wait, sink.send(Message::Close(None))).await;
                    return PumpExit::BufferClosed;
                };
                let batch = coalesce(frame, &mut rx, config.send_buffer);
                if let Err(exit) = send_within(&mut sink, Message::Text(batch), config.write_wait).await {
                    return exit;
                }
            }
            _ = keepalive.tick() => {
                if let Err(exit) = send_within(&mut sink, Message::Ping(Bytes::new()), config.write_wait).await {
                    return exit;
                }
            }
        }
    }
}

/// Append up to `limit` frames that are already waiting onto `first`.
fn coalesce(first: Frame, rx: &mut mpsc::Receiver<Frame>, limit: usize) -> Frame {
    let mut batch: Option<String> = None;
    for _ in 0..limit {
        let Ok(next) = rx.try_recv() else {
            break;
        };
        let buf = batch.get_or_insert_with(|| first.as_str().to_owned());
        buf.push('\n');
        buf.push_str(next.as_str());
    }
    match batch {
        Some(buf) => Frame::from(buf),
        None => first,
    }
}

async fn send_within<S>(sink: &mut S, msg: Message, wait: Duration) -> Result<(), PumpExit>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout(wait, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PumpExit::WriteFailed(e.to_string())),
        Err(_) => Err(PumpExit::WriteTimeout),
    }
}

fn joined(result: Result<PumpExit, JoinError>) -> PumpExit {
    result.unwrap_or_else(|e| PumpExit::Aborted(e.to_string()))
}

/// Drive a registered client's socket until either pump stops, then unregister it.
///
/// Whichever side ends first decides the teardown: a finished reader unregisters (closing the
/// buffer) and gives the writer `write_wait` to flush and say goodbye; a finished writer takes
/// the reader down with it.
pub async fn run_connection(
    socket: WebSocket,
    hub: Arc<ChatHub>,
    client: Arc<Client>,
    rx: mpsc::Receiver<Frame>,
) -> PumpExit {
    let (sink, stream) = socket.split();
    let config = hub.config().clone();
    let write_wait = config.write_wait;
    let pong_wait = config.pong_wait;

    let mut writer = tokio::spawn(async move { write_pump(sink, rx, &config).await });
    let reader_client = client.clone();
    let mut reader =
        tokio::spawn(async move { read_pump(stream, pong_wait, &reader_client).await });

    let exit = tokio::select! {
        result = &mut reader => {
            hub.unregister(&client).await;
            if timeout(write_wait, &mut writer).await.is_err() {
                writer.abort();
            }
            joined(result)
        }
        result = &mut writer => {
            reader.abort();
            hub.unregister(&client).await;
            joined(result)
        }
    };

    tracing::info!(
        user_id = client.user_id,
        connection_id = %client.connection_id,
        reason = ?exit,
        "WebSocket connection closed"
    );
    exit
}
