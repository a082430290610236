// WebSocket server for communication with the voice client.

use futures_util::stream::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

/// Events emitted by the WebSocket server to the application layer.
#[derive(Debug, PartialEq)]
pub enum WsEvent {
    /// A new WebSocket client has connected.
    Connected { addr: String },
    /// The current WebSocket client has disconnected.
    Disconnected,
    /// A text message was received from the client (raw JSON string).
    Message(String),
}

/// Bind the TCP listener the server accepts on. Port 0 picks a free port.
pub async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("WebSocket server listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept clients on `listener` one at a time, forwarding inbound text frames
/// through `tx` and writing every string received on `outbound` to the
/// connected client.
///
/// Replies queued while no client is connected are discarded when the next
/// client connects. Runs until `tx` or `outbound` closes, or the task is
/// cancelled.
pub async fn run(
    listener: TcpListener,
    tx: mpsc::Sender<WsEvent>,
    mut outbound: mpsc::Receiver<String>,
) -> anyhow::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let addr_str = addr.to_string();
        info!("Accepted TCP connection from {addr_str}");

        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake failed for {addr_str}: {e}");
                continue;
            }
        };

        let mut stale = 0usize;
        while outbound.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Dropped {stale} queued replies from a previous client");
        }

        if tx
            .send(WsEvent::Connected {
                addr: addr_str.clone(),
            })
            .await
            .is_err()
        {
            break;
        }

        let (mut write, read) = ws_stream.split();
        if serve_connection(read, &mut write, &tx, &mut outbound, &addr_str)
            .await
            .is_err()
        {
            break;
        }

        if tx.send(WsEvent::Disconnected).await.is_err() {
            break;
        }
    }

    Ok(())
}

/// Pump one connection: inbound text frames go to `tx`, outbound strings are
/// written to `write`.
///
/// Returns `Ok(())` when the client goes away (close frame, error, or end of
/// stream) and `Err(())` when either application channel is closed,
/// signalling the caller to stop serving.
///
/// Generic over the stream and sink so it can be tested without sockets.
pub async fn serve_connection<St, Si>(
    mut read: St,
    write: &mut Si,
    tx: &mpsc::Sender<WsEvent>,
    outbound: &mut mpsc::Receiver<String>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
    Si: Sink<Message> + Unpin,
    Si::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if tx.send(WsEvent::Message(text.to_string())).await.is_err() {
                        return Err(());
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Client {addr} sent close frame");
                    return Ok(());
                }
                Some(Err(e)) => {
                    warn!("WebSocket error from {addr}: {e}");
                    return Ok(());
                }
                Some(Ok(_)) => {
                    // Ignore Binary, Ping, Pong, Frame variants.
                }
                None => return Ok(()),
            },
            reply = outbound.recv() => match reply {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        warn!("Failed to write to {addr}: {e}");
                        return Ok(());
                    }
                }
                None => return Err(()),
            },
        }
    }
}
