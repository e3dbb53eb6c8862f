use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::signal::SignalMessage;

/// Sending half of the meeting's signaling socket.
pub struct SignalingHandle {
    outbox: mpsc::UnboundedSender<SignalMessage>,
    close_tx: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl SignalingHandle {
    pub fn outbox(&self) -> mpsc::UnboundedSender<SignalMessage> {
        self.outbox.clone()
    }

    pub fn send(&self, message: SignalMessage) -> bool {
        self.outbox.send(message).is_ok()
    }

    pub fn is_open(&self) -> bool {
        !self.task.is_finished()
    }

    /// Sends a close frame and waits for the socket tasks to wind down.
    pub async fn close(self) {
        let _ = self.close_tx.send(());
        if let Err(err) = self.task.await {
            debug!(%err, "signaling task ended abnormally");
        }
    }
}

/// Opens the meeting's signaling socket. Inbound messages arrive on the
/// returned receiver, which yields `None` once the socket is gone.
pub async fn connect(
    config: &ClientConfig,
    session_id: &str,
    token: &str,
) -> Result<(SignalingHandle, mpsc::UnboundedReceiver<SignalMessage>)> {
    let url = config.signaling_url(session_id, token)?;
    let (socket, _) = connect_async(url.as_str()).await?;
    info!(session = session_id, "signaling connected");

    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut outgoing) = mpsc::unbounded_channel::<SignalMessage>();
    let (inbox, incoming) = mpsc::unbounded_channel::<SignalMessage>();
    let (close_tx, mut close_rx) = mpsc::unbounded_channel::<()>();

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = outgoing.recv() => {
                    let Some(msg) = msg else { break };
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(%err, "dropping unserializable signal");
                            continue;
                        }
                    };
                    if let Err(err) = sender.send(Message::Text(text)).await {
                        warn!(%err, "signaling send failed");
                        break;
                    }
                }
                _ = close_rx.recv() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<SignalMessage>(&text) {
                    Ok(msg) => {
                        if inbox.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(%err, "malformed signal: {}", text),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "signaling socket error");
                    break;
                }
            }
        }
    });

    // Either half finishing ends the connection; nothing reconnects.
    let session = session_id.to_string();
    let task = tokio::spawn(async move {
        let send_abort = send_task.abort_handle();
        let recv_abort = recv_task.abort_handle();
        tokio::select! {
            _ = send_task => recv_abort.abort(),
            _ = recv_task => send_abort.abort(),
        }
        info!(session = %session, "signaling closed");
    });

    Ok((
        SignalingHandle {
            outbox,
            close_tx,
            task,
        },
        incoming,
    ))
}
