use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::{ChannelEvent, ChannelSession, Generation};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model;

/// Persistent socket the server pushes snapshots over. The client sends no
/// status traffic of its own.
///
/// Each close schedules a reconnect after a short fixed delay until the
/// session-lifetime ceiling passes, at which point the channel gives up and
/// the coordinator falls back to polling.
pub struct PushChannel {
    task: JoinHandle<()>,
    generation: Generation,
}

impl PushChannel {
    pub fn start(
        url: Url,
        config: SyncConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
        generation: Generation,
    ) -> Self {
        let task = tokio::spawn(run_push_loop(url, config, events, generation));
        Self { task, generation }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn stop(&mut self) {
        self.task.abort();
    }

    #[cfg(test)]
    pub(crate) fn dummy(generation: Generation) -> Self {
        Self {
            task: tokio::spawn(std::future::pending::<()>()),
            generation,
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_push_loop(
    url: Url,
    config: SyncConfig,
    events: mpsc::UnboundedSender<ChannelEvent>,
    generation: Generation,
) {
    let session = ChannelSession::new();
    loop {
        debug!(%url, "connecting push channel");
        match connect(&url).await {
            Ok(stream) => {
                info!("push channel open");
                if events.send(ChannelEvent::PushOpen { generation }).is_err() {
                    return;
                }
                read_messages(stream, &config, &events, generation).await;
                warn!("push channel closed");
                if events
                    .send(ChannelEvent::PushClosed { generation })
                    .is_err()
                {
                    return;
                }
            }
            Err(err) => {
                warn!(error = %err, "push connect failed");
                if events
                    .send(ChannelEvent::PushClosed { generation })
                    .is_err()
                {
                    return;
                }
            }
        }

        if session.started_at.elapsed() >= config.push_session_timeout {
            warn!("push reconnect ceiling reached, giving up");
            let _ = events.send(ChannelEvent::PushGivenUp { generation });
            return;
        }
        tokio::time::sleep(config.push_reconnect_delay).await;
    }
}

async fn connect(url: &Url) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, SyncError> {
    let (stream, _) = connect_async(url.as_str()).await?;
    Ok(stream)
}

/// Drain inbound messages until the socket closes. A malformed message is
/// logged and dropped; it never tears down the session.
async fn read_messages(
    mut stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: &SyncConfig,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    generation: Generation,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match model::parse_push_message(&text) {
                Ok(raw) => {
                    let snapshot = raw.finalize(config.max_time);
                    if events
                        .send(ChannelEvent::Snapshot {
                            generation,
                            snapshot,
                        })
                        .is_err()
                    {
                        return;
                    }
                }
                Err(err) => warn!(error = %err, "malformed push message dropped"),
            },
            Ok(Message::Close(_)) | Err(_) => return,
            // Ping/Pong are answered by tungstenite, binary frames carry
            // nothing we consume.
            _ => {}
        }
    }
}
