use reqwest::{Client, StatusCode, header};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{ChannelEvent, ChannelSession, Generation};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::{RawStatus, StatusSnapshot};

/// Periodic conditional GET against the status resource.
///
/// The loop runs on a fixed interval with no backoff; failures count toward
/// a ceiling and a wall-clock session timeout bounds abandoned viewers.
/// `stop()` aborts the task, so no tick fires after it returns.
pub struct PollingChannel {
    task: JoinHandle<()>,
    generation: Generation,
}

impl PollingChannel {
    pub fn start(
        client: Client,
        config: SyncConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
        generation: Generation,
    ) -> Self {
        let task = tokio::spawn(run_poll_loop(client, config, events, generation));
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

impl Drop for PollingChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_poll_loop(
    client: Client,
    config: SyncConfig,
    events: mpsc::UnboundedSender<ChannelEvent>,
    generation: Generation,
) {
    let mut session = ChannelSession::new();
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(url = %config.status_url, "polling started");

    loop {
        ticker.tick().await;

        if session.started_at.elapsed() > config.poll_session_timeout {
            warn!("polling session timeout reached");
            let _ = events.send(ChannelEvent::PollingTimedOut { generation });
            return;
        }

        match fetch_once(&client, &config, &mut session).await {
            Ok(Some(snapshot)) => {
                session.failures = 0;
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
            Ok(None) => {
                debug!("status unchanged (304)");
                session.failures = 0;
            }
            Err(err) => {
                session.failures += 1;
                warn!(error = %err, failures = session.failures, "status poll failed");
                if session.failures >= config.max_poll_failures {
                    warn!("poll failure ceiling reached");
                    let _ = events.send(ChannelEvent::PollingTimedOut { generation });
                    return;
                }
            }
        }
    }
}

/// One conditional fetch. `Ok(None)` is a no-op tick (not modified).
async fn fetch_once(
    client: &Client,
    config: &SyncConfig,
    session: &mut ChannelSession,
) -> Result<Option<StatusSnapshot>, SyncError> {
    let mut request = client.get(config.status_url.clone());
    if let Some(etag) = &session.etag {
        request = request.header(header::IF_NONE_MATCH, etag.as_str());
    }

    let response = request.send().await?;
    if response.status() == StatusCode::NOT_MODIFIED {
        return Ok(None);
    }
    let response = response.error_for_status()?;

    let etag = response
        .headers()
        .get(header::ETAG)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response.text().await?;
    let raw: RawStatus = serde_json::from_str(&body)?;

    // only replace the token once the body parsed
    if let Some(etag) = etag {
        session.etag = Some(etag);
    }
    Ok(Some(raw.finalize(config.max_time)))
}
