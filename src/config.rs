use std::env;
use std::time::Duration;
#[cfg(test)]
use std::sync::Mutex;

use url::Url;

/// Timing and threshold knobs for the synchronization client.
///
/// Defaults follow the authoritative server's deployment values; everything
/// numeric can be overridden through `BOARDCAST_*` environment variables so
/// operators can tune a kiosk without rebuilding.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Status resource polled via conditional GET.
    pub status_url: Url,
    /// Push endpoint, if the deployment is known to support it.
    pub push_url: Option<Url>,
    /// Fixed delay between poll ticks.
    pub poll_interval: Duration,
    /// Hard per-request timeout for poll fetches.
    pub request_timeout: Duration,
    /// Consecutive poll failures tolerated before the channel times out.
    pub max_poll_failures: u32,
    /// Wall-clock lifetime of a polling session (abandoned-tab bound).
    pub poll_session_timeout: Duration,
    /// Delay before a push reconnect attempt.
    pub push_reconnect_delay: Duration,
    /// Wall-clock window during which push reconnects are attempted.
    pub push_session_timeout: Duration,
    /// Snapshot age past which the display is no longer trusted.
    pub stale_after: Duration,
    /// How often the coordinator re-evaluates staleness.
    pub stale_check_interval: Duration,
    /// Per-player time budget in seconds, used to backfill missing clocks.
    pub max_time: i32,
}

impl SyncConfig {
    pub fn new(status_url: Url) -> Self {
        Self {
            status_url,
            push_url: None,
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            max_poll_failures: 100,
            poll_session_timeout: Duration::from_secs(60 * 60),
            push_reconnect_delay: Duration::from_secs(2),
            push_session_timeout: Duration::from_secs(30 * 60),
            stale_after: Duration::from_secs(30),
            stale_check_interval: Duration::from_secs(1),
            max_time: 1800,
        }
    }

    pub fn with_push_url(mut self, url: Url) -> Self {
        self.push_url = Some(url);
        self
    }

    /// Load defaults, then apply any `BOARDCAST_*` environment overrides.
    pub fn from_env(status_url: Url) -> Self {
        let mut config = Self::new(status_url);
        if let Some(value) = env_millis("BOARDCAST_POLL_INTERVAL_MS") {
            config.poll_interval = value;
        }
        if let Some(value) = env_millis("BOARDCAST_REQUEST_TIMEOUT_MS") {
            config.request_timeout = value;
        }
        if let Some(value) = env_u32("BOARDCAST_MAX_POLL_FAILURES") {
            config.max_poll_failures = value;
        }
        if let Some(value) = env_millis("BOARDCAST_POLL_SESSION_TIMEOUT_MS") {
            config.poll_session_timeout = value;
        }
        if let Some(value) = env_millis("BOARDCAST_PUSH_RECONNECT_DELAY_MS") {
            config.push_reconnect_delay = value;
        }
        if let Some(value) = env_millis("BOARDCAST_PUSH_SESSION_TIMEOUT_MS") {
            config.push_session_timeout = value;
        }
        if let Some(value) = env_millis("BOARDCAST_STALE_AFTER_MS") {
            config.stale_after = value;
        }
        if let Some(value) = env_u32("BOARDCAST_MAX_TIME") {
            config.max_time = value as i32;
        }
        config
    }

    /// Derive the conventional push endpoint from the status resource origin:
    /// same host, `ws(s)` scheme, `/ws_status` path.
    pub fn derived_push_url(&self) -> Option<Url> {
        let mut url = self.status_url.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme).ok()?;
        url.set_path("/ws_status");
        url.set_query(None);
        Some(url)
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    env::var(var).ok()?.parse().ok().map(Duration::from_millis)
}

fn env_u32(var: &str) -> Option<u32> {
    env::var(var).ok()?.parse().ok()
}
