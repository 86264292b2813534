use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::StatusSnapshot;
use crate::transport::{ChannelEvent, Generation, PollingChannel, PushChannel};

pub mod detect;

/// The consumer-facing pair: latest accepted snapshot plus derived health.
#[derive(Debug, Clone, Default)]
pub struct LiveState {
    pub snapshot: Option<StatusSnapshot>,
    /// `None` until a transport has spoken; `Some(true)` only while the
    /// push socket is open.
    pub using_push: Option<bool>,
    /// Stamped on accepted (changed) updates only, so repeated identical
    /// payloads cannot mask true staleness.
    pub last_update: Option<Instant>,
    pub is_stale: bool,
}

/// Which channel tasks are currently live. A channel's generation stays
/// valid only while its slot holds it; events from retired generations are
/// discarded by the coordinator.
struct ChannelSlots {
    next_generation: Generation,
    polling: Option<PollingChannel>,
    push: Option<PushChannel>,
}

impl ChannelSlots {
    fn new() -> Self {
        Self {
            next_generation: 0,
            polling: None,
            push: None,
        }
    }

    fn lease(&mut self) -> Generation {
        self.next_generation += 1;
        self.next_generation
    }

    fn is_live(&self, generation: Generation) -> bool {
        self.polling
            .as_ref()
            .is_some_and(|channel| channel.generation() == generation)
            || self
                .push
                .as_ref()
                .is_some_and(|channel| channel.generation() == generation)
    }

    fn stop_polling(&mut self) {
        if let Some(mut channel) = self.polling.take() {
            channel.stop();
        }
    }

    fn stop_push(&mut self) {
        if let Some(mut channel) = self.push.take() {
            channel.stop();
        }
    }
}

struct Shared {
    config: SyncConfig,
    client: reqwest::Client,
    slots: Mutex<ChannelSlots>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl Shared {
    fn start_polling(&self) {
        let mut slots = self.slots.lock().unwrap();
        slots.stop_polling();
        let generation = slots.lease();
        slots.polling = Some(PollingChannel::start(
            self.client.clone(),
            self.config.clone(),
            self.events.clone(),
            generation,
        ));
    }

    fn start_push(&self, url: Url) {
        let mut slots = self.slots.lock().unwrap();
        slots.stop_push();
        let generation = slots.lease();
        slots.push = Some(PushChannel::start(
            url,
            self.config.clone(),
            self.events.clone(),
            generation,
        ));
    }
}

/// Single authority over which transport is active and over the externally
/// visible `(snapshot, health)` pair. Consumers subscribe to a watch channel
/// and never see the transports themselves.
pub struct LiveSync {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<LiveState>,
    coordinator: JoinHandle<()>,
}

impl LiveSync {
    /// Start synchronizing. Must be called from within a tokio runtime.
    ///
    /// Picks the initial transport from the capability flag: push when
    /// `config.push_url` is set, polling otherwise.
    pub fn start(config: SyncConfig) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let push_url = config.push_url.clone();
        let initial = LiveState {
            // polling mode is known from the start; push only counts once open
            using_push: if push_url.is_some() { None } else { Some(false) },
            ..LiveState::default()
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let shared = Arc::new(Shared {
            config,
            client,
            slots: Mutex::new(ChannelSlots::new()),
            events: events_tx,
        });

        match push_url {
            Some(url) => shared.start_push(url),
            None => shared.start_polling(),
        }

        let coordinator = tokio::spawn(run(shared.clone(), events_rx, state_tx));
        Ok(Self {
            shared,
            state_rx,
            coordinator,
        })
    }

    /// Clone of the current state.
    pub fn state(&self) -> LiveState {
        self.state_rx.borrow().clone()
    }

    /// Watch receiver that wakes on every accepted update or health change.
    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.state_rx.clone()
    }

    /// Stop both channels and the coordinator. Idempotent; also runs on
    /// drop. No channel event is applied after this returns.
    pub fn shutdown(&self) {
        let mut slots = self.shared.slots.lock().unwrap();
        slots.stop_polling();
        slots.stop_push();
        self.coordinator.abort();
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    state: watch::Sender<LiveState>,
) {
    let started_at = Instant::now();
    let mut fell_back = false;
    let mut sweep = tokio::time::interval(shared.config.stale_check_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if !shared.slots.lock().unwrap().is_live(event.generation()) {
                    debug!(generation = event.generation(), "event from retired channel ignored");
                    continue;
                }
                handle_event(&shared, &state, event, &mut fell_back);
            }
            _ = sweep.tick() => {
                let now = Instant::now();
                let threshold = shared.config.stale_after;
                state.send_if_modified(|live| {
                    let anchor = live.last_update.unwrap_or(started_at);
                    if !live.is_stale && now.duration_since(anchor) > threshold {
                        warn!("no accepted update within staleness threshold");
                        live.is_stale = true;
                        true
                    } else {
                        false
                    }
                });
            }
        }
    }
}

fn handle_event(
    shared: &Shared,
    state: &watch::Sender<LiveState>,
    event: ChannelEvent,
    fell_back: &mut bool,
) {
    match event {
        ChannelEvent::Snapshot { snapshot, .. } => {
            let move_index = snapshot.move_index;
            let accepted = state.send_if_modified(|live| {
                if detect::changed(live.snapshot.as_ref(), &snapshot) {
                    live.snapshot = Some(snapshot);
                    live.last_update = Some(Instant::now());
                    live.is_stale = false;
                    true
                } else {
                    false
                }
            });
            if accepted {
                debug!(move_index, "snapshot accepted");
            } else {
                debug!(move_index, "unchanged snapshot discarded");
            }
        }
        ChannelEvent::PushOpen { .. } => {
            info!("push channel open, suppressing polling");
            shared.slots.lock().unwrap().stop_polling();
            state.send_if_modified(|live| set_using_push(live, true));
        }
        ChannelEvent::PushClosed { .. } => {
            // reconnect is the channel's business; polling stays down
            state.send_if_modified(|live| set_using_push(live, false));
        }
        ChannelEvent::PushGivenUp { .. } => {
            warn!("push channel gave up, falling back to polling");
            shared.slots.lock().unwrap().stop_push();
            state.send_if_modified(|live| set_using_push(live, false));
            if !*fell_back {
                *fell_back = true;
                shared.start_polling();
            }
        }
        ChannelEvent::PollingTimedOut { .. } => {
            warn!("polling channel exhausted, display is stale");
            shared.slots.lock().unwrap().stop_polling();
            state.send_if_modified(|live| {
                if live.is_stale {
                    false
                } else {
                    live.is_stale = true;
                    true
                }
            });
        }
    }
}

fn set_using_push(live: &mut LiveState, value: bool) -> bool {
    if live.using_push == Some(value) {
        false
    } else {
        live.using_push = Some(value);
        true
    }
}
