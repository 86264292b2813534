use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use url::Url;

use boardcast::{LiveState, LiveSync, SyncConfig};

struct FlakyServer {
    tx: broadcast::Sender<String>,
    connects: AtomicUsize,
    poll_hits: AtomicUsize,
    /// Connections up to (and including) this index are dropped on accept.
    drop_first: usize,
}

async fn ws_handler(State(state): State<Arc<FlakyServer>>, ws: WebSocketUpgrade) -> Response {
    let connect = state.connects.fetch_add(1, Ordering::SeqCst) + 1;
    let drop_now = connect <= state.drop_first;
    let mut rx = state.tx.subscribe();
    ws.on_upgrade(move |mut socket| async move {
        if drop_now {
            return;
        }
        while let Ok(text) = rx.recv().await {
            if socket.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    })
}

async fn status_handler(State(state): State<Arc<FlakyServer>>) -> Json<Value> {
    state.poll_hits.fetch_add(1, Ordering::SeqCst);
    Json(payload(3, 100))
}

async fn spawn_server(drop_first: usize) -> (Url, Url, Arc<FlakyServer>) {
    let (tx, _) = broadcast::channel(64);
    let state = Arc::new(FlakyServer {
        tx,
        connects: AtomicUsize::new(0),
        poll_hits: AtomicUsize::new(0),
        drop_first,
    });
    let app = Router::new()
        .route("/status.json", get(status_handler))
        .route("/ws_status", get(ws_handler))
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let status_url = Url::parse(&format!("http://{addr}/status.json")).unwrap();
    let push_url = Url::parse(&format!("ws://{addr}/ws_status")).unwrap();
    (status_url, push_url, state)
}

fn payload(move_index: u32, time1: i32) -> Value {
    json!({
        "api": "3.1",
        "state": "S0",
        "timestamp": 100.0 + f64::from(move_index),
        "time": "2025-01-01 12:00:00",
        "name1": "Anna",
        "name2": "Ben",
        "onmove": "Anna",
        "move": move_index,
        "score1": 42,
        "score2": 37,
        "time1": time1,
        "time2": 80,
        "clock1": 1800 - time1,
        "clock2": 1720,
        "board": {},
        "moves": [],
        "bag": [],
        "unknown_move": false
    })
}

fn fast_config(status_url: Url, push_url: Url) -> SyncConfig {
    let mut config = SyncConfig::new(status_url).with_push_url(push_url);
    config.poll_interval = Duration::from_millis(50);
    config.push_reconnect_delay = Duration::from_millis(50);
    config.stale_check_interval = Duration::from_millis(25);
    config
}

async fn wait_for<F>(rx: &mut watch::Receiver<LiveState>, mut predicate: F) -> LiveState
where
    F: FnMut(&LiveState) -> bool,
{
    for _ in 0..200 {
        {
            let state = rx.borrow_and_update();
            if predicate(&state) {
                return state.clone();
            }
        }
        timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("timed out waiting for state change")
            .expect("state channel closed");
    }
    panic!("predicate never satisfied");
}

#[tokio::test]
async fn test_close_within_ceiling_reconnects_without_polling() {
    let (status_url, push_url, server) = spawn_server(1).await;
    let mut config = fast_config(status_url, push_url);
    config.push_session_timeout = Duration::from_secs(10);
    let sync = LiveSync::start(config).unwrap();
    let mut rx = sync.subscribe();

    // first connection is dropped by the server, second one sticks
    wait_for(&mut rx, |s| s.using_push == Some(true)).await;
    while server.connects.load(Ordering::SeqCst) < 2 {
        wait_for(&mut rx, |s| s.using_push == Some(true)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    server.tx.send(payload(1, 60).to_string()).unwrap();
    let live = wait_for(&mut rx, |s| s.snapshot.is_some()).await;
    assert_eq!(live.snapshot.as_ref().unwrap().move_index, 1);
    assert_eq!(live.using_push, Some(true));

    assert_eq!(server.connects.load(Ordering::SeqCst), 2);
    assert_eq!(
        server.poll_hits.load(Ordering::SeqCst),
        0,
        "polling must not start on a plain close"
    );

    sync.shutdown();
}

#[tokio::test]
async fn test_reconnect_ceiling_falls_back_to_polling() {
    // every websocket connection is dropped on accept
    let (status_url, push_url, server) = spawn_server(usize::MAX).await;
    let mut config = fast_config(status_url, push_url);
    config.push_session_timeout = Duration::from_millis(300);
    let sync = LiveSync::start(config).unwrap();
    let mut rx = sync.subscribe();

    let live = wait_for(&mut rx, |s| s.snapshot.is_some()).await;
    assert_eq!(live.snapshot.as_ref().unwrap().move_index, 3);
    assert_eq!(live.using_push, Some(false));
    assert!(
        server.connects.load(Ordering::SeqCst) >= 2,
        "expected reconnect attempts before giving up"
    );

    // push reconnection is over for this session
    let connects = server.connects.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connects.load(Ordering::SeqCst), connects);

    // polling keeps the feed alive
    let hits = server.poll_hits.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.poll_hits.load(Ordering::SeqCst) > hits);

    sync.shutdown();
}
