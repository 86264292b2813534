use anyhow::Result;
use clap::Parser;
use url::Url;

use boardcast::logging::{self, LogLevel};
use boardcast::{LiveState, LiveSync, SyncConfig};

#[derive(Parser, Debug)]
#[command(name = "boardcast", about = "Watch a live board-game status feed")]
struct Cli {
    /// Status resource, e.g. http://host:5050/status.json
    #[arg(long, env = "BOARDCAST_STATUS_URL")]
    status_url: Url,

    /// Push endpoint; omit to use polling only
    #[arg(long, env = "BOARDCAST_PUSH_URL")]
    push_url: Option<Url>,

    /// Derive the push endpoint from the status URL origin
    #[arg(long, conflicts_with = "push_url")]
    push: bool,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level)?;

    let mut config = SyncConfig::from_env(cli.status_url);
    if let Some(url) = cli.push_url {
        config = config.with_push_url(url);
    } else if cli.push {
        if let Some(url) = config.derived_push_url() {
            config = config.with_push_url(url);
        }
    }

    let sync = LiveSync::start(config)?;
    let mut updates = sync.subscribe();
    println!("{}", render_line(&sync.state()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = render_line(&updates.borrow_and_update());
                println!("{line}");
            }
        }
    }

    sync.shutdown();
    Ok(())
}

fn render_line(state: &LiveState) -> String {
    let transport = match state.using_push {
        Some(true) => "push",
        Some(false) => "poll",
        None => "....",
    };
    let stale = if state.is_stale { " STALE" } else { "" };

    match &state.snapshot {
        Some(snap) => {
            let unknown = if snap.unknown_move { " [unresolved move]" } else { "" };
            let tournament = snap
                .tournament
                .as_deref()
                .map(|name| format!(" ({name})"))
                .unwrap_or_default();
            format!(
                "[{transport}]{stale} {} move {:>3}{tournament} | {} {} {} - {} {} {} | on move: {}{unknown}",
                snap.phase,
                snap.move_index,
                snap.name1,
                snap.score1,
                clock(snap.clock1),
                snap.name2,
                snap.score2,
                clock(snap.clock2),
                snap.onmove,
            )
        }
        None => format!("[{transport}]{stale} waiting for first snapshot"),
    }
}

fn clock(seconds: i32) -> String {
    let clamped = seconds.max(0);
    format!("{:02}:{:02}", clamped / 60, clamped % 60)
}
