//! Skirmish replay - headless runner for the client simulation core
//!
//! Reads a recorded server feed (one JSON message per line) from a file or
//! stdin and plays it through a `ClientSession`:
//! - a reader task decodes lines into the snapshot inbox
//! - the frame loop ticks at 60 Hz and releases one message per snapshot interval
//! - lifecycle changes are logged, and a summary is printed at the end
//!
//! Usage: `skirmish_replay [FEED_FILE] [LOCAL_PLAYER_ID]`

use std::path::PathBuf;

use tokio::io::BufReader;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skirmish_client_core::config::Config;
use skirmish_client_core::game::ClientSession;
use skirmish_client_core::util::time::{frame_interval, Timer, FRAME_RATE, SNAPSHOT_INTERVAL_MS};
use skirmish_client_core::ws::inbox::{self, pump_lines, FeedSender, InboxError};

/// Frames simulated after the feed runs dry
const SETTLE_FRAMES: u32 = FRAME_RATE * 3;

#[derive(Debug, Default)]
struct ReplayStats {
    frames: u64,
    messages: u64,
    hits: u64,
    severs: u64,
    transitions: u64,
    anchored: u64,
    expired: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    let mut args = std::env::args().skip(1);
    let source = args.next().map(PathBuf::from);
    let local_id = match args.next() {
        Some(raw) => Some(raw.parse::<u64>()?),
        None => None,
    };

    info!(source = ?source, local_id = ?local_id, "Starting replay");

    let (sender, mut pending) = inbox::channel(inbox::DEFAULT_CAPACITY);
    let reader = tokio::spawn(pump_source(source, sender));

    let mut session = ClientSession::new(config);
    if let Some(id) = local_id {
        session.set_local_player(id);
    }

    let clock = Timer::new();
    let mut ticker = tokio::time::interval(frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut stats = ReplayStats::default();
    let mut last_ms = clock.elapsed_ms();
    let mut next_release_ms = last_ms;
    let mut settle_left = SETTLE_FRAMES;

    loop {
        ticker.tick().await;
        let now_ms = clock.elapsed_ms();

        if now_ms >= next_release_ms {
            if let Some(msg) = pending.try_next() {
                stats.messages += 1;
                next_release_ms = now_ms + SNAPSHOT_INTERVAL_MS;
                if let Some(report) = session.apply_message(msg, now_ms) {
                    stats.hits += report.hits.len() as u64;
                    stats.severs += report.hits.iter().filter(|h| h.sever.is_some()).count() as u64;
                }
            }
        }

        let dt = ((now_ms - last_ms) / 1000.0) as f32;
        last_ms = now_ms;
        let frame = session.step_frame(dt, now_ms);
        stats.frames += 1;
        stats.transitions += frame.transitions.len() as u64;
        stats.anchored += frame.anchored.len() as u64;
        stats.expired += frame.expired.len() as u64;

        if pending.is_closed() {
            settle_left = settle_left.saturating_sub(1);
            if settle_left == 0 {
                break;
            }
        }
    }

    match reader.await? {
        Ok(queued) => info!(queued, "Feed reader finished"),
        Err(e) => error!(error = %e, "Feed reader failed"),
    }

    info!(
        frames = stats.frames,
        messages = stats.messages,
        hits = stats.hits,
        severs = stats.severs,
        transitions = stats.transitions,
        anchored = stats.anchored,
        expired = stats.expired,
        players = session.players().count(),
        projectiles = session.projectiles().count(),
        ragdolls = session.players().filter(|p| p.ragdoll.is_active()).count(),
        "Replay complete"
    );
    Ok(())
}

/// Pump the feed from a file, or stdin when no path was given
async fn pump_source(source: Option<PathBuf>, sender: FeedSender) -> Result<usize, InboxError> {
    match source {
        Some(path) => {
            let file = tokio::fs::File::open(&path).await?;
            pump_lines(BufReader::new(file), sender).await
        }
        None => pump_lines(BufReader::new(tokio::io::stdin()), sender).await,
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
