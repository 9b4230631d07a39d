//! Headless SketchSync client.
//!
//! Joins a room, optionally draws a rectangle every few seconds and sends a
//! chat line, and logs every session event until interrupted.

use clap::Parser;
use kurbo::Point;
use sketchsync_core::{
    CanvasSurface, DrawingElement, MemoryCanvas, PlatformWebSocket, SessionEvent, SyncConfig, SyncSession,
    UserInfo,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Host loop period.
const FRAME: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(
    name = "sketchsync-probe",
    about = "Join a SketchSync room and log what happens",
    version
)]
struct Cli {
    /// Room to join.
    room: String,

    #[arg(long, default_value = "probe", help = "Display name")]
    name: String,

    #[arg(long, help = "User id (random if omitted)")]
    user_id: Option<String>,

    #[arg(
        long,
        help = "Relay WebSocket endpoint (overrides config file and SKETCHSYNC_ENDPOINT)"
    )]
    endpoint: Option<String>,

    #[arg(long, value_name = "PATH", help = "JSON engine config")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "MS", help = "Add a rectangle every MS milliseconds")]
    draw_every: Option<u64>,

    #[arg(long, help = "Chat message to send after joining")]
    say: Option<String>,

    #[arg(long, value_name = "SECS", help = "Exit after SECS seconds")]
    duration: Option<u64>,
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    }
    .with_env_overrides();
    if let Some(endpoint) = cli.endpoint.clone() {
        config.endpoint = endpoint;
    }

    let user = UserInfo::new(
        cli.user_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        cli.name.clone(),
    );
    log::info!("Starting probe as {} ({})", user.name, user.id);

    let mut session = SyncSession::new(user, PlatformWebSocket::new(), MemoryCanvas::new(), config)?;
    session.connect()?;
    session.join_room(&cli.room)?;

    let started = Instant::now();
    let mut next_draw = cli.draw_every.map(|ms| started + Duration::from_millis(ms));
    let mut pending_chat = cli.say.clone();
    let mut drawn = 0u64;

    loop {
        for event in session.tick() {
            log_event(&event);
            match event {
                SessionEvent::ConnectionFailed { .. } => {
                    session.logout();
                    return Err("connection failed".into());
                }
                SessionEvent::Connected => {
                    if let Some(message) = pending_chat.take() {
                        session.chat_keystroke();
                        session.send_chat(&message);
                    }
                }
                _ => {}
            }
        }

        if let (Some(at), Some(every)) = (next_draw, cli.draw_every) {
            if Instant::now() >= at {
                drawn += 1;
                let mut elements = session.canvas().elements();
                elements.push(rectangle(&session.user().id, drawn));
                session.canvas_mut().edit(elements);
                session.pointer_moved(Point::new(40.0 * drawn as f64, 30.0));
                next_draw = Some(at + Duration::from_millis(every));
            }
        }

        if cli
            .duration
            .is_some_and(|secs| started.elapsed() >= Duration::from_secs(secs))
        {
            break;
        }
        std::thread::sleep(FRAME);
    }

    let inbound = session.inbound_stats();
    log::info!(
        "Done: {} elements on canvas, {} scenes sent, {} applied ({} canvas replacements), {} stale, {} superseded",
        session.canvas().elements().len(),
        session.outbound_stats().emitted,
        inbound.applied,
        session.canvas().replacements(),
        inbound.stale,
        inbound.superseded
    );
    session.logout();
    Ok(())
}

fn rectangle(owner: &str, n: u64) -> DrawingElement {
    DrawingElement::new(serde_json::json!({
        "id": format!("{owner}-{n}"),
        "type": "rectangle",
        "version": 1,
        "isDeleted": false,
        "x": 40.0 * n as f64,
        "y": 30.0,
        "width": 80.0,
        "height": 50.0,
    }))
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::SceneApplied { .. } | SessionEvent::SceneSent { .. } => {
            log::debug!("{:?}", event)
        }
        SessionEvent::CursorsRefreshed => log::trace!("{:?}", event),
        SessionEvent::ConnectionFailed { .. } | SessionEvent::ServerError(_) => {
            log::error!("{:?}", event)
        }
        SessionEvent::ChatMessage { message, user, .. } => {
            log::info!("[chat] {}: {}", user.name, message)
        }
        _ => log::info!("{:?}", event),
    }
}
