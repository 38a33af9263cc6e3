mod cli;

use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{Cli, Commands};
use focusroom_cleanup::CleanupSweep;
use focusroom_client::{PresenceTracker, RoomReconciler, RoomSession};
use focusroom_core::{
    BackendKind, Config, ConfigLoader, FocusRoomError, NewRoom, ParticipantInfo, Room, RoomTimer,
};
use focusroom_realtime::{RealtimeBackend, ServiceFactory, SharedBackend};

#[tokio::main]
async fn main() -> Result<(), FocusRoomError> {
    // Initialize tracing
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("focusroom=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    // Commands that do not need a loaded config
    match &cli.command {
        Commands::Init => return handle_init(),
        Commands::ConfigSample { output } => {
            let path = output
                .clone()
                .unwrap_or_else(|| PathBuf::from("./focusroom.sample.yaml"));
            Config::sample().save(&path)?;
            println!("✅ Sample config written to {:?}", path);
            return Ok(());
        }
        _ => {}
    }

    let config = ConfigLoader::load(cli.config_path.as_deref())?;
    let backend = connect(&config).await?;
    let user_id = config.user.user_id();

    let result = match cli.command {
        Commands::Init | Commands::ConfigSample { .. } => Ok(()),
        Commands::Rooms { all } => handle_rooms(&backend, all).await,
        Commands::Create {
            name,
            max_participants,
            duration,
            removal_delay,
        } => {
            let duration_secs = match duration {
                Some(minutes) => timer_secs(minutes).ok_or_else(|| {
                    FocusRoomError::Other(format!("{} minutes is too long for a room", minutes))
                })?,
                None => config.rooms.duration_secs,
            };
            let mut request = NewRoom::new(name, &user_id)
                .with_max_participants(max_participants.unwrap_or(config.rooms.max_participants))
                .with_duration(duration_secs);
            if let Some(delay) = removal_delay {
                request = request.with_removal_delay(delay);
            }
            let session = new_session(&backend, &config, &user_id);
            match session.create_room(request).await {
                Ok(room) => {
                    println!("✅ Created room {} ({})", room.name, room.id);
                    stay_in_room(&backend, &config, &session, room).await
                }
                Err(e) => Err(e),
            }
        }
        Commands::Join { room_id } => {
            let session = new_session(&backend, &config, &user_id);
            match session.join_room(&room_id).await {
                Ok(room) => stay_in_room(&backend, &config, &session, room).await,
                Err(e) => Err(e),
            }
        }
        Commands::Delete { room_id } => {
            let session = new_session(&backend, &config, &user_id);
            session.delete_room(&room_id).await.map(|()| {
                println!("✅ Deleted room {}", room_id);
            })
        }
        Commands::Online => backend.get_active_users_count().await.map(|count| {
            println!("👥 {} user(s) online", count);
        }),
        Commands::Sweep { once, json } => handle_sweep(&backend, &config, once, json).await,
    };

    if let Err(e) = backend.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    result
}

async fn connect(config: &Config) -> Result<SharedBackend, FocusRoomError> {
    let factory = ServiceFactory::global();
    factory.on_error(|e| warn!("Realtime backend unavailable: {}", e));
    let backend = factory.create_from_config(&config.backend).await?;
    if config.backend.kind != backend.kind() {
        println!(
            "⚠️  Using the {} backend; room listings are local and room changes are disabled",
            backend.kind()
        );
    }
    Ok(backend)
}

fn new_session(backend: &SharedBackend, config: &Config, user_id: &str) -> RoomSession {
    RoomSession::new(
        backend.clone(),
        user_id,
        ParticipantInfo::named(config.user.display_name.clone()),
    )
    .require_backend(config.backend.kind)
}

async fn handle_rooms(backend: &SharedBackend, all: bool) -> Result<(), FocusRoomError> {
    let rooms: Vec<Arc<Room>> = if all {
        backend
            .get_all_focus_rooms()
            .await?
            .into_iter()
            .map(Arc::new)
            .collect()
    } else {
        let reconciler = RoomReconciler::new(backend.clone());
        reconciler.refresh().await
    };

    if rooms.is_empty() {
        println!("No open rooms");
        return Ok(());
    }

    println!("📋 Rooms:");
    for room in rooms {
        let timer = match room.timer {
            Some(timer) => format_remaining(&timer),
            None => "no timer".to_string(),
        };
        println!(
            "  • {} [{}] {}/{} participants, {}",
            room.name,
            room.id,
            room.participant_count(),
            room.max_participants,
            timer
        );
    }
    Ok(())
}

/// Timer length in seconds, if it fits the store's millisecond timestamps
fn timer_secs(minutes: u64) -> Option<u64> {
    minutes
        .checked_mul(60)
        .filter(|secs| secs.checked_mul(1000).is_some_and(|ms| ms <= i64::MAX as u64))
}

fn format_remaining(timer: &RoomTimer) -> String {
    let now = chrono::Utc::now().timestamp_millis();
    let secs = timer.remaining_millis(now) / 1000;
    if secs == 0 {
        "timer ended".to_string()
    } else {
        format!("{}:{:02} left", secs / 60, secs % 60)
    }
}

/// Heartbeat, print room activity and forward stdin lines until Ctrl-C or `/leave`
async fn stay_in_room(
    backend: &SharedBackend,
    config: &Config,
    session: &RoomSession,
    room: Room,
) -> Result<(), FocusRoomError> {
    let tracker = PresenceTracker::from_config(backend.clone(), session.user_id(), &config.presence);
    tracker.go_online();

    let mut messages = backend.subscribe_to_messages(&room.id).await?;
    let mut timer = backend.subscribe_to_room_timer(&room.id).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = 0usize;

    println!("🎯 In room {} ({})", room.name, room.id);
    println!("   Type to chat, /timer [minutes] to start the timer, /leave to exit");

    let outcome = async {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let line = line.trim();
                    if line == "/leave" {
                        break;
                    }
                    if let Some(minutes) = line.strip_prefix("/timer") {
                        let minutes = minutes.trim().parse::<u64>().unwrap_or(room.duration / 60);
                        match timer_secs(minutes) {
                            Some(secs) => {
                                session.start_timer(secs).await?;
                            }
                            None => println!("⚠️  {} minutes is too long for a timer", minutes),
                        }
                    } else if !line.is_empty() {
                        session.send_message(line).await?;
                    }
                }
                Some(list) = messages.recv() => {
                    for message in list.iter().skip(printed) {
                        let who = room
                            .participants
                            .get(&message.user_id)
                            .map_or(message.user_id.as_str(), |p| p.name.as_str());
                        println!("💬 {}: {}", who, message.text);
                    }
                    printed = list.len();
                }
                Some(update) = timer.recv() => {
                    match update {
                        Some(t) => println!("⏱️  {}", format_remaining(&t)),
                        None => println!("⏱️  No timer running"),
                    }
                }
            }
        }
        Ok::<(), FocusRoomError>(())
    }
    .await;

    session.leave_room().await?;
    tracker.go_offline().await?;
    println!("👋 Left room {}", room.id);
    outcome
}

async fn handle_sweep(
    backend: &SharedBackend,
    config: &Config,
    once: bool,
    json: bool,
) -> Result<(), FocusRoomError> {
    let sweep = CleanupSweep::new(backend.clone(), &config.cleanup);
    if once {
        let report = sweep.sweep_once().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!(
                "🧹 Examined {} rooms, deleted {}, retained {}",
                report.examined,
                report.deleted.len(),
                report.retained
            );
        }
        return Ok(());
    }

    sweep
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    Ok(())
}

fn handle_init() -> Result<(), FocusRoomError> {
    println!("🎯 FocusRoom setup");
    println!("==================");

    let config_path = ConfigLoader::default_path();
    if config_path.exists() {
        let answer = prompt(&format!(
            "⚠️  Config already exists at {:?}. Overwrite? [y/N] ",
            config_path
        ))?;
        if !answer.eq_ignore_ascii_case("y") {
            println!("Cancelled");
            return Ok(());
        }
    }

    println!("\nChoose a backend:");
    println!("1) [recommended] Firebase Realtime Database");
    println!("2) In-memory (single process, for trying things out)");
    let choice = prompt("Choice [1/2] (default 1): ")?;

    let mut config = Config::sample();
    if choice == "2" {
        config.backend.kind = BackendKind::Memory;
    } else {
        let url = prompt("Database URL (blank to set it later): ")?;
        if !url.is_empty() {
            config.backend.firebase.database_url = url;
        }
    }

    let name = prompt("Display name (default Anonymous): ")?;
    if !name.is_empty() {
        config.user.display_name = name;
    }

    config.save(&config_path)?;
    info!("Config written to {:?}", config_path);
    println!("✅ Config saved: {:?}", config_path);
    println!("\n🎉 Done! Try `focusroom rooms`.");
    Ok(())
}

fn prompt(question: &str) -> Result<String, FocusRoomError> {
    print!("{}", question);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_minutes_are_bounded() {
        assert_eq!(timer_secs(25), Some(1500));
        assert_eq!(timer_secs(0), Some(0));
        assert_eq!(timer_secs(u64::MAX), None);
        assert_eq!(timer_secs(u64::MAX / 60), None);
    }
}
