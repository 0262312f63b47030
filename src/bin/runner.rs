//! ghost-runner binary (C9) — one process per admitted room.
//!
//! ## Configuration (CLI + env)
//!
//! | Key | Default | Description |
//! |---|---|---|
//! | `--url` | `https://meta-hubs.org` | Base URL of the room server |
//! | `--room` | *(required)* | The hub session id to join |
//! | `--runner` | — | Informational flag set by the supervisor |
//! | `BOT_ACCESS_KEY` | — | Shared secret for the channel join payload |
//! | `GHOST_RAYCAST_MODE` | `spoke_colliders` | Any other value disables collider checks |
//! | `PATH_START_DELAY_MS` | `450` | Delay before a new walk segment starts |
//! | `MIN_WALK_DURATION_MS` | `600` | Floor on a walk segment's duration |

use clap::Parser;
use ghost_runner::channel::ChannelClient;
use ghost_runner::config::{RunnerArgs, RunnerEnv};
use ghost_runner::simulator::{BotSimulator, RunOutcome, SimulatorConfig};
use ghost_runner::types::BotsConfig;
use ghost_runner::{avatars::AvatarCatalog, glb, scene, time::Timekeeper};
use std::process::ExitCode;
use std::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ghost_runner=info".parse().unwrap()),
        )
        .init();

    let args = RunnerArgs::parse();
    let Some(hub_sid) = args.room.clone() else {
        log::error!("--room is required");
        return ExitCode::from(1);
    };
    let env = RunnerEnv::from_env();

    log::info!("starting ghost-runner for room {} against {}", hub_sid, args.url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("reqwest client");

    let (channel, events) = match ChannelClient::connect(&args.url, &hub_sid, env.bot_access_key.as_deref()).await {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("failed to join hub:{}: {}", hub_sid, e);
            return ExitCode::from(1);
        }
    };

    let scene_map = if channel.scene_model_url.is_empty() {
        log::warn!("join response carried no scene model url; bots will wander near origin");
        scene::SceneMap::empty()
    } else {
        match glb::fetch_scene_json(&client, &channel.scene_model_url).await {
            Ok(gltf) => scene::extract_scene(&gltf),
            Err(e) => {
                log::warn!("scene fetch/parse failed, proceeding with empty scene: {}", e);
                scene::SceneMap::empty()
            }
        }
    };
    log::info!(
        "scene extracted: {} waypoints, {} colliders",
        scene_map.all_waypoints.len(),
        scene_map.colliders.len()
    );

    let timekeeper = Timekeeper::new(client.clone(), args.url.clone());
    timekeeper.prime().await;

    let avatars = AvatarCatalog::new(client.clone(), args.url.clone());
    avatars.refresh().await;

    let initial_bots_config = channel
        .initial_user_data
        .get("bots")
        .map(|v| BotsConfig::from_json(v, env.max_bots_per_room))
        .unwrap_or_default();

    let simulator_config = SimulatorConfig {
        hub_sid: hub_sid.clone(),
        raycast_enabled: env.raycast_enabled,
        path_start_delay_ms: env.path_start_delay_ms,
        min_walk_duration_ms: env.min_walk_duration_ms,
        max_bots_per_room: env.max_bots_per_room,
    };

    let mut simulator = BotSimulator::new(simulator_config, scene_map, avatars, channel, events, timekeeper);
    simulator.seed_bots_config(initial_bots_config);

    let outcome = simulator.run(shutdown_signal()).await;
    match outcome {
        RunOutcome::Shutdown => {
            log::info!("ghost-runner for room {} shut down cleanly", hub_sid);
            ExitCode::from(0)
        }
        RunOutcome::Fatal(reason) => {
            log::error!("ghost-runner for room {} exiting after fatal condition: {}", hub_sid, reason);
            ExitCode::from(1)
        }
    }
}

/// Resolves once SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
