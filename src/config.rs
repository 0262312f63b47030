//! Environment and CLI configuration for both binaries.

use clap::Parser;

fn env_flag_true(name: &str) -> bool {
    std::env::var(name).map(|v| v == "true").unwrap_or(false)
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Runner (C9)
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "ghost-runner", about = "Headless bot-cohort participant for a realtime room")]
pub struct RunnerArgs {
    /// Base URL of the room server.
    #[arg(long, default_value = "https://meta-hubs.org")]
    pub url: String,

    /// The hub session id (room) to join. Required; missing value exits 1.
    #[arg(long)]
    pub room: Option<String>,

    /// Informational flag set by the supervisor when spawning this process.
    #[arg(long)]
    pub runner: bool,
}

pub struct RunnerEnv {
    pub bot_access_key: Option<String>,
    pub raycast_enabled: bool,
    pub path_start_delay_ms: f64,
    pub min_walk_duration_ms: f64,
    pub max_bots_per_room: u32,
}

impl RunnerEnv {
    pub fn from_env() -> Self {
        let raycast_mode = std::env::var("GHOST_RAYCAST_MODE").unwrap_or_else(|_| "spoke_colliders".to_string());
        Self {
            bot_access_key: std::env::var("BOT_ACCESS_KEY").ok(),
            raycast_enabled: raycast_mode == "spoke_colliders",
            path_start_delay_ms: env_parse_or("PATH_START_DELAY_MS", 450.0),
            min_walk_duration_ms: env_parse_or("MIN_WALK_DURATION_MS", 600.0),
            max_bots_per_room: env_parse_or("MAX_BOTS_PER_ROOM", 5u32),
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor (C8)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub port: u16,
    pub bot_access_key: Option<String>,
    pub runner_autostart: bool,
    pub runner_script: Option<String>,
    pub hubs_base_url: String,
    pub max_active_rooms: u32,
    pub max_bots_per_room: u32,
    pub chat_rate_limit_ms: u64,
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse_or("PORT", 5001u16),
            bot_access_key: std::env::var("BOT_ACCESS_KEY").ok(),
            runner_autostart: env_flag_true("RUNNER_AUTOSTART"),
            runner_script: std::env::var("RUNNER_SCRIPT").ok(),
            hubs_base_url: std::env::var("HUBS_BASE_URL").unwrap_or_else(|_| "https://meta-hubs.org".to_string()),
            max_active_rooms: env_parse_or("MAX_ACTIVE_ROOMS", 1u32),
            max_bots_per_room: env_parse_or("MAX_BOTS_PER_ROOM", 5u32),
            chat_rate_limit_ms: env_parse_or("CHAT_RATE_LIMIT_MS", 700u64),
        }
    }
}
