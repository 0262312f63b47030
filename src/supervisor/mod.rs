//! Runner Supervisor (C8) — the orchestrator: admits at most
//! `MAX_ACTIVE_ROOMS` rooms concurrently, FIFO-queues the rest, restarts
//! crashed runners with a fixed backoff, and drains on `room-stop`.
//!
//! A thin async wrapper owning the shared, mutex-guarded state and driving
//! it from external events — HTTP handlers and child-exit notifications.
//! Generic over [`RunnerSpawner`] so tests can inject a fake process table
//! (see `state::tests` and `tests/supervisor_tests.rs`); the binary only
//! ever instantiates `Supervisor<ProcessSpawner>`.

pub mod child;
pub mod http;
pub mod state;

use crate::config::SupervisorConfig;
use child::ProcessSpawner;
use log::info;
use state::{ExitDecision, RoomConfig, RunnerSpawner, RunnerState, SupervisorState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

fn wall_clock_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

pub struct HealthSnapshot {
    pub rooms: usize,
    pub active_rooms: usize,
    pub queued_rooms: usize,
    pub max_active_rooms: u32,
    pub max_bots_per_room: u32,
    pub active_hubs: Vec<String>,
    pub queued_hubs: Vec<String>,
}

/// Owns the admission state machine plus the bookkeeping ([`JoinHandle`]s
/// for pending restarts) that doesn't belong in the pure state machine.
pub struct Supervisor<S: RunnerSpawner> {
    config: SupervisorConfig,
    state: Mutex<SupervisorState<S>>,
    restart_timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

pub type ProductionSupervisor = Supervisor<ProcessSpawner>;

impl ProductionSupervisor {
    pub fn new(config: SupervisorConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let program = child::resolve_runner_program(&config.runner_script);
        let spawner = ProcessSpawner::new(program, config.hubs_base_url.clone(), exit_tx);
        let supervisor = Self::new_with_spawner(config, spawner);
        (supervisor, exit_rx)
    }
}

impl<S: RunnerSpawner + Send + Sync + 'static> Supervisor<S>
where
    S::Handle: Send + 'static,
{
    pub fn new_with_spawner(config: SupervisorConfig, spawner: S) -> Arc<Self> {
        let state = SupervisorState::new(
            spawner,
            config.max_active_rooms,
            config.max_bots_per_room,
            config.runner_autostart,
        );
        Arc::new(Self {
            config,
            state: Mutex::new(state),
            restart_timers: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// `POST /internal/bots/room-config`.
    pub async fn room_config(&self, hub_sid: &str, bots_raw: &serde_json::Value) -> RunnerState {
        self.cancel_restart(hub_sid).await;
        let mut state = self.state.lock().await;
        state.set_room_config(hub_sid, bots_raw, wall_clock_ms())
    }

    /// `POST /internal/bots/room-stop`.
    pub async fn room_stop(&self, hub_sid: &str) -> RunnerState {
        self.cancel_restart(hub_sid).await;
        let mut state = self.state.lock().await;
        state.stop_room(hub_sid)
    }

    pub async fn room_config_snapshot(&self, hub_sid: &str) -> Option<RoomConfig> {
        self.state.lock().await.room_config(hub_sid).cloned()
    }

    /// Drive the effects of a child process exiting: drop the slot,
    /// schedule (or skip) a restart, then let any queued room take the slot.
    pub async fn handle_exit(self: &Arc<Self>, hub_sid: String) {
        self.cancel_restart(&hub_sid).await;
        let decision = {
            let mut state = self.state.lock().await;
            state.on_child_exit(&hub_sid)
        };
        if let ExitDecision::RestartAfter(delay) = decision {
            let supervisor = Arc::clone(self);
            let hub_sid_for_timer = hub_sid.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let mut state = supervisor.state.lock().await;
                state.ensure_runner_state(&hub_sid_for_timer);
                state.fill_queued_slots();
            });
            info!("scheduled restart for room {} in {:?}", hub_sid, delay);
            self.restart_timers.lock().await.insert(hub_sid, handle);
        }
    }

    async fn cancel_restart(&self, hub_sid: &str) {
        if let Some(handle) = self.restart_timers.lock().await.remove(hub_sid) {
            handle.abort();
        }
    }

    pub async fn health(&self) -> HealthSnapshot {
        let state = self.state.lock().await;
        let active_hubs = state.active_hubs();
        let queued_hubs = state.queued_hubs();
        HealthSnapshot {
            rooms: state.room_count(),
            active_rooms: active_hubs.len(),
            queued_rooms: queued_hubs.len(),
            max_active_rooms: state.max_active_rooms(),
            max_bots_per_room: state.max_bots_per_room(),
            active_hubs,
            queued_hubs,
        }
    }

    /// Runs for the lifetime of the process, reconciling child-exit
    /// notifications into the state machine one at a time — no two exit
    /// callbacks run concurrently.
    pub async fn run_exit_loop(self: Arc<Self>, mut exit_rx: mpsc::UnboundedReceiver<String>) {
        while let Some(hub_sid) = exit_rx.recv().await {
            self.handle_exit(hub_sid).await;
        }
    }
}
