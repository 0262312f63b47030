//! Admission control (C8) — pure bookkeeping for which rooms have a running
//! runner, which are queued, and which configs want one. Process spawning
//! itself is injected via [`RunnerSpawner`] so this logic is testable without
//! touching the OS process table (mirrors `astrid-tools`'s
//! `SubAgentSpawner` dependency-inversion trait).

use crate::types::BotsConfig;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Running,
    QueuedCapacity,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub bots: BotsConfig,
    pub updated_at_ms: f64,
}

/// What the state machine decided should happen after a child exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// The config still wants a runner and a slot is free — restart after
    /// this delay (a fixed 3s backoff).
    RestartAfter(Duration),
    /// Either the config no longer wants it, or no slot is free right now
    /// (the room has already been re-queued).
    NoRestart,
}

/// Spawns/terminates the actual OS-level runner process for a room. The
/// concrete implementation lives in `child.rs`; tests inject a fake.
pub trait RunnerSpawner {
    type Handle;

    fn spawn(&self, hub_sid: &str) -> std::io::Result<Self::Handle>;
    fn terminate(&self, handle: Self::Handle);
}

pub struct SupervisorState<S: RunnerSpawner> {
    spawner: S,
    max_active_rooms: u32,
    max_bots_per_room: u32,
    runner_autostart: bool,
    configs: HashMap<String, RoomConfig>,
    runners: HashMap<String, S::Handle>,
    queue: VecDeque<String>,
}

impl<S: RunnerSpawner> SupervisorState<S> {
    pub fn new(spawner: S, max_active_rooms: u32, max_bots_per_room: u32, runner_autostart: bool) -> Self {
        Self {
            spawner,
            max_active_rooms,
            max_bots_per_room,
            runner_autostart,
            configs: HashMap::new(),
            runners: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn max_active_rooms(&self) -> u32 {
        self.max_active_rooms
    }

    pub fn max_bots_per_room(&self) -> u32 {
        self.max_bots_per_room
    }

    fn wants_runner(&self, hub_sid: &str) -> bool {
        self.configs
            .get(hub_sid)
            .is_some_and(|c| c.bots.enabled && c.bots.count > 0)
    }

    fn enqueue(&mut self, hub_sid: &str) {
        if !self.queue.iter().any(|h| h == hub_sid) {
            self.queue.push_back(hub_sid.to_string());
        }
    }

    fn dequeue(&mut self, hub_sid: &str) {
        self.queue.retain(|h| h != hub_sid);
    }

    fn start_runner(&mut self, hub_sid: &str) -> std::io::Result<()> {
        let handle = self.spawner.spawn(hub_sid)?;
        self.runners.insert(hub_sid.to_string(), handle);
        Ok(())
    }

    fn stop_runner(&mut self, hub_sid: &str) {
        self.dequeue(hub_sid);
        if let Some(handle) = self.runners.remove(hub_sid) {
            self.spawner.terminate(handle);
        }
    }

    /// Normalise and store `bots` for `hub_sid`, then re-derive its runner
    /// state and try to promote anything queued.
    pub fn set_room_config(&mut self, hub_sid: &str, bots_raw: &serde_json::Value, now_ms: f64) -> RunnerState {
        let bots = BotsConfig::from_json(bots_raw, self.max_bots_per_room);
        self.configs.insert(
            hub_sid.to_string(),
            RoomConfig {
                bots,
                updated_at_ms: now_ms,
            },
        );
        let state = self.ensure_runner_state(hub_sid);
        self.fill_queued_slots();
        state
    }

    /// Drop `hub_sid`'s config entirely and stop its runner.
    pub fn stop_room(&mut self, hub_sid: &str) -> RunnerState {
        self.configs.remove(hub_sid);
        self.stop_runner(hub_sid);
        self.fill_queued_slots();
        RunnerState::Stopped
    }

    /// Idempotently reconcile `hub_sid`'s actual runner state against its
    /// config.
    pub fn ensure_runner_state(&mut self, hub_sid: &str) -> RunnerState {
        if !self.wants_runner(hub_sid) {
            self.stop_runner(hub_sid);
            return RunnerState::Stopped;
        }
        if self.runners.contains_key(hub_sid) {
            self.dequeue(hub_sid);
            return RunnerState::Running;
        }
        if !self.runner_autostart {
            self.dequeue(hub_sid);
            return RunnerState::Stopped;
        }
        if (self.runners.len() as u32) < self.max_active_rooms {
            match self.start_runner(hub_sid) {
                Ok(()) => RunnerState::Running,
                Err(_) => {
                    self.enqueue(hub_sid);
                    RunnerState::QueuedCapacity
                }
            }
        } else {
            self.enqueue(hub_sid);
            RunnerState::QueuedCapacity
        }
    }

    /// Pop queued rooms while slots are free and their configs still want a
    /// runner.
    pub fn fill_queued_slots(&mut self) {
        while (self.runners.len() as u32) < self.max_active_rooms {
            let Some(hub_sid) = self.queue.pop_front() else {
                break;
            };
            if !self.wants_runner(&hub_sid) {
                continue;
            }
            if self.start_runner(&hub_sid).is_err() {
                self.queue.push_front(hub_sid);
                break;
            }
        }
    }

    /// A runner child exited. Returns whether (and after how long) it should
    /// be restarted.
    pub fn on_child_exit(&mut self, hub_sid: &str) -> ExitDecision {
        self.runners.remove(hub_sid);
        if self.wants_runner(hub_sid) && (self.runners.len() as u32) < self.max_active_rooms {
            ExitDecision::RestartAfter(Duration::from_secs(3))
        } else {
            self.enqueue(hub_sid);
            self.fill_queued_slots();
            ExitDecision::NoRestart
        }
    }

    pub fn active_hubs(&self) -> Vec<String> {
        let mut hubs: Vec<String> = self.runners.keys().cloned().collect();
        hubs.sort();
        hubs
    }

    pub fn queued_hubs(&self) -> Vec<String> {
        self.queue.iter().cloned().collect()
    }

    pub fn room_count(&self) -> usize {
        self.configs.len()
    }

    pub fn room_config(&self, hub_sid: &str) -> Option<&RoomConfig> {
        self.configs.get(hub_sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct FakeSpawner {
        fail_next: std::cell::Cell<bool>,
    }

    impl RunnerSpawner for FakeSpawner {
        type Handle = String;

        fn spawn(&self, hub_sid: &str) -> std::io::Result<Self::Handle> {
            if self.fail_next.replace(false) {
                return Err(std::io::Error::other("slot race"));
            }
            Ok(hub_sid.to_string())
        }

        fn terminate(&self, _handle: Self::Handle) {}
    }

    fn enabled_bots(count: u32) -> serde_json::Value {
        json!({"enabled": true, "count": count, "mobility": "medium"})
    }

    #[test]
    fn admits_up_to_capacity_then_queues() {
        let mut st = SupervisorState::new(FakeSpawner::default(), 1, 5, true);
        let a = st.set_room_config("hubA", &enabled_bots(2), 0.0);
        let b = st.set_room_config("hubB", &enabled_bots(2), 0.0);
        assert_eq!(a, RunnerState::Running);
        assert_eq!(b, RunnerState::QueuedCapacity);
        assert_eq!(st.active_hubs(), vec!["hubA".to_string()]);
        assert_eq!(st.queued_hubs(), vec!["hubB".to_string()]);
    }

    #[test]
    fn stopping_active_room_promotes_queued_room() {
        let mut st = SupervisorState::new(FakeSpawner::default(), 1, 5, true);
        st.set_room_config("hubA", &enabled_bots(2), 0.0);
        st.set_room_config("hubB", &enabled_bots(2), 0.0);
        let stop = st.stop_room("hubA");
        assert_eq!(stop, RunnerState::Stopped);
        assert_eq!(st.active_hubs(), vec!["hubB".to_string()]);
        assert!(st.queued_hubs().is_empty());
    }

    #[test]
    fn ensure_runner_state_is_idempotent_while_running() {
        let mut st = SupervisorState::new(FakeSpawner::default(), 2, 5, true);
        st.set_room_config("hubA", &enabled_bots(1), 0.0);
        let first = st.ensure_runner_state("hubA");
        let second = st.ensure_runner_state("hubA");
        assert_eq!(first, RunnerState::Running);
        assert_eq!(second, RunnerState::Running);
        assert_eq!(st.active_hubs(), vec!["hubA".to_string()]);
    }

    #[test]
    fn disabled_config_stops_and_never_queues() {
        let mut st = SupervisorState::new(FakeSpawner::default(), 1, 5, true);
        st.set_room_config("hubA", &enabled_bots(2), 0.0);
        let state = st.set_room_config("hubA", &json!({"enabled": false, "count": 2}), 0.0);
        assert_eq!(state, RunnerState::Stopped);
        assert!(st.active_hubs().is_empty());
        assert!(st.queued_hubs().is_empty());
    }

    #[test]
    fn child_exit_schedules_restart_when_slot_available() {
        let mut st = SupervisorState::new(FakeSpawner::default(), 1, 5, true);
        st.set_room_config("hubA", &enabled_bots(2), 0.0);
        let decision = st.on_child_exit("hubA");
        assert!(matches!(decision, ExitDecision::RestartAfter(_)));
    }

    #[test]
    fn child_exit_requeues_when_config_withdrawn() {
        let mut st = SupervisorState::new(FakeSpawner::default(), 1, 5, true);
        st.set_room_config("hubA", &enabled_bots(2), 0.0);
        st.stop_room("hubA");
        // Runner already removed by stop_room; a late exit notification for
        // the same hub should not resurrect it.
        let decision = st.on_child_exit("hubA");
        assert_eq!(decision, ExitDecision::NoRestart);
        assert!(st.active_hubs().is_empty());
    }

    #[test]
    fn no_hub_ever_appears_in_both_active_and_queued() {
        let mut st = SupervisorState::new(FakeSpawner::default(), 1, 5, true);
        st.set_room_config("hubA", &enabled_bots(2), 0.0);
        st.set_room_config("hubB", &enabled_bots(2), 0.0);
        st.set_room_config("hubC", &enabled_bots(2), 0.0);
        let active: std::collections::HashSet<_> = st.active_hubs().into_iter().collect();
        let queued: std::collections::HashSet<_> = st.queued_hubs().into_iter().collect();
        assert!(active.is_disjoint(&queued));
        assert!(active.len() as u32 <= st.max_active_rooms());
    }

    #[test]
    fn autostart_disabled_dequeues_and_stays_stopped() {
        let mut st = SupervisorState::new(FakeSpawner::default(), 1, 5, false);
        let state = st.set_room_config("hubA", &enabled_bots(2), 0.0);
        assert_eq!(state, RunnerState::Stopped);
        assert!(st.active_hubs().is_empty());
        assert!(st.queued_hubs().is_empty());
    }

    #[test]
    fn spawn_race_requeues_at_head_instead_of_dropping() {
        let spawner = FakeSpawner::default();
        spawner.fail_next.set(true);
        let mut st = SupervisorState::new(spawner, 1, 5, true);
        // First call fails to spawn (slot race) — state should enqueue it.
        let state = st.set_room_config("hubA", &enabled_bots(2), 0.0);
        assert_eq!(state, RunnerState::QueuedCapacity);
        assert_eq!(st.queued_hubs(), vec!["hubA".to_string()]);
        // A later retry succeeds.
        st.fill_queued_slots();
        assert_eq!(st.active_hubs(), vec!["hubA".to_string()]);
    }
}
