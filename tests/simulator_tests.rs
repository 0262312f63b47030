//! Bot Simulator integration tests — assembles a real `BotSimulator` with a
//! fake channel port and drives its reconciliation, command, and resync
//! methods directly, the same way `tests/supervisor_tests.rs` assembles a
//! real `Supervisor` with a fake process spawner instead of unit-testing
//! its pieces in isolation.

#[cfg(test)]
mod tests {
    use ghost_runner::avatars::AvatarCatalog;
    use ghost_runner::channel::ChannelPort;
    use ghost_runner::error::Result;
    use ghost_runner::scene::{BoxCollider, SceneMap, Waypoint};
    use ghost_runner::simulator::{BotSimulator, SimulatorConfig};
    use ghost_runner::time::Timekeeper;
    use ghost_runner::types::{BotState, BotsConfig};
    use glam::{Mat4, Vec3};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Records every outbound publish instead of touching a real socket, so
    /// these tests exercise reconciliation, command handling, and late-joiner
    /// resync without ever needing a live Phoenix channel. The recording
    /// vectors are `Arc`-shared so the test keeps a handle after `self`
    /// (owning the `FakeChannel`) moves into the `BotSimulator`.
    #[derive(Clone, Default)]
    struct Recorder {
        creates: Arc<Mutex<Vec<Value>>>,
        updates: Arc<Mutex<Vec<Value>>>,
        removes: Arc<Mutex<Vec<Value>>>,
    }

    struct FakeChannel {
        session_id: String,
        recorder: Recorder,
    }

    impl FakeChannel {
        fn new(session_id: &str) -> (Self, Recorder) {
            let recorder = Recorder::default();
            (
                Self {
                    session_id: session_id.to_string(),
                    recorder: recorder.clone(),
                },
                recorder,
            )
        }
    }

    impl ChannelPort for FakeChannel {
        fn session_id(&self) -> &str {
            &self.session_id
        }

        async fn publish_naf(&self, payload: Value) -> Result<()> {
            if payload.get("dataType").and_then(|v| v.as_str()) == Some("r") {
                self.recorder.removes.lock().unwrap().push(payload);
            } else {
                self.recorder.creates.lock().unwrap().push(payload);
            }
            Ok(())
        }

        async fn publish_nafr(&self, payload: Value) -> Result<()> {
            self.recorder.updates.lock().unwrap().push(payload);
            Ok(())
        }

        async fn leave(&self) {}
    }

    fn config() -> SimulatorConfig {
        SimulatorConfig {
            hub_sid: "hubA".into(),
            raycast_enabled: true,
            path_start_delay_ms: 0.0,
            min_walk_duration_ms: 100.0,
            max_bots_per_room: 10,
        }
    }

    fn waypoint(name: &str, pos: Vec3) -> Waypoint {
        Waypoint {
            name: name.into(),
            position: pos,
            is_spawn_candidate: true,
            is_named_spawbot: false,
        }
    }

    fn scene_with_patrol_points() -> SceneMap {
        let a = waypoint("wp-a", Vec3::new(0.0, 0.0, 0.0));
        let b = waypoint("wp-b", Vec3::new(5.0, 0.0, 0.0));
        SceneMap {
            all_waypoints: vec![a.clone(), b.clone()],
            spawn_points: vec![a.clone(), b.clone()],
            patrol_points: vec![a, b],
            colliders: Vec::new(),
        }
    }

    fn blocking_collider_between(from: Vec3, to: Vec3) -> BoxCollider {
        let mid = (from + to) * 0.5;
        let world = Mat4::from_translation(mid);
        BoxCollider {
            name: "wall".into(),
            world_transform: world,
            inverse_world_transform: world.inverse(),
        }
    }

    fn simulator_with(scene: SceneMap, channel: FakeChannel) -> BotSimulator<FakeChannel> {
        let avatars = AvatarCatalog::new(reqwest::Client::new(), "http://example.invalid");
        let timekeeper = Timekeeper::new(reqwest::Client::new(), "http://example.invalid");
        let (_tx, rx) = mpsc::unbounded_channel();
        BotSimulator::new(config(), scene, avatars, channel, rx, timekeeper)
    }

    fn enabled_config(count: u32) -> BotsConfig {
        BotsConfig {
            enabled: true,
            count,
            ..BotsConfig::default()
        }
    }

    #[tokio::test]
    async fn reconcile_spawns_up_to_the_desired_count() {
        let (channel, recorder) = FakeChannel::new("owner-1");
        let mut sim = simulator_with(scene_with_patrol_points(), channel);
        sim.seed_bots_config(enabled_config(3));

        sim.reconcile(1_000.0).await;

        assert_eq!(sim.bots().len(), 3);
        assert!(sim.bots().contains_key("bot-1"));
        assert!(sim.bots().contains_key("bot-3"));
        assert_eq!(recorder.creates.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn reconcile_shrinks_bots_past_the_new_desired_count() {
        let (channel, recorder) = FakeChannel::new("owner-1");
        let mut sim = simulator_with(scene_with_patrol_points(), channel);
        sim.seed_bots_config(enabled_config(3));
        sim.reconcile(1_000.0).await;
        assert_eq!(sim.bots().len(), 3);

        sim.seed_bots_config(enabled_config(1));
        sim.reconcile(2_000.0).await;

        assert_eq!(sim.bots().len(), 1);
        assert!(sim.bots().contains_key("bot-1"));
        assert!(!sim.bots().contains_key("bot-2"));
        assert!(!sim.bots().contains_key("bot-3"));
        assert_eq!(recorder.removes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabling_the_cohort_removes_every_bot() {
        let (channel, recorder) = FakeChannel::new("owner-1");
        let mut sim = simulator_with(scene_with_patrol_points(), channel);
        sim.seed_bots_config(enabled_config(2));
        sim.reconcile(1_000.0).await;
        assert_eq!(sim.bots().len(), 2);

        sim.seed_bots_config(BotsConfig {
            enabled: false,
            ..enabled_config(2)
        });
        sim.reconcile(2_000.0).await;

        assert!(sim.bots().is_empty());
        assert_eq!(recorder.removes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn commanded_move_to_a_reachable_waypoint_starts_walking() {
        let (channel, _recorder) = FakeChannel::new("owner-1");
        let mut sim = simulator_with(scene_with_patrol_points(), channel);
        sim.seed_bots_config(enabled_config(1));
        sim.reconcile(1_000.0).await;

        sim.handle_command("bot-1", "go_to_waypoint", Some("wp-b")).await;

        let bot = &sim.bots()["bot-1"];
        assert_eq!(bot.state, BotState::Walk);
        assert_eq!(bot.destination.as_ref().map(|d| d.name.as_str()), Some("wp-b"));
    }

    #[tokio::test]
    async fn commanded_move_blocked_by_a_collider_leaves_the_bot_idle() {
        let mut scene = scene_with_patrol_points();
        scene
            .colliders
            .push(blocking_collider_between(Vec3::new(0.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0)));
        let (channel, _recorder) = FakeChannel::new("owner-1");
        let mut sim = simulator_with(scene, channel);
        sim.seed_bots_config(enabled_config(1));
        sim.reconcile(1_000.0).await;

        sim.handle_command("bot-1", "go_to_waypoint", Some("wp-b")).await;

        let bot = &sim.bots()["bot-1"];
        assert_eq!(bot.state, BotState::Idle);
        assert!(bot.destination.is_none());
    }

    #[tokio::test]
    async fn commanded_move_to_an_unknown_waypoint_is_a_no_op() {
        let (channel, _recorder) = FakeChannel::new("owner-1");
        let mut sim = simulator_with(scene_with_patrol_points(), channel);
        sim.seed_bots_config(enabled_config(1));
        sim.reconcile(1_000.0).await;

        sim.handle_command("bot-1", "go_to_waypoint", Some("wp-nowhere")).await;

        let bot = &sim.bots()["bot-1"];
        assert_eq!(bot.state, BotState::Idle);
    }

    #[tokio::test]
    async fn late_joiner_resync_carries_the_in_flight_path_not_a_freeze() {
        let (channel, recorder) = FakeChannel::new("owner-1");
        let mut sim = simulator_with(scene_with_patrol_points(), channel);
        sim.seed_bots_config(enabled_config(1));
        sim.reconcile(1_000.0).await;
        sim.handle_command("bot-1", "go_to_waypoint", Some("wp-b")).await;

        let walking_bot = sim.bots()["bot-1"].clone();
        assert_eq!(walking_bot.state, BotState::Walk);
        let live_path = walking_bot.path.expect("walking bot has a live path");

        recorder.creates.lock().unwrap().clear();
        sim.handle_presence_join().await;

        let creates = recorder.creates.lock().unwrap();
        assert_eq!(creates.len(), 1);
        let path = &creates[0]["data"]["components"]["0"];
        assert_eq!(path["dur"].as_f64().unwrap(), live_path.duration_ms);
        assert_ne!(path["dur"].as_f64().unwrap(), 0.0);
    }

    #[tokio::test]
    async fn hub_refresh_seeds_bots_config_from_the_new_user_data() {
        let (channel, _recorder) = FakeChannel::new("owner-1");
        let mut sim = simulator_with(scene_with_patrol_points(), channel);

        sim.handle_hub_refresh(&serde_json::json!({
            "bots": {"enabled": true, "count": 2, "mobility": "high"}
        }));
        sim.reconcile(1_000.0).await;

        assert_eq!(sim.bots().len(), 2);
    }
}
