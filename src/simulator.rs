//! Bot Simulator (C7) – the per-room state machine: reconciliation against
//! the desired `BotsConfig`, idle/walk transitions, waypoint reservation,
//! path construction, and late-joiner full-sync.
//!
//! Deliberately single-threaded and cooperatively scheduled with no locking:
//! this type owns everything it touches outright and is driven by one `run`
//! loop, rather than being shared behind an `Arc<Mutex<_>>` and ticked from a
//! separate task.

use crate::avatars::AvatarCatalog;
use crate::channel::{ChannelEvent, ChannelPort};
use crate::collision;
use crate::protocol::{self, InfoComponent, PathComponent};
use crate::scene::{SceneMap, Waypoint};
use crate::time::{self, Timekeeper};
use crate::types::{BotRecord, BotState, BotsConfig, Destination, ReservationIndex, Segment};
use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

const RECONCILE_INTERVAL_MS: f64 = 3_000.0;
const AVATAR_REFRESH_INTERVAL_MS: f64 = 60_000.0;
const TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Squared XZ distance under which a waypoint is considered "already there".
const NEAR_DISTANCE_SQ: f32 = 0.04;
/// Squared XZ distance under which two bots are considered to conflict at spawn.
const SEPARATION_DISTANCE_SQ: f32 = 0.36;
const ARRIVAL_EPS: f32 = 0.08;
const POST_ARRIVAL_IDLE_MS: f64 = 800.0;

pub struct SimulatorConfig {
    pub hub_sid: String,
    pub raycast_enabled: bool,
    pub path_start_delay_ms: f64,
    pub min_walk_duration_ms: f64,
    pub max_bots_per_room: u32,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Clean shutdown via signal.
    Shutdown,
    /// The channel reported a fatal transport condition.
    Fatal(String),
}

pub struct BotSimulator<C: ChannelPort> {
    config: SimulatorConfig,
    scene: SceneMap,
    avatars: AvatarCatalog,
    channel: C,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    timekeeper: Timekeeper,
    owner: String,
    bots: HashMap<String, BotRecord>,
    reservations: ReservationIndex,
    bots_config: BotsConfig,
}

impl<C: ChannelPort> BotSimulator<C> {
    pub fn new(
        config: SimulatorConfig,
        scene: SceneMap,
        avatars: AvatarCatalog,
        channel: C,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        timekeeper: Timekeeper,
    ) -> Self {
        let owner = channel.session_id().to_string();
        Self {
            config,
            scene,
            avatars,
            channel,
            events,
            timekeeper,
            owner,
            bots: HashMap::new(),
            reservations: ReservationIndex::new(),
            bots_config: BotsConfig::default(),
        }
    }

    /// Drives the 100 ms tick and the inbound event stream until `shutdown`
    /// resolves or the channel reports a fatal condition.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> RunOutcome {
        tokio::pin!(shutdown);
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let start = self.timekeeper.now_ms();
        self.reconcile(start).await;
        self.avatars.refresh().await;
        let mut next_reconcile_ms = start + RECONCILE_INTERVAL_MS;
        let mut next_avatar_refresh_ms = start + AVATAR_REFRESH_INTERVAL_MS;
        let mut next_clock_refresh_ms = start + time::REFRESH_INTERVAL.as_millis() as f64;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    self.shutdown_all().await;
                    return RunOutcome::Shutdown;
                }
                _ = tick.tick() => {
                    let now = self.timekeeper.now_ms();
                    if now >= next_reconcile_ms {
                        self.reconcile(now).await;
                        next_reconcile_ms = now + RECONCILE_INTERVAL_MS;
                    }
                    if now >= next_avatar_refresh_ms {
                        self.avatars.refresh().await;
                        next_avatar_refresh_ms = now + AVATAR_REFRESH_INTERVAL_MS;
                    }
                    if now >= next_clock_refresh_ms {
                        self.timekeeper.sample_once().await;
                        next_clock_refresh_ms = now + time::REFRESH_INTERVAL.as_millis() as f64;
                    }
                    self.on_tick(now).await;
                }
                event = self.events.recv() => {
                    match event {
                        Some(ChannelEvent::Fatal(reason)) => return RunOutcome::Fatal(reason),
                        Some(ChannelEvent::Command { bot_id, command_type, waypoint }) => {
                            self.handle_command(&bot_id, &command_type, waypoint.as_deref()).await;
                        }
                        Some(ChannelEvent::HubRefresh(user_data)) => self.handle_hub_refresh(&user_data),
                        Some(ChannelEvent::PresenceJoin { .. }) => self.handle_presence_join().await,
                        None => return RunOutcome::Fatal("channel event stream ended".into()),
                    }
                }
            }
        }
    }

    async fn on_tick(&mut self, now: f64) {
        let ids: Vec<String> = self.bots.keys().cloned().collect();
        for id in ids {
            if let Some(bot) = self.bots.get_mut(&id) {
                bot.sync_position(now);
            }
            let Some((state, ends_at)) = self.bots.get(&id).map(|b| (b.state, b.state_ends_at_ms)) else {
                continue;
            };
            if state == BotState::Idle && now >= ends_at {
                self.start_walking(&id, None, now).await;
            } else if state == BotState::Walk && now >= ends_at {
                self.set_idle(&id, now).await;
            }
        }
    }

    // -----------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------

    fn desired_count(&self) -> u32 {
        if !self.bots_config.enabled {
            0
        } else {
            self.bots_config.count.min(10)
        }
    }

    /// Bring the live bot set in line with `bots_config`: remove indices past
    /// the desired count, spawn any missing ones up to it, and propagate the
    /// current mobility onto survivors.
    pub async fn reconcile(&mut self, now_ms: f64) {
        let desired = self.desired_count();

        let remove_ids: Vec<String> = self
            .bots
            .keys()
            .filter(|id| bot_index_of(id) > desired)
            .cloned()
            .collect();
        for id in remove_ids {
            self.remove_bot(&id).await;
        }

        for n in 1..=desired {
            let bot_id = BotRecord::bot_id_for(n as usize);
            if self.bots.contains_key(&bot_id) {
                continue;
            }
            self.spawn_bot(n, now_ms).await;
        }

        let mobility = self.bots_config.mobility;
        for bot in self.bots.values_mut() {
            bot.mobility = mobility;
        }
    }

    async fn spawn_bot(&mut self, n: u32, now_ms: f64) {
        let base = self.spawn_base_position(n);
        let already_placed: Vec<glam::Vec3> = self.bots.values().map(|b| b.position).collect();
        let position = separated_position(base, n, &already_placed);

        let (yaw, jitter_unit) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0.0..360.0f32), rng.gen::<f64>())
        };

        let bot_id = BotRecord::bot_id_for(n as usize);
        let network_id = BotRecord::network_id(&self.config.hub_sid, &bot_id);
        let mobility = self.bots_config.mobility;

        let bot = BotRecord {
            bot_id: bot_id.clone(),
            network_id,
            last_owner_time_ms: now_ms,
            position,
            home_position: position,
            yaw_deg: yaw,
            state: BotState::Idle,
            state_ends_at_ms: now_ms + mobility.initial_idle_ms(jitter_unit),
            mobility,
            destination: None,
            reserved_target_name: None,
            path: Some(Segment::freeze(position, now_ms, yaw)),
        };

        self.publish_create(&bot).await;
        self.bots.insert(bot_id, bot);
    }

    fn spawn_base_position(&self, n: u32) -> glam::Vec3 {
        let list: &[Waypoint] = if !self.scene.spawn_points.is_empty() {
            &self.scene.spawn_points
        } else if !self.scene.patrol_points.is_empty() {
            &self.scene.patrol_points
        } else {
            return glam::Vec3::ZERO;
        };
        list[(n as usize - 1) % list.len()].position
    }

    async fn remove_bot(&mut self, bot_id: &str) {
        if let Some(bot) = self.bots.remove(bot_id) {
            self.reservations.release_all_for(bot_id);
            self.publish_remove(&bot.network_id).await;
        }
    }

    // -----------------------------------------------------------------
    // Walking / idling
    // -----------------------------------------------------------------

    async fn start_walking(&mut self, bot_id: &str, desired_waypoint: Option<&str>, now_ms: f64) {
        let Some(mut bot) = self.bots.remove(bot_id) else {
            return;
        };
        bot.sync_position(now_ms);

        let destination = match desired_waypoint {
            Some(name) => {
                let Some(wp) = self
                    .scene
                    .all_waypoints
                    .iter()
                    .find(|w| w.name.eq_ignore_ascii_case(name))
                else {
                    debug!("go_to_waypoint: {} has no waypoint named {:?}", bot_id, name);
                    self.bots.insert(bot_id.to_string(), bot);
                    return;
                };
                if self.config.raycast_enabled
                    && !collision::is_path_clear(bot.position, wp.position, &self.scene.colliders, collision::DEFAULT_EPS)
                {
                    debug!("go_to_waypoint: {} to {:?} blocked by a collider", bot_id, name);
                    self.bots.insert(bot_id.to_string(), bot);
                    return;
                }
                Destination {
                    name: wp.name.clone(),
                    position: wp.position,
                }
            }
            None => match self.pick_patrol_point(&bot) {
                Some(d) => d,
                None => self.synthesize_wander_target(&bot),
            },
        };

        let is_named = !destination.name.is_empty();
        self.reservations.release_all_for(bot_id);
        if is_named {
            self.reservations.reserve(&destination.name, bot_id);
            bot.reserved_target_name = Some(destination.name.clone());
        } else {
            bot.reserved_target_name = None;
        }

        // Separation is applied against an empty "already placed" set here —
        // preserved from the source behaviour (see DESIGN.md open questions):
        // it only ever no-ops for walk/patrol targets, mattering solely at
        // initial spawn.
        let target_pos = separated_position(destination.position, 1, &[]);

        let dx = target_pos.x - bot.position.x;
        let dz = target_pos.z - bot.position.z;
        let distance = (dx * dx + dz * dz).sqrt();

        if distance <= ARRIVAL_EPS {
            bot.state = BotState::Idle;
            bot.path = None;
            bot.state_ends_at_ms = now_ms + POST_ARRIVAL_IDLE_MS;
            self.bots.insert(bot_id.to_string(), bot);
            return;
        }

        let speed = bot.mobility.profile().speed_mps.max(0.05);
        let duration = (1000.0 * distance as f64 / speed as f64).max(self.config.min_walk_duration_ms);
        let t0 = now_ms + self.config.path_start_delay_ms;
        let yaw1 = normalize_deg(dx.atan2(dz).to_degrees());
        let yaw0 = bot.yaw_deg;

        bot.path = Some(Segment {
            start_pos: bot.position,
            end_pos: target_pos,
            t0_ms: t0,
            duration_ms: duration,
            yaw0_deg: yaw0,
            yaw1_deg: yaw1,
        });
        bot.state = BotState::Walk;
        bot.destination = Some(destination);
        bot.state_ends_at_ms = t0 + duration;
        bot.yaw_deg = yaw1;

        self.publish_update(&bot).await;
        self.bots.insert(bot_id.to_string(), bot);
    }

    async fn set_idle(&mut self, bot_id: &str, now_ms: f64) {
        let Some(mut bot) = self.bots.remove(bot_id) else {
            return;
        };
        bot.sync_position(now_ms);
        bot.destination = None;
        self.reservations.release_all_for(bot_id);
        bot.reserved_target_name = None;
        bot.path = Some(Segment::freeze(bot.position, now_ms, bot.yaw_deg));
        bot.state = BotState::Idle;

        let profile = bot.mobility.profile();
        let idle_ms = rand::thread_rng().gen_range(profile.idle_min_ms..profile.idle_max_ms);
        bot.state_ends_at_ms = now_ms + idle_ms;

        self.publish_update(&bot).await;
        self.bots.insert(bot_id.to_string(), bot);
    }

    fn pick_patrol_point(&self, bot: &BotRecord) -> Option<Destination> {
        if self.scene.patrol_points.is_empty() {
            return None;
        }
        let own_dest_name = bot.destination.as_ref().map(|d| d.name.as_str());

        let filter = |relax: bool| -> Vec<&Waypoint> {
            self.scene
                .patrol_points
                .iter()
                .filter(|w| {
                    if Some(w.name.as_str()) == own_dest_name {
                        return false;
                    }
                    if !relax {
                        if self.reservations.is_reserved_by_other(&w.name, &bot.bot_id) {
                            return false;
                        }
                        let dx = w.position.x - bot.position.x;
                        let dz = w.position.z - bot.position.z;
                        if dx * dx + dz * dz <= NEAR_DISTANCE_SQ {
                            return false;
                        }
                    }
                    true
                })
                .collect()
        };

        let mut candidates = filter(false);
        if candidates.is_empty() {
            candidates = filter(true);
        }
        if candidates.is_empty() {
            return None;
        }

        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
        let sample: Vec<&Waypoint> = candidates.iter().take(8).copied().collect();

        for wp in &sample {
            if !self.config.raycast_enabled
                || collision::is_path_clear(bot.position, wp.position, &self.scene.colliders, collision::DEFAULT_EPS)
            {
                return Some(Destination {
                    name: wp.name.clone(),
                    position: wp.position,
                });
            }
        }

        let wp = candidates[rng.gen_range(0..candidates.len())];
        Some(Destination {
            name: wp.name.clone(),
            position: wp.position,
        })
    }

    fn synthesize_wander_target(&self, bot: &BotRecord) -> Destination {
        let mut rng = rand::thread_rng();
        let angle: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
        let radius: f32 = rng.gen_range(0.8..2.0);
        let offset = glam::Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius);
        let pos = bot.home_position + offset;
        Destination {
            name: String::new(),
            position: glam::Vec3::new(pos.x, bot.position.y, pos.z),
        }
    }

    // -----------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------

    pub async fn handle_command(&mut self, bot_id: &str, command_type: &str, waypoint: Option<&str>) {
        if command_type != protocol::GO_TO_WAYPOINT {
            return;
        }
        if !self.bots.contains_key(bot_id) {
            return;
        }
        let now = self.timekeeper.now_ms();
        self.start_walking(bot_id, waypoint, now).await;
    }

    pub fn handle_hub_refresh(&mut self, user_data: &serde_json::Value) {
        let bots_value = user_data.get("bots").cloned().unwrap_or(serde_json::Value::Null);
        self.bots_config = BotsConfig::from_json(&bots_value, self.config.max_bots_per_room);
    }

    /// Seed the desired config from the join response's `user_data`, before
    /// any `hub_refresh` event arrives (the bot cohort must
    /// reflect a config set before the runner process existed).
    pub fn seed_bots_config(&mut self, bots_config: BotsConfig) {
        self.bots_config = bots_config;
    }

    pub async fn handle_presence_join(&mut self) {
        let ids: Vec<String> = self.bots.keys().cloned().collect();
        for id in ids {
            if let Some(bot) = self.bots.get(&id).cloned() {
                self.publish_create(&bot).await;
            }
        }
    }

    /// Snapshot of the currently live bots, keyed by bot id — a read seam for
    /// tests, mirroring `SupervisorState::health`'s snapshot accessor.
    pub fn bots(&self) -> &HashMap<String, BotRecord> {
        &self.bots
    }

    async fn shutdown_all(&mut self) {
        let ids: Vec<String> = self.bots.keys().cloned().collect();
        for id in ids {
            self.remove_bot(&id).await;
        }
        self.channel.leave().await;
    }

    // -----------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------

    async fn publish_create(&self, bot: &BotRecord) {
        // Full sync: if the bot has a live path (e.g. a late joiner arriving
        // mid-walk), carry it verbatim rather than a freeze snapshot — a
        // frozen Create would show the peer a static bot instead of the
        // in-flight segment everyone else sees.
        let path = match bot.path {
            Some(seg) => path_component_from_segment(&seg),
            None => freeze_path_component(bot.position, bot.last_owner_time_ms, bot.yaw_deg),
        };
        let avatar_id = self.avatars.assign(bot_index_of(&bot.bot_id) as usize);
        let info = InfoComponent {
            bot_id: bot.bot_id.clone(),
            avatar_id,
            display_name: bot.bot_id.clone(),
            is_bot: true,
        };
        let payload = protocol::create_payload(
            bot.network_id.clone(),
            self.owner.clone(),
            bot.last_owner_time_ms,
            path,
            info,
        );
        match serde_json::to_value(&payload) {
            Ok(value) => {
                if let Err(e) = self.channel.publish_naf(value).await {
                    warn!("publish create failed for {}: {}", bot.bot_id, e);
                }
            }
            Err(e) => warn!("failed to serialize create payload for {}: {}", bot.bot_id, e),
        }
    }

    async fn publish_update(&self, bot: &BotRecord) {
        let Some(seg) = bot.path else { return };
        let path = path_component_from_segment(&seg);
        let payload = protocol::update_payload(bot.network_id.clone(), self.owner.clone(), bot.last_owner_time_ms, path);
        match serde_json::to_value(&payload) {
            Ok(value) => {
                if let Err(e) = self.channel.publish_nafr(value).await {
                    warn!("publish update failed for {}: {}", bot.bot_id, e);
                }
            }
            Err(e) => warn!("failed to serialize update payload for {}: {}", bot.bot_id, e),
        }
    }

    async fn publish_remove(&self, network_id: &str) {
        let payload = protocol::remove_payload(network_id.to_string());
        match serde_json::to_value(&payload) {
            Ok(value) => {
                if let Err(e) = self.channel.publish_naf(value).await {
                    warn!("publish remove failed for {}: {}", network_id, e);
                }
            }
            Err(e) => warn!("failed to serialize remove payload for {}: {}", network_id, e),
        }
    }
}

fn bot_index_of(bot_id: &str) -> u32 {
    bot_id.strip_prefix("bot-").and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn normalize_deg(deg: f32) -> f32 {
    let wrapped = deg % 360.0;
    if wrapped < 0.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

fn separated_position(base: glam::Vec3, n: u32, already_placed: &[glam::Vec3]) -> glam::Vec3 {
    if n < 2 {
        return base;
    }
    let conflicts = already_placed
        .iter()
        .filter(|p| {
            let dx = p.x - base.x;
            let dz = p.z - base.z;
            dx * dx + dz * dz <= SEPARATION_DISTANCE_SQ
        })
        .count();
    if conflicts == 0 {
        return base;
    }
    let angle = (n as f32 - 1.0) * (std::f32::consts::PI / 3.0);
    let radius = 0.8 + conflicts.min(2) as f32 * 0.2;
    base + glam::Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius)
}

fn freeze_path_component(position: glam::Vec3, t0_ms: f64, yaw_deg: f32) -> PathComponent {
    PathComponent {
        sx: position.x,
        sy: position.y,
        sz: position.z,
        ex: position.x,
        ey: position.y,
        ez: position.z,
        t0: t0_ms,
        dur: 0.0,
        yaw0: yaw_deg,
        yaw1: yaw_deg,
    }
}

fn path_component_from_segment(seg: &Segment) -> PathComponent {
    PathComponent {
        sx: seg.start_pos.x,
        sy: seg.start_pos.y,
        sz: seg.start_pos.z,
        ex: seg.end_pos.x,
        ey: seg.end_pos.y,
        ez: seg.end_pos.z,
        t0: seg.t0_ms,
        dur: seg.duration_ms,
        yaw0: seg.yaw0_deg,
        yaw1: seg.yaw1_deg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_index_of_parses_suffix() {
        assert_eq!(bot_index_of("bot-7"), 7);
        assert_eq!(bot_index_of("bot-"), 0);
        assert_eq!(bot_index_of("nonsense"), 0);
    }

    #[test]
    fn normalize_deg_wraps_negative_angles() {
        assert!((normalize_deg(-90.0) - 270.0).abs() < 1e-6);
        assert!((normalize_deg(370.0) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn separated_position_is_noop_for_first_bot() {
        let base = glam::Vec3::new(1.0, 0.0, 1.0);
        assert_eq!(separated_position(base, 1, &[glam::Vec3::ZERO]), base);
    }

    #[test]
    fn separated_position_offsets_on_conflict() {
        let base = glam::Vec3::new(0.0, 0.0, 0.0);
        let placed = vec![glam::Vec3::new(0.1, 0.0, 0.1)];
        let out = separated_position(base, 2, &placed);
        assert_ne!(out, base);
    }

    #[test]
    fn separated_position_is_noop_with_empty_already_placed() {
        // Mirrors `startWalking`'s call with an empty set — always a no-op
        // regardless of n.
        let base = glam::Vec3::new(3.0, 0.0, 4.0);
        assert_eq!(separated_position(base, 5, &[]), base);
    }
}
