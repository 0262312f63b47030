//! Core bot simulation data model.

use glam::Vec3;
use std::collections::{HashMap, HashSet};

// ---------------------------------------------------------------------------
// Mobility
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mobility {
    Low,
    Medium,
    High,
}

pub struct MobilityProfile {
    pub speed_mps: f32,
    pub idle_min_ms: f64,
    pub idle_max_ms: f64,
}

impl Mobility {
    pub fn profile(self) -> MobilityProfile {
        match self {
            Mobility::Low => MobilityProfile {
                speed_mps: 0.45,
                idle_min_ms: 8_000.0,
                idle_max_ms: 22_000.0,
            },
            Mobility::Medium => MobilityProfile {
                speed_mps: 0.75,
                idle_min_ms: 4_500.0,
                idle_max_ms: 14_000.0,
            },
            Mobility::High => MobilityProfile {
                speed_mps: 1.05,
                idle_min_ms: 2_500.0,
                idle_max_ms: 8_000.0,
            },
        }
    }

    /// `initial_idle(mobility)` from the per-mobility idle-duration table.
    pub fn initial_idle_ms(self, jitter_unit: f64) -> f64 {
        match self {
            Mobility::Low => 2_000.0 + jitter_unit * 3_000.0,
            Mobility::Medium => 1_200.0 + jitter_unit * 1_300.0,
            Mobility::High => 800.0 + jitter_unit * 1_000.0,
        }
    }

    pub fn parse(s: &str) -> Option<Mobility> {
        match s {
            "low" => Some(Mobility::Low),
            "medium" => Some(Mobility::Medium),
            "high" => Some(Mobility::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mobility::Low => "low",
            Mobility::Medium => "medium",
            Mobility::High => "high",
        }
    }
}

impl Default for Mobility {
    fn default() -> Self {
        Mobility::Medium
    }
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub start_pos: Vec3,
    pub end_pos: Vec3,
    pub t0_ms: f64,
    pub duration_ms: f64,
    pub yaw0_deg: f32,
    pub yaw1_deg: f32,
}

impl Segment {
    pub fn freeze(pos: Vec3, t0_ms: f64, yaw_deg: f32) -> Self {
        Self {
            start_pos: pos,
            end_pos: pos,
            t0_ms,
            duration_ms: 0.0,
            yaw0_deg: yaw_deg,
            yaw1_deg: yaw_deg,
        }
    }

    /// Position of this segment at `now_ms` ("Position
    /// integration".
    pub fn position_at(&self, now_ms: f64) -> Vec3 {
        let alpha = if self.duration_ms > 0.0 {
            ((now_ms - self.t0_ms) / self.duration_ms).clamp(0.0, 1.0)
        } else if now_ms <= self.t0_ms {
            0.0
        } else {
            1.0
        };
        self.start_pos + (self.end_pos - self.start_pos) * alpha
    }
}

// ---------------------------------------------------------------------------
// Bot state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Idle,
    Walk,
}

#[derive(Debug, Clone)]
pub struct Destination {
    pub name: String,
    pub position: Vec3,
}

#[derive(Debug, Clone)]
pub struct BotRecord {
    pub bot_id: String,
    pub network_id: String,
    pub last_owner_time_ms: f64,
    pub position: Vec3,
    pub home_position: Vec3,
    pub yaw_deg: f32,
    pub state: BotState,
    pub state_ends_at_ms: f64,
    pub mobility: Mobility,
    pub destination: Option<Destination>,
    pub reserved_target_name: Option<String>,
    pub path: Option<Segment>,
}

impl BotRecord {
    /// `network_id = "room-bot-<hub_sid>-<bot_id>"` — stable across restarts
    /// (invariant I5).
    pub fn network_id(hub_sid: &str, bot_id: &str) -> String {
        format!("room-bot-{}-{}", hub_sid, bot_id)
    }

    pub fn bot_id_for(index: usize) -> String {
        format!("bot-{}", index)
    }

    /// Update `position` from the current `path` at `now_ms` (invariant I3).
    pub fn sync_position(&mut self, now_ms: f64) {
        if let Some(path) = self.path {
            self.position = path.position_at(now_ms);
        }
    }
}

// ---------------------------------------------------------------------------
// Reservation index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ReservationIndex {
    owners: HashMap<String, String>,
}

impl ReservationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, waypoint_name: &str, bot_id: &str) {
        self.owners.insert(waypoint_name.to_string(), bot_id.to_string());
    }

    pub fn release_all_for(&mut self, bot_id: &str) {
        self.owners.retain(|_, owner| owner != bot_id);
    }

    pub fn release(&mut self, waypoint_name: &str) {
        self.owners.remove(waypoint_name);
    }

    pub fn is_reserved_by_other(&self, waypoint_name: &str, bot_id: &str) -> bool {
        self.owners
            .get(waypoint_name)
            .is_some_and(|owner| owner != bot_id)
    }

    pub fn owner_of(&self, waypoint_name: &str) -> Option<&str> {
        self.owners.get(waypoint_name).map(String::as_str)
    }

    pub fn reserved_names(&self) -> HashSet<String> {
        self.owners.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// BotsConfig
// ---------------------------------------------------------------------------

pub const MAX_BOTS_PER_ROOM_HARD_CAP: u32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct BotsConfig {
    pub enabled: bool,
    pub count: u32,
    pub mobility: Mobility,
    pub chat_enabled: bool,
}

impl Default for BotsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            count: 0,
            mobility: Mobility::Medium,
            chat_enabled: false,
        }
    }
}

impl BotsConfig {
    /// Parse (and clamp) a `user_data.bots`-shaped JSON value, treating
    /// `undefined`/missing fields as their default.
    pub fn from_json(value: &serde_json::Value, max_bots_per_room: u32) -> Self {
        let enabled = value.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false);
        let count = value
            .get("count")
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            .clamp(0, max_bots_per_room.min(MAX_BOTS_PER_ROOM_HARD_CAP) as i64) as u32;
        let mobility = value
            .get("mobility")
            .and_then(|v| v.as_str())
            .and_then(Mobility::parse)
            .unwrap_or_default();
        let chat_enabled = value
            .get("chat_enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Self {
            enabled,
            count,
            mobility,
            chat_enabled,
        }
    }

    /// Render back to the wire shape used in HTTP responses.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "enabled": self.enabled,
            "count": self.count,
            "mobility": self.mobility.as_str(),
            "chat_enabled": self.chat_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_interpolates_linearly() {
        let seg = Segment {
            start_pos: Vec3::ZERO,
            end_pos: Vec3::new(10.0, 0.0, 0.0),
            t0_ms: 1000.0,
            duration_ms: 1000.0,
            yaw0_deg: 0.0,
            yaw1_deg: 90.0,
        };
        let p = seg.position_at(1500.0);
        assert!((p.x - 5.0).abs() < 1e-6);
    }

    #[test]
    fn segment_clamps_before_and_after() {
        let seg = Segment {
            start_pos: Vec3::ZERO,
            end_pos: Vec3::new(10.0, 0.0, 0.0),
            t0_ms: 1000.0,
            duration_ms: 1000.0,
            yaw0_deg: 0.0,
            yaw1_deg: 90.0,
        };
        assert_eq!(seg.position_at(0.0), Vec3::ZERO);
        assert_eq!(seg.position_at(5000.0), Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn freeze_segment_has_zero_duration_and_equal_endpoints() {
        let seg = Segment::freeze(Vec3::new(1.0, 2.0, 3.0), 500.0, 45.0);
        assert_eq!(seg.start_pos, seg.end_pos);
        assert_eq!(seg.duration_ms, 0.0);
    }

    #[test]
    fn reservation_index_enforces_single_owner() {
        let mut idx = ReservationIndex::new();
        idx.reserve("wp-a", "bot-1");
        assert!(idx.is_reserved_by_other("wp-a", "bot-2"));
        assert!(!idx.is_reserved_by_other("wp-a", "bot-1"));
        idx.release_all_for("bot-1");
        assert!(!idx.is_reserved_by_other("wp-a", "bot-2"));
    }

    #[test]
    fn bots_config_clamps_count_and_defaults_mobility() {
        let v = serde_json::json!({"enabled": true, "count": 99});
        let cfg = BotsConfig::from_json(&v, 5);
        assert_eq!(cfg.count, 5);
        assert_eq!(cfg.mobility, Mobility::Medium);
    }

    #[test]
    fn network_id_is_pure_and_stable() {
        let a = BotRecord::network_id("abc123", "bot-1");
        let b = BotRecord::network_id("abc123", "bot-1");
        assert_eq!(a, b);
        assert_eq!(a, "room-bot-abc123-bot-1");
    }
}
