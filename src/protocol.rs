//! `naf`/`nafr` entity protocol (C6/C7 wire shapes).
//!
//! This module owns every message that crosses the channel boundary. The
//! one wrinkle is the wire format's dynamic numeric-string component keys
//! (`"0"`, `"1"`) — per DESIGN.md, those are represented only at the
//! serialization boundary via
//! a hand-written [`serde::Serialize`] impl on [`Components`]; everywhere
//! else in the simulator the typed [`PathComponent`]/[`InfoComponent`]
//! values are used directly.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

pub const TEMPLATE: &str = "#remote-bot-avatar";

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PathComponent {
    pub sx: f32,
    pub sy: f32,
    pub sz: f32,
    pub ex: f32,
    pub ey: f32,
    pub ez: f32,
    pub t0: f64,
    pub dur: f64,
    pub yaw0: f32,
    pub yaw1: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfoComponent {
    #[serde(rename = "botId")]
    pub bot_id: String,
    #[serde(rename = "avatarId")]
    pub avatar_id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "isBot")]
    pub is_bot: bool,
}

/// Slot-keyed component bag: `{"0": PathComponent, "1"?: InfoComponent}`.
#[derive(Debug, Clone)]
pub struct Components {
    pub path: PathComponent,
    pub info: Option<InfoComponent>,
}

impl Serialize for Components {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = if self.info.is_some() { 2 } else { 1 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("0", &self.path)?;
        if let Some(info) = &self.info {
            map.serialize_entry("1", info)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Outbound NAF payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CreateData {
    #[serde(rename = "networkId")]
    pub network_id: String,
    pub owner: String,
    pub creator: String,
    #[serde(rename = "lastOwnerTime")]
    pub last_owner_time: f64,
    pub template: &'static str,
    pub persistent: bool,
    pub parent: Option<String>,
    pub components: Components,
    #[serde(rename = "isFirstSync")]
    pub is_first_sync: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateData {
    #[serde(rename = "networkId")]
    pub network_id: String,
    pub owner: String,
    pub creator: String,
    #[serde(rename = "lastOwnerTime")]
    pub last_owner_time: f64,
    pub template: &'static str,
    pub persistent: bool,
    pub parent: Option<String>,
    pub components: Components,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveData {
    #[serde(rename = "networkId")]
    pub network_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NafEnvelope<D> {
    #[serde(rename = "dataType")]
    pub data_type: &'static str,
    pub data: D,
}

pub fn create_payload(
    network_id: String,
    owner: String,
    last_owner_time: f64,
    path: PathComponent,
    info: InfoComponent,
) -> NafEnvelope<CreateData> {
    NafEnvelope {
        data_type: "u",
        data: CreateData {
            creator: owner.clone(),
            network_id,
            owner,
            last_owner_time,
            template: TEMPLATE,
            persistent: false,
            parent: None,
            components: Components {
                path,
                info: Some(info),
            },
            is_first_sync: true,
        },
    }
}

pub fn update_payload(
    network_id: String,
    owner: String,
    last_owner_time: f64,
    path: PathComponent,
) -> NafEnvelope<UpdateData> {
    NafEnvelope {
        data_type: "u",
        data: UpdateData {
            creator: owner.clone(),
            network_id,
            owner,
            last_owner_time,
            template: TEMPLATE,
            persistent: false,
            parent: None,
            components: Components { path, info: None },
        },
    }
}

pub fn remove_payload(network_id: String) -> NafEnvelope<RemoveData> {
    NafEnvelope {
        data_type: "r",
        data: RemoveData { network_id },
    }
}

// ---------------------------------------------------------------------------
// Inbound channel events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BotCommandBody {
    pub bot_id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub waypoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotCommandMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub body: BotCommandBody,
}

pub const GO_TO_WAYPOINT: &str = "go_to_waypoint";
pub const BOT_COMMAND: &str = "bot_command";

#[derive(Debug, Clone, Deserialize)]
pub struct HubRefreshEvent {
    pub hubs: Vec<HubRefreshEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubRefreshEntry {
    pub user_data: Option<serde_json::Value>,
}
