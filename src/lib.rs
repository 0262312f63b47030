//! Ghost Runner core library.
//!
//! A headless participant that joins a realtime multi-user 3D room and
//! animates a small cohort of synthetic avatars inside it.
//!
//! ## Architecture
//!
//! ```text
//! BotSimulator   (simulator.rs)   ← per-room state machine, 100ms tick
//!   ├── ChannelClient (channel.rs)    ← join/publish/inbound events
//!   ├── SceneMap      (scene.rs)      ← waypoints + colliders, built from
//!   │     └── glb::fetch_scene_json (glb.rs)  ← partial GLB download/parse
//!   ├── Collision Oracle (collision.rs) ← line-of-sight queries against SceneMap
//!   ├── AvatarCatalog (avatars.rs)    ← featured-avatar listing + assignment
//!   └── Timekeeper    (time.rs)       ← server-clock estimate
//!
//! Supervisor     (supervisor/)    ← admits rooms, spawns/restarts runner
//!                                    child processes, FIFO queue on overflow
//! ```
//!
//! The two binaries in `src/bin/` wire these together: `runner.rs` is the
//! per-room Ghost Runner process; `supervisor.rs` is the long-lived
//! orchestrator HTTP service.

pub mod avatars;
pub mod channel;
pub mod collision;
pub mod config;
pub mod error;
pub mod glb;
pub mod protocol;
pub mod scene;
pub mod simulator;
pub mod supervisor;
pub mod time;
pub mod types;

pub use error::{GhostRunnerError, Result};
