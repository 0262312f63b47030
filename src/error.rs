//! Error kinds for the ghost runner core.
//!
//! Transport-fatal variants abort the runner process (the supervisor
//! restarts it); the rest are caught at their call site and logged, per
//! the error handling design.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GhostRunnerError {
    #[error("glb response too small to contain a header")]
    GlbTooSmall,

    #[error("glb container is missing its JSON chunk")]
    GlbMissingJsonChunk,

    #[error("glb JSON chunk was truncated by a short fetch")]
    GlbIncompleteJsonChunk,

    #[error("gltf JSON chunk did not parse as valid JSON: {0}")]
    GltfInvalidJson(#[from] serde_json::Error),

    #[error("scene contained no usable nodes")]
    SceneEmpty,

    #[error("channel join response missing hubs[0] or session_id")]
    JoinFailed,

    #[error("realtime channel closed or errored: {0}")]
    TransportFatal(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GhostRunnerError>;
