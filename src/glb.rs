//! GLB Fetcher / Parser (C2) – range-requests just enough of a binary glTF
//! container to recover its JSON chunk, expanding the request only as far
//! as needed.

use crate::error::{GhostRunnerError, Result};
use reqwest::StatusCode;
use serde_json::Value;

/// First range request: enough for the 12-byte GLB header, the first
/// chunk's 8-byte header, and (usually) the whole JSON chunk.
const INITIAL_RANGE_BYTES: usize = 256 * 1024;
/// Ceiling on how large a JSON chunk we'll fetch via a second ranged GET
/// before giving up and pulling the entire body.
const MAX_SECOND_RANGE_BYTES: usize = 2 * 1024 * 1024;

const GLB_MAGIC: &[u8; 4] = b"glTF";
const JSON_CHUNK_TYPE: u32 = 0x4E4F_534A;

struct RangedBody {
    bytes: Vec<u8>,
    /// `true` if the server honored the `Range` header (HTTP 206).
    ranged: bool,
}

async fn fetch_range(
    client: &reqwest::Client,
    url: &str,
    end_inclusive: usize,
) -> Result<RangedBody> {
    let resp = client
        .get(url)
        .header("Range", format!("bytes=0-{}", end_inclusive))
        .send()
        .await?
        .error_for_status()?;
    let ranged = resp.status() == StatusCode::PARTIAL_CONTENT;
    let bytes = resp.bytes().await?.to_vec();
    Ok(RangedBody { bytes, ranged })
}

async fn fetch_full(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let resp = client.get(url).send().await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

/// Fetch and parse the glTF JSON chunk of the scene model at `url`.
///
/// Implements a two-step ranged-GET fallback ladder: an initial small
/// range, then a second request for the exact remainder if the JSON chunk
/// didn't fit.
pub async fn fetch_scene_json(client: &reqwest::Client, url: &str) -> Result<Value> {
    let first = fetch_range(client, url, INITIAL_RANGE_BYTES - 1).await?;

    if first.bytes.len() < 20 {
        return Err(GhostRunnerError::GlbTooSmall);
    }

    if &first.bytes[0..4] != GLB_MAGIC {
        // Not a binary container — treat as a plain-text glTF JSON document.
        let body = if first.ranged {
            fetch_full(client, url).await?
        } else {
            first.bytes
        };
        return serde_json::from_slice(&body).map_err(GhostRunnerError::from);
    }

    let chunk_length = u32::from_le_bytes(first.bytes[12..16].try_into().unwrap()) as usize;
    let chunk_type = u32::from_le_bytes(first.bytes[16..20].try_into().unwrap());
    if chunk_type != JSON_CHUNK_TYPE {
        return Err(GhostRunnerError::GlbMissingJsonChunk);
    }

    let needed = 20 + chunk_length;
    if needed <= first.bytes.len() {
        return parse_json_chunk(&first.bytes, chunk_length);
    }

    if first.ranged && needed <= MAX_SECOND_RANGE_BYTES {
        let second = fetch_range(client, url, needed - 1).await?;
        if second.bytes.len() >= needed {
            return parse_json_chunk(&second.bytes, chunk_length);
        }
    }

    let full = fetch_full(client, url).await?;
    if full.len() < needed {
        return Err(GhostRunnerError::GlbIncompleteJsonChunk);
    }
    parse_json_chunk(&full, chunk_length)
}

fn parse_json_chunk(body: &[u8], chunk_length: usize) -> Result<Value> {
    let json_bytes = &body[20..20 + chunk_length];
    serde_json::from_slice(json_bytes).map_err(GhostRunnerError::from)
}
