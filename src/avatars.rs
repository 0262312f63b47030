//! Avatar Catalog (C5) – fetches featured-avatar listings and deterministically
//! assigns an avatar reference to each bot index.

use log::warn;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashSet;

const LISTING_PATH: &str = "/api/v1/media/search?source=avatar_listings&filter=featured";
const FULLBODY_TAGS: [&str; 2] = ["fullbody", "rpm"];

#[derive(Debug, Clone, Default)]
struct AvatarLists {
    all_refs: Vec<String>,
    fullbody_refs: Vec<String>,
}

pub struct AvatarCatalog {
    client: reqwest::Client,
    base_url: String,
    lists: RwLock<AvatarLists>,
    rotation_offset: u64,
}

impl AvatarCatalog {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            lists: RwLock::new(AvatarLists::default()),
            rotation_offset: rand::thread_rng().gen_range(0..1000),
        }
    }

    /// Refresh the catalog. Failures are logged and the previous lists are
    /// retained.
    pub async fn refresh(&self) {
        match self.fetch().await {
            Ok(lists) => {
                *self.lists.write() = lists;
            }
            Err(e) => {
                warn!("avatar catalog refresh failed, keeping previous values: {}", e);
            }
        }
    }

    async fn fetch(&self) -> reqwest::Result<AvatarLists> {
        let url = format!("{}{}", self.base_url, LISTING_PATH);
        let body: serde_json::Value = self.client.get(&url).send().await?.json().await?;

        let mut all_refs = Vec::new();
        let mut fullbody_refs = Vec::new();
        let mut seen_all = HashSet::new();
        let mut seen_fullbody = HashSet::new();

        if let Some(entries) = body.get("entries").and_then(|e| e.as_array()) {
            for entry in entries {
                let Some(avatar_ref) = entry
                    .get("gltfs")
                    .and_then(|g| g.get("avatar"))
                    .and_then(|a| a.as_str())
                else {
                    continue;
                };

                if seen_all.insert(avatar_ref.to_string()) {
                    all_refs.push(avatar_ref.to_string());
                }

                let is_fullbody = entry
                    .get("tags")
                    .and_then(|t| t.get("tags"))
                    .and_then(|t| t.as_array())
                    .map(|tags| {
                        tags.iter().any(|tag| {
                            tag.as_str().is_some_and(|s| {
                                let lower = s.to_lowercase();
                                FULLBODY_TAGS.iter().any(|f| *f == lower)
                            })
                        })
                    })
                    .unwrap_or(false);

                if is_fullbody && seen_fullbody.insert(avatar_ref.to_string()) {
                    fullbody_refs.push(avatar_ref.to_string());
                }
            }
        }

        Ok(AvatarLists {
            all_refs,
            fullbody_refs,
        })
    }

    /// Deterministically assign an avatar to `bot_index` (1-based).
    pub fn assign(&self, bot_index: usize) -> String {
        let lists = self.lists.read();
        let refs = if !lists.fullbody_refs.is_empty() {
            &lists.fullbody_refs
        } else {
            &lists.all_refs
        };
        if refs.is_empty() {
            return String::new();
        }
        let idx = (bot_index as u64 - 1 + self.rotation_offset) as usize % refs.len();
        refs[idx].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(all_refs: Vec<&str>, fullbody_refs: Vec<&str>, rotation_offset: u64) -> AvatarCatalog {
        AvatarCatalog {
            client: reqwest::Client::new(),
            base_url: "http://example.invalid".into(),
            lists: RwLock::new(AvatarLists {
                all_refs: all_refs.into_iter().map(String::from).collect(),
                fullbody_refs: fullbody_refs.into_iter().map(String::from).collect(),
            }),
            rotation_offset,
        }
    }

    #[test]
    fn assignment_prefers_fullbody_refs() {
        let cat = catalog_with(vec!["a", "b"], vec!["fb1", "fb2", "fb3"], 0);
        assert_eq!(cat.assign(1), "fb1");
        assert_eq!(cat.assign(2), "fb2");
        assert_eq!(cat.assign(3), "fb3");
        assert_eq!(cat.assign(4), "fb1");
    }

    #[test]
    fn assignment_falls_back_to_all_refs_when_no_fullbody() {
        let cat = catalog_with(vec!["a", "b"], vec![], 1);
        assert_eq!(cat.assign(1), "b");
        assert_eq!(cat.assign(2), "a");
    }

    #[test]
    fn empty_lists_yield_empty_string() {
        let cat = catalog_with(vec![], vec![], 5);
        assert_eq!(cat.assign(1), "");
    }
}
