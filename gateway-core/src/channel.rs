//! Channel registry: the in-memory, indexed snapshot of upstream provider
//! bindings the selector and resolver read from.
//!
//! Channels themselves are created and edited by an external admin plane;
//! this module only holds a read-optimized, refreshable snapshot keyed by
//! `(group, model)`, in the spirit of [`crate::providers::ProviderConfig`]
//! generalized from a flat provider-name map to a richer, priority-ordered
//! per-model index.

use std::collections::HashMap;
use std::sync::RwLock;

/// Whether dispatch may currently be attempted against a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Enabled,
    ManuallyDisabled,
    AutoDisabled,
}

/// An upstream provider binding.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    /// Integer tag identifying the provider family (openai, anthropic, ...).
    pub provider_type: u32,
    pub base_url: String,
    pub api_key: String,
    pub models: Vec<String>,
    pub groups: Vec<String>,
    /// Optional per-model rename, e.g. "gpt-4" -> "gpt-4-1106-preview".
    pub model_rename: HashMap<String, String>,
    pub priority: i32,
    pub weight: f64,
    pub status: ChannelStatus,
    /// Opaque provider-specific config (api version, deployment id, ...).
    pub extra_config: HashMap<String, String>,
}

impl Channel {
    /// Resolve the concrete model name this channel should be called with
    /// for a requested model, applying the rename map when present.
    pub fn actual_model_name(&self, requested: &str) -> String {
        self.model_rename
            .get(requested)
            .cloned()
            .unwrap_or_else(|| requested.to_string())
    }

    pub fn is_dispatchable(&self) -> bool {
        self.status == ChannelStatus::Enabled
    }
}

/// In-memory index over channels, keyed by `(group, model)`, with each
/// bucket sorted by descending priority as required by the data model
/// invariant. Refreshed wholesale by a sync ticker reading from the
/// external store; readers never block a refresh for longer than it takes
/// to swap an `Arc`.
#[derive(Default)]
pub struct ChannelRegistry {
    index: RwLock<HashMap<(String, String), Vec<Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire snapshot. Called by the sync ticker.
    pub fn replace_all(&self, channels: Vec<Channel>) {
        let mut index: HashMap<(String, String), Vec<Channel>> = HashMap::new();
        for channel in channels {
            for group in &channel.groups {
                for model in &channel.models {
                    index
                        .entry((group.clone(), model.clone()))
                        .or_default()
                        .push(channel.clone());
                }
            }
        }
        for bucket in index.values_mut() {
            bucket.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        *self.index.write().expect("channel registry lock poisoned") = index;
    }

    /// The candidate list for a `(group, model)` pair, sorted by descending
    /// priority. Empty when nothing serves that pair.
    pub fn candidates(&self, group: &str, model: &str) -> Vec<Channel> {
        self.index
            .read()
            .expect("channel registry lock poisoned")
            .get(&(group.to_string(), model.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Every channel in the group's group lists across any `(group, *)`
    /// bucket, deduplicated by id. Used by the virtual-model resolver, which
    /// scans every model a channel serves rather than one fixed pair.
    pub fn channels_for_group(&self, group: &str) -> Vec<Channel> {
        let index = self.index.read().expect("channel registry lock poisoned");
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for ((g, _model), channels) in index.iter() {
            if g != group {
                continue;
            }
            for channel in channels {
                if seen.insert(channel.id) {
                    out.push(channel.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_channel(id: i64, priority: i32, models: &[&str], groups: &[&str]) -> Channel {
        Channel {
            id,
            name: format!("channel-{id}"),
            provider_type: 1,
            base_url: "https://example.com".to_string(),
            api_key: "key".to_string(),
            models: models.iter().map(|s| s.to_string()).collect(),
            groups: groups.iter().map(|s| s.to_string()).collect(),
            model_rename: HashMap::new(),
            priority,
            weight: 1.0,
            status: ChannelStatus::Enabled,
            extra_config: HashMap::new(),
        }
    }

    #[test]
    fn candidates_sorted_by_descending_priority() {
        let registry = ChannelRegistry::new();
        registry.replace_all(vec![
            test_channel(1, 5, &["gpt-4"], &["default"]),
            test_channel(2, 10, &["gpt-4"], &["default"]),
            test_channel(3, 1, &["gpt-4"], &["default"]),
        ]);

        let candidates = registry.candidates("default", "gpt-4");
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].id, 2);
        assert_eq!(candidates[1].id, 1);
        assert_eq!(candidates[2].id, 3);
    }

    #[test]
    fn empty_pair_returns_empty_list() {
        let registry = ChannelRegistry::new();
        assert!(registry.candidates("default", "nonexistent").is_empty());
    }

    #[test]
    fn model_rename_applies_when_present() {
        let mut channel = test_channel(1, 0, &["gpt-4"], &["default"]);
        channel
            .model_rename
            .insert("gpt-4".to_string(), "gpt-4-1106-preview".to_string());

        assert_eq!(channel.actual_model_name("gpt-4"), "gpt-4-1106-preview");
        assert_eq!(channel.actual_model_name("gpt-3.5"), "gpt-3.5");
    }
}
