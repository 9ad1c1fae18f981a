use indexmap::IndexMap;
use serde::Serialize;

/// Diagnostic view of a topic store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSnapshot {
    /// History length per topic, in first-publish order. Only topics with entries.
    pub queue: IndexMap<String, usize>,
    /// Topics someone waits on that have not been published yet.
    pub pending: Vec<String>,
}

impl StoreSnapshot {
    /// Queue counts as compact JSON, e.g. `{"foo":1}`.
    pub fn queue_json(&self) -> String {
        serde_json::to_string(&self.queue).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn is_pending(&self, topic: &str) -> bool {
        self.pending.iter().any(|t| t == topic)
    }
}
