//! Submission dedup cache keyed by a (type, params) fingerprint.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use super::model::TaskType;

/// Build the dedup key for a submission.
///
/// Works on a copy of `params`: commutative types sort the copy so that
/// permutations collapse onto one key, order-sensitive types keep it as given.
/// The caller's params are never reordered.
pub fn fingerprint(task_type: TaskType, params: &[f64]) -> String {
    let mut key_params = params.to_vec();
    if task_type.is_commutative() {
        key_params.sort_by(f64::total_cmp);
    }
    let joined = key_params
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{}:[{}]", task_type.as_str(), joined)
}

/// Unbounded fingerprint → task id map. Entries are never evicted.
///
/// A hit is only a hint: callers re-validate the id against the store before
/// trusting it.
#[derive(Default)]
pub struct DedupCache {
    entries: RwLock<HashMap<String, String>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the task id previously registered for this submission.
    pub async fn get(&self, task_type: TaskType, params: &[f64]) -> Option<String> {
        let key = fingerprint(task_type, params);
        self.entries.read().await.get(&key).cloned()
    }

    /// Register (or overwrite) the task id for this submission.
    pub async fn set(&self, task_type: TaskType, params: &[f64], task_id: impl Into<String>) {
        let key = fingerprint(task_type, params);
        let task_id = task_id.into();
        debug!(key = %key, task_id = %task_id, "Dedup entry set");
        self.entries.write().await.insert(key, task_id);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
