//! Flat key-value context store rendered into prompts.
//!
//! Entries keep insertion order. Step entries are keyed by node id so they
//! can be pruned when the plan rewinds over those nodes.

use std::fmt;

use tracing::debug;

use crate::core::node_id::NodeId;

/// Key of a context entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContextKey {
    /// Latest result of a node (`Previous Step B`).
    PreviousStep(NodeId),
    /// A rejected attempt of a node (`Previous Step B Failed Attempt 2`).
    FailedAttempt(NodeId, u32),
    /// Caller-supplied entry.
    Custom(String),
}

impl ContextKey {
    /// Node id the entry was recorded for, if any.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            ContextKey::PreviousStep(id) | ContextKey::FailedAttempt(id, _) => Some(id),
            ContextKey::Custom(_) => None,
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKey::PreviousStep(id) => write!(f, "Previous Step {id}"),
            ContextKey::FailedAttempt(id, attempt) => {
                write!(f, "Previous Step {id} Failed Attempt {attempt}")
            }
            ContextKey::Custom(key) => f.write_str(key),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ContextStore {
    entries: Vec<(ContextKey, String)>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an entry. Overwrites keep the original position.
    pub fn add(&mut self, key: ContextKey, text: impl Into<String>) {
        let text = text.into();
        debug!(key = %key, "add context entry");
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = text,
            None => self.entries.push((key, text)),
        }
    }

    pub fn remove(&mut self, key: &ContextKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        let removed = self.entries.len() != before;
        if removed {
            debug!(key = %key, "remove context entry");
        }
        removed
    }

    pub fn get(&self, key: &ContextKey) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &ContextKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the failed-attempt entries of `id` and of any node below it.
    pub fn clear_failed_attempts(&mut self, id: &NodeId) -> Vec<ContextKey> {
        self.remove_where(|key| {
            matches!(key, ContextKey::FailedAttempt(node, _) if node == id || node.is_descendant_of(id))
        })
    }

    /// Drop every step entry whose node id lies in the range spanned by `a` and `b`.
    pub fn prune_range(&mut self, a: &NodeId, b: &NodeId) -> Vec<ContextKey> {
        self.remove_where(|key| key.node_id().is_some_and(|id| id.in_range(a, b)))
    }

    fn remove_where<F: Fn(&ContextKey) -> bool>(&mut self, pred: F) -> Vec<ContextKey> {
        let mut removed = Vec::new();
        self.entries.retain(|(key, _)| {
            if pred(key) {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        for key in &removed {
            debug!(key = %key, "prune context entry");
        }
        removed
    }

    /// Render all entries as a `<Context>` block; empty store renders as "".
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let mut buf = String::from("<Context>\n");
        for (key, value) in &self.entries {
            buf.push_str(&format!("<{key}>\n{}\n</{key}>\n", value.trim()));
        }
        buf.push_str("</Context>\n");
        buf
    }
}
