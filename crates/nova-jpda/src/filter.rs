//! Smart-stepping exclusion filters.
//!
//! Patterns are plain strings: `*suffix` matches class names ending with
//! `suffix`, `prefix*` matches names starting with `prefix`, anything else
//! must match exactly.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Whether `name` matches the exclusion `pattern`.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else {
        name == pattern
    }
}

/// A mutable set of class exclusion patterns.
pub trait ExclusionFilter: Send + Sync {
    fn exclusion_patterns(&self) -> Vec<String>;
    fn add_exclusion_patterns(&self, patterns: &[String]);
    fn remove_exclusion_patterns(&self, patterns: &[String]);

    fn is_excluded(&self, class_name: &str) -> bool {
        self.exclusion_patterns()
            .iter()
            .any(|pattern| matches_pattern(class_name, pattern))
    }
}

/// `false` (filtered out, do not stop) iff some pattern of `filter` matches
/// `class_name`.
pub fn stop_in_class(class_name: &str, filter: &dyn ExclusionFilter) -> bool {
    !filter.is_excluded(class_name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChange {
    Added(Vec<String>),
    Removed(Vec<String>),
}

/// Session-wide exclusion patterns, kept in insertion order.
pub struct SmartSteppingFilter {
    patterns: Mutex<Vec<String>>,
    changes: broadcast::Sender<FilterChange>,
}

impl SmartSteppingFilter {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            patterns: Mutex::new(Vec::new()),
            changes,
        }
    }

    pub fn with_patterns(patterns: &[String]) -> Self {
        let filter = Self::new();
        filter.add_exclusion_patterns(patterns);
        filter
    }

    /// Change notifications; only real changes are announced.
    pub fn subscribe(&self) -> broadcast::Receiver<FilterChange> {
        self.changes.subscribe()
    }
}

impl Default for SmartSteppingFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExclusionFilter for SmartSteppingFilter {
    fn exclusion_patterns(&self) -> Vec<String> {
        self.patterns.lock().clone()
    }

    fn add_exclusion_patterns(&self, patterns: &[String]) {
        let added: Vec<String> = {
            let mut current = self.patterns.lock();
            let mut added = Vec::new();
            for pattern in patterns {
                if !current.contains(pattern) {
                    current.push(pattern.clone());
                    added.push(pattern.clone());
                }
            }
            added
        };
        if !added.is_empty() {
            tracing::debug!(target: "nova.jpda.step", patterns = ?added, "exclusion patterns added");
            let _ = self.changes.send(FilterChange::Added(added));
        }
    }

    fn remove_exclusion_patterns(&self, patterns: &[String]) {
        let removed: Vec<String> = {
            let mut current = self.patterns.lock();
            let before = current.clone();
            current.retain(|p| !patterns.contains(p));
            before.into_iter().filter(|p| !current.contains(p)).collect()
        };
        if !removed.is_empty() {
            tracing::debug!(target: "nova.jpda.step", patterns = ?removed, "exclusion patterns removed");
            let _ = self.changes.send(FilterChange::Removed(removed));
        }
    }
}

#[derive(Default)]
struct Delta {
    added: Vec<String>,
    removed: Vec<String>,
    merged: Option<Vec<String>>,
}

/// Private, transient view of a delegate filter for one stepping operation.
///
/// Additions and removals are staged locally and merged with a snapshot of
/// the delegate the first time the patterns are queried. The delegate is
/// never mutated and no notifications are fired.
pub struct SmartSteppingFilterWrapper {
    delegate: Arc<dyn ExclusionFilter>,
    delta: Mutex<Delta>,
}

impl SmartSteppingFilterWrapper {
    pub fn new(delegate: Arc<dyn ExclusionFilter>) -> Self {
        Self {
            delegate,
            delta: Mutex::new(Delta::default()),
        }
    }
}

impl ExclusionFilter for SmartSteppingFilterWrapper {
    fn exclusion_patterns(&self) -> Vec<String> {
        let mut delta = self.delta.lock();
        if let Some(merged) = &delta.merged {
            return merged.clone();
        }
        let mut merged = self.delegate.exclusion_patterns();
        merged.retain(|p| !delta.removed.contains(p));
        for pattern in &delta.added {
            if !merged.contains(pattern) {
                merged.push(pattern.clone());
            }
        }
        delta.merged = Some(merged.clone());
        merged
    }

    fn add_exclusion_patterns(&self, patterns: &[String]) {
        let mut delta = self.delta.lock();
        for pattern in patterns {
            delta.removed.retain(|p| p != pattern);
            if !delta.added.contains(pattern) {
                delta.added.push(pattern.clone());
            }
            if let Some(merged) = delta.merged.as_mut() {
                if !merged.contains(pattern) {
                    merged.push(pattern.clone());
                }
            }
        }
    }

    fn remove_exclusion_patterns(&self, patterns: &[String]) {
        let mut delta = self.delta.lock();
        for pattern in patterns {
            delta.added.retain(|p| p != pattern);
            if !delta.removed.contains(pattern) {
                delta.removed.push(pattern.clone());
            }
            if let Some(merged) = delta.merged.as_mut() {
                merged.retain(|p| p != pattern);
            }
        }
    }
}
