//! Subscription index (subject pattern -> subscriber keys)
//!
//! Design:
//! - Literal patterns live in a hash map: delivery to a literal subject is
//!   an O(1) lookup, which is the hot path for inboxes and circuit traffic.
//! - Wildcard patterns live in a Vec sorted by pattern and are scanned.
//!   Wildcard subscriptions are few (advisories, monitors) in practice.
//! - `match_subject` returns a `SmallVec` of keys to avoid heap allocation in
//!   the common case, deduplicated because one subscriber may hold
//!   overlapping patterns.

use crate::subject::{pattern_matches, Subject};
use hashbrown::HashMap;
use smallvec::SmallVec;

/// Compact integer ID for a subscriber.
pub type SubscriberKey = u64;

type Keys = SmallVec<[SubscriberKey; 4]>;

#[derive(Debug, Clone)]
struct WildcardEntry {
    pattern: Subject,
    keys: Keys,
}

#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    literal: HashMap<Subject, Keys>,
    wildcard: Vec<WildcardEntry>,
}

impl SubscriptionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.literal.is_empty() && self.wildcard.is_empty()
    }

    /// Number of distinct patterns with at least one subscriber.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.literal.len() + self.wildcard.len()
    }

    /// Adds `key` to `pattern`. Returns true if the key was not yet present.
    pub fn subscribe(&mut self, key: SubscriberKey, pattern: Subject) -> bool {
        if pattern.is_pattern() {
            match self
                .wildcard
                .binary_search_by(|e| e.pattern.cmp(&pattern))
            {
                Ok(idx) => {
                    let keys = &mut self.wildcard[idx].keys;
                    if keys.contains(&key) {
                        return false;
                    }
                    keys.push(key);
                    true
                }
                Err(idx) => {
                    let mut keys = Keys::new();
                    keys.push(key);
                    self.wildcard.insert(idx, WildcardEntry { pattern, keys });
                    true
                }
            }
        } else {
            let keys = self.literal.entry(pattern).or_default();
            if keys.contains(&key) {
                return false;
            }
            keys.push(key);
            true
        }
    }

    /// Removes `key` from `pattern`. Returns true if it was present.
    pub fn unsubscribe(&mut self, key: SubscriberKey, pattern: &Subject) -> bool {
        if pattern.is_pattern() {
            let Ok(idx) = self.wildcard.binary_search_by(|e| e.pattern.cmp(pattern)) else {
                return false;
            };
            let keys = &mut self.wildcard[idx].keys;
            let removed = remove_key(keys, key);
            if keys.is_empty() {
                self.wildcard.remove(idx);
            }
            removed
        } else {
            let Some(keys) = self.literal.get_mut(pattern) else {
                return false;
            };
            let removed = remove_key(keys, key);
            if keys.is_empty() {
                self.literal.remove(pattern);
            }
            removed
        }
    }

    /// Remove `key` from every pattern (used on peer loss).
    pub fn remove_key_everywhere(&mut self, key: SubscriberKey) {
        self.literal.retain(|_, keys| {
            remove_key(keys, key);
            !keys.is_empty()
        });
        self.wildcard.retain_mut(|entry| {
            remove_key(&mut entry.keys, key);
            !entry.keys.is_empty()
        });
    }

    /// Match a literal subject against all subscriptions.
    ///
    /// Returns a deduplicated list of keys.
    #[must_use]
    pub fn match_subject(&self, subject: &Subject) -> SmallVec<[SubscriberKey; 16]> {
        let mut out: SmallVec<[SubscriberKey; 16]> = SmallVec::new();

        if let Some(keys) = self.literal.get(subject) {
            out.extend_from_slice(keys);
        }

        for entry in &self.wildcard {
            if pattern_matches(entry.pattern.as_str(), subject.as_str()) {
                out.extend_from_slice(&entry.keys);
            }
        }

        if out.len() > 1 {
            out.sort_unstable();
            out.dedup();
        }

        out
    }
}

fn remove_key(keys: &mut Keys, key: SubscriberKey) -> bool {
    if let Some(pos) = keys.iter().position(|k| *k == key) {
        keys.swap_remove(pos);
        true
    } else {
        false
    }
}
