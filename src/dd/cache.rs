//! Content-based verdict cache.
//!
//! Candidates are keyed by the sha256 of their unparsed text, so a verdict
//! survives level changes and HDD* iterations: the same bytes always mean
//! the same outcome for a pure oracle. The cache is bounded; the least
//! recently used entry is evicted on overflow.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::oracle::Verdict;

pub type ContentKey = [u8; 32];

pub fn content_key(text: &str) -> ContentKey {
    Sha256::digest(text.as_bytes()).into()
}

#[derive(Debug)]
pub struct OutcomeCache {
    entries: HashMap<ContentKey, (Verdict, u64)>,
    capacity: usize,
    clock: u64,
}

impl OutcomeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            clock: 0,
        }
    }

    pub fn get(&mut self, key: &ContentKey) -> Option<Verdict> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|(verdict, used)| {
            *used = clock;
            *verdict
        })
    }

    pub fn insert(&mut self, key: ContentKey, verdict: Verdict) {
        if self.capacity == 0 {
            return;
        }
        self.clock += 1;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| *k);
            if let Some(victim) = victim {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(key, (verdict, self.clock));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
