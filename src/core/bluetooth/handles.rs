//! Platform handle cache of the stack backend.
//!
//! Every advertisement hands out a fresh device handle. Handles are stamped
//! with the scan generation they were last seen in and aged out when a scan
//! ends, so the cache tracks the devices around rather than every device
//! ever heard. Pinned ids (connecting or connected) are never aged out.

use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub(crate) struct HandleCache<V> {
    entries: HashMap<String, (u64, V)>,
    pinned: HashSet<String>,
    generation: u64,
}

impl<V: Clone> HandleCache<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            pinned: HashSet::new(),
            generation: 0,
        }
    }

    pub fn get(&self, id: &str) -> Option<V> {
        self.entries.get(id).map(|(_, handle)| handle.clone())
    }

    /// Stores or refreshes the handle of `id` in the current generation
    pub fn insert(&mut self, id: impl Into<String>, handle: V) {
        self.entries.insert(id.into(), (self.generation, handle));
    }

    pub fn pin(&mut self, id: &str) {
        self.pinned.insert(id.to_string());
    }

    pub fn unpin(&mut self, id: &str) {
        self.pinned.remove(id);
    }

    /// Drops handles not refreshed since the previous call and not pinned,
    /// then opens a new generation. Returns how many were dropped.
    pub fn age_out(&mut self) -> usize {
        let before = self.entries.len();
        let generation = self.generation;
        let pinned = &self.pinned;
        self.entries
            .retain(|id, (seen, _)| *seen == generation || pinned.contains(id));
        self.generation += 1;
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
