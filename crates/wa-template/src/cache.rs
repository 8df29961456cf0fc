//! Parse cache (component C support, `spec.md` §4.C/§9).
//!
//! An in-process, capacity-bounded LRU cache from raw template text to its
//! parsed [`Template`]. Concurrent lookups for *different* keys never block
//! each other; concurrent lookups for the *same* missing key only parse it
//! once (single-writer-per-key, avoiding a cache stampede under bursty
//! campaign dispatch).

use crate::parser;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use wa_core::template::Template;

struct CacheState {
    map: HashMap<String, Arc<OnceLock<Arc<Template>>>>,
    /// Least-recently-used key at the front, most-recently-used at the back.
    order: VecDeque<String>,
}

/// Bounded, thread-safe parse cache.
pub struct ParseCache {
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ParseCache {
    /// Create a cache holding at most `capacity` parsed templates.
    /// `capacity` is clamped to at least 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `raw`'s parsed [`Template`], parsing and inserting it if
    /// absent.
    #[must_use]
    pub fn get_or_parse(&self, raw: &str) -> Arc<Template> {
        let slot = {
            let mut state = self.state.lock().expect("parse cache lock poisoned");
            if let Some(slot) = state.map.get(raw).cloned() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                touch(&mut state.order, raw);
                slot
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let slot = Arc::new(OnceLock::new());
                state.map.insert(raw.to_string(), slot.clone());
                state.order.push_back(raw.to_string());
                evict_if_over_capacity(&mut state, self.capacity);
                slot
            }
        };
        // Parsing happens outside the cache-wide lock; the per-key OnceLock
        // guarantees at most one writer computes this entry.
        slot.get_or_init(|| Arc::new(parser::parse(raw))).clone()
    }

    /// Number of successful lookups that found an already-parsed entry.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of lookups that required parsing.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Current number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("parse cache lock poisoned").map.len()
    }

    /// `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn touch(order: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        if let Some(k) = order.remove(pos) {
            order.push_back(k);
        }
    }
}

fn evict_if_over_capacity(state: &mut CacheState, capacity: usize) {
    while state.map.len() > capacity {
        if let Some(oldest) = state.order.pop_front() {
            state.map.remove(&oldest);
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_repeated_lookups() {
        let cache = ParseCache::new(10);
        let a = cache.get_or_parse("Hi|Hello {{name}}");
        let b = cache.get_or_parse("Hi|Hello {{name}}");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = ParseCache::new(2);
        cache.get_or_parse("one");
        cache.get_or_parse("two");
        cache.get_or_parse("three");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.misses(), 3);
        // "one" should have been evicted; re-fetching it is a miss again.
        cache.get_or_parse("one");
        assert_eq!(cache.misses(), 4);
    }

    #[test]
    fn touching_an_entry_protects_it_from_eviction() {
        let cache = ParseCache::new(2);
        cache.get_or_parse("one");
        cache.get_or_parse("two");
        cache.get_or_parse("one"); // touch -> "two" becomes LRU
        cache.get_or_parse("three"); // evicts "two", not "one"
        assert_eq!(cache.misses(), 3);
        cache.get_or_parse("one");
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn capacity_is_clamped_to_at_least_one() {
        let cache = ParseCache::new(0);
        cache.get_or_parse("a");
        cache.get_or_parse("b");
        assert_eq!(cache.len(), 1);
    }
}
