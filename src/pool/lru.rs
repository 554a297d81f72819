//! Bounded LRU map.
//!
//! Implemented as a `HashMap` paired with a `VecDeque` recency list rather
//! than an actual intrusive linked list — functionally equivalent for the
//! sizes this pool deals with, and far simpler
//! to reason about under the single-mutex discipline requires.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

pub struct LruMap<K, V> {
    entries: HashMap<K, V>,
    /// Front = most recently used, back = least recently used.
    order: VecDeque<K>,
    max_size: usize,
}

impl<K, V> LruMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_size,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Move `key` to the front of the recency list. No-op if absent.
    pub fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).expect("position just found");
            self.order.push_front(k);
        }
    }

    /// Insert or replace `key`. If `key` is new and the map is already at
    /// `max_size`, the least-recently-used entry is evicted and returned.
    /// Replacing an existing key's value is never itself an eviction.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        let mut evicted = None;
        if self.entries.contains_key(&key) {
            if let Some(pos) = self.order.iter().position(|k| k == &key) {
                self.order.remove(pos);
            }
        } else if self.entries.len() >= self.max_size {
            if let Some(victim_key) = self.order.pop_back() {
                if let Some(victim_val) = self.entries.remove(&victim_key) {
                    evicted = Some((victim_key, victim_val));
                }
            }
        }
        self.entries.insert(key.clone(), value);
        self.order.push_front(key);
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }
}
