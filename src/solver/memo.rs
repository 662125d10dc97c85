use rustc_hash::FxHashMap;

use std::hash::Hash;
use std::mem;

/// Bounded map that forgets the least recently used entries.
///
/// Entries live in two generations. New and recently read entries go to
/// `recent`; once it holds `capacity` entries it becomes `old` and the
/// previous `old` generation is dropped. Reading an entry from `old` moves
/// it back into `recent`. At most `2 * capacity` entries are kept and the
/// `capacity` most recently used ones are never dropped.
#[derive(Debug, Clone)]
pub struct MemoTable<K, V> {
    capacity: usize,
    recent: FxHashMap<K, V>,
    old: FxHashMap<K, V>,
}

impl<K: Hash + Eq, V> MemoTable<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            recent: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            old: FxHashMap::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.recent.len() + self.old.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.recent.contains_key(key) || self.old.contains_key(key)
    }

    /// Looks an entry up and marks it as recently used.
    pub fn get(&mut self, key: &K) -> Option<&mut V> {
        if self.recent.contains_key(key) {
            return self.recent.get_mut(key);
        }
        let (key, value) = self.old.remove_entry(key)?;
        self.rotate_if_full();
        Some(self.recent.entry(key).or_insert(value))
    }

    pub fn insert(&mut self, key: K, value: V) {
        if let Some(existing) = self.recent.get_mut(&key) {
            *existing = value;
            return;
        }
        self.old.remove(&key);
        self.rotate_if_full();
        self.recent.insert(key, value);
    }

    fn rotate_if_full(&mut self) {
        if self.recent.len() >= self.capacity {
            self.old = mem::take(&mut self.recent);
            self.recent.reserve(self.capacity);
        }
    }
}
