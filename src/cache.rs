use std::collections::HashMap;
use std::hash::Hash;

pub const DEFAULT_CAPACITY: usize = 50;

/// Lookup cache that is emptied as a whole once it holds `capacity` entries.
///
/// The reset happens at the start of a lookup round, so a single round may
/// push the cache past its capacity; the next round starts from scratch.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
        }
    }

    /// Empties the cache if it's full. Returns `true` when it did.
    pub fn reset_if_full(&mut self) -> bool {
        if self.entries.len() >= self.capacity {
            self.entries.clear();
            true
        } else {
            false
        }
    }

    /// Splits `keys` into cached values and deduplicated misses.
    pub fn lookup<I>(&self, keys: I) -> (HashMap<K, V>, Vec<K>)
    where
        I: IntoIterator<Item = K>,
    {
        let mut hits = HashMap::new();
        let mut misses = Vec::new();
        for key in keys {
            if hits.contains_key(&key) || misses.contains(&key) {
                continue;
            }
            match self.entries.get(&key) {
                Some(v) => {
                    hits.insert(key, v.clone());
                }
                None => misses.push(key),
            }
        }
        (hits, misses)
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
