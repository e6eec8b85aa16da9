use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

use parking_lot::Mutex;

/// A map split across independently locked stripes. A key always lands in
/// the same stripe, so one stripe lock covers everything about that key.
pub(crate) struct Stripes<K, V> {
    hasher: RandomState,
    stripes: Box<[Mutex<HashMap<K, V>>]>,
}

impl<K, V> Stripes<K, V> {
    /// `count` must be non-zero; callers validate before building.
    pub(crate) fn new(count: usize) -> Self {
        Self {
            hasher: RandomState::new(),
            stripes: (0..count.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Mutex<HashMap<K, V>>> {
        self.stripes.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.stripes.len()
    }
}

impl<K: Eq + Hash, V> Stripes<K, V> {
    pub(crate) fn for_key(&self, key: &K) -> &Mutex<HashMap<K, V>> {
        let index = (self.hasher.hash_one(key) % self.stripes.len() as u64) as usize;
        &self.stripes[index]
    }
}
