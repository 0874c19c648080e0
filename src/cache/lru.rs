use std::hash::Hash;

use rustc_hash::{FxBuildHasher, FxHashMap};

/// Marker for "no neighbour" in the intrusive list.
const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// A bounded associative cache with least-recently-used eviction.
///
/// Entries live in a slab of nodes that are linked into a doubly linked list
/// (most recently used at the head). A hash index maps keys to slab slots, so
/// lookup, insertion, promotion and eviction are all O(1).
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    index: FxHashMap<K, usize>,
    nodes: Vec<Node<K, V>>,
    head: usize,
    tail: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty cache holding at most `capacity` entries.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LRU cache capacity must be positive");
        Self {
            capacity,
            index: FxHashMap::with_capacity_and_hasher(capacity, FxBuildHasher),
            nodes: Vec::with_capacity(capacity),
            head: NIL,
            tail: NIL,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the value for `key` and marks it as most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.promote(slot);
        Some(&self.nodes[slot].value)
    }

    /// Returns the value for `key` without changing the recency order.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&slot| &self.nodes[slot].value)
    }

    /// Inserts `value` under `key` as the most recently used entry. If the
    /// cache is full, the least recently used entry is removed and returned.
    /// Replacing an existing key never evicts.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            self.nodes[slot].value = value;
            self.promote(slot);
            return None;
        }

        let evicted = if self.nodes.len() == self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let slot = self.nodes.len();
        self.nodes.push(Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        });
        self.push_front(slot);
        self.index.insert(key, slot);
        evicted
    }

    /// Removes `key` from the cache, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        Some(self.remove_slot(slot).1)
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let slot = self.tail;
        self.index.remove(&self.nodes[slot].key);
        Some(self.remove_slot(slot))
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            if cursor == NIL {
                return None;
            }
            let node = &self.nodes[cursor];
            cursor = node.next;
            Some(&node.key)
        })
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }
        self.nodes[slot].prev = NIL;
        self.nodes[slot].next = NIL;
    }

    fn push_front(&mut self, slot: usize) {
        self.nodes[slot].prev = NIL;
        self.nodes[slot].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn promote(&mut self, slot: usize) {
        if self.head != slot {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    /// Unlinks `slot` and removes it from the slab. The last node is moved into
    /// the hole, so its links and index entry are patched. The index entry of
    /// `slot` itself must already be gone.
    fn remove_slot(&mut self, slot: usize) -> (K, V) {
        self.unlink(slot);
        let last = self.nodes.len() - 1;
        if slot != last {
            let (prev, next) = (self.nodes[last].prev, self.nodes[last].next);
            if prev == NIL {
                self.head = slot;
            } else {
                self.nodes[prev].next = slot;
            }
            if next == NIL {
                self.tail = slot;
            } else {
                self.nodes[next].prev = slot;
            }
            if let Some(entry) = self.index.get_mut(&self.nodes[last].key) {
                *entry = slot;
            }
        }
        let node = self.nodes.swap_remove(slot);
        (node.key, node.value)
    }
}
