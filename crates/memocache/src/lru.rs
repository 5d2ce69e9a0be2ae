//! LRU (Least Recently Used) entry table
//!
//! Hash map over an index-linked list for O(1) recency refresh and eviction.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

/// Node in the recency doubly-linked list
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Entry table with an LRU recency order.
///
/// The list head is the most recently used entry, the tail the least
/// recently used. Capacity `0` disables eviction entirely (unbounded).
///
/// Not synchronized; the owning cache serializes access.
pub(crate) struct LruCache<K, V, S> {
    map: HashMap<K, usize, S>,
    nodes: Vec<Option<Node<K, V>>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_list: Vec<usize>,
    capacity: usize,
}

impl<K, V, S> LruCache<K, V, S>
where
    K: Hash + Eq + Clone,
    S: BuildHasher,
{
    /// Create an entry table with the given capacity (`0` = unbounded).
    pub(crate) fn with_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(capacity, hasher),
            nodes: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            free_list: Vec::new(),
            capacity,
        }
    }

    /// Get a value, refreshing its recency.
    pub(crate) fn get(&mut self, key: &K) -> Option<&V> {
        if let Some(&idx) = self.map.get(key) {
            self.move_to_front(idx);
            self.nodes[idx].as_ref().map(|node| &node.value)
        } else {
            None
        }
    }

    /// Get a value without touching the recency order.
    pub(crate) fn peek(&self, key: &K) -> Option<&V> {
        let &idx = self.map.get(key)?;
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    /// Insert or overwrite a key-value pair, refreshing its recency.
    ///
    /// Returns the number of entries evicted to stay within capacity. The
    /// entry being inserted is never the victim: eviction happens before the
    /// new node is linked in.
    pub(crate) fn insert(&mut self, key: K, value: V) -> usize {
        if let Some(&idx) = self.map.get(&key) {
            // Overwrite existing; size is unchanged, nothing to evict
            if let Some(node) = &mut self.nodes[idx] {
                node.value = value;
            }
            self.move_to_front(idx);
            return 0;
        }

        let mut evicted = 0;
        while self.capacity != 0 && self.map.len() >= self.capacity {
            if !self.evict_one() {
                break;
            }
            evicted += 1;
        }

        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            key: key.clone(),
            value,
            prev: None,
            next: self.head,
        });

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }

        self.map.insert(key, idx);
        evicted
    }

    /// Change the capacity bound (`0` = unbounded).
    ///
    /// Shrinking below the current size evicts least-recently-used entries
    /// until the table fits. Returns the number of entries evicted.
    pub(crate) fn set_capacity(&mut self, capacity: usize) -> usize {
        self.capacity = capacity;
        let mut evicted = 0;
        while self.capacity != 0 && self.map.len() > self.capacity {
            if !self.evict_one() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    /// Get the current number of entries
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the table is empty
    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Get the capacity bound (`0` = unbounded)
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over keys, most recently used first
    pub(crate) fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        let mut next = self.head;
        std::iter::from_fn(move || {
            let idx = next?;
            let node = self.nodes[idx].as_ref()?;
            next = node.next;
            Some(&node.key)
        })
    }

    /// Remove all entries, keeping the capacity bound
    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return; // Already at front
        }

        self.unlink(idx);

        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = self.head;
        }

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = if let Some(node) = &self.nodes[idx] {
            (node.prev, node.next)
        } else {
            return;
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => {
                self.head = next;
            }
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => {
                self.tail = prev;
            }
        }
    }

    /// Remove the least-recently-used entry. Returns false on an empty table.
    fn evict_one(&mut self) -> bool {
        let tail_idx = match self.tail {
            Some(idx) => idx,
            None => return false,
        };

        self.unlink(tail_idx);
        if let Some(node) = self.nodes[tail_idx].take() {
            self.map.remove(&node.key);
            self.free_node(tail_idx);
            true
        } else {
            false
        }
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(None);
            idx
        }
    }

    fn free_node(&mut self, idx: usize) {
        self.free_list.push(idx);
    }
}
