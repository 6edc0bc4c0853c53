//! Byte-budgeted LRU store
//!
//! Single-threaded eviction store used by every cache tier. Entries live
//! in a slot arena threaded into a doubly linked recency list; a hash index
//! maps keys to their slot.
//!
//! ```text
//!   head ──► [D] ◄──► [A] ◄──► [B] ◄── tail
//!            MRU                LRU
//! ```
//!
//! The size of an entry is read once, through [`Value::len`], when it is
//! added. Values must not change size behind the store's back.

use std::collections::HashMap;
use std::fmt;

use super::Value;

/// Callback fired for every entry pushed out by [`LruCache::remove_oldest`]
/// or by capacity eviction.
pub type OnEvicted<V> = Box<dyn FnMut(&str, &V) + Send>;

struct Node<V> {
    key: String,
    value: V,
    size: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Least-recently-used store bounded by total value bytes
pub struct LruCache<V> {
    /// Byte budget; 0 means unbounded
    max_bytes: u64,
    /// Sum of the sizes of all resident entries
    nbytes: u64,
    slots: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<String, usize>,
    on_evicted: Option<OnEvicted<V>>,
}

impl<V: Value> LruCache<V> {
    /// Create a store holding at most `max_bytes` of values.
    ///
    /// A budget of 0 disables eviction entirely; see [`LruCache::unbounded`].
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            nbytes: 0,
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
            on_evicted: None,
        }
    }

    /// Create a store that never evicts
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Attach an eviction callback
    pub fn with_on_evicted(mut self, f: OnEvicted<V>) -> Self {
        self.on_evicted = Some(f);
        self
    }

    /// Insert or replace `key`, marking it most recently used, then evict
    /// from the cold end until the budget holds again.
    ///
    /// An entry larger than the whole budget is still admitted; it pushes
    /// everything else out and stays as the sole resident.
    pub fn add(&mut self, key: &str, value: V) {
        let size = value.len() as u64;

        if let Some(&idx) = self.index.get(key) {
            if let Some(node) = self.slots[idx].as_mut() {
                self.nbytes = self.nbytes + size - node.size;
                node.size = size;
                node.value = value;
            }
            self.detach(idx);
            self.attach_front(idx);
        } else {
            let idx = self.alloc(Node {
                key: key.to_owned(),
                value,
                size,
                prev: None,
                next: None,
            });
            self.attach_front(idx);
            self.index.insert(key.to_owned(), idx);
            self.nbytes += size;
        }

        while self.max_bytes != 0 && self.nbytes > self.max_bytes && self.index.len() > 1 {
            self.remove_oldest();
        }
    }

    /// Look up `key`, promoting it to most recently used on a hit
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.detach(idx);
        self.attach_front(idx);
        self.slots[idx].as_ref().map(|node| &node.value)
    }

    /// Check residency without touching recency
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Remove `key` without firing the eviction callback
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.detach(idx);
        let node = self.release(idx)?;
        self.nbytes -= node.size;
        Some(node.value)
    }

    /// Evict the least recently used entry
    pub fn remove_oldest(&mut self) -> Option<(String, V)> {
        let idx = self.tail?;
        self.detach(idx);
        let node = self.release(idx)?;
        self.index.remove(&node.key);
        self.nbytes -= node.size;

        if let Some(cb) = self.on_evicted.as_mut() {
            cb(&node.key, &node.value);
        }
        Some((node.key, node.value))
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when nothing is resident
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes currently accounted to resident entries
    pub fn bytes(&self) -> u64 {
        self.nbytes
    }

    /// Configured byte budget (0 = unbounded)
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            match self.slots[idx].as_ref() {
                Some(node) => {
                    keys.push(node.key.as_str());
                    cursor = node.next;
                }
                None => break,
            }
        }
        keys
    }

    fn alloc(&mut self, node: Node<V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) -> Option<Node<V>> {
        let node = self.slots[idx].take()?;
        self.free.push(idx);
        Some(node)
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.slots[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slots[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(node) = self.slots[h].as_mut() {
                    node.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }
}

impl<V> fmt::Debug for LruCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("max_bytes", &self.max_bytes)
            .field("nbytes", &self.nbytes)
            .field("len", &self.index.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byteview::ByteView;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    fn view(n: usize) -> ByteView {
        ByteView::from(vec![b'x'; n])
    }

    #[test]
    fn test_get_hit_and_miss() {
        let mut lru = LruCache::new(0);
        lru.add("key1", ByteView::from("1234"));

        assert_eq!(lru.get("key1").map(|v| v.to_string()), Some("1234".into()));
        assert!(lru.get("key2").is_none());
        assert_eq!(lru.bytes(), 4);
    }

    #[test]
    fn test_replace_adjusts_bytes() {
        let mut lru = LruCache::new(0);
        lru.add("k", view(10));
        lru.add("k", view(3));

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.bytes(), 3);

        lru.add("k", view(25));
        assert_eq!(lru.bytes(), 25);
    }

    #[test]
    fn test_remove_oldest_on_overflow() {
        let mut lru = LruCache::new(20);
        lru.add("k1", view(8));
        lru.add("k2", view(8));
        lru.add("k3", view(8));

        assert!(!lru.contains("k1"));
        assert_eq!(lru.keys(), vec!["k3", "k2"]);
        assert_eq!(lru.bytes(), 16);
    }

    #[test]
    fn test_read_updates_recency() {
        // A, B, C fill the budget exactly; touching A makes B the victim.
        let mut lru = LruCache::new(30);
        lru.add("A", view(10));
        lru.add("B", view(10));
        lru.add("C", view(10));

        assert!(lru.get("A").is_some());
        lru.add("D", view(10));

        assert!(lru.contains("A"));
        assert!(!lru.contains("B"));
        assert!(lru.contains("C"));
        assert!(lru.contains("D"));
        assert_eq!(lru.bytes(), 30);
    }

    #[test]
    fn test_oversized_entry_stays_alone() {
        let mut lru = LruCache::new(10);
        lru.add("a", view(4));
        lru.add("b", view(4));
        lru.add("huge", view(50));

        assert_eq!(lru.len(), 1);
        assert!(lru.contains("huge"));
        assert_eq!(lru.bytes(), 50);
    }

    #[test]
    fn test_on_evicted_callback() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let mut lru: LruCache<ByteView> =
            LruCache::new(10).with_on_evicted(Box::new(move |k: &str, _v: &ByteView| {
                sink.lock().unwrap().push(k.to_string());
            }));

        lru.add("key1", view(4));
        lru.add("key2", view(4));
        lru.add("k3", view(4));
        lru.add("k4", view(4));

        assert_eq!(*evicted.lock().unwrap(), vec!["key1", "key2"]);
    }

    #[test]
    fn test_remove_does_not_fire_callback() {
        let fired = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&fired);
        let mut lru: LruCache<ByteView> =
            LruCache::new(0).with_on_evicted(Box::new(move |_: &str, _: &ByteView| {
                *sink.lock().unwrap() += 1;
            }));

        lru.add("k", view(3));
        assert_eq!(lru.remove("k").map(|v| v.len()), Some(3));
        assert!(lru.remove("k").is_none());
        assert_eq!(*fired.lock().unwrap(), 0);
        assert!(lru.is_empty());
        assert_eq!(lru.bytes(), 0);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut lru = LruCache::new(8);
        for i in 0..100 {
            lru.add(&format!("k{}", i), view(4));
        }
        assert_eq!(lru.len(), 2);
        assert!(lru.slots.len() <= 3);
        assert_eq!(lru.keys(), vec!["k99", "k98"]);
    }

    #[test]
    fn test_remove_oldest_on_empty() {
        let mut lru: LruCache<ByteView> = LruCache::new(8);
        assert!(lru.remove_oldest().is_none());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8, usize),
        Get(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..16, 1usize..=32).prop_map(|(k, n)| Op::Add(k, n)),
            (0u8..16).prop_map(Op::Get),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Occupied bytes stay within budget, equal the sum of resident
        /// sizes, and the resident set is a prefix of the access order.
        #[test]
        fn prop_eviction_bound(ops in prop::collection::vec(op_strategy(), 1..200)) {
            const CAPACITY: u64 = 64;
            let mut lru = LruCache::new(CAPACITY);
            // Model: most recent first, (key, size)
            let mut order: Vec<(String, usize)> = Vec::new();

            for op in ops {
                match op {
                    Op::Add(k, n) => {
                        let key = format!("k{}", k);
                        lru.add(&key, view(n));
                        order.retain(|(existing, _)| existing != &key);
                        order.insert(0, (key, n));
                    }
                    Op::Get(k) => {
                        let key = format!("k{}", k);
                        let hit = lru.get(&key).is_some();
                        if let Some(pos) = order.iter().position(|(existing, _)| existing == &key) {
                            prop_assert!(hit);
                            let entry = order.remove(pos);
                            order.insert(0, entry);
                        } else {
                            prop_assert!(!hit);
                        }
                    }
                }

                let mut total = 0usize;
                let mut keep = 0;
                for (_, size) in &order {
                    if total + size > CAPACITY as usize {
                        break;
                    }
                    total += size;
                    keep += 1;
                }
                order.truncate(keep);

                prop_assert!(lru.bytes() <= CAPACITY);
                prop_assert_eq!(lru.bytes(), total as u64);
                let expected: Vec<&str> = order.iter().map(|(k, _)| k.as_str()).collect();
                prop_assert_eq!(lru.keys(), expected);
            }
        }
    }
}
