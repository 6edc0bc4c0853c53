//! Consistent hash ring
//!
//! Maps keys onto peers through a sorted ring of virtual nodes. Each real
//! peer owns `replicas` points on the ring, which evens out load and limits
//! remapping to roughly `1/N` of the key space when the peer set changes.
//!
//! The ring is not patched in place when membership changes; owners build
//! a new ring from the full peer list and swap it in.

use std::collections::HashMap;

/// Hash function used for both virtual nodes and keys
pub type HashFn = fn(&[u8]) -> u32;

/// Default number of virtual nodes per peer
pub const DEFAULT_REPLICAS: usize = 50;

/// Consistent hash ring over peer identifiers
#[derive(Debug, Clone)]
pub struct HashRing {
    hash: HashFn,
    replicas: usize,
    /// Sorted virtual node hashes
    keys: Vec<u32>,
    /// Virtual node hash -> real peer
    owners: HashMap<u32, String>,
}

impl HashRing {
    /// Create an empty ring hashing with CRC-32 (IEEE)
    pub fn new(replicas: usize) -> Self {
        Self::with_hasher(replicas, crc32fast::hash)
    }

    /// Create an empty ring with a custom hash function
    pub fn with_hasher(replicas: usize, hash: HashFn) -> Self {
        Self {
            hash,
            replicas,
            keys: Vec::new(),
            owners: HashMap::new(),
        }
    }

    /// Place `replicas` virtual nodes on the ring for every peer.
    ///
    /// Virtual node `i` of peer `p` sits at `hash("{i}{p}")`. If two virtual
    /// nodes collide, the peer added last owns the point.
    pub fn add<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for peer in peers {
            let peer = peer.as_ref();
            for i in 0..self.replicas {
                let point = (self.hash)(format!("{}{}", i, peer).as_bytes());
                if self.owners.insert(point, peer.to_string()).is_none() {
                    self.keys.push(point);
                }
            }
        }
        self.keys.sort_unstable();
    }

    /// Owner of `key`: the first virtual node at or after the key's hash,
    /// wrapping to the start of the ring. `None` when the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let idx = self.keys.partition_point(|&point| point < hash);
        let point = self.keys[idx % self.keys.len()];
        self.owners.get(&point).map(String::as_str)
    }

    /// True when no peer has been added
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of virtual nodes on the ring
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Virtual nodes per peer
    pub fn replicas(&self) -> usize {
        self.replicas
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Treats the input as a decimal number so ring positions are predictable.
    fn decimal_hash(data: &[u8]) -> u32 {
        std::str::from_utf8(data)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    #[test]
    fn test_hashing_with_known_positions() {
        let mut ring = HashRing::with_hasher(3, decimal_hash);
        // Virtual nodes: 2, 4, 6, 12, 14, 16, 22, 24, 26
        ring.add(["6", "4", "2"]);
        assert_eq!(ring.len(), 9);

        let cases = [("2", "2"), ("11", "2"), ("23", "4"), ("27", "2")];
        for (key, owner) in cases {
            assert_eq!(ring.get(key), Some(owner), "asking for {}", key);
        }

        // Adds 8, 18, 28
        ring.add(["8"]);
        assert_eq!(ring.get("27"), Some("8"));
        assert_eq!(ring.get("11"), Some("2"));
    }

    #[test]
    fn test_empty_ring() {
        let ring = HashRing::default();
        assert!(ring.is_empty());
        assert_eq!(ring.get("anything"), None);
        assert_eq!(ring.replicas(), DEFAULT_REPLICAS);
    }

    #[test]
    fn test_single_peer_owns_everything() {
        let mut ring = HashRing::new(10);
        ring.add(["http://localhost:8001"]);
        for i in 0..100 {
            assert_eq!(ring.get(&format!("key-{}", i)), Some("http://localhost:8001"));
        }
    }

    #[test]
    fn test_adding_peer_remaps_small_fraction() {
        let peers: Vec<String> = (0..10).map(|i| format!("http://10.0.0.{}:8000", i)).collect();
        let mut before = HashRing::new(DEFAULT_REPLICAS);
        before.add(&peers);

        let newcomer = "http://10.0.0.99:8000";
        let mut after = HashRing::new(DEFAULT_REPLICAS);
        after.add(peers.iter().map(String::as_str).chain([newcomer]));

        let samples = 10_000;
        let mut moved = 0;
        for i in 0..samples {
            let key = format!("key-{}", i);
            let old = before.get(&key).unwrap();
            let new = after.get(&key).unwrap();
            if old != new {
                // Keys only ever move to the new peer
                assert_eq!(new, newcomer);
                moved += 1;
            }
        }

        let fraction = moved as f64 / samples as f64;
        assert!(fraction > 0.0);
        assert!(fraction < 2.5 / 11.0, "moved fraction {}", fraction);
    }

    #[test]
    fn test_load_spread_across_peers() {
        let mut ring = HashRing::new(DEFAULT_REPLICAS);
        ring.add(["a:1", "b:2", "c:3"]);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for i in 0..9000 {
            let key = format!("user:{}", i);
            *counts.entry(ring.get(&key).unwrap()).or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        for (peer, count) in counts {
            assert!(count > 900, "peer {} only owns {} keys", peer, count);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Same peer set, same answers, regardless of insertion order.
        #[test]
        fn prop_lookup_is_deterministic(
            peer_count in 1usize..8,
            keys in prop::collection::vec("[a-z0-9]{1,12}", 1..50),
        ) {
            let peers: Vec<String> = (0..peer_count).map(|i| format!("peer-{}", i)).collect();
            let mut forward = HashRing::new(16);
            forward.add(&peers);
            let mut reverse = HashRing::new(16);
            reverse.add(peers.iter().rev());

            for key in &keys {
                let owner = forward.get(key);
                prop_assert!(owner.is_some());
                prop_assert_eq!(owner, forward.get(key));
                prop_assert_eq!(owner, reverse.get(key));
            }
        }
    }
}
