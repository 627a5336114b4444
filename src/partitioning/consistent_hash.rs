//! Segment wheel mapping keys to owner nodes.

use crate::hash::{HashKey, MurmurHash2};
use crate::types::NodeId;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Default number of segments each node places on the wheel.
pub const DEFAULT_SEGMENTS_PER_NODE: usize = 256;

/// Consistent hash over a wheel of 2^32 positions.
///
/// Each node contributes `segments_per_node` positions, at the MurmurHash2
/// of `"{node}:{i}"`. A key's owners are the first `num_owners` distinct
/// nodes found walking clockwise from the key's own MurmurHash2 position.
/// The same member set yields the same owners on every node, whatever the
/// join order: a position claimed by several nodes belongs to the smallest id.
#[derive(Debug, Clone)]
pub struct ConsistentHash {
    /// Wheel position to the nodes claiming it.
    segments: BTreeMap<u32, BTreeSet<NodeId>>,
    segments_per_node: usize,
    num_owners: usize,
    /// Members, sorted.
    nodes: Vec<NodeId>,
    hasher: MurmurHash2,
}

impl ConsistentHash {
    pub fn new(num_owners: usize) -> Self {
        Self::with_segments(num_owners, DEFAULT_SEGMENTS_PER_NODE)
    }

    pub fn with_segments(num_owners: usize, segments_per_node: usize) -> Self {
        Self {
            segments: BTreeMap::new(),
            segments_per_node: segments_per_node.max(1),
            num_owners: num_owners.max(1),
            nodes: Vec::new(),
            hasher: MurmurHash2::new(),
        }
    }

    /// Build a wheel for a fixed member set.
    pub fn from_members(
        num_owners: usize,
        segments_per_node: usize,
        members: impl IntoIterator<Item = NodeId>,
    ) -> Self {
        let mut wheel = Self::with_segments(num_owners, segments_per_node);
        for node in members {
            wheel.add_node(node);
        }
        wheel
    }

    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.nodes.binary_search(&node_id).is_ok()
    }

    pub fn add_node(&mut self, node_id: NodeId) {
        let Err(slot) = self.nodes.binary_search(&node_id) else {
            return;
        };
        self.nodes.insert(slot, node_id);

        for i in 0..self.segments_per_node {
            let position = self.segment_position(node_id, i);
            self.claim(position, node_id);
        }
    }

    pub fn remove_node(&mut self, node_id: NodeId) {
        let Ok(slot) = self.nodes.binary_search(&node_id) else {
            return;
        };
        self.nodes.remove(slot);
        // positions it shared fall back to the remaining claimants
        self.segments.retain(|_, claimants| {
            claimants.remove(&node_id);
            !claimants.is_empty()
        });
    }

    /// Replace the member set, keeping positions of nodes that stay.
    pub fn set_members(&mut self, members: impl IntoIterator<Item = NodeId>) {
        let members: Vec<NodeId> = members.into_iter().collect();
        let leaving: Vec<NodeId> = self
            .nodes
            .iter()
            .copied()
            .filter(|n| !members.contains(n))
            .collect();
        for node in leaving {
            self.remove_node(node);
        }
        for node in members {
            self.add_node(node);
        }
    }

    /// Wheel position of a key.
    pub fn position<K: HashKey + ?Sized>(&self, key: &K) -> u32 {
        self.hasher.hash(key) as u32
    }

    /// Up to `count` distinct owners of a key, primary first.
    pub fn locate<K: HashKey + ?Sized>(&self, key: &K, count: usize) -> Vec<NodeId> {
        if self.segments.is_empty() {
            return Vec::new();
        }
        let wanted = count.min(self.nodes.len());
        let mut owners = Vec::with_capacity(wanted);

        let start = self.position(key);
        let clockwise = self.segments.range(start..).chain(self.segments.range(..start));
        for node_id in clockwise.filter_map(|(_, claimants)| claimants.first().copied()) {
            if !owners.contains(&node_id) {
                owners.push(node_id);
                if owners.len() >= wanted {
                    break;
                }
            }
        }
        owners
    }

    /// The configured number of owners of a key.
    pub fn owners<K: HashKey + ?Sized>(&self, key: &K) -> Vec<NodeId> {
        self.locate(key, self.num_owners)
    }

    pub fn primary<K: HashKey + ?Sized>(&self, key: &K) -> Option<NodeId> {
        self.locate(key, 1).into_iter().next()
    }

    pub fn is_owner<K: HashKey + ?Sized>(&self, key: &K, node_id: NodeId) -> bool {
        self.owners(key).contains(&node_id)
    }

    /// Group keys by the nodes that own them.
    pub fn owners_of_keys<'a, I>(&self, keys: I) -> HashMap<NodeId, Vec<&'a [u8]>>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut grouped: HashMap<NodeId, Vec<&'a [u8]>> = HashMap::new();
        for key in keys {
            for owner in self.owners(key) {
                grouped.entry(owner).or_default().push(key);
            }
        }
        grouped
    }

    fn claim(&mut self, position: u32, node_id: NodeId) {
        self.segments.entry(position).or_default().insert(node_id);
    }

    fn segment_position(&self, node_id: NodeId, index: usize) -> u32 {
        self.position(format!("{node_id}:{index}").as_str())
    }
}
