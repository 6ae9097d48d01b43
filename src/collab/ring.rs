use crate::collab::node::NodeId;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use xxhash_rust::xxh3::xxh3_64;

pub type RingPosition = u64;

/// Virtual nodes a weight-100 node gets unless configured otherwise.
pub const DEFAULT_VIRTUAL_NODES_PER_WEIGHT_UNIT: u32 = 150;

/// Anything that can be placed on the ring.
pub trait RingNode {
    fn node_id(&self) -> &NodeId;
    fn weight(&self) -> u32;
}

/// Hashes a key (or a virtual node label) to its position on the ring.
pub fn hash_position(key: &str) -> RingPosition {
    xxh3_64(key.as_bytes())
}

/// Number of positions a node of `weight` occupies. Weight 100 maps to `per_weight_unit`.
pub fn virtual_node_count(per_weight_unit: u32, weight: u32) -> usize {
    (u64::from(per_weight_unit) * u64::from(weight) / 100) as usize
}

fn virtual_node_label(id: &NodeId, index: usize) -> String {
    format!("{}:{}:{}", id.host, id.port, index)
}

/// Consistent hashing ring with weighted virtual nodes.
///
/// Each key is owned by the first position at or after its hash, wrapping around to the
/// smallest position. Pure data: no I/O and no health awareness.
#[derive(Debug)]
pub struct HashRing<N> {
    /// Position -> owning node.
    positions: BTreeMap<RingPosition, Arc<N>>,
    /// Occupied positions in ascending order, rebuilt on every mutation.
    sorted: Vec<RingPosition>,
    /// Positions inserted for each member.
    members: HashMap<NodeId, Vec<RingPosition>>,
    virtual_nodes_per_weight_unit: u32,
}

// Derive would require `N: Clone`.
impl<N> Clone for HashRing<N> {
    fn clone(&self) -> Self {
        Self {
            positions: self.positions.clone(),
            sorted: self.sorted.clone(),
            members: self.members.clone(),
            virtual_nodes_per_weight_unit: self.virtual_nodes_per_weight_unit,
        }
    }
}

impl<N: RingNode> HashRing<N> {
    pub fn new(virtual_nodes_per_weight_unit: u32) -> Self {
        Self {
            positions: BTreeMap::new(),
            sorted: Vec::new(),
            members: HashMap::new(),
            virtual_nodes_per_weight_unit,
        }
    }

    /// Adds `node`, replacing any positions it previously held.
    pub fn add_node(&mut self, node: Arc<N>) {
        let id = node.node_id().clone();
        self.remove_positions(&id);

        let count = virtual_node_count(self.virtual_nodes_per_weight_unit, node.weight());
        if count == 0 {
            warn!("node {id} has weight {} and gets no ring positions", node.weight());
        }

        let mut owned = Vec::with_capacity(count);

        for index in 0..count {
            let position = hash_position(&virtual_node_label(&id, index));

            if let Some(previous) = self.positions.insert(position, node.clone())
                && previous.node_id() != &id
            {
                warn!(
                    "ring position {position} collided: {} replaced by {id}",
                    previous.node_id()
                );
            }

            owned.push(position);
        }

        self.members.insert(id.clone(), owned);
        self.rebuild_index();

        debug!("added node {id} to ring with {count} virtual nodes");
    }

    /// Removes every position owned by `id`. Unknown nodes are ignored.
    pub fn remove_node(&mut self, id: &NodeId) {
        if self.remove_positions(id) {
            self.rebuild_index();
            debug!("removed node {id} from ring");
        }
    }

    fn remove_positions(&mut self, id: &NodeId) -> bool {
        let Some(owned) = self.members.remove(id) else {
            return false;
        };

        for position in owned {
            // A later insert by another node may have taken this position over.
            if self
                .positions
                .get(&position)
                .is_some_and(|owner| owner.node_id() == id)
            {
                self.positions.remove(&position);
            }
        }

        true
    }

    fn rebuild_index(&mut self) {
        self.sorted = self.positions.keys().copied().collect();
    }

    /// Node owning `key`, or `None` when the ring has no positions.
    pub fn node_for(&self, key: &str) -> Option<&Arc<N>> {
        self.owner_at(hash_position(key))
    }

    fn owner_at(&self, hash: RingPosition) -> Option<&Arc<N>> {
        let index = self.sorted.partition_point(|&position| position < hash);
        let position = self.sorted.get(index).or_else(|| self.sorted.first())?;

        self.positions.get(position)
    }

    /// Distinct nodes in clockwise order starting from the owner of `key`.
    pub fn successors(&self, key: &str) -> Vec<&Arc<N>> {
        let hash = hash_position(key);
        let start = self.sorted.partition_point(|&position| position < hash);

        let mut found: Vec<&Arc<N>> = Vec::with_capacity(self.members.len());

        let (before, after) = self.sorted.split_at(start);
        for position in after.iter().chain(before) {
            if found.len() == self.members.len() {
                break;
            }

            if let Some(node) = self.positions.get(position)
                && !found.iter().any(|n| n.node_id() == node.node_id())
            {
                found.push(node);
            }
        }

        found
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.members.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.members.len()
    }

    pub fn position_count(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

/// Copy-on-write holder for a ring shared between request paths and membership changes.
///
/// Readers take a cheap `Arc` snapshot; writers clone the ring, mutate the clone and swap it in.
#[derive(Debug)]
pub struct SharedRing<N> {
    current: RwLock<Arc<HashRing<N>>>,
}

impl<N: RingNode> SharedRing<N> {
    pub fn new(ring: HashRing<N>) -> Self {
        Self {
            current: RwLock::new(Arc::new(ring)),
        }
    }

    pub fn snapshot(&self) -> Arc<HashRing<N>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut HashRing<N>),
    {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = HashRing::clone(&current);
        mutate(&mut next);
        *current = Arc::new(next);
    }
}
