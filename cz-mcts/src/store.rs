//! Append-only arenas for node records and child-edge blocks.
//!
//! Allocation is monotonic: records never move and indices never dangle for
//! the lifetime of the store. Capacity is fixed up front unless the store
//! was created expandable, in which case the arenas grow and `Exhausted`
//! is never reported.

use thiserror::Error;

use crate::node::{EdgeSlot, NodeId, NodeRecord, NULL_NODE};

/// Edge slots reserved per node record when sizing the edge arena.
const EDGE_SLOTS_PER_NODE: usize = 8;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("node store exhausted at {capacity} records")]
    Exhausted { capacity: usize },
}

pub struct NodeStore {
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeSlot>,
    node_capacity: usize,
    edge_capacity: usize,
    expandable: bool,
}

impl NodeStore {
    /// `capacity` bounds the number of usable node records; slot 0 of both
    /// arenas is the reserved null sentinel and does not count against it.
    /// Memory is reserved lazily: the capacity is an allocation ceiling,
    /// not an up-front reservation.
    pub fn new(capacity: usize, expandable: bool) -> Self {
        let capacity = capacity.max(1);
        let reserve = capacity.min(1 << 16);
        let mut nodes = Vec::with_capacity(reserve + 1);
        nodes.push(NodeRecord::null());
        let edge_capacity = capacity.saturating_mul(EDGE_SLOTS_PER_NODE);
        let mut edges = Vec::with_capacity(reserve * 4 + 1);
        edges.push(EdgeSlot::null());
        Self {
            nodes,
            edges,
            node_capacity: capacity,
            edge_capacity,
            expandable,
        }
    }

    /// Usable records allocated so far (the sentinel is not counted).
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.node_capacity
    }

    pub fn is_expandable(&self) -> bool {
        self.expandable
    }

    pub fn allocate_node(&mut self, rec: NodeRecord) -> Result<NodeId, StoreError> {
        if self.len() >= self.node_capacity {
            if !self.expandable {
                return Err(StoreError::Exhausted {
                    capacity: self.node_capacity,
                });
            }
            self.node_capacity *= 2;
        }
        let id = self.nodes.len() as NodeId;
        self.nodes.push(rec);
        Ok(id)
    }

    /// Reserve `count` contiguous edge slots and return the block offset.
    /// The slots come back as null placeholders for the caller to fill.
    pub fn allocate_children(&mut self, count: usize) -> Result<u32, StoreError> {
        if self.edges.len() - 1 + count > self.edge_capacity {
            if !self.expandable {
                return Err(StoreError::Exhausted {
                    capacity: self.node_capacity,
                });
            }
            self.edge_capacity *= 2;
        }
        let offset = self.edges.len() as u32;
        self.edges
            .extend(std::iter::repeat(EdgeSlot::null()).take(count));
        Ok(offset)
    }

    pub fn node(&self, id: NodeId) -> &NodeRecord {
        debug_assert_ne!(id, NULL_NODE);
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeRecord {
        debug_assert_ne!(id, NULL_NODE);
        &mut self.nodes[id as usize]
    }

    pub fn edge(&self, offset: u32) -> &EdgeSlot {
        &self.edges[offset as usize]
    }

    pub fn edge_mut(&mut self, offset: u32) -> &mut EdgeSlot {
        &mut self.edges[offset as usize]
    }

    pub fn edge_block(&self, offset: u32, count: usize) -> &[EdgeSlot] {
        &self.edges[offset as usize..offset as usize + count]
    }

    pub fn edge_block_mut(&mut self, offset: u32, count: usize) -> &mut [EdgeSlot] {
        &mut self.edges[offset as usize..offset as usize + count]
    }
}
