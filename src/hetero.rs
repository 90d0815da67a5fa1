//! Heterogeneous graph keys and typed tensor maps.
//!
//! Node and edge types follow the PyTorch Geometric convention: an edge type
//! is the canonical triple `(src_type, relation, dst_type)`.
//!
//! # Example
//!
//! ```rust
//! use hetero_vgae::hetero::{EdgeIndex, EdgeKey, EdgeType, NodeType};
//!
//! let drug = NodeType::new("drug");
//! let targets = EdgeType::new("drug", "targets", "protein");
//! assert_eq!(targets.src_type, drug);
//!
//! let edges = EdgeIndex::from_pairs([(0, 1), (2, 0)]);
//! assert_eq!(edges.num_edges(), 2);
//! assert!(EdgeKey::AuxiliaryTarget.edge_type().is_none());
//! ```

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::sparse::SparseAdjacency;

/// A node type identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeType(pub String);

impl NodeType {
    /// Create a new node type.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An edge type identifier, represented as (src_type, relation, dst_type).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeType {
    /// Source node type.
    pub src_type: NodeType,
    /// Relation label.
    pub relation: String,
    /// Destination node type.
    pub dst_type: NodeType,
}

impl EdgeType {
    /// Create a new edge type.
    pub fn new(
        src_type: impl Into<NodeType>,
        relation: impl Into<String>,
        dst_type: impl Into<NodeType>,
    ) -> Self {
        Self {
            src_type: src_type.into(),
            relation: relation.into(),
            dst_type: dst_type.into(),
        }
    }

    /// Parameter-path friendly name, e.g. `drug__targets__protein`.
    pub fn path_name(&self) -> String {
        format!("{}__{}__{}", self.src_type, self.relation, self.dst_type)
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.src_type, self.relation, self.dst_type)
    }
}

/// Edge batch for one edge type (COO format).
///
/// Indices are local to the respective node types: `src[k]` is a row of the
/// source node type's tensor, `dst[k]` a row of the destination's.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeIndex {
    /// Source row indices.
    pub src: Vec<u32>,
    /// Destination row indices.
    pub dst: Vec<u32>,
}

impl EdgeIndex {
    /// Create an empty edge index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from index vectors of equal length.
    pub fn from_edges(src: Vec<u32>, dst: Vec<u32>) -> Self {
        debug_assert_eq!(src.len(), dst.len());
        Self { src, dst }
    }

    /// Create from `(src, dst)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, u32)>) -> Self {
        let (src, dst) = pairs.into_iter().unzip();
        Self { src, dst }
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    /// Add an edge.
    pub fn push(&mut self, src: u32, dst: u32) {
        self.src.push(src);
        self.dst.push(dst);
    }

    /// Iterate over (src, dst) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.src.iter().copied().zip(self.dst.iter().copied())
    }

    /// Distinct (src, dst) pairs.
    pub fn pair_set(&self) -> HashSet<(u32, u32)> {
        self.iter().collect()
    }

    /// Source indices as a `u32` tensor of shape `(E,)`.
    pub fn src_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.src, self.src.len(), device)
    }

    /// Destination indices as a `u32` tensor of shape `(E,)`.
    pub fn dst_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.dst, self.dst.len(), device)
    }
}

impl FromIterator<(u32, u32)> for EdgeIndex {
    fn from_iter<I: IntoIterator<Item = (u32, u32)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

/// Key of an [`EdgeIndexMap`].
///
/// Callers may carry one auxiliary batch (e.g. the prediction targets of an
/// evaluation split) next to the real edge types. Decoding and loss
/// reductions skip it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeKey {
    /// Edges of a concrete edge type.
    Edges(EdgeType),
    /// Auxiliary entry, never scored.
    AuxiliaryTarget,
}

impl EdgeKey {
    /// The edge type, or `None` for the auxiliary entry.
    pub fn edge_type(&self) -> Option<&EdgeType> {
        match self {
            Self::Edges(edge_type) => Some(edge_type),
            Self::AuxiliaryTarget => None,
        }
    }
}

impl From<EdgeType> for EdgeKey {
    fn from(edge_type: EdgeType) -> Self {
        Self::Edges(edge_type)
    }
}

/// Per-node-type tensors (features, hidden states, latents).
pub type NodeMap = BTreeMap<NodeType, Tensor>;

/// Per-edge-type adjacency used for message passing.
pub type AdjacencyMap = BTreeMap<EdgeType, SparseAdjacency>;

/// Edge batches keyed by [`EdgeKey`].
pub type EdgeIndexMap = BTreeMap<EdgeKey, EdgeIndex>;

/// Look up a node type's tensor.
pub fn node_tensor<'a>(map: &'a NodeMap, node_type: &NodeType) -> crate::Result<&'a Tensor> {
    map.get(node_type)
        .ok_or_else(|| crate::Error::UnknownNodeType(node_type.to_string()))
}

/// Iterate over the scorable entries of an edge index map.
pub fn scorable_edges(map: &EdgeIndexMap) -> impl Iterator<Item = (&EdgeType, &EdgeIndex)> {
    map.iter()
        .filter_map(|(key, edges)| key.edge_type().map(|edge_type| (edge_type, edges)))
}
