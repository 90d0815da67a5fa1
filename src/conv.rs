//! Relation-specific message-passing layers.
//!
//! - [`SparseGraphConv`]: one relation, source features pushed into
//!   destination nodes through a sparse adjacency.
//! - [`SkipGraphConv`]: the same with biased linears and a skip term on the
//!   destination's own features.
//! - [`HeteroConv`]: one conv per edge type or per relation label, summed
//!   into each destination node type.
//!
//! # Message Passing Framework
//!
//! ```text
//! h_dst = Σ_{r : (src, r, dst)} normalize(A_r · (h_src W_r))
//! ```
//!
//! [`SparseGraphConv`] has no self-loop term: a node type only receives what
//! its incoming relations send it.

use std::collections::BTreeMap;

use candle_core::{Tensor, D};
use candle_nn::{linear, Init, Linear, Module, VarBuilder};

use crate::error::{Error, Result};
use crate::hetero::{node_tensor, AdjacencyMap, EdgeType, NodeMap, NodeType};
use crate::sparse::SparseAdjacency;

/// Floor for the row norm in L2 normalization.
const NORM_EPS: f64 = 1e-12;

/// Glorot/Xavier uniform initializer: `U(-r, r)` with `r = sqrt(6 / (in + out))`.
pub fn glorot(fan_in: usize, fan_out: usize) -> Init {
    let r = glorot_range(fan_in, fan_out);
    Init::Uniform { lo: -r, up: r }
}

/// Bound `r` of [`glorot`].
pub fn glorot_range(fan_in: usize, fan_out: usize) -> f64 {
    (6.0 / (fan_in + fan_out) as f64).sqrt()
}

/// Row-wise L2 normalization, `x / max(||x||₂, eps)`.
///
/// The floor is applied to the squared norm so all-zero rows keep a finite
/// gradient through `sqrt`.
pub fn l2_normalize(x: &Tensor) -> candle_core::Result<Tensor> {
    let norm = x
        .sqr()?
        .sum_keepdim(D::Minus1)?
        .maximum(NORM_EPS * NORM_EPS)?
        .sqrt()?;
    x.broadcast_div(&norm)
}

/// Single-relation graph convolution.
///
/// Implements: `H_dst = normalize(A · H_src W)`
///
/// Where:
/// - A is the `(num_dst, num_src)` adjacency of the relation
/// - W is a bias-free `(in_features, out_features)` weight, Glorot-initialized
///
/// Dropout is left to the caller.
pub struct SparseGraphConv {
    weight: Tensor,
    in_features: usize,
    out_features: usize,
    normalize: bool,
}

impl SparseGraphConv {
    /// Create a new layer.
    ///
    /// # Arguments
    /// - `in_features`: Source feature dimension
    /// - `out_features`: Output feature dimension
    /// - `normalize`: L2-normalize every output row
    /// - `vb`: Variable builder for parameter initialization
    pub fn new(
        in_features: usize,
        out_features: usize,
        normalize: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            (in_features, out_features),
            "weight",
            glorot(in_features, out_features),
        )?;
        Ok(Self {
            weight,
            in_features,
            out_features,
            normalize,
        })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: `(source_features, destination_features)`; the destination
    ///   side is accepted for symmetry and not used
    /// - `adj`: Transposed adjacency `(num_dst, num_src)`
    ///
    /// # Returns
    /// - Destination embeddings `(num_dst, out_features)`
    pub fn forward(&self, x: (&Tensor, &Tensor), adj: &SparseAdjacency) -> Result<Tensor> {
        let (src, _dst) = x;
        let (_, src_dim) = src.dims2()?;
        if src_dim != self.in_features {
            return Err(Error::dims("graph conv input width", self.in_features, src_dim));
        }

        let h = src.matmul(&self.weight)?;
        let out = adj.matmul(&h)?;
        if self.normalize {
            Ok(l2_normalize(&out)?)
        } else {
            Ok(out)
        }
    }
}

/// A per-relation convolution that [`HeteroConv`] can hold.
pub trait RelationConv: Sized {
    /// Build the conv for one relation.
    ///
    /// `src_features` and `dst_features` are the widths of the two endpoint
    /// node types.
    fn build(
        src_features: usize,
        dst_features: usize,
        out_features: usize,
        normalize: bool,
        vb: VarBuilder,
    ) -> Result<Self>;

    fn in_features(&self) -> usize;

    fn out_features(&self) -> usize;

    /// Destination embeddings `(num_dst, out_features)`.
    fn forward(&self, x: (&Tensor, &Tensor), adj: &SparseAdjacency) -> Result<Tensor>;
}

impl RelationConv for SparseGraphConv {
    fn build(
        src_features: usize,
        _dst_features: usize,
        out_features: usize,
        normalize: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        SparseGraphConv::new(src_features, out_features, normalize, vb)
    }

    fn in_features(&self) -> usize {
        self.in_features
    }

    fn out_features(&self) -> usize {
        self.out_features
    }

    fn forward(&self, x: (&Tensor, &Tensor), adj: &SparseAdjacency) -> Result<Tensor> {
        SparseGraphConv::forward(self, x, adj)
    }
}

/// Graph convolution with a skip connection on the destination.
///
/// Implements: `H_dst = normalize(A · lin_msg(H_src) + lin_self(H_dst))`
///
/// Both linears carry a bias, so a destination without neighbours still gets
/// an output driven by its own features.
pub struct SkipGraphConv {
    message: Linear,
    skip: Linear,
    in_features: usize,
    dst_features: usize,
    out_features: usize,
    normalize: bool,
}

impl SkipGraphConv {
    pub fn new(
        src_features: usize,
        dst_features: usize,
        out_features: usize,
        normalize: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            message: linear(src_features, out_features, vb.pp("message"))?,
            skip: linear(dst_features, out_features, vb.pp("self"))?,
            in_features: src_features,
            dst_features,
            out_features,
            normalize,
        })
    }

    pub fn dst_features(&self) -> usize {
        self.dst_features
    }

    /// Forward pass over `(source_features, destination_features)`.
    pub fn forward(&self, x: (&Tensor, &Tensor), adj: &SparseAdjacency) -> Result<Tensor> {
        let (src, dst) = x;
        let (_, src_dim) = src.dims2()?;
        if src_dim != self.in_features {
            return Err(Error::dims("skip conv source width", self.in_features, src_dim));
        }
        let (_, dst_dim) = dst.dims2()?;
        if dst_dim != self.dst_features {
            return Err(Error::dims("skip conv destination width", self.dst_features, dst_dim));
        }

        let messages = adj.matmul(&self.message.forward(src)?)?;
        let out = (messages + self.skip.forward(dst)?)?;
        if self.normalize {
            Ok(l2_normalize(&out)?)
        } else {
            Ok(out)
        }
    }
}

impl RelationConv for SkipGraphConv {
    fn build(
        src_features: usize,
        dst_features: usize,
        out_features: usize,
        normalize: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        SkipGraphConv::new(src_features, dst_features, out_features, normalize, vb)
    }

    fn in_features(&self) -> usize {
        self.in_features
    }

    fn out_features(&self) -> usize {
        self.out_features
    }

    fn forward(&self, x: (&Tensor, &Tensor), adj: &SparseAdjacency) -> Result<Tensor> {
        SkipGraphConv::forward(self, x, adj)
    }
}

/// How a [`HeteroConv`] assigns weights to edge types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightSharing {
    /// One conv per edge type, under `src__relation__dst`.
    PerEdgeType,
    /// One conv per relation label, shared by every edge type carrying it.
    PerRelation,
}

impl WeightSharing {
    fn key(self, edge_type: &EdgeType) -> String {
        match self {
            Self::PerEdgeType => edge_type.path_name(),
            Self::PerRelation => edge_type.relation.clone(),
        }
    }
}

/// One heterogeneous message-passing layer.
///
/// Holds a conv per edge type or per relation label, fixed at construction,
/// and sums their outputs per destination node type.
pub struct HeteroConv<C = SparseGraphConv> {
    convs: BTreeMap<String, C>,
    edge_types: Vec<EdgeType>,
    sharing: WeightSharing,
    out_dims: BTreeMap<NodeType, usize>,
}

impl<C: RelationConv> HeteroConv<C> {
    /// Create a layer.
    ///
    /// # Arguments
    /// - `edge_types`: Relations handled by this layer
    /// - `in_dims`: Input width per node type
    /// - `out_dims`: Output width per node type; an edge type's conv emits
    ///   its destination's width
    /// - `normalize`: L2-normalize each relation's messages
    /// - `sharing`: Weight assignment; each conv lives under its key's path
    /// - `vb`: Variable builder
    ///
    /// # Errors
    /// With [`WeightSharing::PerRelation`], edge types sharing a label must
    /// agree on input and output widths.
    pub fn new(
        edge_types: &[EdgeType],
        in_dims: &BTreeMap<NodeType, usize>,
        out_dims: &BTreeMap<NodeType, usize>,
        normalize: bool,
        sharing: WeightSharing,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut convs: BTreeMap<String, C> = BTreeMap::new();
        for edge_type in edge_types {
            let in_dim = lookup_dim(in_dims, &edge_type.src_type)?;
            let dst_dim = lookup_dim(in_dims, &edge_type.dst_type)?;
            let out_dim = lookup_dim(out_dims, &edge_type.dst_type)?;
            let key = sharing.key(edge_type);

            if let Some(shared) = convs.get(&key) {
                if shared.in_features() != in_dim || shared.out_features() != out_dim {
                    return Err(Error::InvalidConfig(format!(
                        "relation `{key}` is shared by edge types of different widths: \
                         ({}, {}) vs ({in_dim}, {out_dim}) at {edge_type}",
                        shared.in_features(),
                        shared.out_features(),
                    )));
                }
                continue;
            }
            let conv = C::build(in_dim, dst_dim, out_dim, normalize, vb.pp(key.as_str()))?;
            convs.insert(key, conv);
        }
        Ok(Self {
            convs,
            edge_types: edge_types.to_vec(),
            sharing,
            out_dims: out_dims.clone(),
        })
    }

    /// The conv used by an edge type.
    pub fn conv(&self, edge_type: &EdgeType) -> Option<&C> {
        if !self.edge_types.contains(edge_type) {
            return None;
        }
        self.convs.get(&self.sharing.key(edge_type))
    }

    /// Number of distinct convs.
    pub fn num_convs(&self) -> usize {
        self.convs.len()
    }

    pub fn sharing(&self) -> WeightSharing {
        self.sharing
    }

    /// Output widths per node type.
    pub fn out_dims(&self) -> &BTreeMap<NodeType, usize> {
        &self.out_dims
    }

    /// Forward pass.
    ///
    /// Every node type in `out_dims` gets an output, zero when no relation
    /// points at it.
    pub fn forward(&self, x: &NodeMap, adjacency: &AdjacencyMap) -> Result<NodeMap> {
        let mut out = NodeMap::new();
        for (node_type, &dim) in &self.out_dims {
            let rows = node_tensor(x, node_type)?;
            let zeros = Tensor::zeros((rows.dim(0)?, dim), rows.dtype(), rows.device())?;
            out.insert(node_type.clone(), zeros);
        }

        for edge_type in &self.edge_types {
            let conv = self
                .conv(edge_type)
                .ok_or_else(|| Error::UnknownEdgeType(edge_type.to_string()))?;
            let adj = adjacency
                .get(edge_type)
                .ok_or_else(|| Error::UnknownEdgeType(edge_type.to_string()))?;
            let src = node_tensor(x, &edge_type.src_type)?;
            let dst = node_tensor(x, &edge_type.dst_type)?;
            let message = conv.forward((src, dst), adj)?;

            let acc = out
                .get_mut(&edge_type.dst_type)
                .ok_or_else(|| Error::UnknownNodeType(edge_type.dst_type.to_string()))?;
            *acc = (&*acc + message)?;
        }
        Ok(out)
    }
}

fn lookup_dim(dims: &BTreeMap<NodeType, usize>, node_type: &NodeType) -> Result<usize> {
    dims.get(node_type)
        .copied()
        .ok_or_else(|| Error::UnknownNodeType(node_type.to_string()))
}
