//! Stacked heterogeneous encoder.
//!
//! Each layer is a [`HeteroConv`] followed by ReLU and dropout:
//!
//! ```text
//! h^{(0)} = x
//! h^{(i+1)}_t = dropout(relu(Σ_{(s, r, t)} conv_{i,r}(h^{(i)}_s)))
//! ```
//!
//! The ReLU is skipped after the last layer unless configured otherwise, so
//! the latent projection sees pre-activation values.

use std::collections::BTreeMap;

use candle_core::Tensor;
use candle_nn::VarBuilder;
use tracing::debug;

use crate::conv::{HeteroConv, WeightSharing};
use crate::error::{Error, Result};
use crate::hetero::{AdjacencyMap, EdgeType, NodeMap, NodeType};

/// Shape of a [`HeteroEncoder`].
#[derive(Debug, Clone)]
pub struct EncoderLayout<'a> {
    pub node_types: &'a [NodeType],
    pub edge_types: &'a [EdgeType],
    pub in_dims: &'a BTreeMap<NodeType, usize>,
    pub hidden_dims: &'a [usize],
    pub dropout: f32,
    pub activate_final_layer: bool,
}

/// Multi-layer heterogeneous graph encoder.
pub struct HeteroEncoder {
    layers: Vec<HeteroConv>,
    node_types: Vec<NodeType>,
    dropout: f32,
    activate_final_layer: bool,
}

impl HeteroEncoder {
    /// Create the encoder, one [`HeteroConv`] per entry of `hidden_dims`.
    ///
    /// Layer 0 maps each node type's input width to `hidden_dims[0]`;
    /// layer `i` maps `hidden_dims[i - 1]` to `hidden_dims[i]`. All layers
    /// L2-normalize relation messages and aggregate by sum. Within a layer,
    /// edge types with the same relation label share one conv, stored under
    /// `layer_{i}.{relation}`.
    pub fn new(layout: EncoderLayout<'_>, vb: VarBuilder) -> Result<Self> {
        if layout.hidden_dims.is_empty() {
            return Err(Error::InvalidConfig("encoder needs at least one layer".into()));
        }

        let mut layers = Vec::with_capacity(layout.hidden_dims.len());
        let mut in_dims = layout.in_dims.clone();
        for (i, &width) in layout.hidden_dims.iter().enumerate() {
            let out_dims: BTreeMap<NodeType, usize> =
                layout.node_types.iter().map(|nt| (nt.clone(), width)).collect();
            let layer: HeteroConv = HeteroConv::new(
                layout.edge_types,
                &in_dims,
                &out_dims,
                true,
                WeightSharing::PerRelation,
                vb.pp(format!("layer_{i}")),
            )?;
            layers.push(layer);
            in_dims = out_dims;
        }

        Ok(Self {
            layers,
            node_types: layout.node_types.to_vec(),
            dropout: layout.dropout,
            activate_final_layer: layout.activate_final_layer,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, i: usize) -> Option<&HeteroConv> {
        self.layers.get(i)
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Input features per node type, `(rows, in_dim)`
    /// - `adjacency`: Transposed adjacency per edge type
    /// - `train`: Enables dropout
    ///
    /// # Returns
    /// - Final hidden state per node type, `(rows, hidden_dims.last())`
    pub fn forward(&self, x: &NodeMap, adjacency: &AdjacencyMap, train: bool) -> Result<NodeMap> {
        for node_type in &self.node_types {
            if !x.contains_key(node_type) {
                return Err(Error::UnknownNodeType(node_type.to_string()));
            }
        }

        let last = self.layers.len() - 1;
        let mut h = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            let acc = layer.forward(&h, adjacency)?;
            let activate = i < last || self.activate_final_layer;

            let mut next = NodeMap::new();
            for (node_type, hidden) in acc {
                let hidden = if activate { hidden.relu()? } else { hidden };
                next.insert(node_type, self.dropout(hidden, train)?);
            }
            debug!(layer = i, activate, node_types = next.len(), "encoder layer");
            h = next;
        }
        Ok(h)
    }

    fn dropout(&self, x: Tensor, train: bool) -> Result<Tensor> {
        if train && self.dropout > 0.0 {
            Ok(candle_nn::ops::dropout(&x, self.dropout)?)
        } else {
            Ok(x)
        }
    }
}
