//! Non-variational heterogeneous graph autoencoder.
//!
//! Same encoder and decoders as [`HeteroVgae`](crate::HeteroVgae), without
//! the latent distribution: the encoder output is decoded directly, so its
//! last width must equal `out_dim`.

use std::collections::BTreeMap;

use candle_core::Tensor;
use candle_nn::VarBuilder;
use rand::Rng;
use tracing::info;

use crate::config::VgaeConfig;
use crate::decoder::DecoderRouter;
use crate::encoder::{EncoderLayout, HeteroEncoder};
use crate::error::{Error, Result};
use crate::hetero::{AdjacencyMap, EdgeIndex, EdgeIndexMap, EdgeType, NodeMap};
use crate::loss::{self, ReconReduction};

/// Heterogeneous GAE.
pub struct HeteroGae {
    config: VgaeConfig,
    encoder: HeteroEncoder,
    router: DecoderRouter,
    training: bool,
}

impl HeteroGae {
    pub fn new(config: VgaeConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let hidden_dim = config.final_hidden_dim().unwrap_or_default();
        if hidden_dim != config.out_dim {
            return Err(Error::dims("final encoder width", config.out_dim, hidden_dim));
        }

        let encoder = HeteroEncoder::new(
            EncoderLayout {
                node_types: &config.node_types,
                edge_types: &config.edge_types,
                in_dims: &config.in_dims,
                hidden_dims: &config.hidden_dims,
                dropout: config.dropout,
                activate_final_layer: config.activate_final_layer,
            },
            vb.pp("encoder"),
        )?;
        let router = DecoderRouter::new(
            config.out_dim,
            &config.decoder_2_relation,
            &config.relation_2_decoder,
            vb.pp("decoder"),
        )?;

        info!(
            node_types = config.node_types.len(),
            edge_types = config.edge_types.len(),
            layers = config.num_layer,
            "built heterogeneous GAE"
        );

        Ok(Self {
            config,
            encoder,
            router,
            training: true,
        })
    }

    pub fn config(&self) -> &VgaeConfig {
        &self.config
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Encoder output per node type, `(rows, out_dim)`.
    pub fn encode(&self, features: &NodeMap, adjacency: &AdjacencyMap) -> Result<NodeMap> {
        self.encoder.forward(features, adjacency, self.training)
    }

    pub fn decode(
        &self,
        z: &NodeMap,
        edges: &EdgeIndex,
        edge_type: &EdgeType,
        sigmoid: bool,
    ) -> Result<Tensor> {
        self.router.decode(z, edges, edge_type, sigmoid)
    }

    pub fn decode_all_relation(
        &self,
        z: &NodeMap,
        edges: &EdgeIndexMap,
        sigmoid: bool,
    ) -> Result<BTreeMap<String, Tensor>> {
        self.router.decode_all_relation(z, edges, sigmoid)
    }

    pub fn recon_loss<R: Rng + ?Sized>(
        &self,
        z: &NodeMap,
        edge_type: &EdgeType,
        pos: &EdgeIndex,
        neg: Option<&EdgeIndex>,
        rng: &mut R,
    ) -> Result<Tensor> {
        loss::recon_loss(&self.router, z, edge_type, pos, neg, rng)
    }

    pub fn recon_loss_all_relation<R: Rng + ?Sized>(
        &self,
        z: &NodeMap,
        edges: &EdgeIndexMap,
        reduce: ReconReduction,
        rng: &mut R,
    ) -> Result<Tensor> {
        loss::recon_loss_all_relation(
            &self.router,
            z,
            edges,
            reduce,
            self.config.edge_types.len(),
            rng,
        )
    }
}
