//! Heterogeneous variational graph autoencoder.
//!
//! ```text
//! features ─► HeteroEncoder ─► LatentProjector ─► (μ, log σ) ─► z = μ + ε·σ
//!                                                                   │
//!                                   DecoderRouter ◄─────────────────┘
//! ```
//!
//! The model owns parameters only. Each [`encode`](HeteroVgae::encode) call
//! returns the sample together with the [`LatentState`] it was drawn from;
//! the KL losses take that state explicitly.

use std::collections::BTreeMap;

use candle_core::Tensor;
use candle_nn::VarBuilder;
use rand::Rng;
use tracing::info;

use crate::config::VgaeConfig;
use crate::decoder::{DecoderKind, DecoderRouter, EdgeScorer};
use crate::encoder::{EncoderLayout, HeteroEncoder};
use crate::error::{Error, Result};
use crate::hetero::{AdjacencyMap, EdgeIndex, EdgeIndexMap, EdgeType, NodeMap, NodeType};
use crate::latent::{self, LatentProjector, LatentState};
use crate::loss::{self, KlReduction, ReconReduction};

/// Output of [`HeteroVgae::encode`].
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Latent sample per node type.
    pub z: NodeMap,
    /// Distribution the sample was drawn from.
    pub latent: LatentState,
}

/// Heterogeneous VGAE.
pub struct HeteroVgae {
    config: VgaeConfig,
    encoder: HeteroEncoder,
    projector: LatentProjector,
    router: DecoderRouter,
    training: bool,
}

impl HeteroVgae {
    /// Build the model; parameters are registered in `vb`.
    ///
    /// Variables live under `encoder.*`, `latent.*` and `decoder.*`.
    pub fn new(config: VgaeConfig, vb: VarBuilder) -> Result<Self> {
        let latent_dims = config.latent_dims();
        Self::with_latent_dims(config, latent_dims, vb)
    }

    /// Build with explicit per-node-type latent widths.
    pub(crate) fn with_latent_dims(
        config: VgaeConfig,
        latent_dims: BTreeMap<NodeType, usize>,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        let hidden_dim = config
            .final_hidden_dim()
            .ok_or_else(|| Error::InvalidConfig("hidden_dims is empty".into()))?;

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
        let projector = LatentProjector::new(
            config.latent_encoder,
            &config.edge_types,
            hidden_dim,
            config.out_dim,
            &latent_dims,
            vb.pp("latent"),
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
            decoders = config.decoder_2_relation.len(),
            layers = config.num_layer,
            out_dim = config.out_dim,
            latent_encoder = %config.latent_encoder,
            "built heterogeneous VGAE"
        );

        Ok(Self {
            config,
            encoder,
            projector,
            router,
            training: true,
        })
    }

    pub fn config(&self) -> &VgaeConfig {
        &self.config
    }

    pub fn router(&self) -> &DecoderRouter {
        &self.router
    }

    /// Replace the scorer of a decoder family.
    pub fn register_scorer(&mut self, kind: DecoderKind, scorer: Box<dyn EdgeScorer>) {
        self.router.register_scorer(kind, scorer);
    }

    /// Training mode enables dropout. Models start in training mode.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Encoder hidden state, before the latent projection.
    pub fn hidden(&self, features: &NodeMap, adjacency: &AdjacencyMap) -> Result<NodeMap> {
        self.encoder.forward(features, adjacency, self.training)
    }

    /// Gaussian parameters per node type, without sampling.
    pub fn latent(&self, features: &NodeMap, adjacency: &AdjacencyMap) -> Result<LatentState> {
        let hidden = self.hidden(features, adjacency)?;
        self.projector.forward(&hidden, adjacency)
    }

    /// Encode features into a latent sample per node type.
    ///
    /// # Arguments
    /// - `features`: `(rows, in_dim)` per node type
    /// - `adjacency`: Transposed adjacency per edge type
    /// - `rng`: Noise source of the reparameterization
    pub fn encode<R: Rng + ?Sized>(
        &self,
        features: &NodeMap,
        adjacency: &AdjacencyMap,
        rng: &mut R,
    ) -> Result<Encoded> {
        let latent = self.latent(features, adjacency)?;
        let z = latent::reparameterize(&latent, rng)?;
        Ok(Encoded { z, latent })
    }

    /// Draw `mean + ε · exp(log_std)` from an existing state.
    pub fn reparameterize<R: Rng + ?Sized>(
        &self,
        state: &LatentState,
        rng: &mut R,
    ) -> Result<NodeMap> {
        latent::reparameterize(state, rng)
    }

    /// Scores of one edge batch.
    pub fn decode(
        &self,
        z: &NodeMap,
        edges: &EdgeIndex,
        edge_type: &EdgeType,
        sigmoid: bool,
    ) -> Result<Tensor> {
        self.router.decode(z, edges, edge_type, sigmoid)
    }

    /// Scores of every scorable batch, keyed by relation label.
    pub fn decode_all_relation(
        &self,
        z: &NodeMap,
        edges: &EdgeIndexMap,
        sigmoid: bool,
    ) -> Result<BTreeMap<String, Tensor>> {
        self.router.decode_all_relation(z, edges, sigmoid)
    }

    /// KL loss of one node type; see [`loss::kl_loss`].
    pub fn kl_loss(
        &self,
        state: &LatentState,
        node_type: &NodeType,
        mean: Option<&Tensor>,
        log_std: Option<&Tensor>,
    ) -> Result<Tensor> {
        loss::kl_loss(state, node_type, mean, log_std)
    }

    pub fn kl_loss_all(&self, state: &LatentState, reduce: &KlReduction) -> Result<Tensor> {
        loss::kl_loss_all(state, reduce)
    }

    /// Reconstruction loss of one edge type; negatives are sampled when
    /// `neg` is `None`.
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

    /// Reconstruction loss over all scorable batches. [`ReconReduction::Mean`]
    /// divides by the number of configured edge types.
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
