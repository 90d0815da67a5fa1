//! VGAE with external features appended to one node type's latents.
//!
//! The augmented node type gets a latent of width `out_dim / 2`; external
//! features of width `augment_dim` are projected to the other half and
//! concatenated, so every latent the decoders see is `out_dim` wide.

use std::ops::{Deref, DerefMut};

use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
use tracing::debug;

use crate::config::AugmentConfig;
use crate::error::{Error, Result};
use crate::hetero::{node_tensor, NodeMap, NodeType};
use crate::model::HeteroVgae;

/// [`HeteroVgae`] with a feature-augmentation hook.
///
/// Derefs to the wrapped model for encoding, decoding and losses; call
/// [`augment_latent`](Self::augment_latent) between `encode` and `decode`.
pub struct AugmentedHeteroVgae {
    vgae: HeteroVgae,
    linear_augment: Linear,
    augment_dim: usize,
    augmented_node_type: NodeType,
    out_dim: usize,
}

impl AugmentedHeteroVgae {
    /// Build the model. The projection lives under `augment`.
    pub fn new(config: AugmentConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let latent_dims = config.latent_dims();
        let projection_dim = config.projection_dim();
        let linear_augment = linear(config.augment_dim, projection_dim, vb.pp("augment"))?;

        let AugmentConfig {
            base,
            augment_dim,
            augmented_node_type,
        } = config;
        let out_dim = base.out_dim;
        let vgae = HeteroVgae::with_latent_dims(base, latent_dims, vb)?;

        Ok(Self {
            vgae,
            linear_augment,
            augment_dim,
            augmented_node_type,
            out_dim,
        })
    }

    pub fn augmented_node_type(&self) -> &NodeType {
        &self.augmented_node_type
    }

    pub fn augment_dim(&self) -> usize {
        self.augment_dim
    }

    pub fn into_inner(self) -> HeteroVgae {
        self.vgae
    }

    /// Project `augment` and append it to `z[node_type]`.
    ///
    /// # Arguments
    /// - `z`: Latent sample from `encode`
    /// - `node_type`: Node type to widen
    /// - `augment`: External features, `(rows, augment_dim)`
    ///
    /// # Errors
    /// `DimensionMismatch` if `augment` has the wrong width or row count, or
    /// if the widened latent is not `out_dim` wide.
    pub fn augment_latent(
        &self,
        z: &NodeMap,
        node_type: &NodeType,
        augment: &Tensor,
    ) -> Result<NodeMap> {
        let latent = node_tensor(z, node_type)?;
        let (rows, width) = augment.dims2()?;
        if width != self.augment_dim {
            return Err(Error::dims("augment width", self.augment_dim, width));
        }
        if rows != latent.dim(0)? {
            return Err(Error::dims(
                format!("augment rows of {node_type}"),
                latent.dim(0)?,
                rows,
            ));
        }

        let projected = self.linear_augment.forward(augment)?;
        let widened = Tensor::cat(&[latent, &projected], 1)?;
        let got = widened.dim(1)?;
        if got != self.out_dim {
            return Err(Error::dims(format!("augmented latent of {node_type}"), self.out_dim, got));
        }
        debug!(node_type = %node_type, width = got, "augmented latent");

        let mut out = z.clone();
        out.insert(node_type.clone(), widened);
        Ok(out)
    }
}

impl Deref for AugmentedHeteroVgae {
    type Target = HeteroVgae;

    fn deref(&self) -> &HeteroVgae {
        &self.vgae
    }
}

impl DerefMut for AugmentedHeteroVgae {
    fn deref_mut(&mut self) -> &mut HeteroVgae {
        &mut self.vgae
    }
}
