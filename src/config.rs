//! Model configuration.
//!
//! Configs are plain serde structs, loadable from JSON:
//!
//! ```json
//! {
//!   "in_dims": { "drug": 64, "protein": 32 },
//!   "hidden_dims": [64, 32],
//!   "out_dim": 16,
//!   "num_layer": 2,
//!   "node_types": ["drug", "protein"],
//!   "edge_types": [
//!     { "src_type": "drug", "relation": "targets", "dst_type": "protein" }
//!   ],
//!   "decoder_2_relation": { "bilinear": ["targets"] },
//!   "relation_2_decoder": { "targets": "bilinear" }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::decoder::resolve_decoder_mapping;
use crate::error::{Error, Result};
use crate::hetero::{EdgeType, NodeType};
use crate::latent::LatentEncoderKind;

fn default_dropout() -> f32 {
    0.1
}

fn default_augment_dim() -> usize {
    1024
}

/// Configuration of [`HeteroVgae`](crate::HeteroVgae) and
/// [`HeteroGae`](crate::HeteroGae).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VgaeConfig {
    /// Input feature width per node type.
    pub in_dims: BTreeMap<NodeType, usize>,
    /// Encoder width per layer.
    pub hidden_dims: Vec<usize>,
    /// Latent width.
    pub out_dim: usize,
    /// Encoder depth; must equal `hidden_dims.len()`.
    pub num_layer: usize,
    pub node_types: Vec<NodeType>,
    pub edge_types: Vec<EdgeType>,
    /// Decoder family name → relation labels.
    pub decoder_2_relation: BTreeMap<String, Vec<String>>,
    /// Relation label → decoder family name.
    pub relation_2_decoder: BTreeMap<String, String>,
    /// Latent projection mode (default: gconv).
    #[serde(default)]
    pub latent_encoder: LatentEncoderKind,
    /// Dropout probability during training (default: 0.1).
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    /// Apply ReLU after the last encoder layer too (default: false).
    #[serde(default)]
    pub activate_final_layer: bool,
}

impl VgaeConfig {
    /// A config with a single encoder layer of width `out_dim` and no
    /// relations; fill in the rest with the `with_*` setters.
    pub fn new(
        node_types: impl IntoIterator<Item = NodeType>,
        in_dims: BTreeMap<NodeType, usize>,
        out_dim: usize,
    ) -> Self {
        Self {
            in_dims,
            hidden_dims: vec![out_dim],
            out_dim,
            num_layer: 1,
            node_types: node_types.into_iter().collect(),
            edge_types: Vec::new(),
            decoder_2_relation: BTreeMap::new(),
            relation_2_decoder: BTreeMap::new(),
            latent_encoder: LatentEncoderKind::default(),
            dropout: default_dropout(),
            activate_final_layer: false,
        }
    }

    /// Set the encoder widths; `num_layer` follows.
    pub fn with_hidden_dims(mut self, hidden_dims: Vec<usize>) -> Self {
        self.num_layer = hidden_dims.len();
        self.hidden_dims = hidden_dims;
        self
    }

    pub fn with_edge_types(mut self, edge_types: Vec<EdgeType>) -> Self {
        self.edge_types = edge_types;
        self
    }

    /// Assign `relations` to the decoder family `family`, updating both
    /// mappings.
    pub fn with_decoder<I, S>(mut self, family: &str, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let relations: Vec<String> = relations.into_iter().map(Into::into).collect();
        for relation in &relations {
            self.relation_2_decoder
                .insert(relation.clone(), family.to_string());
        }
        self.decoder_2_relation
            .entry(family.to_string())
            .or_default()
            .extend(relations);
        self
    }

    pub fn with_latent_encoder(mut self, kind: LatentEncoderKind) -> Self {
        self.latent_encoder = kind;
        self
    }

    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_activate_final_layer(mut self, activate: bool) -> Self {
        self.activate_final_layer = activate;
        self
    }

    /// Parse a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Width of the encoder output.
    pub fn final_hidden_dim(&self) -> Option<usize> {
        self.hidden_dims.last().copied()
    }

    /// Latent width of every node type: `out_dim` throughout.
    pub fn latent_dims(&self) -> BTreeMap<NodeType, usize> {
        self.node_types
            .iter()
            .map(|nt| (nt.clone(), self.out_dim))
            .collect()
    }

    /// Check the config for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.num_layer == 0 {
            return Err(Error::InvalidConfig("num_layer must be at least 1".into()));
        }
        if self.hidden_dims.len() != self.num_layer {
            return Err(Error::InvalidConfig(format!(
                "hidden_dims has {} entries but num_layer is {}",
                self.hidden_dims.len(),
                self.num_layer
            )));
        }
        if self.hidden_dims.contains(&0) {
            return Err(Error::InvalidConfig("hidden_dims must be positive".into()));
        }
        if self.out_dim < 2 {
            return Err(Error::InvalidConfig(format!(
                "out_dim must be at least 2, got {}",
                self.out_dim
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!(
                "dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }

        let declared: BTreeSet<&NodeType> = self.node_types.iter().collect();
        if declared.len() != self.node_types.len() {
            return Err(Error::InvalidConfig("node_types contains duplicates".into()));
        }
        for node_type in &self.node_types {
            match self.in_dims.get(node_type) {
                Some(0) => {
                    return Err(Error::InvalidConfig(format!(
                        "input dim of `{node_type}` must be positive"
                    )))
                }
                Some(_) => {}
                None => {
                    return Err(Error::InvalidConfig(format!(
                        "no input dim for node type `{node_type}`"
                    )))
                }
            }
        }

        let mut seen = BTreeSet::new();
        for edge_type in &self.edge_types {
            for endpoint in [&edge_type.src_type, &edge_type.dst_type] {
                if !declared.contains(endpoint) {
                    return Err(Error::UnknownNodeType(format!(
                        "{endpoint} (endpoint of {edge_type})"
                    )));
                }
            }
            if !seen.insert(edge_type) {
                return Err(Error::InvalidConfig(format!(
                    "edge type {edge_type} declared twice"
                )));
            }
        }

        // Edge types sharing a relation label share encoder weights, so their
        // first-layer source widths must agree.
        let mut relation_widths: BTreeMap<&str, (&EdgeType, usize)> = BTreeMap::new();
        for edge_type in &self.edge_types {
            let width = self.in_dims.get(&edge_type.src_type).copied().unwrap_or_default();
            match relation_widths.get(edge_type.relation.as_str()) {
                Some(&(first, first_width)) if first_width != width => {
                    return Err(Error::InvalidConfig(format!(
                        "relation `{}` joins {first} (input dim {first_width}) and \
                         {edge_type} (input dim {width}); shared relations need equal \
                         source widths",
                        edge_type.relation
                    )));
                }
                Some(_) => {}
                None => {
                    relation_widths.insert(edge_type.relation.as_str(), (edge_type, width));
                }
            }
        }

        resolve_decoder_mapping(&self.decoder_2_relation, &self.relation_2_decoder)?;
        Ok(())
    }
}

/// Configuration of [`AugmentedHeteroVgae`](crate::AugmentedHeteroVgae).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentConfig {
    #[serde(flatten)]
    pub base: VgaeConfig,
    /// Width of the external features (default: 1024).
    #[serde(default = "default_augment_dim")]
    pub augment_dim: usize,
    /// Node type whose latents get the projected features appended.
    pub augmented_node_type: NodeType,
}

impl AugmentConfig {
    pub fn new(base: VgaeConfig, augmented_node_type: impl Into<NodeType>) -> Self {
        Self {
            base,
            augment_dim: default_augment_dim(),
            augmented_node_type: augmented_node_type.into(),
        }
    }

    pub fn with_augment_dim(mut self, augment_dim: usize) -> Self {
        self.augment_dim = augment_dim;
        self
    }

    /// Width of the projected features, `out_dim / 2`.
    pub fn projection_dim(&self) -> usize {
        self.base.out_dim / 2
    }

    /// Latent widths: `out_dim / 2` for the augmented node type, `out_dim`
    /// elsewhere.
    pub fn latent_dims(&self) -> BTreeMap<NodeType, usize> {
        let mut dims = self.base.latent_dims();
        dims.insert(self.augmented_node_type.clone(), self.projection_dim());
        dims
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if self.base.out_dim % 2 != 0 {
            return Err(Error::InvalidConfig(format!(
                "augmentation needs an even out_dim, got {}",
                self.base.out_dim
            )));
        }
        if self.augment_dim == 0 {
            return Err(Error::InvalidConfig("augment_dim must be positive".into()));
        }
        if !self.base.node_types.contains(&self.augmented_node_type) {
            return Err(Error::UnknownNodeType(self.augmented_node_type.to_string()));
        }
        Ok(())
    }
}
