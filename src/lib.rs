//! Heterogeneous graph variational autoencoder for multi-relational link
//! prediction.
//!
//! `hetero-vgae` encodes graphs with several node types (drugs, proteins, ...)
//! and several relations per node-type pair (side effects, targets, ...) into a
//! Gaussian latent per node, then scores candidate edges with
//! relation-specific decoders. Tensors and autodiff come from candle.
//!
//! # Modules
//!
//! - [`hetero`]: Node/edge type identifiers, edge batches, typed maps
//! - [`sparse`]: COO adjacency with sparse-dense multiply
//! - [`conv`]: Relation graph convolutions and the heterogeneous layer
//! - [`encoder`]: Stacked heterogeneous encoder
//! - [`latent`]: Gaussian latents and reparameterization
//! - [`decoder`]: Bilinear, DEDICOM and inner-product scorers, relation routing
//! - [`loss`]: KL and reconstruction losses
//! - [`sampling`]: Negative edge sampling
//! - [`model`], [`augment`], [`gae`]: The autoencoders
//! - [`config`]: Serde configs
//!
//! # Decoders
//!
//! | Family | Score | Use |
//! |--------|-------|-----|
//! | `bilinear` | `zᵢᵀ W_r zⱼ` | asymmetric relations (drug → protein) |
//! | `dedicom` | `zᵢᵀ D_r R D_r zⱼ` | many related side effects sharing `R` |
//! | `inner` | `zᵢ · zⱼ` | symmetric, parameter-free |
//!
//! # Example
//!
//! ```rust,ignore
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//! use hetero_vgae::{HeteroVgae, KlReduction, ReconReduction, VgaeConfig};
//! use rand::SeedableRng;
//!
//! let config = VgaeConfig::from_path("model.json")?;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let model = HeteroVgae::new(config, vb)?;
//!
//! let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
//! let out = model.encode(&features, &adjacency, &mut rng)?;
//! let loss = (model.recon_loss_all_relation(&out.z, &edges, ReconReduction::Sum, &mut rng)?
//!     + model.kl_loss_all(&out.latent, &KlReduction::Sum)?)?;
//! ```
//!
//! # References
//!
//! - Kipf & Welling (2016). "Variational Graph Auto-Encoders"
//! - Zitnik, Agrawal & Leskovec (2018). "Modeling polypharmacy side effects
//!   with graph convolutional networks"

pub mod augment;
pub mod config;
pub mod conv;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod gae;
pub mod hetero;
pub mod latent;
pub mod loss;
pub mod model;
pub mod sampling;
pub mod sparse;

pub use augment::AugmentedHeteroVgae;
pub use config::{AugmentConfig, VgaeConfig};
pub use decoder::{DecoderKind, DecoderRouter, EdgeScorer};
pub use error::{Error, Result};
pub use gae::HeteroGae;
pub use hetero::{AdjacencyMap, EdgeIndex, EdgeIndexMap, EdgeKey, EdgeType, NodeMap, NodeType};
pub use latent::{LatentEncoderKind, LatentState};
pub use loss::{KlReduction, ReconReduction};
pub use model::{Encoded, HeteroVgae};
pub use sampling::negative_sampling;
pub use sparse::SparseAdjacency;
