//! Per-node-type Gaussian latents.
//!
//! The projector turns the encoder's final hidden state into a
//! `(mean, log_std)` pair per node type. Two modes:
//!
//! | Mode | Projection |
//! |------|------------|
//! | [`LatentEncoderKind::GraphConv`] | one [`HeteroConv`] pass of [`SkipGraphConv`]s, width `2·d`, split in halves |
//! | [`LatentEncoderKind::Linear`] | two `Linear → Tanh → Linear` networks per node type |
//!
//! `log_std` is clamped to [`LOG_STD_MAX`] before it leaves this module, so
//! `exp(log_std)` cannot overflow downstream.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::conv::{HeteroConv, SkipGraphConv, WeightSharing};
use crate::error::{Error, Result};
use crate::hetero::{node_tensor, AdjacencyMap, EdgeType, NodeMap, NodeType};

/// Upper bound applied to every `log_std`.
pub const LOG_STD_MAX: f64 = 10.0;

/// Clamp `log_std` to at most [`LOG_STD_MAX`].
pub fn clamp_log_std(log_std: &Tensor) -> candle_core::Result<Tensor> {
    log_std.minimum(LOG_STD_MAX)
}

/// Latent projection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LatentEncoderKind {
    /// Heterogeneous graph convolution producing mean and log-std together.
    #[default]
    #[serde(rename = "gconv")]
    GraphConv,
    /// Independent feed-forward networks per node type.
    #[serde(rename = "linear")]
    Linear,
}

impl FromStr for LatentEncoderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gconv" => Ok(Self::GraphConv),
            "linear" => Ok(Self::Linear),
            other => Err(Error::InvalidConfig(format!(
                "latent encoder type must be `gconv` or `linear`, got `{other}`"
            ))),
        }
    }
}

impl fmt::Display for LatentEncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GraphConv => f.write_str("gconv"),
            Self::Linear => f.write_str("linear"),
        }
    }
}

/// Gaussian parameters of every node type from one encode call.
///
/// Returned by `encode` and handed back to the KL losses; nothing is cached
/// on the model.
#[derive(Debug, Clone, Default)]
pub struct LatentState {
    mean: NodeMap,
    log_std: NodeMap,
}

impl LatentState {
    /// Build a state, clamping every `log_std`.
    ///
    /// Both maps must cover the same node types with equal shapes.
    pub fn new(mean: NodeMap, log_std: NodeMap) -> Result<Self> {
        if mean.len() != log_std.len() {
            return Err(Error::dims("latent node types", mean.len(), log_std.len()));
        }
        let mut clamped = NodeMap::new();
        for (node_type, mu) in &mean {
            let ls = node_tensor(&log_std, node_type)?;
            if mu.dims() != ls.dims() {
                return Err(Error::dims(
                    format!("log_std width of {node_type}"),
                    mu.dim(1)?,
                    ls.dim(1)?,
                ));
            }
            clamped.insert(node_type.clone(), clamp_log_std(ls)?);
        }
        Ok(Self {
            mean,
            log_std: clamped,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn node_types(&self) -> impl Iterator<Item = &NodeType> {
        self.mean.keys()
    }

    pub fn mean(&self, node_type: &NodeType) -> Result<&Tensor> {
        node_tensor(&self.mean, node_type)
    }

    pub fn log_std(&self, node_type: &NodeType) -> Result<&Tensor> {
        node_tensor(&self.log_std, node_type)
    }

    pub fn means(&self) -> &NodeMap {
        &self.mean
    }

    pub fn log_stds(&self) -> &NodeMap {
        &self.log_std
    }
}

/// `Linear → Tanh → Linear`.
struct Mlp {
    hidden: Linear,
    output: Linear,
}

impl Mlp {
    fn new(in_dim: usize, hidden_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            hidden: linear(in_dim, hidden_dim, vb.pp("0"))?,
            output: linear(hidden_dim, out_dim, vb.pp("2"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        self.output.forward(&self.hidden.forward(x)?.tanh()?)
    }
}

enum Projection {
    GraphConv(HeteroConv<SkipGraphConv>),
    Linear(BTreeMap<NodeType, (Mlp, Mlp)>),
}

/// Maps final hidden states to a [`LatentState`].
pub struct LatentProjector {
    projection: Projection,
    latent_dims: BTreeMap<NodeType, usize>,
}

impl LatentProjector {
    /// Create a projector.
    ///
    /// # Arguments
    /// - `kind`: Projection mode
    /// - `edge_types`: Relations of the graph-convolution pass
    /// - `hidden_dim`: Width of the encoder output
    /// - `out_dim`: Nominal latent width; the linear mode's hidden layer is
    ///   `out_dim / 2`
    /// - `latent_dims`: Latent width per node type
    /// - `vb`: Variable builder
    pub fn new(
        kind: LatentEncoderKind,
        edge_types: &[EdgeType],
        hidden_dim: usize,
        out_dim: usize,
        latent_dims: &BTreeMap<NodeType, usize>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let projection = match kind {
            LatentEncoderKind::GraphConv => {
                let in_dims = latent_dims.keys().map(|nt| (nt.clone(), hidden_dim)).collect();
                let out_dims = latent_dims.iter().map(|(nt, d)| (nt.clone(), 2 * d)).collect();
                Projection::GraphConv(HeteroConv::new(
                    edge_types,
                    &in_dims,
                    &out_dims,
                    true,
                    WeightSharing::PerEdgeType,
                    vb,
                )?)
            }
            LatentEncoderKind::Linear => {
                let mut nets = BTreeMap::new();
                for (node_type, &dim) in latent_dims {
                    let vb = vb.pp(node_type.as_str());
                    let mean = Mlp::new(hidden_dim, out_dim / 2, dim, vb.pp("mean"))?;
                    let log_std = Mlp::new(hidden_dim, out_dim / 2, dim, vb.pp("log_std"))?;
                    nets.insert(node_type.clone(), (mean, log_std));
                }
                Projection::Linear(nets)
            }
        };
        Ok(Self {
            projection,
            latent_dims: latent_dims.clone(),
        })
    }

    pub fn kind(&self) -> LatentEncoderKind {
        match self.projection {
            Projection::GraphConv(_) => LatentEncoderKind::GraphConv,
            Projection::Linear(_) => LatentEncoderKind::Linear,
        }
    }

    pub fn latent_dims(&self) -> &BTreeMap<NodeType, usize> {
        &self.latent_dims
    }

    /// Project hidden states to `(mean, log_std)` per node type.
    ///
    /// In graph-convolution mode every row sees its own hidden state through
    /// the skip term. A node type with no incoming edge type gets zeros.
    pub fn forward(&self, hidden: &NodeMap, adjacency: &AdjacencyMap) -> Result<LatentState> {
        let mut mean = NodeMap::new();
        let mut log_std = NodeMap::new();

        match &self.projection {
            Projection::GraphConv(conv) => {
                let out = conv.forward(hidden, adjacency)?;
                for (node_type, &dim) in &self.latent_dims {
                    let both = node_tensor(&out, node_type)?;
                    mean.insert(node_type.clone(), both.narrow(1, 0, dim)?);
                    log_std.insert(node_type.clone(), both.narrow(1, dim, dim)?);
                }
            }
            Projection::Linear(nets) => {
                for (node_type, (mean_net, log_std_net)) in nets {
                    let h = node_tensor(hidden, node_type)?;
                    mean.insert(node_type.clone(), mean_net.forward(h)?);
                    log_std.insert(node_type.clone(), log_std_net.forward(h)?);
                }
            }
        }

        LatentState::new(mean, log_std)
    }
}

/// Draw `mean + ε · exp(log_std)` per node type, `ε ~ N(0, 1)` from `rng`.
pub fn reparameterize<R: Rng + ?Sized>(state: &LatentState, rng: &mut R) -> Result<NodeMap> {
    let mut noise = NodeMap::new();
    for (node_type, log_std) in state.log_stds() {
        let shape = log_std.shape().clone();
        let data: Vec<f32> = (0..shape.elem_count())
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();
        let eps = Tensor::from_vec(data, shape, log_std.device())?.to_dtype(log_std.dtype())?;
        noise.insert(node_type.clone(), eps);
    }
    reparameterize_with_noise(state, &noise)
}

/// Reparameterize with caller-provided noise of the same shapes.
pub fn reparameterize_with_noise(state: &LatentState, noise: &NodeMap) -> Result<NodeMap> {
    let mut z = NodeMap::new();
    for (node_type, mean) in state.means() {
        let log_std = state.log_std(node_type)?;
        let eps = node_tensor(noise, node_type)?;
        let sample = (mean + eps.mul(&log_std.exp()?)?)?;
        z.insert(node_type.clone(), sample);
    }
    Ok(z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hetero::EdgeIndex;
    use crate::sparse::SparseAdjacency;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn drug() -> NodeType {
        NodeType::new("drug")
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("gconv".parse::<LatentEncoderKind>().unwrap(), LatentEncoderKind::GraphConv);
        assert_eq!("linear".parse::<LatentEncoderKind>().unwrap(), LatentEncoderKind::Linear);
        assert!(matches!(
            "mlp".parse::<LatentEncoderKind>(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_state_clamps_log_std() {
        let device = Device::Cpu;
        let mean = NodeMap::from([(drug(), Tensor::zeros((2, 2), DType::F32, &device).unwrap())]);
        let log_std = NodeMap::from([(
            drug(),
            Tensor::from_vec(vec![50.0f32, -3.0, 10.0, 9.5], (2, 2), &device).unwrap(),
        )]);

        let state = LatentState::new(mean, log_std).unwrap();
        let got = state.log_std(&drug()).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(got, vec![vec![10.0, -3.0], vec![10.0, 9.5]]);
    }

    #[test]
    fn test_state_shape_mismatch() {
        let device = Device::Cpu;
        let mean = NodeMap::from([(drug(), Tensor::zeros((2, 2), DType::F32, &device).unwrap())]);
        let log_std = NodeMap::from([(drug(), Tensor::zeros((2, 3), DType::F32, &device).unwrap())]);
        assert!(LatentState::new(mean, log_std).is_err());
    }

    #[test]
    fn test_zero_noise_returns_mean() {
        let device = Device::Cpu;
        let mu = Tensor::randn(0f32, 1f32, (3, 4), &device).unwrap();
        let state = LatentState::new(
            NodeMap::from([(drug(), mu.clone())]),
            NodeMap::from([(drug(), Tensor::randn(0f32, 1f32, (3, 4), &device).unwrap())]),
        )
        .unwrap();
        let noise = NodeMap::from([(drug(), Tensor::zeros((3, 4), DType::F32, &device).unwrap())]);

        let z = reparameterize_with_noise(&state, &noise).unwrap();
        assert_eq!(z[&drug()].to_vec2::<f32>().unwrap(), mu.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_reparameterize_is_seeded() {
        let device = Device::Cpu;
        let state = LatentState::new(
            NodeMap::from([(drug(), Tensor::zeros((5, 3), DType::F32, &device).unwrap())]),
            NodeMap::from([(drug(), Tensor::zeros((5, 3), DType::F32, &device).unwrap())]),
        )
        .unwrap();

        let a = reparameterize(&state, &mut ChaCha8Rng::seed_from_u64(7)).unwrap();
        let b = reparameterize(&state, &mut ChaCha8Rng::seed_from_u64(7)).unwrap();
        let c = reparameterize(&state, &mut ChaCha8Rng::seed_from_u64(8)).unwrap();

        let a = a[&drug()].to_vec2::<f32>().unwrap();
        assert_eq!(a, b[&drug()].to_vec2::<f32>().unwrap());
        assert_ne!(a, c[&drug()].to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_linear_projection_widths() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let protein = NodeType::new("protein");
        let dims = BTreeMap::from([(drug(), 4), (protein.clone(), 8)]);

        let projector =
            LatentProjector::new(LatentEncoderKind::Linear, &[], 6, 8, &dims, vb).unwrap();
        assert_eq!(projector.kind(), LatentEncoderKind::Linear);

        let hidden = NodeMap::from([
            (drug(), Tensor::randn(0f32, 1f32, (3, 6), &device).unwrap()),
            (protein.clone(), Tensor::randn(0f32, 1f32, (2, 6), &device).unwrap()),
        ]);
        let state = projector.forward(&hidden, &AdjacencyMap::new()).unwrap();
        assert_eq!(state.mean(&drug()).unwrap().dims(), &[3, 4]);
        assert_eq!(state.log_std(&protein).unwrap().dims(), &[2, 8]);
    }

    #[test]
    fn test_gconv_projection_splits_channels() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let combo = EdgeType::new("drug", "combo", "drug");
        let dims = BTreeMap::from([(drug(), 3)]);

        let projector = LatentProjector::new(
            LatentEncoderKind::GraphConv,
            std::slice::from_ref(&combo),
            5,
            3,
            &dims,
            vb,
        )
        .unwrap();

        let hidden = NodeMap::from([(drug(), Tensor::randn(0f32, 1f32, (4, 5), &device).unwrap())]);
        let adjacency = AdjacencyMap::from([(
            combo,
            SparseAdjacency::from_edge_index(
                &EdgeIndex::from_pairs([(0, 1), (1, 0), (2, 3)]),
                4,
                4,
                &device,
            )
            .unwrap(),
        )]);

        let state = projector.forward(&hidden, &adjacency).unwrap();
        assert_eq!(state.mean(&drug()).unwrap().dims(), &[4, 3]);
        assert_eq!(state.log_std(&drug()).unwrap().dims(), &[4, 3]);
    }

    #[test]
    fn test_gconv_projection_uses_own_hidden_state() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let protein = NodeType::new("protein");
        let targets = EdgeType::new("drug", "targets", "protein");
        let dims = BTreeMap::from([(drug(), 3), (protein.clone(), 3)]);

        let projector = LatentProjector::new(
            LatentEncoderKind::GraphConv,
            std::slice::from_ref(&targets),
            5,
            3,
            &dims,
            vb,
        )
        .unwrap();

        let hidden = NodeMap::from([
            (drug(), Tensor::randn(0f32, 1f32, (2, 5), &device).unwrap()),
            (protein.clone(), Tensor::randn(0f32, 1f32, (3, 5), &device).unwrap()),
        ]);
        // Only protein 0 has a neighbour.
        let adjacency = AdjacencyMap::from([(
            targets,
            SparseAdjacency::from_edge_index(&EdgeIndex::from_pairs([(0, 0)]), 2, 3, &device)
                .unwrap(),
        )]);

        let state = projector.forward(&hidden, &adjacency).unwrap();
        let mean = state.mean(&protein).unwrap().to_vec2::<f32>().unwrap();
        let log_std = state.log_std(&protein).unwrap().to_vec2::<f32>().unwrap();
        assert!(mean[2].iter().any(|v| v.abs() > 1e-6));
        assert!(log_std[2].iter().any(|v| v.abs() > 1e-6));

        // Isolated rows differ because their own hidden states differ.
        assert_ne!(mean[1], mean[2]);

        // No edge type points at drugs.
        let drug_mean = state.mean(&drug()).unwrap().abs().unwrap().sum_all().unwrap();
        assert_eq!(drug_mean.to_scalar::<f32>().unwrap(), 0.0);
    }
}
