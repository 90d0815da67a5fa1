//! Variational and reconstruction losses.
//!
//! # KL divergence
//!
//! Closed form against the standard normal prior, averaged over nodes:
//!
//! ```text
//! KL = -1/2 · mean_i Σ_j (1 + 2·log σ_ij − μ_ij² − σ_ij²)
//! ```
//!
//! # Reconstruction
//!
//! Binary cross-entropy over observed edges and sampled non-edges:
//!
//! ```text
//! L = −mean log(p_pos + ε) − mean log(1 − p_neg + ε),   ε = 1e-15
//! ```

use std::collections::BTreeMap;

use candle_core::{DType, Tensor};
use rand::Rng;
use tracing::debug;

use crate::decoder::DecoderRouter;
use crate::error::{Error, Result};
use crate::hetero::{node_tensor, scorable_edges, EdgeIndex, EdgeIndexMap, EdgeType, NodeMap, NodeType};
use crate::latent::{clamp_log_std, LatentState};
use crate::sampling::negative_sampling;

/// Guard against `log(0)`.
pub const EPS: f64 = 1e-15;

/// How [`kl_loss_all`] combines node types.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum KlReduction {
    /// Plain sum.
    #[default]
    Sum,
    /// Weighted sum; every node type needs a weight.
    Ratio(BTreeMap<NodeType, f64>),
}

/// How [`recon_loss_all_relation`] combines edge types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconReduction {
    /// Plain sum.
    #[default]
    Sum,
    /// Sum divided by the number of edge types the model was built with.
    Mean,
}

/// KL divergence of `N(mean, exp(log_std)²)` from `N(0, 1)`.
///
/// `log_std` is clamped first.
pub fn kl_divergence(mean: &Tensor, log_std: &Tensor) -> Result<Tensor> {
    let log_std = clamp_log_std(log_std)?;
    let inner = ((log_std.affine(2.0, 1.0)? - mean.sqr()?)? - log_std.exp()?.sqr()?)?;
    Ok(inner.sum(1)?.mean_all()?.affine(-0.5, 0.0)?)
}

/// KL loss of one node type.
///
/// `mean` / `log_std` default to the values in `state`.
pub fn kl_loss(
    state: &LatentState,
    node_type: &NodeType,
    mean: Option<&Tensor>,
    log_std: Option<&Tensor>,
) -> Result<Tensor> {
    let mean = match mean {
        Some(mean) => mean,
        None => state.mean(node_type)?,
    };
    let log_std = match log_std {
        Some(log_std) => log_std,
        None => state.log_std(node_type)?,
    };
    kl_divergence(mean, log_std)
}

/// KL loss over every node type of `state`.
pub fn kl_loss_all(state: &LatentState, reduce: &KlReduction) -> Result<Tensor> {
    if state.is_empty() {
        return Err(Error::Precondition(
            "KL loss needs the latent state of an encode call".into(),
        ));
    }

    let mut total: Option<Tensor> = None;
    for node_type in state.node_types() {
        let kl = kl_loss(state, node_type, None, None)?;
        let term = match reduce {
            KlReduction::Sum => kl,
            KlReduction::Ratio(weights) => {
                let w = weights
                    .get(node_type)
                    .ok_or_else(|| Error::MissingWeight(node_type.to_string()))?;
                kl.affine(*w, 0.0)?
            }
        };
        total = Some(match total {
            Some(acc) => (acc + term)?,
            None => term,
        });
    }
    debug!(node_types = state.means().len(), ?reduce, "kl loss");
    total.ok_or_else(|| Error::Precondition("empty latent state".into()))
}

/// Probabilities of `edges`; `None` for an empty batch.
fn edge_probs(
    router: &DecoderRouter,
    z: &NodeMap,
    edges: &EdgeIndex,
    edge_type: &EdgeType,
) -> Result<Option<Tensor>> {
    if edges.is_empty() {
        return Ok(None);
    }
    router.decode(z, edges, edge_type, true).map(Some)
}

fn zero_scalar(z: &NodeMap, edge_type: &EdgeType) -> Result<Tensor> {
    let like = node_tensor(z, &edge_type.src_type)?;
    Ok(Tensor::zeros((), like.dtype(), like.device())?)
}

/// `−mean log(p + ε)`, or zero for an empty batch.
fn positive_term(probs: &Tensor) -> Result<Tensor> {
    if probs.elem_count() == 0 {
        return Ok(Tensor::zeros((), probs.dtype(), probs.device())?);
    }
    Ok((probs + EPS)?.log()?.mean_all()?.neg()?)
}

/// `−mean log(1 − p + ε)`, or zero for an empty batch.
fn negative_term(probs: &Tensor) -> Result<Tensor> {
    if probs.elem_count() == 0 {
        return Ok(Tensor::zeros((), probs.dtype(), probs.device())?);
    }
    Ok((probs.affine(-1.0, 1.0)? + EPS)?.log()?.mean_all()?.neg()?)
}

/// Reconstruction loss of one edge type.
///
/// Without `neg`, negatives are drawn from `(|src|, |dst|)` with as many
/// edges as `pos`.
pub fn recon_loss<R: Rng + ?Sized>(
    router: &DecoderRouter,
    z: &NodeMap,
    edge_type: &EdgeType,
    pos: &EdgeIndex,
    neg: Option<&EdgeIndex>,
    rng: &mut R,
) -> Result<Tensor> {
    let pos_loss = match edge_probs(router, z, pos, edge_type)? {
        Some(probs) => positive_term(&probs)?,
        None => zero_scalar(z, edge_type)?,
    };

    let sampled;
    let neg = match neg {
        Some(neg) => neg,
        None => {
            let num_src = node_tensor(z, &edge_type.src_type)?.dim(0)?;
            let num_dst = node_tensor(z, &edge_type.dst_type)?.dim(0)?;
            sampled = negative_sampling(pos, (num_src, num_dst), rng);
            &sampled
        }
    };
    let neg_loss = match edge_probs(router, z, neg, edge_type)? {
        Some(probs) => negative_term(&probs)?,
        None => zero_scalar(z, edge_type)?,
    };

    Ok((pos_loss + neg_loss)?)
}

/// Reconstruction loss over every edge type in `edges`, skipping the
/// auxiliary entry.
///
/// `num_edge_types` is the divisor of [`ReconReduction::Mean`].
pub fn recon_loss_all_relation<R: Rng + ?Sized>(
    router: &DecoderRouter,
    z: &NodeMap,
    edges: &EdgeIndexMap,
    reduce: ReconReduction,
    num_edge_types: usize,
    rng: &mut R,
) -> Result<Tensor> {
    let mut total: Option<Tensor> = None;
    let mut scored = 0usize;
    for (edge_type, pos) in scorable_edges(edges) {
        let loss = recon_loss(router, z, edge_type, pos, None, rng)?;
        total = Some(match total {
            Some(acc) => (acc + loss)?,
            None => loss,
        });
        scored += 1;
    }

    let total = match total {
        Some(total) => total,
        None => {
            let device = z
                .values()
                .next()
                .map(|t| t.device().clone())
                .unwrap_or(candle_core::Device::Cpu);
            Tensor::zeros((), DType::F32, &device)?
        }
    };
    debug!(edge_types = scored, ?reduce, "reconstruction loss");

    match reduce {
        ReconReduction::Sum => Ok(total),
        ReconReduction::Mean => {
            if num_edge_types == 0 {
                return Err(Error::Precondition("mean over zero edge types".into()));
            }
            Ok(total.affine(1.0 / num_edge_types as f64, 0.0)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_kl_of_standard_normal_is_zero() {
        let device = Device::Cpu;
        let mean = Tensor::zeros((7, 3), DType::F32, &device).unwrap();
        let log_std = Tensor::zeros((7, 3), DType::F32, &device).unwrap();
        let kl = kl_divergence(&mean, &log_std).unwrap().to_scalar::<f32>().unwrap();
        assert!(kl.abs() < 1e-7);
    }

    #[test]
    fn test_kl_matches_closed_form() {
        let device = Device::Cpu;
        // One node, one dim: mean 1, log_std 0 -> KL = 0.5
        let mean = Tensor::ones((1, 1), DType::F32, &device).unwrap();
        let log_std = Tensor::zeros((1, 1), DType::F32, &device).unwrap();
        let kl = kl_divergence(&mean, &log_std).unwrap().to_scalar::<f32>().unwrap();
        assert!((kl - 0.5).abs() < 1e-6);

        // log_std = ln 2: -0.5 (1 + 2 ln 2 - 0 - 4) = 1.5 - ln 2
        let mean = Tensor::zeros((2, 1), DType::F32, &device).unwrap();
        let log_std = Tensor::full(2f32.ln(), (2, 1), &device).unwrap();
        let kl = kl_divergence(&mean, &log_std).unwrap().to_scalar::<f32>().unwrap();
        assert!((kl - (1.5 - 2f32.ln())).abs() < 1e-5);
    }

    #[test]
    fn test_kl_clamps_supplied_log_std() {
        let device = Device::Cpu;
        let mean = Tensor::zeros((1, 1), DType::F32, &device).unwrap();
        let huge = Tensor::full(40f32, (1, 1), &device).unwrap();
        let ten = Tensor::full(10f32, (1, 1), &device).unwrap();

        let a = kl_divergence(&mean, &huge).unwrap().to_scalar::<f32>().unwrap();
        let b = kl_divergence(&mean, &ten).unwrap().to_scalar::<f32>().unwrap();
        assert!(a.is_finite());
        assert_eq!(a, b);
    }

    #[test]
    fn test_kl_loss_all_requires_state() {
        assert!(matches!(
            kl_loss_all(&LatentState::default(), &KlReduction::Sum),
            Err(Error::Precondition(_))
        ));
    }

    #[test]
    fn test_kl_ratio_weights() {
        let device = Device::Cpu;
        let drug = NodeType::new("drug");
        let protein = NodeType::new("protein");
        let state = LatentState::new(
            NodeMap::from([
                (drug.clone(), Tensor::ones((1, 1), DType::F32, &device).unwrap()),
                (protein.clone(), Tensor::ones((1, 2), DType::F32, &device).unwrap()),
            ]),
            NodeMap::from([
                (drug.clone(), Tensor::zeros((1, 1), DType::F32, &device).unwrap()),
                (protein.clone(), Tensor::zeros((1, 2), DType::F32, &device).unwrap()),
            ]),
        )
        .unwrap();

        // drug KL = 0.5, protein KL = 1.0
        let sum = kl_loss_all(&state, &KlReduction::Sum).unwrap();
        assert!((sum.to_scalar::<f32>().unwrap() - 1.5).abs() < 1e-6);

        let weights = BTreeMap::from([(drug.clone(), 2.0), (protein.clone(), 0.5)]);
        let ratio = kl_loss_all(&state, &KlReduction::Ratio(weights)).unwrap();
        assert!((ratio.to_scalar::<f32>().unwrap() - 1.5).abs() < 1e-6);

        let partial = BTreeMap::from([(drug, 1.0)]);
        assert!(matches!(
            kl_loss_all(&state, &KlReduction::Ratio(partial)),
            Err(Error::MissingWeight(name)) if name == "protein"
        ));
    }

    #[test]
    fn test_bce_terms_at_half() {
        let device = Device::Cpu;
        let half = Tensor::full(0.5f32, 9, &device).unwrap();
        let pos = positive_term(&half).unwrap().to_scalar::<f32>().unwrap();
        let neg = negative_term(&half).unwrap().to_scalar::<f32>().unwrap();
        assert!((pos - std::f32::consts::LN_2).abs() < 1e-6);
        assert!((neg - std::f32::consts::LN_2).abs() < 1e-6);
    }

    fn inner_router() -> DecoderRouter {
        let varmap = candle_nn::VarMap::new();
        let vb = candle_nn::VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let d2r = BTreeMap::from([("inner".to_string(), vec!["combo".to_string()])]);
        let r2d = BTreeMap::from([("combo".to_string(), "inner".to_string())]);
        DecoderRouter::new(4, &d2r, &r2d, vb).unwrap()
    }

    fn zero_latents() -> NodeMap {
        NodeMap::from([(
            NodeType::new("drug"),
            Tensor::zeros((5, 4), DType::F32, &Device::Cpu).unwrap(),
        )])
    }

    #[test]
    fn test_recon_loss_at_half_probability() {
        use rand::SeedableRng;

        let router = inner_router();
        let z = zero_latents();
        let combo = EdgeType::new("drug", "combo", "drug");
        let pos = EdgeIndex::from_pairs([(0, 1), (2, 3)]);
        let neg = EdgeIndex::from_pairs([(1, 4), (3, 0)]);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);

        let loss = recon_loss(&router, &z, &combo, &pos, Some(&neg), &mut rng)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!((loss - 2.0 * std::f32::consts::LN_2).abs() < 1e-5);

        // Sampled negatives score 0.5 as well.
        let sampled = recon_loss(&router, &z, &combo, &pos, None, &mut rng)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!((sampled - 2.0 * std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_empty_positive_set_is_zero() {
        use rand::SeedableRng;

        let router = inner_router();
        let z = zero_latents();
        let combo = EdgeType::new("drug", "combo", "drug");
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);

        let loss = recon_loss(&router, &z, &combo, &EdgeIndex::new(), None, &mut rng).unwrap();
        assert_eq!(loss.to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn test_bce_terms_are_finite_at_extremes() {
        let device = Device::Cpu;
        let zeros = Tensor::zeros(3, DType::F32, &device).unwrap();
        let ones = Tensor::ones(3, DType::F32, &device).unwrap();
        assert!(positive_term(&zeros).unwrap().to_scalar::<f32>().unwrap().is_finite());
        assert!(negative_term(&ones).unwrap().to_scalar::<f32>().unwrap().is_finite());
    }
}
