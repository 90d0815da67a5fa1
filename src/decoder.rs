//! Relation-specific edge decoders.
//!
//! Every relation label is assigned to one decoder family. The family's
//! scorer turns the latents of an edge's endpoints into one raw score:
//!
//! | Family | Score | Parameters |
//! |--------|-------|------------|
//! | [`DecoderKind::Bilinear`] | `zᵢᵀ W_r zⱼ` | one `(d, d)` matrix per relation |
//! | [`DecoderKind::Dedicom`] | `zᵢᵀ D_r R D_r zⱼ` | shared `(d, d)` R, diagonal `D_r` per relation |
//! | [`DecoderKind::InnerProduct`] | `zᵢ · zⱼ` | none |
//!
//! DEDICOM follows Decagon (Zitnik et al., "Modeling polypharmacy side
//! effects with graph convolutional networks", 2018): the global R captures
//! interactions shared by all side effects, `D_r` weighs the latent
//! dimensions per side effect.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use candle_core::Tensor;
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conv::glorot;
use crate::error::{Error, Result};
use crate::hetero::{node_tensor, scorable_edges, EdgeIndex, EdgeIndexMap, EdgeType, NodeMap};

/// Decoder family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DecoderKind {
    #[serde(rename = "bilinear")]
    Bilinear,
    #[serde(rename = "dedicom")]
    Dedicom,
    #[serde(rename = "inner")]
    InnerProduct,
}

impl FromStr for DecoderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bilinear" => Ok(Self::Bilinear),
            "dedicom" => Ok(Self::Dedicom),
            "inner" => Ok(Self::InnerProduct),
            other => Err(Error::UnknownDecoder(other.to_string())),
        }
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bilinear => f.write_str("bilinear"),
            Self::Dedicom => f.write_str("dedicom"),
            Self::InnerProduct => f.write_str("inner"),
        }
    }
}

/// Scores a batch of edges of one relation.
pub trait EdgeScorer {
    /// Raw scores, one per edge, shape `(E,)`.
    ///
    /// # Arguments
    /// - `z`: `(source latents, destination latents)`
    /// - `edges`: Row indices into the two latents
    /// - `relation`: Relation label, selecting relation-specific parameters
    fn score(&self, z: (&Tensor, &Tensor), edges: &EdgeIndex, relation: &str) -> Result<Tensor>;
}

/// Latent rows of both endpoints of every edge, `(E, d)` each.
fn endpoints(z: (&Tensor, &Tensor), edges: &EdgeIndex) -> Result<(Tensor, Tensor)> {
    let (z_src, z_dst) = z;
    let src = z_src.index_select(&edges.src_tensor(z_src.device())?, 0)?;
    let dst = z_dst.index_select(&edges.dst_tensor(z_dst.device())?, 0)?;
    Ok((src, dst))
}

/// `zᵢᵀ W_r zⱼ`.
pub struct BilinearDecoder {
    weights: BTreeMap<String, Tensor>,
}

impl BilinearDecoder {
    pub fn new(dim: usize, relations: &[String], vb: VarBuilder) -> Result<Self> {
        let mut weights = BTreeMap::new();
        for relation in relations {
            let w = vb.pp(relation).get_with_hints((dim, dim), "weight", glorot(dim, dim))?;
            weights.insert(relation.clone(), w);
        }
        Ok(Self { weights })
    }
}

impl EdgeScorer for BilinearDecoder {
    fn score(&self, z: (&Tensor, &Tensor), edges: &EdgeIndex, relation: &str) -> Result<Tensor> {
        let w = self
            .weights
            .get(relation)
            .ok_or_else(|| Error::UnknownRelation(relation.to_string()))?;
        let (src, dst) = endpoints(z, edges)?;
        Ok(src.matmul(w)?.mul(&dst)?.sum(1)?)
    }
}

/// `zᵢᵀ D_r R D_r zⱼ`.
pub struct DedicomDecoder {
    global: Tensor,
    local: BTreeMap<String, Tensor>,
}

impl DedicomDecoder {
    pub fn new(dim: usize, relations: &[String], vb: VarBuilder) -> Result<Self> {
        let global = vb.get_with_hints((dim, dim), "global", glorot(dim, dim))?;
        let mut local = BTreeMap::new();
        for relation in relations {
            let d = vb.pp(relation).get_with_hints((1, dim), "diag", glorot(1, dim))?;
            local.insert(relation.clone(), d);
        }
        Ok(Self { global, local })
    }
}

impl EdgeScorer for DedicomDecoder {
    fn score(&self, z: (&Tensor, &Tensor), edges: &EdgeIndex, relation: &str) -> Result<Tensor> {
        let d = self
            .local
            .get(relation)
            .ok_or_else(|| Error::UnknownRelation(relation.to_string()))?;
        let (src, dst) = endpoints(z, edges)?;
        let left = src.broadcast_mul(d)?.matmul(&self.global)?;
        let right = dst.broadcast_mul(d)?;
        Ok(left.mul(&right)?.sum(1)?)
    }
}

/// `zᵢ · zⱼ`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InnerProductDecoder;

impl EdgeScorer for InnerProductDecoder {
    fn score(&self, z: (&Tensor, &Tensor), edges: &EdgeIndex, _relation: &str) -> Result<Tensor> {
        let (src, dst) = endpoints(z, edges)?;
        Ok(src.mul(&dst)?.sum(1)?)
    }
}

/// Parse and cross-check the two decoder mappings.
///
/// `decoder_2_relation` lists the relations of each family,
/// `relation_2_decoder` names the family of each relation. Every relation
/// must appear on both sides with the same family.
pub fn resolve_decoder_mapping(
    decoder_2_relation: &BTreeMap<String, Vec<String>>,
    relation_2_decoder: &BTreeMap<String, String>,
) -> Result<BTreeMap<DecoderKind, Vec<String>>> {
    let mut by_kind: BTreeMap<DecoderKind, Vec<String>> = BTreeMap::new();
    let mut listed = BTreeSet::new();

    for (family, relations) in decoder_2_relation {
        let kind: DecoderKind = family.parse()?;
        for relation in relations {
            let assigned = relation_2_decoder.get(relation).ok_or_else(|| {
                Error::InconsistentDecoderMapping(format!(
                    "relation `{relation}` listed under `{family}` has no entry in relation_2_decoder"
                ))
            })?;
            if assigned.parse::<DecoderKind>()? != kind {
                return Err(Error::InconsistentDecoderMapping(format!(
                    "relation `{relation}` listed under `{family}` but assigned to `{assigned}`"
                )));
            }
            if !listed.insert(relation.clone()) {
                return Err(Error::InconsistentDecoderMapping(format!(
                    "relation `{relation}` listed more than once"
                )));
            }
        }
        by_kind.insert(kind, relations.clone());
    }

    for (relation, family) in relation_2_decoder {
        family.parse::<DecoderKind>()?;
        if !listed.contains(relation) {
            return Err(Error::InconsistentDecoderMapping(format!(
                "relation `{relation}` assigned to `{family}` is missing from decoder_2_relation"
            )));
        }
    }

    Ok(by_kind)
}

/// Dispatches each relation to its decoder family.
pub struct DecoderRouter {
    relation_2_decoder: BTreeMap<String, DecoderKind>,
    scorers: BTreeMap<DecoderKind, Box<dyn EdgeScorer>>,
}

impl DecoderRouter {
    /// Build the router and the built-in scorer of every listed family.
    ///
    /// # Arguments
    /// - `dim`: Latent width the parametric scorers expect
    /// - `decoder_2_relation`, `relation_2_decoder`: See [`resolve_decoder_mapping`]
    /// - `vb`: Variable builder; each family lives under its name
    pub fn new(
        dim: usize,
        decoder_2_relation: &BTreeMap<String, Vec<String>>,
        relation_2_decoder: &BTreeMap<String, String>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let by_kind = resolve_decoder_mapping(decoder_2_relation, relation_2_decoder)?;

        let mut scorers: BTreeMap<DecoderKind, Box<dyn EdgeScorer>> = BTreeMap::new();
        let mut routes = BTreeMap::new();
        for (kind, relations) in &by_kind {
            let vb = vb.pp(kind.to_string());
            let scorer: Box<dyn EdgeScorer> = match kind {
                DecoderKind::Bilinear => Box::new(BilinearDecoder::new(dim, relations, vb)?),
                DecoderKind::Dedicom => Box::new(DedicomDecoder::new(dim, relations, vb)?),
                DecoderKind::InnerProduct => Box::new(InnerProductDecoder),
            };
            scorers.insert(*kind, scorer);
            for relation in relations {
                routes.insert(relation.clone(), *kind);
            }
        }

        Ok(Self {
            relation_2_decoder: routes,
            scorers,
        })
    }

    /// Replace the scorer of a family.
    pub fn register_scorer(&mut self, kind: DecoderKind, scorer: Box<dyn EdgeScorer>) {
        self.scorers.insert(kind, scorer);
    }

    /// Family assigned to a relation.
    pub fn decoder_for(&self, relation: &str) -> Option<DecoderKind> {
        self.relation_2_decoder.get(relation).copied()
    }

    pub fn relations(&self) -> impl Iterator<Item = &str> {
        self.relation_2_decoder.keys().map(String::as_str)
    }

    /// Score one edge batch of `edge_type`.
    ///
    /// With `sigmoid`, scores are squashed to probabilities.
    pub fn decode(
        &self,
        z: &NodeMap,
        edges: &EdgeIndex,
        edge_type: &EdgeType,
        sigmoid: bool,
    ) -> Result<Tensor> {
        let relation = edge_type.relation.as_str();
        let kind = self
            .decoder_for(relation)
            .ok_or_else(|| Error::UnknownRelation(relation.to_string()))?;
        let scorer = self
            .scorers
            .get(&kind)
            .ok_or_else(|| Error::UnknownDecoder(kind.to_string()))?;

        let z_src = node_tensor(z, &edge_type.src_type)?;
        let z_dst = node_tensor(z, &edge_type.dst_type)?;
        let scores = scorer.score((z_src, z_dst), edges, relation)?;
        if sigmoid {
            Ok(candle_nn::ops::sigmoid(&scores)?)
        } else {
            Ok(scores)
        }
    }

    /// Score every edge type in `edges`, keyed by relation label.
    ///
    /// The auxiliary entry is skipped. Edge types are visited in key order,
    /// so when several share a relation label only the last one's scores are
    /// kept. Use [`decode`](Self::decode) per edge type to get all of them.
    pub fn decode_all_relation(
        &self,
        z: &NodeMap,
        edges: &EdgeIndexMap,
        sigmoid: bool,
    ) -> Result<BTreeMap<String, Tensor>> {
        let mut out = BTreeMap::new();
        for (edge_type, batch) in scorable_edges(edges) {
            let scores = self.decode(z, batch, edge_type, sigmoid)?;
            if out.insert(edge_type.relation.clone(), scores).is_some() {
                debug!(
                    relation = %edge_type.relation,
                    edge_type = %edge_type,
                    "relation label already scored, keeping the later edge type"
                );
            }
        }
        Ok(out)
    }
}
