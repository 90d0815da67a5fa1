//! End-to-end tests over a small drug/protein graph.
//!
//! Covers the full encode → decode → loss path for both latent projection
//! modes, the auxiliary entry of edge maps, backpropagation into the
//! registered variables, and the augmentation variant.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Optimizer, VarBuilder, VarMap, SGD};
use hetero_vgae::{
    AdjacencyMap, AugmentConfig, AugmentedHeteroVgae, EdgeIndex, EdgeIndexMap, EdgeKey, EdgeType,
    HeteroVgae, KlReduction, LatentEncoderKind, NodeMap, NodeType, ReconReduction,
    SparseAdjacency, VgaeConfig,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const DRUGS: usize = 8;
const PROTEINS: usize = 6;

struct Graph {
    features: NodeMap,
    adjacency: AdjacencyMap,
    edges: EdgeIndexMap,
}

fn edge_types() -> Vec<EdgeType> {
    vec![
        EdgeType::new("drug", "targets", "protein"),
        EdgeType::new("protein", "targeted_by", "drug"),
        EdgeType::new("protein", "interacts", "protein"),
        EdgeType::new("drug", "nausea", "drug"),
        EdgeType::new("drug", "headache", "drug"),
    ]
}

fn config() -> VgaeConfig {
    let drug = NodeType::new("drug");
    let protein = NodeType::new("protein");
    VgaeConfig::new(
        [drug.clone(), protein.clone()],
        BTreeMap::from([(drug, 12), (protein, 7)]),
        8,
    )
    .with_hidden_dims(vec![16, 8])
    .with_edge_types(edge_types())
    .with_decoder("bilinear", ["targets", "targeted_by"])
    .with_decoder("inner", ["interacts"])
    .with_decoder("dedicom", ["nausea", "headache"])
    .with_dropout(0.2)
}

fn graph(device: &Device) -> Graph {
    let targets = EdgeIndex::from_pairs([(0, 0), (1, 0), (2, 1), (3, 2), (4, 3), (5, 4), (6, 5)]);
    let targeted_by: EdgeIndex = targets.iter().map(|(s, d)| (d, s)).collect();
    let interacts = EdgeIndex::from_pairs([(0, 1), (1, 0), (2, 3), (3, 2), (4, 5), (5, 4)]);
    let nausea = EdgeIndex::from_pairs([(0, 1), (1, 0), (2, 5), (5, 2)]);
    let headache = EdgeIndex::from_pairs([(3, 4), (4, 3), (6, 7), (7, 6)]);

    let batches = [
        (EdgeType::new("drug", "targets", "protein"), targets, (DRUGS, PROTEINS)),
        (EdgeType::new("protein", "targeted_by", "drug"), targeted_by, (PROTEINS, DRUGS)),
        (EdgeType::new("protein", "interacts", "protein"), interacts, (PROTEINS, PROTEINS)),
        (EdgeType::new("drug", "nausea", "drug"), nausea, (DRUGS, DRUGS)),
        (EdgeType::new("drug", "headache", "drug"), headache, (DRUGS, DRUGS)),
    ];

    let mut adjacency = AdjacencyMap::new();
    let mut edges = EdgeIndexMap::new();
    for (edge_type, batch, (num_src, num_dst)) in batches {
        adjacency.insert(
            edge_type.clone(),
            SparseAdjacency::from_edge_index(&batch, num_src, num_dst, device).unwrap(),
        );
        edges.insert(EdgeKey::from(edge_type), batch);
    }

    let features = NodeMap::from([
        (NodeType::new("drug"), Tensor::randn(0f32, 1f32, (DRUGS, 12), device).unwrap()),
        (NodeType::new("protein"), Tensor::randn(0f32, 1f32, (PROTEINS, 7), device).unwrap()),
    ]);

    Graph {
        features,
        adjacency,
        edges,
    }
}

#[test]
fn full_pipeline_for_both_latent_modes() {
    let device = Device::Cpu;
    let g = graph(&device);

    for kind in [LatentEncoderKind::GraphConv, LatentEncoderKind::Linear] {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = HeteroVgae::new(config().with_latent_encoder(kind), vb).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let out = model.encode(&g.features, &g.adjacency, &mut rng).unwrap();
        assert_eq!(out.z[&NodeType::new("drug")].dims(), &[DRUGS, 8]);
        assert_eq!(out.z[&NodeType::new("protein")].dims(), &[PROTEINS, 8]);

        let scores = model.decode_all_relation(&out.z, &g.edges, true).unwrap();
        assert_eq!(scores.len(), 5);
        for (relation, probs) in &scores {
            for p in probs.to_vec1::<f32>().unwrap() {
                assert!((0.0..=1.0).contains(&p), "{kind} {relation}: {p}");
            }
        }

        let kl = model.kl_loss_all(&out.latent, &KlReduction::Sum).unwrap();
        let recon = model
            .recon_loss_all_relation(&out.z, &g.edges, ReconReduction::Sum, &mut rng)
            .unwrap();
        assert!(kl.to_scalar::<f32>().unwrap() >= 0.0);
        assert!(recon.to_scalar::<f32>().unwrap().is_finite());
    }
}

#[test]
fn log_std_is_clamped_for_large_inputs() {
    let device = Device::Cpu;
    let mut g = graph(&device);
    for features in g.features.values_mut() {
        *features = features.affine(1e4, 0.0).unwrap();
    }

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = HeteroVgae::new(config().with_latent_encoder(LatentEncoderKind::Linear), vb).unwrap();
    let latent = model.latent(&g.features, &g.adjacency).unwrap();

    for log_std in latent.log_stds().values() {
        let max = log_std.flatten_all().unwrap().max(0).unwrap().to_scalar::<f32>().unwrap();
        assert!(max <= 10.0);
    }
}

#[test]
fn auxiliary_entry_is_never_scored() {
    let device = Device::Cpu;
    let mut g = graph(&device);
    // Rows far outside every node type: scoring would fail.
    g.edges.insert(EdgeKey::AuxiliaryTarget, EdgeIndex::from_pairs([(500, 500)]));

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = HeteroVgae::new(config(), vb).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let out = model.encode(&g.features, &g.adjacency, &mut rng).unwrap();

    let scores = model.decode_all_relation(&out.z, &g.edges, false).unwrap();
    assert_eq!(scores.len(), 5);
    model
        .recon_loss_all_relation(&out.z, &g.edges, ReconReduction::Mean, &mut rng)
        .unwrap();
}

#[test]
fn gradient_steps_keep_parameters_finite() {
    let device = Device::Cpu;
    let g = graph(&device);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = HeteroVgae::new(config(), vb).unwrap();
    let mut sgd = SGD::new(varmap.all_vars(), 0.01).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    for _ in 0..3 {
        let out = model.encode(&g.features, &g.adjacency, &mut rng).unwrap();
        let recon = model
            .recon_loss_all_relation(&out.z, &g.edges, ReconReduction::Mean, &mut rng)
            .unwrap();
        let kl = model.kl_loss_all(&out.latent, &KlReduction::Sum).unwrap();
        let loss = (recon + kl.affine(1.0 / DRUGS as f64, 0.0).unwrap()).unwrap();
        assert!(loss.to_scalar::<f32>().unwrap().is_finite());
        sgd.backward_step(&loss).unwrap();
    }

    for var in varmap.all_vars() {
        let sum = var.as_tensor().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(sum.is_finite());
    }
}

#[test]
fn seeded_encode_is_reproducible_in_eval_mode() {
    let device = Device::Cpu;
    let g = graph(&device);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let mut model = HeteroVgae::new(config(), vb).unwrap();
    model.set_training(false);

    let a = model.encode(&g.features, &g.adjacency, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
    let b = model.encode(&g.features, &g.adjacency, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
    let drug = NodeType::new("drug");
    assert_eq!(
        a.z[&drug].to_vec2::<f32>().unwrap(),
        b.z[&drug].to_vec2::<f32>().unwrap()
    );
}

#[test]
fn augmented_drug_latents_reach_out_dim() {
    let device = Device::Cpu;
    let g = graph(&device);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model =
        AugmentedHeteroVgae::new(AugmentConfig::new(config(), "drug").with_augment_dim(32), vb)
            .unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let drug = NodeType::new("drug");

    let out = model.encode(&g.features, &g.adjacency, &mut rng).unwrap();
    assert_eq!(out.z[&drug].dims(), &[DRUGS, 4]);

    let fingerprints = Tensor::rand(0f32, 1f32, (DRUGS, 32), &device).unwrap();
    let z = model.augment_latent(&out.z, &drug, &fingerprints).unwrap();
    assert_eq!(z[&drug].dims(), &[DRUGS, 8]);

    let recon = model
        .recon_loss_all_relation(&z, &g.edges, ReconReduction::Sum, &mut rng)
        .unwrap();
    assert!(recon.to_scalar::<f32>().unwrap().is_finite());
}

#[test]
fn config_loads_from_file() {
    let dir = std::env::temp_dir().join("hetero-vgae-config-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("model.json");
    std::fs::write(&path, config().to_json_string().unwrap()).unwrap();

    let loaded = VgaeConfig::from_path(&path).unwrap();
    assert_eq!(loaded, config());
    std::fs::remove_file(path).unwrap();
}
