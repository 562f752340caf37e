//! Property-based checks that breeding never corrupts a genome.

use std::sync::Arc;

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use symbios_breed::{
    CrossoverMode, GpContext, GpContextBuilder, GpIndividual, GpTree, InnovationLedger, InternalCrossover,
    MutateAllNodes, MutateDemote, MutateErc, MutateRehang, NeatConfig, NeatGenome, Network, NodeKind, Parent,
    SubtreeCrossover, TreeBuilder,
};

const MAX_DEPTH: usize = 8;

fn typeless_ctx() -> Arc<GpContext> {
    Arc::new(
        GpContextBuilder::typeless()
            .function("+", 2)
            .function("if", 3)
            .function("neg", 1)
            .terminal("x")
            .terminal("y")
            .erc("k", -5.0, 5.0)
            .build()
            .unwrap(),
    )
}

/// Reals and booleans, with comparison bridging the two.
fn typed_ctx() -> Arc<GpContext> {
    Arc::new(
        GpContextBuilder::new()
            .atomic("real")
            .atomic("bool")
            .node("add", NodeKind::Function, "real", &["real", "real"])
            .node("lt", NodeKind::Function, "bool", &["real", "real"])
            .node("if", NodeKind::Function, "real", &["bool", "real", "real"])
            .node("x", NodeKind::Terminal, "real", &[])
            .node("k", NodeKind::Erc { min: 0.0, max: 1.0 }, "real", &[])
            .node("t", NodeKind::Terminal, "bool", &[])
            .tree("main", "real", "default")
            .tree("cond", "bool", "default")
            .build()
            .unwrap(),
    )
}

fn individual(ctx: &GpContext, trees: usize, rng: &mut ChaCha8Rng) -> GpIndividual {
    let builder = TreeBuilder {
        max_depth: 5,
        ..TreeBuilder::default()
    };
    let constraints = ctx.num_tree_constraints();
    GpIndividual::new(
        (0..trees)
            .map(|i| builder.build(ctx, i % constraints, rng).unwrap())
            .collect(),
    )
}

/// Every child's parent link and argposition point back at its holder.
fn assert_links(tree: &GpTree) {
    let root = tree.root();
    assert_eq!(tree.node(root).parent, Parent::Tree);
    assert_eq!(tree.node(root).argposition, 0);
    for id in tree.preorder(root) {
        for (slot, &child) in tree.node(id).children.iter().enumerate() {
            assert_eq!(tree.node(child).parent, Parent::Node(id));
            assert_eq!(tree.node(child).argposition, slot);
        }
    }
}

fn assert_sound(ctx: &GpContext, ind: &GpIndividual) {
    ind.validate(ctx).unwrap();
    for tree in &ind.trees {
        assert_links(tree);
        assert!(tree.depth() <= MAX_DEPTH, "depth {} > {}", tree.depth(), MAX_DEPTH);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_subtree_crossover_keeps_trees_sound(seed in any::<u64>(), homologous in any::<bool>(), typed in any::<bool>()) {
        let ctx = if typed { typed_ctx() } else { typeless_ctx() };
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let p1 = individual(&ctx, 1, &mut rng);
        let p2 = individual(&ctx, 1, &mut rng);
        let mode = if homologous { CrossoverMode::Homologous } else { CrossoverMode::SizeFair };
        let mut xo = SubtreeCrossover::new(ctx.clone(), mode);
        xo.max_depth = MAX_DEPTH;
        xo.tries = 3;
        let children = xo.breed(&p1, &p2, &mut rng).unwrap();
        prop_assert_eq!(children.len(), 2);
        for child in &children {
            assert_sound(&ctx, child);
        }
    }

    #[test]
    fn test_internal_crossover_keeps_trees_sound(seed in any::<u64>(), typed in any::<bool>()) {
        let ctx = if typed { typed_ctx() } else { typeless_ctx() };
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let parent = individual(&ctx, 3, &mut rng);
        let mut op = InternalCrossover::new(ctx.clone());
        op.max_depth = MAX_DEPTH;
        op.tries = 4;
        let child = op.breed(&parent, &mut rng).unwrap();
        assert_sound(&ctx, &child);
        prop_assert_eq!(child.size(), parent.size());
    }

    #[test]
    fn test_mutations_keep_trees_sound(seed in any::<u64>(), typed in any::<bool>()) {
        let ctx = if typed { typed_ctx() } else { typeless_ctx() };
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let parent = individual(&ctx, 1, &mut rng);

        let child = MutateAllNodes::new(ctx.clone()).breed(&parent, &mut rng).unwrap();
        assert_sound(&ctx, &child);
        prop_assert_eq!(child.size(), parent.size());

        let child = MutateErc::new(ctx.clone()).breed(&parent, &mut rng).unwrap();
        assert_sound(&ctx, &child);
        prop_assert_eq!(child.size(), parent.size());

        let mut demote = MutateDemote::new(ctx.clone());
        demote.max_depth = MAX_DEPTH;
        demote.tries = 3;
        let child = demote.breed(&parent, &mut rng).unwrap();
        assert_sound(&ctx, &child);
        prop_assert!(child.size() >= parent.size());

        if !typed {
            let mut rehang = MutateRehang::new(ctx.clone());
            rehang.max_depth = MAX_DEPTH;
            let child = rehang.breed(&parent, &mut rng).unwrap();
            assert_sound(&ctx, &child);
            prop_assert_eq!(child.size(), parent.size());
        }
    }

    #[test]
    fn test_neat_mutation_and_mating_keep_genomes_valid(seed in any::<u64>(), recur in 0.0f32..0.5) {
        let config = NeatConfig {
            mutate_add_node_prob: 0.3,
            mutate_add_link_prob: 0.4,
            mutate_toggle_enable_prob: 0.2,
            recur_only_prob: recur,
            ..NeatConfig::new(3, 2)
        };
        let ledger = InnovationLedger::default();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut mom = NeatGenome::fully_connected(&config, &ledger, &mut rng);
        let mut dad = mom.clone();
        for _ in 0..15 {
            mom.default_mutate(&config, &ledger, &mut rng);
            dad.default_mutate(&config, &ledger, &mut rng);
        }
        mom.verify().unwrap();
        dad.verify().unwrap();

        let child = mom.mate_multipoint(1.0, &dad, 0.5, &mut rng);
        child.verify().unwrap();
        let avg = mom.mate_multipoint_avg(0.5, &dad, 0.5, &mut rng);
        avg.verify().unwrap();

        let innovations: Vec<u64> = child.genes.iter().map(|g| g.innovation).collect();
        let mut sorted = innovations.clone();
        sorted.sort_unstable();
        sorted.dedup();
        prop_assert_eq!(innovations, sorted);
        prop_assert!(mom.compatibility(&dad, &config) >= 0.0);

        let mut net = Network::from_genome(&mom).unwrap();
        if let Ok(out) = net.evaluate(&[0.5, -0.5, 1.0]) {
            prop_assert_eq!(out.len(), 2);
            prop_assert!(out.iter().all(|v| v.is_finite()));
        }
    }
}
