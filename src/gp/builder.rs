//! Random tree generation (GROW, FULL and ramped half-and-half).

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{BreedError, BreedResult};
use crate::gp::constraints::{FuncId, FunctionSet, GpContext};
use crate::gp::tree::{GpNodeId, GpTree};
use crate::gp::types::GpType;
use crate::params::{ParamPath, Parameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrowMethod {
    /// Any node may be a terminal once `min_depth` is reached.
    Grow,
    /// Nonterminals everywhere above the target depth.
    Full,
    /// Coin flip between the two per tree.
    HalfAndHalf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeBuilder {
    /// How node kinds are chosen above the target depth. Default: ramped half-and-half.
    pub method: GrowMethod,
    /// Smallest target depth, counting the root as 1 (default: 2).
    pub min_depth: usize,
    /// Largest target depth, inclusive (default: 6).
    pub max_depth: usize,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self {
            method: GrowMethod::HalfAndHalf,
            min_depth: 2,
            max_depth: 6,
        }
    }
}

impl TreeBuilder {
    #[must_use]
    pub fn default_base() -> ParamPath {
        ParamPath::new("gp.build")
    }

    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for an unknown method, a non-positive
    /// depth, or `min-depth > max-depth`.
    pub fn setup(&mut self, params: &Parameters, base: &ParamPath) -> BreedResult<()> {
        let def = Self::default_base();
        if let Some(method) = params.get_string(&base.push("method"), &def.push("method")) {
            self.method = match method.as_str() {
                "grow" => GrowMethod::Grow,
                "full" => GrowMethod::Full,
                "half" | "half-and-half" => GrowMethod::HalfAndHalf,
                other => {
                    return Err(BreedError::config(
                        base.push("method"),
                        format!("unknown build method `{}`", other),
                    ))
                }
            };
        }
        self.min_depth =
            params.get_positive(&base.push("min-depth"), &def.push("min-depth"), self.min_depth)?;
        self.max_depth =
            params.get_positive(&base.push("max-depth"), &def.push("max-depth"), self.max_depth)?;
        if self.min_depth > self.max_depth {
            return Err(BreedError::config(
                base.push("min-depth"),
                format!("min-depth {} exceeds max-depth {}", self.min_depth, self.max_depth),
            ));
        }
        Ok(())
    }

    /// Generate a random tree for the tree constraints at index `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] if some required type has no terminal.
    pub fn build<R: Rng + ?Sized>(
        &self,
        ctx: &GpContext,
        constraints: usize,
        rng: &mut R,
    ) -> BreedResult<GpTree> {
        let target = rng.random_range(self.min_depth.max(1)..=self.max_depth.max(1));
        let full = match self.method {
            GrowMethod::Grow => false,
            GrowMethod::Full => true,
            GrowMethod::HalfAndHalf => rng.random_bool(0.5),
        };
        let fs = ctx.tree_function_set(constraints);
        let root_type = ctx.tree_constraints(constraints).return_type;

        let mut tree = GpTree::empty(constraints);
        let root = self.grow_node(ctx, fs, root_type, 1, target, full, &mut tree, rng)?;
        tree.root = root;
        Ok(tree)
    }

    #[allow(clippy::too_many_arguments)]
    fn grow_node<R: Rng + ?Sized>(
        &self,
        ctx: &GpContext,
        fs: &FunctionSet,
        ty: GpType,
        level: usize,
        target: usize,
        full: bool,
        tree: &mut GpTree,
        rng: &mut R,
    ) -> BreedResult<GpNodeId> {
        let nonterminals = fs.nonterminals(ty);
        let terminals = fs.terminals(ty);

        let want_terminal = if level >= target || nonterminals.is_empty() {
            true
        } else if full || level < self.min_depth {
            false
        } else {
            // GROW: uniform over every compatible node
            rng.random_range(0..terminals.len() + nonterminals.len()) < terminals.len()
        };

        if want_terminal {
            let (f, value) = random_terminal(ctx, fs, ty, rng).ok_or_else(|| {
                BreedError::config(
                    format!("gp.fs.{}", fs.name),
                    format!("no terminal for type `{}`", ctx.types.name(ty)),
                )
            })?;
            return Ok(tree.alloc(f, value));
        }

        let Some(&f) = nonterminals.choose(rng) else {
            return Err(BreedError::Invariant("empty nonterminal list".to_string()));
        };
        let id = tree.alloc(f, 0.0);
        for i in 0..ctx.arity(f) {
            let child_ty = ctx.signature(f).child_types[i];
            let child = self.grow_node(ctx, fs, child_ty, level + 1, target, full, tree, rng)?;
            tree.attach(id, child);
        }
        Ok(id)
    }
}

/// A random terminal able to fill a slot of type `ty`, with a fresh ERC value
/// when it is a constant.
pub fn random_terminal<R: Rng + ?Sized>(
    ctx: &GpContext,
    fs: &FunctionSet,
    ty: GpType,
    rng: &mut R,
) -> Option<(FuncId, f64)> {
    let &f = fs.terminals(ty).choose(rng)?;
    Some((f, ctx.sample_erc(f, rng)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::constraints::{GpContextBuilder, NodeKind};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn ctx() -> GpContext {
        GpContextBuilder::typeless()
            .function("+", 2)
            .function("sin", 1)
            .terminal("x")
            .erc("c", -1.0, 1.0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_full_trees_reach_target_depth() {
        let ctx = ctx();
        let builder = TreeBuilder {
            method: GrowMethod::Full,
            min_depth: 4,
            max_depth: 4,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..20 {
            let tree = builder.build(&ctx, 0, &mut rng).unwrap();
            tree.verify(&ctx).unwrap();
            assert_eq!(tree.depth(), 4);
        }
    }

    #[test]
    fn test_grow_respects_bounds() {
        let ctx = ctx();
        let builder = TreeBuilder {
            method: GrowMethod::Grow,
            min_depth: 2,
            max_depth: 5,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..50 {
            let tree = builder.build(&ctx, 0, &mut rng).unwrap();
            tree.verify(&ctx).unwrap();
            assert!(tree.depth() >= 2 && tree.depth() <= 5);
        }
    }

    #[test]
    fn test_typed_tree_is_type_safe() {
        let ctx = GpContextBuilder::new()
            .atomic("real")
            .atomic("bool")
            .node("if", NodeKind::Function, "real", &["bool", "real", "real"])
            .node("<", NodeKind::Function, "bool", &["real", "real"])
            .node("+", NodeKind::Function, "real", &["real", "real"])
            .node("x", NodeKind::Terminal, "real", &[])
            .node("t", NodeKind::Terminal, "bool", &[])
            .tree("main", "real", "default")
            .build()
            .unwrap();
        let builder = TreeBuilder::default();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..50 {
            builder.build(&ctx, 0, &mut rng).unwrap().verify(&ctx).unwrap();
        }
    }

    #[test]
    fn test_full_tree_with_wide_function_verifies() {
        let ctx = GpContextBuilder::typeless()
            .function("wide", 300)
            .terminal("x")
            .build()
            .unwrap();
        let builder = TreeBuilder {
            method: GrowMethod::Full,
            min_depth: 2,
            max_depth: 2,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let tree = builder.build(&ctx, 0, &mut rng).unwrap();
        assert_eq!(tree.len(), 301);
        tree.verify(&ctx).unwrap();
    }

    #[test]
    fn test_setup_rejects_inverted_depths() {
        let mut params = Parameters::new();
        params.set("gp.build.min-depth", "7");
        params.set("gp.build.max-depth", "3");
        let mut builder = TreeBuilder::default();
        assert!(builder.setup(&params, &TreeBuilder::default_base()).is_err());
    }
}
