//! Unroll materialization.
//!
//! A loop with a constant trip count `n` and unroll factor `f` becomes `n`
//! bound copies of its body when `f == 0 || f >= n`; otherwise a main loop of
//! `n / f` iterations holding `f` copies, followed by a remainder loop.

use super::ast::{AstFor, AstNode};
use crate::affine::{AffineFolder, BoundFolder, IndexExpr};
use crate::ir::{ValueType, VarId, VarInfo};

/// Expand an unroll-annotated loop. `None` when the trip count is not constant
/// or the loop carries no unroll factor.
pub(crate) fn expand(l: &AstFor, vars: &mut Vec<VarInfo>) -> Option<Vec<AstNode>> {
    let factor = l.unroll?;
    let lo = l.lower.as_constant()?;
    l.upper.as_constant()?;
    let trip = AffineFolder.trip_count(&l.lower, &l.upper, l.step).as_constant()?.max(0);

    let copy = |value: IndexExpr| {
        let mut nodes = Vec::with_capacity(l.body.len() + 1);
        nodes.push(AstNode::Bind { var: l.var, value });
        nodes.extend(l.body.iter().cloned());
        AstNode::Block(nodes)
    };

    if factor == 0 || factor >= trip {
        return Some((0..trip).map(|k| copy(IndexExpr::constant(lo + k * l.step))).collect());
    }

    let main = trip / factor;
    let base = vars.get(l.var.0 as usize).map(|v| v.name.clone()).unwrap_or_else(|| l.var.to_string());
    let unrolled = VarId(vars.len() as u32);
    vars.push(VarInfo { name: format!("{}_unroll", base), ty: ValueType::Int(32) });

    let copies = (0..factor)
        .map(|c| copy(IndexExpr::var(unrolled).mul(l.step * factor).add(IndexExpr::constant(lo + c * l.step))))
        .collect();
    let mut nodes = vec![AstNode::For(AstFor {
        var: unrolled,
        lower: IndexExpr::constant(0),
        upper: IndexExpr::constant(main),
        step: 1,
        unroll: None,
        stage: l.stage.clone(),
        body: copies,
    })];
    if main * factor < trip {
        nodes.push(AstNode::For(AstFor {
            var: l.var,
            lower: IndexExpr::constant(lo + main * factor * l.step),
            upper: l.upper.clone(),
            step: l.step,
            unroll: None,
            stage: None,
            body: l.body.clone(),
        }));
    }
    Some(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, TensorId};
    use std::collections::HashMap;

    fn body_var_values(nodes: &[AstNode], var: VarId) -> Vec<i64> {
        // Simulate the expanded nest, collecting the values of `var` at each store.
        fn walk(nodes: &[AstNode], var: VarId, env: &mut HashMap<VarId, i64>, out: &mut Vec<i64>) {
            for node in nodes {
                match node {
                    AstNode::Bind { var: v, value } => {
                        let x = value.evaluate(env).unwrap();
                        env.insert(*v, x);
                    }
                    AstNode::Block(inner) => walk(inner, var, env, out),
                    AstNode::For(l) => {
                        let (lo, hi) = (l.lower.evaluate(env).unwrap(), l.upper.evaluate(env).unwrap());
                        let mut i = lo;
                        while (l.step > 0 && i < hi) || (l.step < 0 && i > hi) {
                            env.insert(l.var, i);
                            walk(&l.body, var, env, out);
                            i += l.step;
                        }
                    }
                    AstNode::Store { .. } => out.push(env[&var]),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(nodes, var, &mut HashMap::new(), &mut out);
        out
    }

    fn loop_of(lo: i64, hi: i64, step: i64, factor: i64) -> AstFor {
        AstFor {
            var: VarId(0),
            lower: IndexExpr::constant(lo),
            upper: IndexExpr::constant(hi),
            step,
            unroll: Some(factor),
            stage: None,
            body: vec![AstNode::Store { tensor: TensorId(0), indices: vec![], value: Expr::int(0) }],
        }
    }

    #[test]
    fn test_full_unroll() {
        let mut vars = vec![VarInfo { name: "i".into(), ty: ValueType::Int(32) }];
        let nodes = expand(&loop_of(0, 4, 1, 0), &mut vars).unwrap();
        assert_eq!(nodes.len(), 4);
        assert_eq!(body_var_values(&nodes, VarId(0)), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_partial_unroll_with_remainder() {
        let mut vars = vec![VarInfo { name: "i".into(), ty: ValueType::Int(32) }];
        let nodes = expand(&loop_of(1, 11, 1, 3), &mut vars).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(vars[1].name, "i_unroll");
        assert_eq!(body_var_values(&nodes, VarId(0)), (1..11).collect::<Vec<_>>());
    }

    #[test]
    fn test_negative_step() {
        let mut vars = vec![VarInfo { name: "i".into(), ty: ValueType::Int(32) }];
        let nodes = expand(&loop_of(9, -1, -2, 2), &mut vars).unwrap();
        assert_eq!(body_var_values(&nodes, VarId(0)), vec![9, 7, 5, 3, 1]);
    }
}
