//! Quasi-affine index expressions.
//!
//! Loop bounds produced by scheduling are affine expressions extended with
//! floor division, modulo, `min` and `max` by constants. The constructors fold
//! whatever can be folded locally, so building an expression bottom-up through
//! them yields a canonical form.

use super::expr::AffineExpr;
use crate::ir::VarId;
use num_integer::Integer;
use serde::{Serialize, Deserialize};
use std::collections::{BTreeSet, HashMap};

/// A quasi-affine expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexExpr {
    /// Plain affine expression
    Affine(AffineExpr),
    /// Sum with at least one non-affine side
    Add(Box<IndexExpr>, Box<IndexExpr>),
    /// Product with a constant
    Mul(Box<IndexExpr>, i64),
    /// Floor division by a positive constant
    FloorDiv(Box<IndexExpr>, i64),
    /// Floor modulo by a positive constant
    Mod(Box<IndexExpr>, i64),
    /// Minimum
    Min(Box<IndexExpr>, Box<IndexExpr>),
    /// Maximum
    Max(Box<IndexExpr>, Box<IndexExpr>),
}

impl IndexExpr {
    pub fn constant(value: i64) -> Self {
        IndexExpr::Affine(AffineExpr::constant(value))
    }

    pub fn var(var: VarId) -> Self {
        IndexExpr::Affine(AffineExpr::var(var))
    }

    pub fn as_affine(&self) -> Option<&AffineExpr> {
        match self {
            IndexExpr::Affine(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<i64> {
        self.as_affine().and_then(AffineExpr::as_constant)
    }

    pub fn as_var(&self) -> Option<VarId> {
        self.as_affine().and_then(AffineExpr::as_var)
    }

    pub fn add(self, other: IndexExpr) -> IndexExpr {
        match (self, other) {
            (IndexExpr::Affine(a), IndexExpr::Affine(b)) => IndexExpr::Affine(a + b),
            (a, b) if a.as_constant() == Some(0) => b,
            (a, b) if b.as_constant() == Some(0) => a,
            (a, b) => IndexExpr::Add(Box::new(a), Box::new(b)),
        }
    }

    pub fn sub(self, other: IndexExpr) -> IndexExpr {
        self.add(other.mul(-1))
    }

    pub fn mul(self, factor: i64) -> IndexExpr {
        match self {
            _ if factor == 0 => IndexExpr::constant(0),
            e if factor == 1 => e,
            IndexExpr::Affine(a) => IndexExpr::Affine(a.scale(factor)),
            IndexExpr::Mul(e, k) => e.mul(k * factor),
            IndexExpr::Add(a, b) => a.mul(factor).add(b.mul(factor)),
            e => IndexExpr::Mul(Box::new(e), factor),
        }
    }

    /// Floor division by a positive constant.
    pub fn floordiv(self, divisor: i64) -> IndexExpr {
        debug_assert!(divisor > 0);
        if divisor == 1 {
            return self;
        }
        match self {
            IndexExpr::Affine(a) => match a.as_constant() {
                Some(c) => IndexExpr::constant(c.div_floor(&divisor)),
                None => match a.exact_div(divisor) {
                    Some(q) => IndexExpr::Affine(q),
                    None => IndexExpr::FloorDiv(Box::new(IndexExpr::Affine(a)), divisor),
                },
            },
            e => IndexExpr::FloorDiv(Box::new(e), divisor),
        }
    }

    /// Ceiling division by a positive constant.
    pub fn ceildiv(self, divisor: i64) -> IndexExpr {
        self.add(IndexExpr::constant(divisor - 1)).floordiv(divisor)
    }

    /// Floor modulo by a positive constant.
    pub fn modulo(self, divisor: i64) -> IndexExpr {
        debug_assert!(divisor > 0);
        if divisor == 1 {
            return IndexExpr::constant(0);
        }
        match self.as_constant() {
            Some(c) => IndexExpr::constant(c.mod_floor(&divisor)),
            None => IndexExpr::Mod(Box::new(self), divisor),
        }
    }

    pub fn min(self, other: IndexExpr) -> IndexExpr {
        match Self::constant_difference(&self, &other) {
            Some(d) if d <= 0 => self,
            Some(_) => other,
            None => IndexExpr::Min(Box::new(self), Box::new(other)),
        }
    }

    pub fn max(self, other: IndexExpr) -> IndexExpr {
        match Self::constant_difference(&self, &other) {
            Some(d) if d >= 0 => self,
            Some(_) => other,
            None => IndexExpr::Max(Box::new(self), Box::new(other)),
        }
    }

    fn constant_difference(a: &IndexExpr, b: &IndexExpr) -> Option<i64> {
        if a == b {
            return Some(0);
        }
        match (a, b) {
            (IndexExpr::Affine(x), IndexExpr::Affine(y)) => (x.clone() - y.clone()).as_constant(),
            _ => None,
        }
    }

    /// Free variables.
    pub fn vars(&self) -> BTreeSet<VarId> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<VarId>) {
        match self {
            IndexExpr::Affine(a) => out.extend(a.vars()),
            IndexExpr::Mul(e, _) | IndexExpr::FloorDiv(e, _) | IndexExpr::Mod(e, _) => e.collect_vars(out),
            IndexExpr::Add(a, b) | IndexExpr::Min(a, b) | IndexExpr::Max(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    /// Replace variables by expressions, refolding on the way up.
    pub fn substitute(&self, map: &HashMap<VarId, IndexExpr>) -> IndexExpr {
        match self {
            IndexExpr::Affine(a) => {
                let mut acc = IndexExpr::constant(a.constant);
                for (&var, &coeff) in &a.terms {
                    let term = map.get(&var).cloned().unwrap_or_else(|| IndexExpr::var(var));
                    acc = acc.add(term.mul(coeff));
                }
                acc
            }
            IndexExpr::Add(a, b) => a.substitute(map).add(b.substitute(map)),
            IndexExpr::Mul(e, k) => e.substitute(map).mul(*k),
            IndexExpr::FloorDiv(e, k) => e.substitute(map).floordiv(*k),
            IndexExpr::Mod(e, k) => e.substitute(map).modulo(*k),
            IndexExpr::Min(a, b) => a.substitute(map).min(b.substitute(map)),
            IndexExpr::Max(a, b) => a.substitute(map).max(b.substitute(map)),
        }
    }

    /// Evaluate given concrete variable values.
    pub fn evaluate(&self, env: &HashMap<VarId, i64>) -> Option<i64> {
        Some(match self {
            IndexExpr::Affine(a) => a.evaluate(env)?,
            IndexExpr::Add(a, b) => a.evaluate(env)? + b.evaluate(env)?,
            IndexExpr::Mul(e, k) => e.evaluate(env)? * k,
            IndexExpr::FloorDiv(e, k) => e.evaluate(env)?.div_floor(k),
            IndexExpr::Mod(e, k) => e.evaluate(env)?.mod_floor(k),
            IndexExpr::Min(a, b) => a.evaluate(env)?.min(b.evaluate(env)?),
            IndexExpr::Max(a, b) => a.evaluate(env)?.max(b.evaluate(env)?),
        })
    }

    /// Render with the given variable names.
    pub fn to_string_with_names(&self, name: &dyn Fn(VarId) -> String) -> String {
        match self {
            IndexExpr::Affine(a) => a.to_string_with_names(name),
            IndexExpr::Add(a, b) => {
                format!("{} + {}", a.to_string_with_names(name), b.to_string_with_names(name))
                    .replace("+ -", "- ")
            }
            IndexExpr::Mul(e, k) => format!("{}*({})", k, e.to_string_with_names(name)),
            IndexExpr::FloorDiv(e, k) => format!("({}) floordiv {}", e.to_string_with_names(name), k),
            IndexExpr::Mod(e, k) => format!("({}) mod {}", e.to_string_with_names(name), k),
            IndexExpr::Min(a, b) => {
                format!("min({}, {})", a.to_string_with_names(name), b.to_string_with_names(name))
            }
            IndexExpr::Max(a, b) => {
                format!("max({}, {})", a.to_string_with_names(name), b.to_string_with_names(name))
            }
        }
    }
}

impl From<AffineExpr> for IndexExpr {
    fn from(a: AffineExpr) -> Self {
        IndexExpr::Affine(a)
    }
}

impl From<i64> for IndexExpr {
    fn from(value: i64) -> Self {
        IndexExpr::constant(value)
    }
}
