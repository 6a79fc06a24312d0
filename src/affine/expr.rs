//! Affine expressions over loop induction variables.
//!
//! An affine expression is a linear combination of variables plus a constant:
//! `aff(x) = c0 + c1*x1 + c2*x2 + ... + cn*xn`

use crate::ir::VarId;
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, Sub, Mul, Neg};

/// An affine expression: constant + sum(coeff[v] * v). Zero coefficients are
/// never stored, so structural equality is semantic equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AffineExpr {
    /// Constant term
    pub constant: i64,
    /// Coefficient per variable
    pub terms: BTreeMap<VarId, i64>,
}

impl AffineExpr {
    /// Create a zero expression.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Create a constant expression.
    pub fn constant(value: i64) -> Self {
        Self { constant: value, terms: BTreeMap::new() }
    }

    /// Create an expression for a single variable.
    pub fn var(var: VarId) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(var, 1);
        Self { constant: 0, terms }
    }

    /// Check if this is a constant expression.
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Get the constant value if this is a constant expression.
    pub fn as_constant(&self) -> Option<i64> {
        if self.is_constant() { Some(self.constant) } else { None }
    }

    /// Get the coefficient of a variable.
    pub fn coeff(&self, var: VarId) -> i64 {
        self.terms.get(&var).copied().unwrap_or(0)
    }

    /// The single variable this expression denotes, if it is exactly `v`.
    pub fn as_var(&self) -> Option<VarId> {
        if self.constant != 0 || self.terms.len() != 1 {
            return None;
        }
        self.terms.iter().next().and_then(|(&v, &c)| (c == 1).then_some(v))
    }

    /// Variables with a non-zero coefficient.
    pub fn vars(&self) -> BTreeSet<VarId> {
        self.terms.keys().copied().collect()
    }

    /// Evaluate the expression given concrete variable values.
    pub fn evaluate(&self, env: &HashMap<VarId, i64>) -> Option<i64> {
        let mut result = self.constant;
        for (var, &c) in &self.terms {
            result += c * env.get(var)?;
        }
        Some(result)
    }

    /// Scale the expression by a constant.
    pub fn scale(&self, factor: i64) -> Self {
        if factor == 0 {
            return Self::zero();
        }
        Self {
            constant: self.constant * factor,
            terms: self.terms.iter().map(|(&v, &c)| (v, c * factor)).collect(),
        }
    }

    /// Exact division by a constant, when every coefficient is divisible.
    pub fn exact_div(&self, divisor: i64) -> Option<Self> {
        if divisor == 0 {
            return None;
        }
        if self.constant % divisor != 0 || self.terms.values().any(|c| c % divisor != 0) {
            return None;
        }
        Some(Self {
            constant: self.constant / divisor,
            terms: self.terms.iter().map(|(&v, &c)| (v, c / divisor)).collect(),
        })
    }

    /// Get GCD of all variable coefficients.
    pub fn coeff_gcd(&self) -> i64 {
        use num_integer::Integer;
        let g = self.terms.values().fold(0i64, |g, c| g.gcd(c));
        if g == 0 { 1 } else { g }
    }

    fn add_term(&mut self, var: VarId, coeff: i64) {
        let entry = self.terms.entry(var).or_insert(0);
        *entry += coeff;
        if *entry == 0 {
            self.terms.remove(&var);
        }
    }

    /// Convert to string with the given variable names.
    pub fn to_string_with_names(&self, name: &dyn Fn(VarId) -> String) -> String {
        let mut parts = Vec::new();

        if self.constant != 0 || self.is_constant() {
            parts.push(format!("{}", self.constant));
        }

        for (&var, &c) in &self.terms {
            let name = name(var);
            if c == 1 {
                parts.push(name);
            } else if c == -1 {
                parts.push(format!("-{}", name));
            } else {
                parts.push(format!("{}*{}", c, name));
            }
        }

        parts.join(" + ").replace("+ -", "- ")
    }
}

impl Add for AffineExpr {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.constant += other.constant;
        for (var, c) in other.terms {
            self.add_term(var, c);
        }
        self
    }
}

impl Sub for AffineExpr {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self + other.scale(-1)
    }
}

impl Mul<i64> for AffineExpr {
    type Output = Self;

    fn mul(self, factor: i64) -> Self {
        self.scale(factor)
    }
}

impl Neg for AffineExpr {
    type Output = Self;

    fn neg(self) -> Self {
        self.scale(-1)
    }
}

impl From<i64> for AffineExpr {
    fn from(value: i64) -> Self {
        Self::constant(value)
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with_names(&|v| format!("{}", v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(u32, i64)]) -> HashMap<VarId, i64> {
        pairs.iter().map(|&(v, x)| (VarId(v), x)).collect()
    }

    #[test]
    fn test_constant() {
        let expr = AffineExpr::constant(5);
        assert!(expr.is_constant());
        assert_eq!(expr.evaluate(&env(&[])), Some(5));
    }

    #[test]
    fn test_var_and_add() {
        let sum = AffineExpr::var(VarId(0)) + AffineExpr::var(VarId(1)) * 2 + AffineExpr::constant(1);
        assert_eq!(sum.evaluate(&env(&[(0, 3), (1, 4)])), Some(12));
        assert_eq!(sum.evaluate(&env(&[(0, 3)])), None);
    }

    #[test]
    fn test_cancellation_removes_terms() {
        let x = AffineExpr::var(VarId(0));
        let e = x.clone() - x;
        assert!(e.is_constant());
        assert_eq!(e, AffineExpr::zero());
    }

    #[test]
    fn test_exact_div() {
        let e = AffineExpr::var(VarId(0)) * 4 + AffineExpr::constant(8);
        assert_eq!(e.exact_div(4), Some(AffineExpr::var(VarId(0)) + AffineExpr::constant(2)));
        assert_eq!(e.exact_div(3), None);
        assert_eq!(e.coeff_gcd(), 4);
    }

    #[test]
    fn test_display() {
        let e = AffineExpr::constant(10) - AffineExpr::var(VarId(2)) * 3;
        let s = e.to_string_with_names(&|_| "o".to_string());
        assert_eq!(s, "10 - 3*o");
        assert_eq!(AffineExpr::var(VarId(1)).as_var(), Some(VarId(1)));
    }
}
