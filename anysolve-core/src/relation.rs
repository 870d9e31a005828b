//! # Relations
//!
//! A relation is two expressions joined by a comparison operator. Constraints
//! and goals are stored as relations; residuals are computed against their
//! normalized `lhs - rhs` form.

use crate::expr::{clean_input, parse_expr, Expr};
use anysolve_error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelOp {
    Eq,
    Le,
    Lt,
    Ge,
    Gt,
}

impl RelOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelOp::Eq => "=",
            RelOp::Le => "<=",
            RelOp::Lt => "<",
            RelOp::Ge => ">=",
            RelOp::Gt => ">",
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, RelOp::Eq)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub lhs: Expr,
    pub op: RelOp,
    pub rhs: Expr,
}

impl Relation {
    pub fn new(lhs: Expr, op: RelOp, rhs: Expr) -> Relation {
        Relation { lhs, op, rhs }
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Relation {
        Relation::new(lhs, RelOp::Eq, rhs)
    }

    /// The normalized form `lhs - rhs`, the function whose value is the
    /// signed residual of this relation.
    pub fn residual_expr(&self) -> Expr {
        Expr::Add(vec![self.lhs.clone(), Expr::neg(self.rhs.clone())])
    }

    /// Signed residual at the given assignment. `None` when either side
    /// cannot be evaluated there.
    pub fn residual(&self, env: &BTreeMap<String, f64>) -> Option<f64> {
        self.residual_expr().eval(env)
    }

    /// Amount by which the relation is violated at `env` (zero when
    /// satisfied within `tol`).
    pub fn violation(&self, env: &BTreeMap<String, f64>, tol: f64) -> Option<f64> {
        let r = self.residual(env)?;
        let v = match self.op {
            RelOp::Eq => r.abs(),
            // lhs <= rhs means residual <= 0
            RelOp::Le | RelOp::Lt => r.max(0.0),
            RelOp::Ge | RelOp::Gt => (-r).max(0.0),
        };
        Some(if v <= tol { 0.0 } else { v })
    }

    /// Holds at `env` within `tol`
    pub fn holds(&self, env: &BTreeMap<String, f64>, tol: f64) -> Option<bool> {
        self.violation(env, tol).map(|v| v == 0.0)
    }

    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = self.lhs.free_vars();
        out.extend(self.rhs.free_vars());
        out
    }

    pub fn contains_var(&self, var: &str) -> bool {
        self.lhs.contains_var(var) || self.rhs.contains_var(var)
    }

    pub fn substitute(&self, map: &BTreeMap<String, Expr>) -> Relation {
        Relation {
            lhs: self.lhs.substitute(map),
            op: self.op,
            rhs: self.rhs.substitute(map),
        }
    }

    pub fn simplify(&self) -> Relation {
        Relation {
            lhs: self.lhs.simplify(),
            op: self.op,
            rhs: self.rhs.simplify(),
        }
    }

    /// If this is an equality pinning exactly `var = <constant>`, return
    /// the constant.
    pub fn pins(&self, var: &str) -> Option<f64> {
        if self.op != RelOp::Eq {
            return None;
        }
        match (&self.lhs, &self.rhs) {
            (Expr::Var(v), e) if v == var => e.as_num(),
            (e, Expr::Var(v)) if v == var => e.as_num(),
            _ => None,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op.as_str(), self.rhs)
    }
}

/// Parse a relation like `2x + 3 = 11` or `x >= 0`.
///
/// A bare expression with no comparison operator parses as `expr = 0`.
pub fn parse_relation(input: &str) -> Result<Relation> {
    let cleaned = clean_input(input);
    // Longest operators first so `<=` does not split as `<`, `=`
    const OPS: [(&str, RelOp); 6] = [
        ("<=", RelOp::Le),
        (">=", RelOp::Ge),
        ("==", RelOp::Eq),
        ("<", RelOp::Lt),
        (">", RelOp::Gt),
        ("=", RelOp::Eq),
    ];
    for (text, op) in OPS {
        if let Some(idx) = cleaned.find(text) {
            let (l, r) = cleaned.split_at(idx);
            let r = &r[text.len()..];
            if l.trim().is_empty() || r.trim().is_empty() {
                return Err(Error::parse_failed(input, "relation side is empty")
                    .with_operation("relation::parse"));
            }
            if r.contains(['=', '<', '>']) {
                return Err(Error::parse_failed(input, "multiple comparison operators")
                    .with_operation("relation::parse"));
            }
            return Ok(Relation::new(parse_expr(l)?, op, parse_expr(r)?));
        }
    }
    Ok(Relation::new(parse_expr(&cleaned)?, RelOp::Eq, Expr::Num(0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_parse_equality() {
        let r = parse_relation("2x + 3 = 11").unwrap();
        assert_eq!(r.op, RelOp::Eq);
        assert_eq!(r.residual(&env(&[("x", 4.0)])), Some(0.0));
        assert_eq!(r.residual(&env(&[("x", 5.0)])), Some(2.0));
    }

    #[test]
    fn test_parse_inequalities() {
        let r = parse_relation("x <= 5").unwrap();
        assert_eq!(r.op, RelOp::Le);
        assert_eq!(r.violation(&env(&[("x", 3.0)]), 1e-9), Some(0.0));
        assert_eq!(r.violation(&env(&[("x", 7.0)]), 1e-9), Some(2.0));

        let r = parse_relation("x >= 0").unwrap();
        assert_eq!(r.violation(&env(&[("x", -1.0)]), 1e-9), Some(1.0));
    }

    #[test]
    fn test_parse_bare_expression_means_zero() {
        let r = parse_relation("x - 2").unwrap();
        assert_eq!(r.op, RelOp::Eq);
        assert_eq!(r.holds(&env(&[("x", 2.0)]), 1e-9), Some(true));
    }

    #[test]
    fn test_parse_rejects_chained_comparisons() {
        assert!(parse_relation("1 < x < 2").is_err());
        assert!(parse_relation("x =").is_err());
    }

    #[test]
    fn test_holds_with_tolerance() {
        let r = parse_relation("x = 1").unwrap();
        assert_eq!(r.holds(&env(&[("x", 1.0 + 1e-9)]), 1e-6), Some(true));
        assert_eq!(r.holds(&env(&[("x", 1.01)]), 1e-6), Some(false));
    }

    #[test]
    fn test_pins() {
        let r = parse_relation("x = 4").unwrap();
        assert_eq!(r.pins("x"), Some(4.0));
        assert_eq!(r.pins("y"), None);
        let r = parse_relation("4 = x").unwrap();
        assert_eq!(r.pins("x"), Some(4.0));
        let r = parse_relation("x + 1 = 4").unwrap();
        assert_eq!(r.pins("x"), None);
    }

    #[test]
    fn test_residual_unavailable() {
        let r = parse_relation("x + y = 1").unwrap();
        assert_eq!(r.residual(&env(&[("x", 1.0)])), None);
    }
}
