//! # Operator Pool
//!
//! Operators are the only things that rewrite solver state. Each one is a
//! pure snapshot-in, snapshot-out transform: `apply` clones the state,
//! rewrites the clone and reports a progress delta. Operators never touch
//! the goal or the original constraint list.
//!
//! Numeric failure (divergence, no bracket, singular system) is a
//! zero-progress return, never an error. `Err` is reserved for genuine
//! defects such as an operator applied when `applicable` said no.

mod numeric;
mod symbolic;

pub use numeric::{FeasibleSample, IntervalRefine, LinearSolve, NewtonSolve, Quadrature, Rationalize};
pub use symbolic::{BoundInfer, CaseSplit, DirectSolve, Differentiate, Eliminate, Simplify, Substitute};

use crate::config::SolverConfig;
use crate::expr::Expr;
use crate::relation::Relation;
use crate::state::{Domain, SolverState};
use anysolve_error::Result;
use std::collections::BTreeMap;

pub trait Operator {
    fn name(&self) -> &'static str;

    /// Cheap test: could `apply` make progress on this state?
    fn applicable(&self, state: &SolverState, config: &SolverConfig) -> bool;

    /// Produce the rewritten state and a progress delta. Zero delta with an
    /// unchanged state is the no-progress signal.
    fn apply(&self, state: &SolverState, config: &SolverConfig) -> Result<(SolverState, f64)>;
}

/// The full pool in deterministic registration order
pub fn standard_pool() -> Vec<Box<dyn Operator>> {
    vec![
        Box::new(Simplify),
        Box::new(Substitute),
        Box::new(Eliminate),
        Box::new(Differentiate),
        Box::new(CaseSplit),
        Box::new(BoundInfer),
        Box::new(DirectSolve),
        Box::new(LinearSolve),
        Box::new(NewtonSolve),
        Box::new(IntervalRefine),
        Box::new(FeasibleSample),
        Box::new(Quadrature),
        Box::new(Rationalize),
    ]
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Solve an equality for `var` when it enters linearly with a numeric
/// coefficient: `rel` as `a*var + b (op) 0` gives `var = -b/a`.
/// Returns the solution expression and the coefficient.
pub(crate) fn linear_solution(
    rel: &Relation,
    var: &str,
    env: &BTreeMap<String, f64>,
) -> Option<(Expr, f64)> {
    if !rel.op.is_equality() {
        return None;
    }
    let (a, b) = rel.residual_expr().collect_linear(var)?;
    let a_val = a.simplify().eval(env).or_else(|| a.simplify().as_num())?;
    if a_val.abs() < 1e-300 {
        return None;
    }
    let sol = Expr::mul(vec![Expr::num(-1.0 / a_val), b]).simplify();
    Some((sol, a_val))
}

/// Real roots of `c0 + c1 x + c2 x^2 = 0`, ascending. Empty when the
/// discriminant is negative or the polynomial is degenerate.
pub(crate) fn poly_roots(coeffs: &[f64]) -> Vec<f64> {
    match coeffs.len() {
        2 => {
            if coeffs[1] == 0.0 {
                Vec::new()
            } else {
                vec![-coeffs[0] / coeffs[1]]
            }
        }
        3 => {
            let (c, b, a) = (coeffs[0], coeffs[1], coeffs[2]);
            if a == 0.0 {
                return poly_roots(&coeffs[..2]);
            }
            let disc = b * b - 4.0 * a * c;
            if disc < 0.0 {
                return Vec::new();
            }
            let sq = disc.sqrt();
            let mut roots = vec![(-b - sq) / (2.0 * a), (-b + sq) / (2.0 * a)];
            roots.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
            roots.dedup_by(|x, y| (*x - *y).abs() < 1e-12);
            roots
        }
        _ => Vec::new(),
    }
}

/// Domain for a variable, unbounded when none is recorded
pub(crate) fn domain_of(state: &SolverState, var: &str) -> Domain {
    state
        .domains
        .get(var)
        .copied()
        .unwrap_or_else(Domain::unbounded)
}

/// Search bracket for a variable: its domain clipped to a finite window
pub(crate) fn bracket_of(state: &SolverState, var: &str) -> (f64, f64) {
    let d = domain_of(state, var);
    (d.lo.max(-16.0), d.hi.min(16.0))
}

/// Deterministic pseudo-random stream for sampling operators.
/// Plain 64-bit LCG; quality is irrelevant, reproducibility is the point.
pub(crate) struct SeededStream {
    state: u64,
}

impl SeededStream {
    pub(crate) fn new(seed: u64) -> SeededStream {
        SeededStream {
            state: seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407),
        }
    }

    pub(crate) fn next_unit(&mut self) -> f64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.state >> 11) as f64) / ((1u64 << 53) as f64)
    }

    /// Uniform draw over a closed interval
    pub(crate) fn next_in(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_unit()
    }
}

/// A relation that simplified to a trivially-true statement
pub(crate) fn is_tautology(rel: &Relation, tol: f64) -> bool {
    if !rel.op.is_equality() {
        return false;
    }
    match rel.residual_expr().simplify().as_num() {
        Some(r) => r.abs() <= tol,
        None => false,
    }
}
