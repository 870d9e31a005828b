//! # Numeric Operators
//!
//! Root finding, sampling, integration and rational cleanup. Every numeric
//! failure mode here (divergence, no sign change, singular step, unevaluable
//! point) is reported as a zero-progress step, never as an error.

use super::{bracket_of, domain_of, Operator, SeededStream};
use crate::candidate::Candidate;
use crate::config::SolverConfig;
use crate::linalg::{solve_least_squares, solve_linear};
use crate::relation::Relation;
use crate::state::{Goal, QualFact, SolverState};
use anysolve_error::Result;
use std::collections::BTreeMap;
use tracing::debug;

/// The single-unknown residual targeted by root-finding operators
fn single_unknown_residual(state: &SolverState) -> Option<(String, Vec<Relation>)> {
    let unknowns = state.unknowns();
    if unknowns.len() != 1 {
        return None;
    }
    let var = unknowns.into_iter().next()?;
    let rels: Vec<Relation> = state
        .active_view()
        .relations
        .iter()
        .filter(|r| r.op.is_equality() && r.contains_var(&var))
        .cloned()
        .collect();
    if rels.is_empty() {
        None
    } else {
        Some((var, rels))
    }
}

/// Sum of squared equality residuals as a scalar objective
fn residual_sq(rels: &[Relation], env: &BTreeMap<String, f64>) -> Option<f64> {
    let mut acc = 0.0;
    for r in rels {
        let v = r.residual(env)?;
        acc += v * v;
    }
    Some(acc)
}

// =============================================================================
// NewtonSolve
// =============================================================================

/// Seeded multi-start Newton iteration on a single-unknown residual.
/// The derivative comes from a central finite difference; a flat or
/// unevaluable step falls through to the next seed.
pub struct NewtonSolve;

impl Operator for NewtonSolve {
    fn name(&self) -> &'static str {
        "newton_solve"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        single_unknown_residual(state).is_some()
    }

    fn apply(&self, state: &SolverState, config: &SolverConfig) -> Result<(SolverState, f64)> {
        let (var, rels) = match single_unknown_residual(state) {
            Some(p) => p,
            None => return Ok((state.clone(), 0.0)),
        };
        let (lo, hi) = bracket_of(state, &var);
        let mut stream = SeededStream::new(state.numeric_seed.wrapping_add(1));
        let mut env = state.env.clone();
        let h = config.fd_step;

        for _ in 0..config.newton_seeds {
            let mut x = stream.next_in(lo, hi);
            let mut converged = false;
            for _ in 0..config.newton_iters {
                env.insert(var.clone(), x);
                let f = match residual_value(&rels, &env) {
                    Some(f) => f,
                    None => break,
                };
                if f.abs() <= config.residual_tol {
                    converged = true;
                    break;
                }
                env.insert(var.clone(), x + h);
                let f_hi = residual_value(&rels, &env);
                env.insert(var.clone(), x - h);
                let f_lo = residual_value(&rels, &env);
                let d = match (f_hi, f_lo) {
                    (Some(a), Some(b)) => (a - b) / (2.0 * h),
                    _ => break,
                };
                if d.abs() < 1e-14 {
                    break;
                }
                let step = f / d;
                x -= step.clamp(-(hi - lo), hi - lo);
                if !x.is_finite() {
                    break;
                }
            }
            if converged && domain_of(state, &var).contains(x) {
                debug!(var = %var, root = x, "newton converged");
                let mut next = state.clone();
                next.bind(&var, x);
                let values = next.env.clone();
                next.push_candidate(Candidate::assignment(values, "newton_solve"));
                return Ok((next, 2.0));
            }
        }
        debug!(var = %var, "newton exhausted its seeds");
        Ok((state.clone(), 0.0))
    }
}

/// Combined signed residual: the single relation's residual when there is
/// one, otherwise the l2 of the stack (sign lost, still fine for |f| tests)
fn residual_value(rels: &[Relation], env: &BTreeMap<String, f64>) -> Option<f64> {
    if rels.len() == 1 {
        rels[0].residual(env)
    } else {
        residual_sq(rels, env).map(f64::sqrt)
    }
}

// =============================================================================
// IntervalRefine
// =============================================================================

/// Grid scan for a sign change, then bisection to tolerance
pub struct IntervalRefine;

impl Operator for IntervalRefine {
    fn name(&self) -> &'static str {
        "interval_refine"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        match single_unknown_residual(state) {
            Some((_, rels)) => rels.len() == 1,
            None => false,
        }
    }

    fn apply(&self, state: &SolverState, config: &SolverConfig) -> Result<(SolverState, f64)> {
        let (var, rels) = match single_unknown_residual(state) {
            Some(p) if p.1.len() == 1 => p,
            _ => return Ok((state.clone(), 0.0)),
        };
        let rel = &rels[0];
        let (lo, hi) = bracket_of(state, &var);
        let n = config.grid_points.max(2);
        let mut env = state.env.clone();

        let value_at = |env: &mut BTreeMap<String, f64>, x: f64| {
            env.insert(var.clone(), x);
            rel.residual(env)
        };

        // Find a bracketing cell
        let mut bracket = None;
        let mut prev: Option<(f64, f64)> = None;
        for i in 0..=n {
            let x = lo + (hi - lo) * i as f64 / n as f64;
            let f = match value_at(&mut env, x) {
                Some(f) => f,
                None => {
                    prev = None;
                    continue;
                }
            };
            if f.abs() <= config.residual_tol {
                bracket = Some((x, x));
                break;
            }
            if let Some((px, pf)) = prev {
                if pf.signum() != f.signum() {
                    bracket = Some((px, x));
                    break;
                }
            }
            prev = Some((x, f));
        }

        let (mut a, mut b) = match bracket {
            Some(b) => b,
            None => {
                debug!(var = %var, "no sign change on the grid");
                return Ok((state.clone(), 0.0));
            }
        };
        for _ in 0..200 {
            if (b - a).abs() <= config.residual_tol * 0.5 {
                break;
            }
            let mid = 0.5 * (a + b);
            let fm = match value_at(&mut env, mid) {
                Some(f) => f,
                None => break,
            };
            let fa = match value_at(&mut env, a) {
                Some(f) => f,
                None => break,
            };
            if fm.abs() <= config.residual_tol {
                a = mid;
                b = mid;
                break;
            }
            if fa.signum() == fm.signum() {
                a = mid;
            } else {
                b = mid;
            }
        }
        let root = 0.5 * (a + b);
        debug!(var = %var, root, "bisection converged");
        let mut next = state.clone();
        next.bind(&var, root);
        let values = next.env.clone();
        next.push_candidate(Candidate::assignment(values, "interval_refine"));
        Ok((next, 2.0))
    }
}

// =============================================================================
// LinearSolve
// =============================================================================

/// One-shot solve of a multi-unknown linear equality system. Coefficients
/// are read off symbolically per unknown; square systems go through Gaussian
/// elimination, overdetermined ones through least squares. The candidate is
/// pushed unverified, so an inconsistent least-squares fit still gets
/// rejected against the original constraints.
pub struct LinearSolve;

impl LinearSolve {
    /// Coefficient matrix and right-hand side of the working equalities,
    /// when every one is linear in every unknown with coefficients that
    /// evaluate under the current bindings.
    fn linear_system(state: &SolverState) -> Option<(Vec<String>, Vec<Vec<f64>>, Vec<f64>)> {
        let unknowns: Vec<String> = state.unknowns().into_iter().collect();
        if unknowns.len() < 2 {
            return None;
        }
        let equalities: Vec<&Relation> = state
            .active_view()
            .relations
            .iter()
            .filter(|r| r.op.is_equality())
            .collect();
        if equalities.len() < unknowns.len() {
            return None;
        }
        let mut zero_env = state.env.clone();
        for var in &unknowns {
            zero_env.insert(var.clone(), 0.0);
        }
        let mut a = Vec::with_capacity(equalities.len());
        let mut b = Vec::with_capacity(equalities.len());
        for rel in &equalities {
            let f = rel.residual_expr();
            let mut row = Vec::with_capacity(unknowns.len());
            for var in &unknowns {
                // A coefficient still holding an unknown means a cross term;
                // the system is not linear and the operator backs off
                let (coeff, _) = f.collect_linear(var)?;
                row.push(coeff.simplify().eval(&state.env)?);
            }
            a.push(row);
            b.push(-f.eval(&zero_env)?);
        }
        Some((unknowns, a, b))
    }
}

impl Operator for LinearSolve {
    fn name(&self) -> &'static str {
        "linear_solve"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        Self::linear_system(state).is_some()
    }

    fn apply(&self, state: &SolverState, config: &SolverConfig) -> Result<(SolverState, f64)> {
        let (unknowns, a, b) = match Self::linear_system(state) {
            Some(sys) => sys,
            None => return Ok((state.clone(), 0.0)),
        };
        let solution = if a.len() == unknowns.len() {
            solve_linear(&a, &b, config.pivot_rel_tol)
        } else {
            solve_least_squares(&a, &b, config.pivot_rel_tol)
        };
        let xs = match solution {
            Some(xs) => xs,
            None => {
                debug!("linear system is singular");
                return Ok((state.clone(), 0.0));
            }
        };
        debug!(unknowns = unknowns.len(), equations = a.len(), "linear system solved");
        let mut next = state.clone();
        for (var, x) in unknowns.iter().zip(&xs) {
            next.bind(var, *x);
        }
        let values = next.env.clone();
        next.push_candidate(Candidate::assignment(values, "linear_solve"));
        Ok((next, 2.0))
    }
}

// =============================================================================
// FeasibleSample
// =============================================================================

/// Deterministic sampling with one repair pass: free variables get seeded
/// draws within their domains, then each equality that became linear in a
/// single remaining unknown is re-solved exactly. Produces a full-assignment
/// candidate even on under-determined systems.
pub struct FeasibleSample;

const SAMPLE_TRIES: u32 = 8;

impl Operator for FeasibleSample {
    fn name(&self) -> &'static str {
        "feasible_sample"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        !state.unknowns().is_empty()
            && matches!(
                state.goal,
                Goal::SolveFor(_) | Goal::Satisfy | Goal::Optimize { .. }
            )
    }

    fn apply(&self, state: &SolverState, config: &SolverConfig) -> Result<(SolverState, f64)> {
        let unknowns: Vec<String> = state.unknowns().into_iter().collect();
        let mut stream = SeededStream::new(state.numeric_seed.wrapping_add(17));
        let equalities: Vec<Relation> = state
            .active_view()
            .relations
            .iter()
            .filter(|r| r.op.is_equality())
            .cloned()
            .collect();

        let mut best_env: Option<(f64, BTreeMap<String, f64>)> = None;
        for _ in 0..SAMPLE_TRIES {
            let mut env = state.env.clone();
            for var in &unknowns {
                let (lo, hi) = bracket_of(state, var);
                env.insert(var.clone(), stream.next_in(lo, hi));
            }
            Self::repair(&equalities, &unknowns, state, &mut env);

            // Score by total violation over the working relations
            let mut score = 0.0;
            let mut ok = true;
            for rel in &state.active_view().relations {
                match rel.violation(&env, config.residual_tol) {
                    Some(v) => score += v,
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if !ok {
                continue;
            }
            match &best_env {
                Some((s, _)) if *s <= score => {}
                _ => best_env = Some((score, env)),
            }
        }

        let (score, env) = match best_env {
            Some(b) => b,
            None => return Ok((state.clone(), 0.0)),
        };
        debug!(score, "feasible sample produced");
        let mut next = state.clone();
        let mut values = env;
        values.retain(|k, _| unknowns.contains(k) || state.env.contains_key(k));
        next.numeric_seed = next.numeric_seed.wrapping_add(1);
        next.push_candidate(Candidate::assignment(values, "feasible_sample"));
        Ok((next, 0.5))
    }
}

impl FeasibleSample {
    /// One pass of exact repair: re-solve each equality for one of its
    /// variables, treating all other sampled values as fixed.
    fn repair(
        equalities: &[Relation],
        unknowns: &[String],
        state: &SolverState,
        env: &mut BTreeMap<String, f64>,
    ) {
        for rel in equalities {
            for var in unknowns {
                if !rel.contains_var(var) {
                    continue;
                }
                let mut others = env.clone();
                others.remove(var);
                if let Some((sol, _)) = super::linear_solution(rel, var, &others) {
                    if let Some(v) = sol.eval(&others) {
                        if domain_of(state, var).contains(v) {
                            env.insert(var.clone(), v);
                        }
                        break;
                    }
                }
            }
        }
    }
}

// =============================================================================
// Quadrature
// =============================================================================

/// Adaptive Simpson integration of the working integrand copy with a
/// Richardson error estimate. The achieved estimate becomes the candidate's
/// error bound.
pub struct Quadrature;

const MAX_DEPTH: u32 = 20;

impl Operator for Quadrature {
    fn name(&self) -> &'static str {
        "quadrature"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        match &state.goal {
            Goal::Integrate { var, lo, hi, .. } => {
                let integrand = match &state.active_view().integrand {
                    Some(e) => e,
                    None => return false,
                };
                let mut env = state.env.clone();
                env.insert(var.clone(), 0.5 * (lo + hi));
                integrand.eval(&env).is_some()
            }
            _ => false,
        }
    }

    fn apply(&self, state: &SolverState, config: &SolverConfig) -> Result<(SolverState, f64)> {
        let (var, lo, hi) = match &state.goal {
            Goal::Integrate { var, lo, hi, .. } => (var.clone(), *lo, *hi),
            _ => return Ok((state.clone(), 0.0)),
        };
        let integrand = match &state.active_view().integrand {
            Some(e) => e.clone(),
            None => return Ok((state.clone(), 0.0)),
        };
        let mut env = state.env.clone();
        let mut f = |x: f64| {
            env.insert(var.clone(), x);
            integrand.eval(&env)
        };

        let result = adaptive_simpson(&mut f, lo, hi, config.quadrature_tol, MAX_DEPTH);
        let (value, err) = match result {
            Some(r) => r,
            None => {
                debug!("quadrature hit an unevaluable point");
                return Ok((state.clone(), 0.0));
            }
        };
        debug!(value, err, "quadrature finished");
        let mut next = state.clone();
        next.push_candidate(Candidate::scalar(value, "quadrature").with_error_bound(err));
        Ok((next, 2.0))
    }
}

fn simpson(fa: f64, fm: f64, fb: f64, width: f64) -> f64 {
    width / 6.0 * (fa + 4.0 * fm + fb)
}

fn adaptive_simpson(
    f: &mut impl FnMut(f64) -> Option<f64>,
    a: f64,
    b: f64,
    tol: f64,
    depth: u32,
) -> Option<(f64, f64)> {
    let m = 0.5 * (a + b);
    let (fa, fm, fb) = (f(a)?, f(m)?, f(b)?);
    simpson_rec(f, a, b, fa, fm, fb, tol, depth)
}

#[allow(clippy::too_many_arguments)]
fn simpson_rec(
    f: &mut impl FnMut(f64) -> Option<f64>,
    a: f64,
    b: f64,
    fa: f64,
    fm: f64,
    fb: f64,
    tol: f64,
    depth: u32,
) -> Option<(f64, f64)> {
    let m = 0.5 * (a + b);
    let lm = 0.5 * (a + m);
    let rm = 0.5 * (m + b);
    let (flm, frm) = (f(lm)?, f(rm)?);
    let whole = simpson(fa, fm, fb, b - a);
    let left = simpson(fa, flm, fm, m - a);
    let right = simpson(fm, frm, fb, b - m);
    let delta = left + right - whole;
    if depth == 0 || delta.abs() <= 15.0 * tol {
        return Some((left + right + delta / 15.0, delta.abs() / 15.0));
    }
    let (lv, le) = simpson_rec(f, a, m, fa, flm, fm, tol * 0.5, depth - 1)?;
    let (rv, re) = simpson_rec(f, m, b, fm, frm, fb, tol * 0.5, depth - 1)?;
    Some((lv + rv, le + re))
}

// =============================================================================
// Rationalize
// =============================================================================

/// Snap a numeric best candidate to nearby small rationals via continued
/// fractions. The snapped candidate is pushed unverified; the verifier
/// decides whether the exact form actually holds.
pub struct Rationalize;

impl Rationalize {
    fn snap(value: f64, max_den: u64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        let (p, q) = continued_fraction(value, max_den);
        let snapped = p as f64 / q as f64;
        // Only worth reporting when it changes the float and stays close
        if snapped != value && (snapped - value).abs() < 1e-6 * value.abs().max(1.0) {
            Some(snapped)
        } else {
            None
        }
    }

    fn snapped_values(state: &SolverState, config: &SolverConfig) -> Option<Candidate> {
        let best = state.best.as_ref()?;
        let cand = if let Some(s) = best.scalar {
            let snapped = Self::snap(s, config.rationalize_max_den)?;
            Candidate::scalar(snapped, "rationalize")
                .with_error_bound(best.error_bound.unwrap_or(0.0))
        } else {
            let mut changed = false;
            let mut values = best.values.clone();
            for (name, v) in values.iter_mut() {
                // An integer-valued variable snaps straight to the nearest
                // integer rather than a nearby fraction
                if state.has_fact(name, QualFact::Integer) {
                    let rounded = v.round();
                    if rounded != *v && (rounded - *v).abs() < 1e-6 * v.abs().max(1.0) {
                        *v = rounded;
                        changed = true;
                    }
                    continue;
                }
                if let Some(s) = Self::snap(*v, config.rationalize_max_den) {
                    *v = s;
                    changed = true;
                }
            }
            if !changed {
                return None;
            }
            Candidate::assignment(values, "rationalize")
        };
        // Each distinct snap is proposed at most once
        let seen = state.candidates.iter().any(|c| {
            c.produced_by == "rationalize" && c.values == cand.values && c.scalar == cand.scalar
        });
        if seen {
            None
        } else {
            Some(cand)
        }
    }
}

impl Operator for Rationalize {
    fn name(&self) -> &'static str {
        "rationalize"
    }

    fn applicable(&self, state: &SolverState, config: &SolverConfig) -> bool {
        Self::snapped_values(state, config).is_some()
    }

    fn apply(&self, state: &SolverState, config: &SolverConfig) -> Result<(SolverState, f64)> {
        let cand = match Self::snapped_values(state, config) {
            Some(c) => c,
            None => return Ok((state.clone(), 0.0)),
        };
        debug!(candidate = %cand.render(), "rational snap proposed");
        let mut next = state.clone();
        next.push_candidate(cand);
        Ok((next, 0.5))
    }
}

/// Best rational approximation p/q with q <= max_den
fn continued_fraction(value: f64, max_den: u64) -> (i64, u64) {
    let negative = value < 0.0;
    let mut x = value.abs();
    let (mut p0, mut q0, mut p1, mut q1) = (0i64, 1u64, 1i64, 0u64);
    for _ in 0..64 {
        let a = x.floor();
        let p2 = a as i64 * p1 + p0;
        let q2 = a as u64 * q1 + q0;
        if q2 > max_den {
            break;
        }
        p0 = p1;
        q0 = q1;
        p1 = p2;
        q1 = q2;
        let frac = x - a;
        if frac < 1e-12 {
            break;
        }
        x = 1.0 / frac;
    }
    if q1 == 0 {
        return (0, 1);
    }
    (if negative { -p1 } else { p1 }, q1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expr;
    use crate::relation::parse_relation;

    fn state(constraints: &[&str], targets: &[&str]) -> SolverState {
        let rels = constraints
            .iter()
            .map(|c| parse_relation(c).unwrap())
            .collect();
        SolverState::new(
            "test",
            rels,
            Goal::SolveFor(targets.iter().map(|t| t.to_string()).collect()),
        )
    }

    fn integral(src: &str, lo: f64, hi: f64) -> SolverState {
        SolverState::new(
            "integral",
            Vec::new(),
            Goal::Integrate {
                integrand: parse_expr(src).unwrap(),
                var: "x".into(),
                lo,
                hi,
            },
        )
    }

    #[test]
    fn test_newton_finds_nonpolynomial_root() {
        let config = SolverConfig::default();
        // cos(x) = x has its root near 0.739085
        let s = state(&["cos(x) = x"], &["x"]);
        assert!(NewtonSolve.applicable(&s, &config));
        let (next, delta) = NewtonSolve.apply(&s, &config).unwrap();
        assert!(delta > 0.0);
        let x = *next.env.get("x").unwrap();
        assert!((x - 0.739085).abs() < 1e-3, "x = {}", x);
    }

    #[test]
    fn test_newton_divergence_is_zero_progress() {
        let config = SolverConfig::default();
        // x^2 + 1 = 0 has no real root; Newton must not error
        let s = state(&["x^2 + 1 = 0"], &["x"]);
        let (next, delta) = NewtonSolve.apply(&s, &config).unwrap();
        assert_eq!(delta, 0.0);
        assert_eq!(next, s);
    }

    #[test]
    fn test_interval_refine_bisects() {
        let config = SolverConfig::default();
        let s = state(&["x^3 = 8"], &["x"]);
        let (next, delta) = IntervalRefine.apply(&s, &config).unwrap();
        assert!(delta > 0.0);
        let x = *next.env.get("x").unwrap();
        assert!((x - 2.0).abs() < 1e-4, "x = {}", x);
    }

    #[test]
    fn test_interval_refine_no_bracket_is_zero_progress() {
        let config = SolverConfig::default();
        let s = state(&["x^2 + 1 = 0"], &["x"]);
        let (_, delta) = IntervalRefine.apply(&s, &config).unwrap();
        assert_eq!(delta, 0.0);
    }

    #[test]
    fn test_linear_solve_two_by_two() {
        let config = SolverConfig::default();
        let s = state(&["x + y = 5", "x - y = 1"], &["x", "y"]);
        assert!(LinearSolve.applicable(&s, &config));
        let (next, delta) = LinearSolve.apply(&s, &config).unwrap();
        assert!(delta > 0.0);
        assert!((next.env["x"] - 3.0).abs() < 1e-9);
        assert!((next.env["y"] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_solve_overdetermined_consistent() {
        let config = SolverConfig::default();
        let s = state(&["x + y = 5", "x - y = 1", "2x = 6"], &["x", "y"]);
        let (next, delta) = LinearSolve.apply(&s, &config).unwrap();
        assert!(delta > 0.0);
        assert!((next.env["x"] - 3.0).abs() < 1e-9);
        assert!((next.env["y"] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_solve_rejects_nonlinear_system() {
        let config = SolverConfig::default();
        let s = state(&["x*y = 6", "x + y = 5"], &["x", "y"]);
        assert!(!LinearSolve.applicable(&s, &config));
    }

    #[test]
    fn test_linear_solve_singular_is_zero_progress() {
        let config = SolverConfig::default();
        let s = state(&["x + y = 5", "2x + 2y = 10"], &["x", "y"]);
        let (next, delta) = LinearSolve.apply(&s, &config).unwrap();
        assert_eq!(delta, 0.0);
        assert_eq!(next, s);
    }

    #[test]
    fn test_feasible_sample_repairs_underdetermined() {
        let config = SolverConfig::default();
        let s = state(&["x + y = 5"], &["x"]);
        assert!(FeasibleSample.applicable(&s, &config));
        let (next, _) = FeasibleSample.apply(&s, &config).unwrap();
        assert_eq!(next.candidates.len(), 1);
        let c = &next.candidates[0];
        // Full assignment, satisfying the sampled-then-repaired equality
        let x = c.values["x"];
        let y = c.values["y"];
        assert!((x + y - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_feasible_sample_is_deterministic() {
        let config = SolverConfig::default();
        let s = state(&["x + y = 5"], &["x"]);
        let (a, _) = FeasibleSample.apply(&s, &config).unwrap();
        let (b, _) = FeasibleSample.apply(&s, &config).unwrap();
        assert_eq!(a.candidates[0].values, b.candidates[0].values);
    }

    #[test]
    fn test_reseed_changes_the_sample() {
        let config = SolverConfig::default();
        let mut s = state(&["x + y = 5"], &["x"]);
        let (a, _) = FeasibleSample.apply(&s, &config).unwrap();
        s.numeric_seed += 1;
        let (b, _) = FeasibleSample.apply(&s, &config).unwrap();
        assert_ne!(a.candidates[0].values, b.candidates[0].values);
    }

    #[test]
    fn test_quadrature_polynomial() {
        let config = SolverConfig::default();
        let s = integral("x^2", 0.0, 1.0);
        assert!(Quadrature.applicable(&s, &config));
        let (next, _) = Quadrature.apply(&s, &config).unwrap();
        let c = &next.candidates[0];
        assert!((c.scalar.unwrap() - 1.0 / 3.0).abs() < 1e-8);
        assert!(c.error_bound.unwrap() <= config.quadrature_tol * 20.0);
    }

    #[test]
    fn test_quadrature_oscillatory() {
        let config = SolverConfig::default();
        let s = integral("sin(x)", 0.0, std::f64::consts::PI);
        let (next, _) = Quadrature.apply(&s, &config).unwrap();
        assert!((next.candidates[0].scalar.unwrap() - 2.0).abs() < 1e-7);
    }

    #[test]
    fn test_quadrature_singularity_is_zero_progress() {
        let config = SolverConfig::default();
        // 1/x blows up at the left endpoint
        let s = integral("1/x", 0.0, 1.0);
        let (next, delta) = Quadrature.apply(&s, &config).unwrap();
        assert_eq!(delta, 0.0);
        assert!(next.candidates.is_empty());
    }

    #[test]
    fn test_continued_fraction_recovers_thirds() {
        let (p, q) = continued_fraction(1.0 / 3.0, 10_000);
        assert_eq!((p, q), (1, 3));
        let (p, q) = continued_fraction(-0.25, 10_000);
        assert_eq!((p, q), (-1, 4));
    }

    #[test]
    fn test_rationalize_snaps_near_rational_best() {
        let config = SolverConfig::default();
        let mut s = state(&["3x = 1"], &["x"]);
        let noisy = 1.0 / 3.0 + 3e-9;
        s.push_candidate(Candidate::assignment(
            [("x".to_string(), noisy)].into_iter().collect(),
            "newton_solve",
        ));
        assert!(Rationalize.applicable(&s, &config));
        let (next, _) = Rationalize.apply(&s, &config).unwrap();
        let snapped = next
            .candidates
            .iter()
            .find(|c| c.produced_by == "rationalize")
            .unwrap();
        assert_eq!(snapped.values["x"], 1.0 / 3.0);
    }

    #[test]
    fn test_rationalize_rounds_integer_marked_variable() {
        let config = SolverConfig::default();
        let mut s = state(&["n = 3"], &["n"]);
        s.add_fact("n", QualFact::Integer);
        s.push_candidate(Candidate::assignment(
            [("n".to_string(), 3.0 - 4e-9)].into_iter().collect(),
            "newton_solve",
        ));
        let (next, _) = Rationalize.apply(&s, &config).unwrap();
        let snapped = next
            .candidates
            .iter()
            .find(|c| c.produced_by == "rationalize")
            .unwrap();
        assert_eq!(snapped.values["n"], 3.0);
    }

    #[test]
    fn test_rationalize_skips_exact_values() {
        let config = SolverConfig::default();
        let mut s = state(&["x = 2"], &["x"]);
        s.push_candidate(Candidate::assignment(
            [("x".to_string(), 2.0)].into_iter().collect(),
            "direct_solve",
        ));
        assert!(!Rationalize.applicable(&s, &config));
    }
}
