//! # Symbolic Operators
//!
//! Rewriting operators that work on expression structure: canonicalization,
//! binding propagation, elimination, case splitting, bound harvesting and
//! closed-form solving.

use super::{domain_of, is_tautology, linear_solution, poly_roots, Operator};
use crate::candidate::Candidate;
use crate::config::SolverConfig;
use crate::expr::{Expr, Func};
use crate::relation::{RelOp, Relation};
use crate::state::{Domain, Goal, QualFact, SolverState};
use anysolve_error::Result;
use std::collections::BTreeMap;
use tracing::debug;

// =============================================================================
// Simplify
// =============================================================================

/// Canonicalize every working relation (and the working integrand)
pub struct Simplify;

impl Operator for Simplify {
    fn name(&self) -> &'static str {
        "simplify"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        let view = state.active_view();
        view.relations.iter().any(|r| &r.simplify() != r)
            || view
                .integrand
                .as_ref()
                .map(|e| &e.simplify() != e)
                .unwrap_or(false)
    }

    fn apply(&self, state: &SolverState, _config: &SolverConfig) -> Result<(SolverState, f64)> {
        let mut next = state.clone();
        let view = next.active_view_mut();
        let mut changed = 0usize;
        for r in view.relations.iter_mut() {
            let s = r.simplify();
            if &s != r {
                *r = s;
                changed += 1;
            }
        }
        if let Some(e) = view.integrand.as_mut() {
            let s = e.simplify();
            if &s != e {
                *e = s;
                changed += 1;
            }
        }
        Ok((next, if changed > 0 { 0.25 } else { 0.0 }))
    }
}

// =============================================================================
// Substitute
// =============================================================================

/// Propagate solved bindings: numeric pins (`x = 4`) become environment
/// entries; recorded symbolic bindings flow into the working relations.
pub struct Substitute;

impl Substitute {
    fn pinned(state: &SolverState) -> Vec<(String, f64)> {
        let unknowns = state.unknowns();
        let mut out = Vec::new();
        for rel in &state.active_view().relations {
            for var in &unknowns {
                if let Some(value) = rel.pins(var) {
                    out.push((var.clone(), value));
                }
            }
        }
        out
    }
}

impl Operator for Substitute {
    fn name(&self) -> &'static str {
        "substitute"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        !Self::pinned(state).is_empty()
    }

    fn apply(&self, state: &SolverState, config: &SolverConfig) -> Result<(SolverState, f64)> {
        let mut next = state.clone();
        let pins = Self::pinned(state);
        let count = pins.len();
        for (var, value) in pins {
            debug!(var = %var, value, "binding pinned variable");
            next.bind(var, value);
        }
        // Bindings can leave `4 = 4` husks behind
        let tol = config.residual_tol;
        next.active_view_mut()
            .relations
            .retain(|r| !is_tautology(r, tol));
        Ok((next, count as f64))
    }
}

// =============================================================================
// Eliminate
// =============================================================================

/// Solve one equality for one variable symbolically, substitute the solution
/// everywhere else and drop the used equality.
pub struct Eliminate;

impl Eliminate {
    /// First (relation index, variable, solution) in deterministic order
    fn pick(state: &SolverState) -> Option<(usize, String, Expr)> {
        let unknowns = state.unknowns();
        let view = state.active_view();
        if view.relations.iter().filter(|r| r.op.is_equality()).count() < 2 {
            return None;
        }
        for (i, rel) in view.relations.iter().enumerate() {
            for var in &unknowns {
                if !rel.contains_var(var) {
                    continue;
                }
                if let Some((sol, _)) = linear_solution(rel, var, &state.env) {
                    // A solution mentioning the variable itself is no solution
                    if !sol.contains_var(var) {
                        return Some((i, var.clone(), sol));
                    }
                }
            }
        }
        None
    }
}

impl Operator for Eliminate {
    fn name(&self) -> &'static str {
        "eliminate"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        Self::pick(state).is_some()
    }

    fn apply(&self, state: &SolverState, config: &SolverConfig) -> Result<(SolverState, f64)> {
        let (idx, var, sol) = match Self::pick(state) {
            Some(p) => p,
            None => return Ok((state.clone(), 0.0)),
        };
        debug!(var = %var, solution = %sol, "eliminating variable");
        let mut next = state.clone();
        let mut map = BTreeMap::new();
        map.insert(var.clone(), sol.clone());
        {
            let view = next.active_view_mut();
            view.relations.remove(idx);
            for r in view.relations.iter_mut() {
                *r = r.substitute(&map).simplify();
            }
            let tol = config.residual_tol;
            view.relations.retain(|r| !is_tautology(r, tol));
        }
        // Constant solutions bind immediately, symbolic ones are recorded
        // for back-substitution once their free variables resolve
        if let Some(v) = sol.eval(&next.env) {
            next.bind(&var, v);
        } else {
            next.bindings.insert(var, sol);
        }
        Ok((next, 1.0))
    }
}

// =============================================================================
// Differentiate
// =============================================================================

/// For optimization goals, add the first-order conditions
/// `d(objective)/dx = 0` as working constraints.
pub struct Differentiate;

impl Differentiate {
    fn missing_conditions(state: &SolverState) -> Vec<Relation> {
        let objective = match &state.goal {
            Goal::Optimize { objective, .. } => objective,
            _ => return Vec::new(),
        };
        let existing: Vec<String> = state
            .active_view()
            .relations
            .iter()
            .map(|r| r.to_string())
            .collect();
        let mut out = Vec::new();
        for var in state.unknowns() {
            if let Some(d) = objective.differentiate(&var) {
                let rel = Relation::eq(d, Expr::Num(0.0));
                if !existing.contains(&rel.to_string()) {
                    out.push(rel);
                }
            }
        }
        out
    }
}

impl Operator for Differentiate {
    fn name(&self) -> &'static str {
        "differentiate"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        !Self::missing_conditions(state).is_empty()
    }

    fn apply(&self, state: &SolverState, _config: &SolverConfig) -> Result<(SolverState, f64)> {
        let conditions = Self::missing_conditions(state);
        let count = conditions.len();
        let mut next = state.clone();
        next.active_view_mut().relations.extend(conditions);
        Ok((next, count as f64))
    }
}

// =============================================================================
// CaseSplit
// =============================================================================

/// Split sign-ambiguous relations into branches: `x^2 = c` becomes
/// `x = +sqrt(c)` / `x = -sqrt(c)`, `|e| = c` becomes `e = c` / `e = -c`.
pub struct CaseSplit;

impl CaseSplit {
    fn branches(state: &SolverState) -> Option<(usize, Vec<Vec<Relation>>)> {
        let view = state.active_view();
        let unknowns = state.unknowns();
        for (i, rel) in view.relations.iter().enumerate() {
            if !rel.op.is_equality() {
                continue;
            }
            // |e| = c
            if let (Expr::Call(Func::Abs, inner), Some(c)) = (&rel.lhs, rel.rhs.eval(&state.env)) {
                if c >= 0.0 {
                    let pos = Relation::eq((**inner).clone(), Expr::Num(c));
                    let neg = Relation::eq((**inner).clone(), Expr::Num(-c));
                    return Some((i, vec![vec![pos], vec![neg]]));
                }
            }
            // Quadratic in a single unknown
            let vars = rel.free_vars();
            let mut in_play: Vec<&String> = vars.iter().filter(|v| unknowns.contains(*v)).collect();
            if in_play.len() != 1 {
                continue;
            }
            let var = in_play.remove(0);
            let coeffs = match rel.residual_expr().poly_coeffs(var, &state.env) {
                Some(c) => c,
                None => continue,
            };
            if coeffs.len() != 3 {
                continue;
            }
            let roots = poly_roots(&coeffs);
            if roots.len() == 2 {
                let a = Relation::eq(Expr::var(var.clone()), Expr::Num(roots[0]));
                let b = Relation::eq(Expr::var(var.clone()), Expr::Num(roots[1]));
                return Some((i, vec![vec![a], vec![b]]));
            }
        }
        None
    }
}

impl Operator for CaseSplit {
    fn name(&self) -> &'static str {
        "case_split"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        state.case_splits.is_empty() && Self::branches(state).is_some()
    }

    fn apply(&self, state: &SolverState, _config: &SolverConfig) -> Result<(SolverState, f64)> {
        let (_, branches) = match Self::branches(state) {
            Some(b) => b,
            None => return Ok((state.clone(), 0.0)),
        };
        let mut next = state.clone();
        debug!(branches = branches.len(), "case split registered");
        next.case_splits = branches;
        next.activate_case(0);
        Ok((next, 1.0))
    }
}

// =============================================================================
// BoundInfer
// =============================================================================

/// Harvest interval domains from inequalities linear in one unknown, and
/// non-negativity from sqrt arguments
pub struct BoundInfer;

impl BoundInfer {
    /// Variables appearing as a bare sqrt argument in the working relations.
    /// Their domain cannot extend below zero.
    fn sqrt_vars(state: &SolverState) -> Vec<String> {
        fn walk(e: &Expr, out: &mut Vec<String>) {
            match e {
                Expr::Call(Func::Sqrt, inner) => {
                    if let Expr::Var(v) = &**inner {
                        if !out.contains(v) {
                            out.push(v.clone());
                        }
                    }
                    walk(inner, out);
                }
                Expr::Call(_, inner) => walk(inner, out),
                Expr::Add(items) | Expr::Mul(items) => {
                    for item in items {
                        walk(item, out);
                    }
                }
                Expr::Pow(base, exp) => {
                    walk(base, out);
                    walk(exp, out);
                }
                Expr::Num(_) | Expr::Var(_) => {}
            }
        }
        let mut out = Vec::new();
        for rel in &state.active_view().relations {
            walk(&rel.lhs, &mut out);
            walk(&rel.rhs, &mut out);
        }
        let unknowns = state.unknowns();
        out.retain(|v| unknowns.contains(v));
        out
    }

    /// Tightenings implied by the working inequalities
    fn tightenings(state: &SolverState) -> Vec<(String, Domain)> {
        let unknowns = state.unknowns();
        let mut out = Vec::new();
        for var in Self::sqrt_vars(state) {
            let implied = Domain {
                lo: 0.0,
                hi: f64::INFINITY,
            };
            let current = domain_of(state, &var);
            let tightened = current.intersect(&implied);
            if tightened != current {
                out.push((var, tightened));
            }
        }
        for rel in &state.active_view().relations {
            if rel.op.is_equality() {
                continue;
            }
            let vars = rel.free_vars();
            let mut in_play: Vec<&String> =
                vars.iter().filter(|v| unknowns.contains(*v)).collect();
            if in_play.len() != 1 {
                continue;
            }
            let var = in_play.remove(0);
            let (a, b) = match rel.residual_expr().collect_linear(var) {
                Some(ab) => ab,
                None => continue,
            };
            let (a, b) = match (a.simplify().eval(&state.env), b.simplify().eval(&state.env)) {
                (Some(a), Some(b)) if a != 0.0 => (a, b),
                _ => continue,
            };
            // a*x + b (<= or >=) 0
            let bound = -b / a;
            let upper = match rel.op {
                RelOp::Le | RelOp::Lt => a > 0.0,
                RelOp::Ge | RelOp::Gt => a < 0.0,
                RelOp::Eq => continue,
            };
            let implied = if upper {
                Domain {
                    lo: f64::NEG_INFINITY,
                    hi: bound,
                }
            } else {
                Domain {
                    lo: bound,
                    hi: f64::INFINITY,
                }
            };
            let current = domain_of(state, var);
            let tightened = current.intersect(&implied);
            if tightened != current {
                out.push((var.clone(), tightened));
            }
        }
        out
    }
}

impl Operator for BoundInfer {
    fn name(&self) -> &'static str {
        "bound_infer"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        !Self::tightenings(state).is_empty()
    }

    fn apply(&self, state: &SolverState, _config: &SolverConfig) -> Result<(SolverState, f64)> {
        let mut next = state.clone();
        let tightenings = Self::tightenings(state);
        let count = tightenings.len();
        for (var, domain) in tightenings {
            debug!(var = %var, lo = domain.lo, hi = domain.hi, "domain tightened");
            let merged = domain_of(&next, &var).intersect(&domain);
            // A point domain pins the variable outright
            if merged.width() == 0.0 && !merged.is_empty() {
                next.bind(&var, merged.lo);
            }
            if merged.lo >= 0.0 {
                next.add_fact(&var, QualFact::NonNegative);
            }
            if merged.hi <= 0.0 {
                next.add_fact(&var, QualFact::NonPositive);
            }
            next.domains.insert(var, merged);
        }
        Ok((next, count as f64 * 0.5))
    }
}

// =============================================================================
// DirectSolve
// =============================================================================

/// Closed-form solve of a single-unknown linear or quadratic equality,
/// yielding a candidate over the full environment.
pub struct DirectSolve;

impl DirectSolve {
    fn solvable(state: &SolverState) -> Option<(String, Vec<f64>)> {
        let unknowns = state.unknowns();
        if unknowns.len() != 1 {
            return None;
        }
        let var = unknowns.into_iter().next()?;
        for rel in &state.active_view().relations {
            if !rel.op.is_equality() || !rel.contains_var(&var) {
                continue;
            }
            if let Some(coeffs) = rel.residual_expr().poly_coeffs(&var, &state.env) {
                if (2..=3).contains(&coeffs.len()) {
                    let roots = poly_roots(&coeffs);
                    if !roots.is_empty() {
                        return Some((var, roots));
                    }
                }
            }
        }
        None
    }
}

impl Operator for DirectSolve {
    fn name(&self) -> &'static str {
        "direct_solve"
    }

    fn applicable(&self, state: &SolverState, _config: &SolverConfig) -> bool {
        Self::solvable(state).is_some()
    }

    fn apply(&self, state: &SolverState, _config: &SolverConfig) -> Result<(SolverState, f64)> {
        let (var, roots) = match Self::solvable(state) {
            Some(s) => s,
            None => return Ok((state.clone(), 0.0)),
        };
        let domain = domain_of(state, &var);
        let chosen = roots
            .iter()
            .copied()
            .find(|r| domain.contains(*r))
            .or_else(|| roots.first().copied());
        let root = match chosen {
            Some(r) => r,
            None => return Ok((state.clone(), 0.0)),
        };
        debug!(var = %var, root, "closed-form root");

        let mut next = state.clone();
        next.bind(&var, root);

        let values = next.env.clone();
        next.push_candidate(Candidate::assignment(values, "direct_solve"));

        // Alternate roots stay reachable through the case-split rotation
        if roots.len() > 1 && next.case_splits.is_empty() {
            next.case_splits = roots
                .iter()
                .map(|r| vec![Relation::eq(Expr::var(var.clone()), Expr::Num(*r))])
                .collect();
            next.active_case = Some(roots.iter().position(|r| *r == root).unwrap_or(0));
        }
        Ok((next, 2.0))
    }
}
