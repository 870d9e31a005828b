//! # Verification
//!
//! Candidates are judged against the ORIGINAL constraint list, never against
//! the rewritten views, so rewriting bugs cannot manufacture a solved
//! verdict. The verifier also owns the infeasibility probe: when the metrics
//! estimator reports a dependent Jacobian row, the probe checks whether the
//! dependent pair is consistent or contradictory.

use crate::candidate::Candidate;
use crate::certificate::Conflict;
use crate::config::SolverConfig;
use crate::linalg::RankAnalysis;
use crate::metrics::MetricsEstimator;
use crate::state::{Goal, QualFact, SolverState};
use tracing::debug;

/// Outcome of judging one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Residual magnitudes per original constraint, in declaration order.
    /// A constraint that cannot be evaluated records infinity.
    pub residuals: Vec<f64>,
    /// Indices of violated original constraints
    pub violated: Vec<usize>,
    pub passed: bool,
}

pub struct Verifier<'a> {
    config: &'a SolverConfig,
}

impl<'a> Verifier<'a> {
    pub fn new(config: &'a SolverConfig) -> Verifier<'a> {
        Verifier { config }
    }

    /// Judge a candidate against every original constraint. Integral goals
    /// are additionally checked against an independent coarse estimate.
    pub fn judge(&self, state: &SolverState, cand: &mut Candidate) -> Verdict {
        let mut env = state.env.clone();
        env.extend(cand.values.iter().map(|(k, v)| (k.clone(), *v)));

        let mut residuals = Vec::with_capacity(state.original().len());
        let mut violated = Vec::new();
        for (i, rel) in state.original().iter().enumerate() {
            match rel.violation(&env, self.config.residual_tol) {
                Some(v) => {
                    // Equalities record the true magnitude, inequalities the
                    // amount by which they are broken
                    let mag = if rel.op.is_equality() {
                        rel.residual(&env).map(f64::abs).unwrap_or(v)
                    } else {
                        v
                    };
                    residuals.push(mag);
                    if v > 0.0 {
                        violated.push(i);
                    }
                }
                None => {
                    residuals.push(f64::INFINITY);
                    violated.push(i);
                }
            }
        }

        let mut passed = violated.is_empty();
        if passed {
            passed = self.goal_answer_present(state, cand);
        }
        if passed {
            passed = self.facts_hold(state, cand);
        }
        if passed {
            if let Goal::Integrate { .. } = state.goal {
                passed = self.integral_cross_check(state, cand);
            }
        }

        cand.residuals = residuals.clone();
        cand.verified = passed;
        debug!(
            produced_by = %cand.produced_by,
            passed,
            violated = violated.len(),
            "candidate judged"
        );
        Verdict {
            residuals,
            violated,
            passed,
        }
    }

    /// The candidate must actually answer the goal, not just avoid
    /// violating constraints.
    fn goal_answer_present(&self, state: &SolverState, cand: &Candidate) -> bool {
        match &state.goal {
            Goal::SolveFor(targets) => targets
                .iter()
                .all(|t| cand.values.contains_key(t) || state.env.contains_key(t)),
            Goal::Integrate { .. } | Goal::Optimize { .. } => cand.scalar.is_some(),
            Goal::Satisfy => true,
        }
    }

    /// Qualitative facts bind like constraints: an integer-marked variable
    /// with a fractional value fails verification.
    fn facts_hold(&self, state: &SolverState, cand: &Candidate) -> bool {
        let tol = self.config.residual_tol;
        for (var, facts) in &state.facts {
            let v = cand
                .values
                .get(var)
                .or_else(|| state.env.get(var))
                .copied();
            let v = match v {
                Some(v) => v,
                None => continue,
            };
            for fact in facts {
                let ok = match fact {
                    QualFact::NonNegative => v >= -tol,
                    QualFact::NonPositive => v <= tol,
                    QualFact::Integer => (v - v.round()).abs() <= tol,
                };
                if !ok {
                    return false;
                }
            }
        }
        true
    }

    /// Recompute the integral from the ORIGINAL integrand with a fixed
    /// Simpson grid and compare. Catches transform bugs in the working copy.
    fn integral_cross_check(&self, state: &SolverState, cand: &Candidate) -> bool {
        let (integrand, var, lo, hi) = match &state.goal {
            Goal::Integrate {
                integrand,
                var,
                lo,
                hi,
            } => (integrand, var, *lo, *hi),
            _ => return true,
        };
        let value = match cand.scalar {
            Some(v) => v,
            None => return false,
        };
        let n = 256;
        let h = (hi - lo) / n as f64;
        let mut env = state.env.clone();
        let mut sum = 0.0;
        for i in 0..=n {
            env.insert(var.clone(), lo + i as f64 * h);
            let f = match integrand.eval(&env) {
                Some(f) => f,
                // Endpoint singularities: fall back to accepting the
                // candidate's own error bound
                None => return cand.error_bound.is_some(),
            };
            let w = if i == 0 || i == n {
                1.0
            } else if i % 2 == 1 {
                4.0
            } else {
                2.0
            };
            sum += w * f;
        }
        let estimate = sum * h / 3.0;
        let tol = self
            .config
            .residual_tol
            .max(cand.error_bound.unwrap_or(0.0) * 10.0)
            .max(1e-4 * estimate.abs());
        (value - estimate).abs() <= tol.max(1e-4)
    }

    /// Probe dependent constraint pairs for contradiction.
    ///
    /// For a row `i` that eliminated to zero against pivot row `j` with
    /// factor `s`, the combination `f_i - s * f_j` is variable-free up to
    /// numerical noise. If it is bounded away from zero at every probe
    /// point, rows `i` and `j` cannot hold together.
    pub fn probe_conflicts(&self, state: &SolverState, analysis: &RankAnalysis) -> Vec<Conflict> {
        let equalities: Vec<_> = state
            .original()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.op.is_equality())
            .collect();
        let unknowns: Vec<String> = state.unknowns().into_iter().collect();
        let estimator = MetricsEstimator::new(self.config);

        let mut conflicts = Vec::new();
        for &(row, pivot, factor) in &analysis.dependence {
            let (ri_idx, ri) = match equalities.get(row) {
                Some(x) => *x,
                None => continue,
            };
            let (rj_idx, rj) = match equalities.get(pivot) {
                Some(x) => *x,
                None => continue,
            };
            let fi = ri.residual_expr();
            let fj = rj.residual_expr();

            let mut min_gap = f64::INFINITY;
            let mut evaluated = false;
            for offset in [0.37, 1.13, -0.71, 2.9] {
                let env = estimator.probe_env(&unknowns, state, offset);
                if let (Some(a), Some(b)) = (fi.eval(&env), fj.eval(&env)) {
                    evaluated = true;
                    min_gap = min_gap.min((a - factor * b).abs());
                }
            }
            if evaluated && min_gap > self.config.residual_tol {
                conflicts.push(Conflict {
                    constraints: (rj_idx, ri_idx),
                    rendered: (rj.to_string(), ri.to_string()),
                    witness_gap: min_gap,
                });
            }
        }
        conflicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expr;
    use crate::relation::parse_relation;
    use crate::state::Goal;
    use std::collections::BTreeMap;

    fn state(constraints: &[&str], goal: Goal) -> SolverState {
        let rels = constraints
            .iter()
            .map(|c| parse_relation(c).unwrap())
            .collect();
        SolverState::new("test", rels, goal)
    }

    fn cand(values: &[(&str, f64)]) -> Candidate {
        Candidate::assignment(
            values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            "test",
        )
    }

    #[test]
    fn test_correct_answer_passes() {
        let config = SolverConfig::default();
        let s = state(&["2x + 3 = 11"], Goal::SolveFor(vec!["x".into()]));
        let mut c = cand(&[("x", 4.0)]);
        let v = Verifier::new(&config).judge(&s, &mut c);
        assert!(v.passed);
        assert!(c.verified);
        assert!(v.violated.is_empty());
        assert!(v.residuals[0] < 1e-9);
    }

    #[test]
    fn test_judging_twice_yields_identical_verdicts() {
        let config = SolverConfig::default();
        let verifier = Verifier::new(&config);
        let s = state(
            &["2x + 3 = 11", "x >= 0"],
            Goal::SolveFor(vec!["x".into()]),
        );
        let mut c = cand(&[("x", 4.0)]);
        let first = verifier.judge(&s, &mut c);
        let residuals_after_first = c.residuals.clone();
        let second = verifier.judge(&s, &mut c);
        assert_eq!(first, second);
        assert_eq!(c.residuals, residuals_after_first);
        assert!(c.verified);

        // Same stability for a failing candidate
        let mut bad = cand(&[("x", 5.0)]);
        let first = verifier.judge(&s, &mut bad);
        let second = verifier.judge(&s, &mut bad);
        assert_eq!(first, second);
        assert!(!bad.verified);
    }

    #[test]
    fn test_wrong_answer_fails_with_residual() {
        let config = SolverConfig::default();
        let s = state(&["2x + 3 = 11"], Goal::SolveFor(vec!["x".into()]));
        let mut c = cand(&[("x", 5.0)]);
        let v = Verifier::new(&config).judge(&s, &mut c);
        assert!(!v.passed);
        assert_eq!(v.violated, vec![0]);
        assert!((v.residuals[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_judgment_uses_original_not_rewritten() {
        let config = SolverConfig::default();
        let mut s = state(&["2x + 3 = 11"], Goal::SolveFor(vec!["x".into()]));
        // Corrupt the active view; the verdict must not change
        s.active_view_mut().relations = vec![parse_relation("x = 99").unwrap()];
        let mut c = cand(&[("x", 4.0)]);
        assert!(Verifier::new(&config).judge(&s, &mut c).passed);
    }

    #[test]
    fn test_missing_target_fails_even_with_no_violations() {
        let config = SolverConfig::default();
        let s = state(&["x + y = 5"], Goal::SolveFor(vec!["x".into()]));
        // y-only assignment violates nothing it can evaluate but cannot
        // evaluate the constraint, and names no x
        let mut c = cand(&[("y", 1.0)]);
        let v = Verifier::new(&config).judge(&s, &mut c);
        assert!(!v.passed);
    }

    #[test]
    fn test_inequality_violation_detected() {
        let config = SolverConfig::default();
        let s = state(&["x >= 0", "x = -1"], Goal::SolveFor(vec!["x".into()]));
        let mut c = cand(&[("x", -1.0)]);
        let v = Verifier::new(&config).judge(&s, &mut c);
        assert!(!v.passed);
        assert_eq!(v.violated, vec![0]);
    }

    #[test]
    fn test_integer_fact_rejects_fractional_value() {
        let config = SolverConfig::default();
        let mut s = state(&["2n = 5"], Goal::SolveFor(vec!["n".into()]));
        s.add_fact("n", QualFact::Integer);
        let mut c = cand(&[("n", 2.5)]);
        // Satisfies the equation but breaks the integrality fact
        assert!(!Verifier::new(&config).judge(&s, &mut c).passed);
    }

    #[test]
    fn test_conflict_probe_flags_contradiction() {
        let config = SolverConfig::default();
        let s = state(&["x = 1", "x = 2"], Goal::SolveFor(vec!["x".into()]));
        let estimator = MetricsEstimator::new(&config);
        let analysis = estimator.analyze(&s).unwrap();
        let conflicts = Verifier::new(&config).probe_conflicts(&s, &analysis);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].constraints, (0, 1));
        assert!(conflicts[0].witness_gap > 0.5);
    }

    #[test]
    fn test_conflict_probe_accepts_consistent_redundancy() {
        let config = SolverConfig::default();
        let s = state(
            &["x + y = 2", "2x + 2y = 4"],
            Goal::SolveFor(vec!["x".into(), "y".into()]),
        );
        let estimator = MetricsEstimator::new(&config);
        let analysis = estimator.analyze(&s).unwrap();
        let conflicts = Verifier::new(&config).probe_conflicts(&s, &analysis);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_integral_cross_check() {
        let config = SolverConfig::default();
        let s = SolverState::new(
            "integral",
            Vec::new(),
            Goal::Integrate {
                integrand: parse_expr("x^2").unwrap(),
                var: "x".into(),
                lo: 0.0,
                hi: 1.0,
            },
        );
        let verifier = Verifier::new(&config);
        let mut good = Candidate::scalar(1.0 / 3.0, "quadrature");
        assert!(verifier.judge(&s, &mut good).passed);
        let mut bad = Candidate::scalar(0.9, "guess");
        assert!(!verifier.judge(&s, &mut bad).passed);
    }

    #[test]
    fn test_env_bindings_feed_judgment() {
        let config = SolverConfig::default();
        let mut s = state(&["x + y = 5"], Goal::SolveFor(vec!["x".into(), "y".into()]));
        s.env = BTreeMap::from([("y".to_string(), 1.0)]);
        let mut c = cand(&[("x", 4.0)]);
        assert!(Verifier::new(&config).judge(&s, &mut c).passed);
    }
}
