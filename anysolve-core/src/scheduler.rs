//! # Scheduler
//!
//! The controller loop: estimate metrics, pick an operator, apply it, verify
//! any new candidates, and replan when progress stalls. Termination always
//! produces a certificate, and the best-so-far candidate survives every
//! replan untouched.

use crate::candidate::Candidate;
use crate::certificate::{Certificate, Status};
use crate::config::SolverConfig;
use crate::metrics::{Metrics, MetricsEstimator};
use crate::operator::{standard_pool, Operator};
use crate::state::{Goal, SolverState};
use crate::verify::Verifier;
use anysolve_error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Controller phases, in the order a healthy iteration visits them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Selecting,
    Applying,
    Verifying,
    Replanning,
    Terminated,
}

/// Recovery actions tried in rotation when progress stalls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplanAction {
    SwapRepresentation,
    ReseedNumeric,
    RotateCaseSplit,
    DecomposeGoal,
}

const REPLAN_ROTATION: [ReplanAction; 4] = [
    ReplanAction::SwapRepresentation,
    ReplanAction::ReseedNumeric,
    ReplanAction::RotateCaseSplit,
    ReplanAction::DecomposeGoal,
];

/// Iteration and wall-clock limits, enforced at iteration boundaries only
#[derive(Debug, Clone, PartialEq)]
pub struct Budget {
    pub max_iterations: u32,
    pub time_limit: Option<Duration>,
}

impl Budget {
    pub fn from_config(config: &SolverConfig) -> Budget {
        Budget {
            max_iterations: config.max_iterations,
            time_limit: None,
        }
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Budget {
        self.time_limit = Some(limit);
        self
    }
}

/// One line of the run trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub iteration: u32,
    pub phase: Phase,
    pub operator: Option<String>,
    pub progress_delta: f64,
    pub progress: f64,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: Status,
    pub best: Option<Candidate>,
    pub certificate: Certificate,
    pub iterations: u32,
    pub trace: Vec<TraceStep>,
}

/// Hook for an external proposal source consulted only when no operator
/// applies. Stateless from the scheduler's point of view.
pub trait Fallback: Send + Sync {
    fn name(&self) -> &str;
    fn propose(&self, state: &SolverState) -> Option<Candidate>;
}

pub struct Scheduler {
    config: SolverConfig,
    pool: Vec<Box<dyn Operator>>,
    fallback: Option<Box<dyn Fallback>>,
}

impl Scheduler {
    pub fn new(config: SolverConfig) -> Scheduler {
        Scheduler {
            config,
            pool: standard_pool(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn Fallback>) -> Scheduler {
        self.fallback = Some(fallback);
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Run the loop to termination
    pub fn solve(&self, mut state: SolverState, budget: &Budget) -> Result<Outcome> {
        let started = Instant::now();
        let estimator = MetricsEstimator::new(&self.config);
        let verifier = Verifier::new(&self.config);
        let mut trace: Vec<TraceStep> = Vec::new();

        // Initializing: structural conflict probe before any rewriting
        if let Some(analysis) = estimator.analyze(&state) {
            let conflicts = verifier.probe_conflicts(&state, &analysis);
            if !conflicts.is_empty() {
                info!(conflicts = conflicts.len(), "infeasible at intake");
                let certificate = Certificate::infeasible(conflicts)
                    .note("dependent constraint rows are mutually inconsistent");
                return Ok(Outcome {
                    status: Status::Infeasible,
                    best: state.best.clone(),
                    certificate,
                    iterations: 0,
                    trace,
                });
            }
        }

        let mut prev_progress: Option<f64> = None;
        let mut flat_iters: u32 = 0;
        let mut replans: u32 = 0;
        let mut iteration: u32 = 0;
        let mut refuted: BTreeSet<usize> = BTreeSet::new();
        let mut last_metrics = estimator.estimate(&state);

        while iteration < budget.max_iterations {
            if let Some(limit) = budget.time_limit {
                if started.elapsed() >= limit {
                    debug!("time budget reached");
                    break;
                }
            }
            iteration += 1;
            let metrics = estimator.estimate(&state);

            if let Some(text) = self.derived_contradiction(&state) {
                // Under an active case branch a contradiction refutes only
                // that branch; with no branch (or none left) it refutes the
                // problem.
                if let Some(case) = state.active_case {
                    refuted.insert(case);
                    let untried = (0..state.case_splits.len()).find(|i| !refuted.contains(i));
                    if let Some(next_case) = untried {
                        debug!(case, next_case, "case branch refuted, rotating");
                        state.activate_case(next_case);
                        trace.push(TraceStep {
                            iteration,
                            phase: Phase::Replanning,
                            operator: None,
                            progress_delta: 0.0,
                            progress: prev_progress.unwrap_or(0.0),
                            note: Some(format!("refuted case {}: {}", case, text)),
                        });
                        prev_progress = None;
                        flat_iters = 0;
                        continue;
                    }
                }
                let certificate = Certificate::infeasible(Vec::new()).note(text);
                return Ok(self.terminated(
                    Status::Infeasible,
                    state,
                    certificate,
                    iteration,
                    trace,
                ));
            }

            if self.goal_satisfied(&state, &metrics) {
                let best = match state.best.clone() {
                    Some(b) => b,
                    None => break,
                };
                info!(iteration, "solved");
                let certificate = Certificate::solved(best.residuals.clone());
                return Ok(self.terminated(Status::Solved, state, certificate, iteration, trace));
            }

            // Selecting
            let chosen = self.select(&state, &metrics);
            let (op_name, delta) = match chosen {
                Some(op) => {
                    // Applying
                    let (next, delta) = op.apply(&state, &self.config)?;
                    state = next;
                    (Some(op.name().to_string()), delta)
                }
                None => match self.consult_fallback(&mut state) {
                    Some(name) => (Some(name), 0.5),
                    None => {
                        debug!(iteration, "no applicable operator");
                        flat_iters = self.config.stall_limit; // force a replan
                        (None, 0.0)
                    }
                },
            };

            // A complete set of bindings is itself an answer
            if matches!(state.goal, Goal::SolveFor(_) | Goal::Satisfy)
                && !state.env.is_empty()
                && state.unknowns().is_empty()
            {
                let values = state.env.clone();
                let dup = state.candidates.iter().any(|c| c.values == values);
                if !dup {
                    state.push_candidate(Candidate::assignment(values, "bindings"));
                }
            }

            // Verifying
            self.verify_new_candidates(&verifier, &mut state);

            let progress = estimator.estimate(&state).progress;
            let moved = match prev_progress {
                Some(p) => (progress - p).abs() > self.config.stall_eps,
                None => true,
            };
            if moved {
                flat_iters = 0;
            } else {
                flat_iters += 1;
            }
            prev_progress = Some(progress);

            trace.push(TraceStep {
                iteration,
                phase: Phase::Applying,
                operator: op_name.clone(),
                progress_delta: delta,
                progress,
                note: None,
            });
            debug!(iteration, operator = ?op_name, delta, progress, "iteration complete");

            let stalled = flat_iters >= self.config.stall_limit || self.oscillating(&state);
            if stalled {
                if replans >= self.config.max_replans {
                    warn!(iteration, replans, "replans exhausted");
                    break;
                }
                // Replanning
                let best_before = state.best.clone();
                let action = self.replan(&mut state, replans, &refuted);
                debug_assert_eq!(state.best, best_before);
                replans += 1;
                flat_iters = 0;
                prev_progress = None;
                trace.push(TraceStep {
                    iteration,
                    phase: Phase::Replanning,
                    operator: None,
                    progress_delta: 0.0,
                    progress,
                    note: Some(action),
                });
            }
            last_metrics = metrics;
        }

        // Terminal classification after budget or stall-out
        let status = match &state.best {
            Some(b) if b.verified => Status::Partial,
            _ => Status::Exhausted,
        };
        let certificate = match status {
            Status::Partial => {
                let dof = last_metrics.dof.max(0);
                let residuals = state
                    .best
                    .as_ref()
                    .map(|b| b.residuals.clone())
                    .unwrap_or_default();
                Certificate::partial(dof)
                    .with_residuals(residuals)
                    .note(format!("stopped after {} iteration(s)", iteration))
            }
            _ => {
                let mut cert = Certificate::exhausted()
                    .note(format!("stopped after {} iteration(s)", iteration));
                if let Some(b) = &state.best {
                    cert = cert.note(format!("best unverified candidate: {}", b.render()));
                }
                cert
            }
        };
        info!(status = %status, iterations = iteration, "terminated");
        Ok(Outcome {
            status,
            best: state.best,
            certificate,
            iterations: iteration,
            trace,
        })
    }

    fn terminated(
        &self,
        status: Status,
        state: SolverState,
        certificate: Certificate,
        iterations: u32,
        trace: Vec<TraceStep>,
    ) -> Outcome {
        Outcome {
            status,
            best: state.best,
            certificate,
            iterations,
            trace,
        }
    }

    /// Deterministic preference list keyed on goal shape and dof
    fn preference(&self, state: &SolverState, metrics: &Metrics) -> &'static [&'static str] {
        match &state.goal {
            Goal::Integrate { .. } => &["simplify", "quadrature", "rationalize"],
            Goal::Optimize { .. } => &[
                "differentiate",
                "substitute",
                "eliminate",
                "direct_solve",
                "linear_solve",
                "newton_solve",
                "simplify",
                "feasible_sample",
            ],
            _ if metrics.dof > 0 => &[
                "substitute",
                "eliminate",
                "bound_infer",
                "case_split",
                "simplify",
                "feasible_sample",
            ],
            _ => &[
                "substitute",
                "linear_solve",
                "eliminate",
                "direct_solve",
                "case_split",
                "newton_solve",
                "interval_refine",
                "simplify",
                "bound_infer",
                "rationalize",
                "feasible_sample",
            ],
        }
    }

    fn select(&self, state: &SolverState, metrics: &Metrics) -> Option<&dyn Operator> {
        let prefs = self.preference(state, metrics);
        for name in prefs {
            if let Some(op) = self.pool.iter().find(|o| o.name() == *name) {
                if op.applicable(state, &self.config) {
                    return Some(op.as_ref());
                }
            }
        }
        // Anything applicable beats nothing
        self.pool
            .iter()
            .find(|o| o.applicable(state, &self.config))
            .map(|o| o.as_ref())
    }

    fn consult_fallback(&self, state: &mut SolverState) -> Option<String> {
        let fb = self.fallback.as_ref()?;
        let cand = fb.propose(state)?;
        debug!(source = fb.name(), "fallback proposed a candidate");
        let name = format!("fallback:{}", fb.name());
        state.push_candidate(cand);
        Some(name)
    }

    /// Judge every not-yet-judged candidate and rebuild the best-so-far
    fn verify_new_candidates(&self, verifier: &Verifier<'_>, state: &mut SolverState) {
        let snapshot = state.clone();
        let mut any = false;
        for cand in state.candidates.iter_mut() {
            if !cand.residuals.is_empty() {
                continue;
            }
            // Optimization candidates report the objective value they reach
            if let Goal::Optimize { objective, .. } = &snapshot.goal {
                if cand.scalar.is_none() {
                    let mut env = snapshot.env.clone();
                    env.extend(cand.values.iter().map(|(k, v)| (k.clone(), *v)));
                    cand.scalar = objective.eval(&env);
                }
            }
            verifier.judge(&snapshot, cand);
            any = true;
        }
        if any {
            let mut best: Option<Candidate> = state.best.clone();
            for cand in &state.candidates {
                let better = match &best {
                    Some(b) => cand.better_than(b),
                    None => true,
                };
                if better {
                    best = Some(cand.clone());
                }
            }
            state.best = best;
        }
    }

    /// Apply the next applicable replan action, never touching the best
    fn replan(&self, state: &mut SolverState, round: u32, refuted: &BTreeSet<usize>) -> String {
        for i in 0..REPLAN_ROTATION.len() {
            let action = REPLAN_ROTATION[(round as usize + i) % REPLAN_ROTATION.len()];
            match action {
                ReplanAction::SwapRepresentation => {
                    let repr = state.swap_representation();
                    info!(repr = repr.as_str(), "replan: swapped representation");
                    return format!("swap_representation:{}", repr.as_str());
                }
                ReplanAction::ReseedNumeric => {
                    state.numeric_seed = state.numeric_seed.wrapping_add(1);
                    info!(seed = state.numeric_seed, "replan: reseeded numeric search");
                    return "reseed_numeric".to_string();
                }
                ReplanAction::RotateCaseSplit => {
                    if state.case_splits.is_empty() {
                        continue;
                    }
                    // Branches already proven contradictory stay skipped;
                    // with no live branch left this action is unusable
                    let n = state.case_splits.len();
                    let start = state.active_case.unwrap_or(0);
                    let next_case = (1..n)
                        .map(|k| (start + k) % n)
                        .find(|i| !refuted.contains(i));
                    let next_case = match next_case {
                        Some(i) => i,
                        None => continue,
                    };
                    state.activate_case(next_case);
                    info!(case = next_case, "replan: rotated case split");
                    return format!("rotate_case:{}", next_case);
                }
                ReplanAction::DecomposeGoal => {
                    let targets = match &state.goal {
                        Goal::SolveFor(vs) if vs.len() > 1 => vs.clone(),
                        _ => continue,
                    };
                    if !state.subgoals.is_empty() {
                        continue;
                    }
                    state.subgoals = targets
                        .into_iter()
                        .map(|v| Goal::SolveFor(vec![v]))
                        .collect();
                    info!(subgoals = state.subgoals.len(), "replan: decomposed goal");
                    return "decompose_goal".to_string();
                }
            }
        }
        "none".to_string()
    }

    fn goal_satisfied(&self, state: &SolverState, metrics: &Metrics) -> bool {
        let best = match &state.best {
            Some(b) if b.verified => b,
            _ => return false,
        };
        match &state.goal {
            Goal::SolveFor(targets) => {
                metrics.dof <= 0
                    && targets
                        .iter()
                        .all(|t| best.values.contains_key(t) || state.env.contains_key(t))
            }
            Goal::Satisfy => metrics.dof <= 0 || !best.values.is_empty(),
            Goal::Integrate { .. } | Goal::Optimize { .. } => best.scalar.is_some(),
        }
    }

    /// A derived contradiction: a working constraint that simplified to a
    /// false constant, or a variable whose domain emptied out
    fn derived_contradiction(&self, state: &SolverState) -> Option<String> {
        use crate::relation::RelOp;
        let tol = self.config.residual_tol;
        for rel in &state.active_view().relations {
            let resid = rel.residual_expr().simplify();
            if let Some(c) = resid.as_num() {
                let falsified = match rel.op {
                    RelOp::Eq => c.abs() > tol,
                    RelOp::Le | RelOp::Lt => c > tol,
                    RelOp::Ge | RelOp::Gt => -c > tol,
                };
                if falsified {
                    return Some(format!("working constraint reduced to falsehood: {}", rel));
                }
            }
        }
        for (var, d) in &state.domains {
            if d.is_empty() {
                return Some(format!("domain of {} is empty", var));
            }
        }
        None
    }

    /// A-B-A candidate flip-flop
    fn oscillating(&self, state: &SolverState) -> bool {
        let n = state.candidates.len();
        if n < 3 {
            return false;
        }
        let render = |c: &Candidate| format!("{}|{:?}", c.render(), c.scalar);
        let last = render(&state.candidates[n - 1]);
        let mid = render(&state.candidates[n - 2]);
        let third = render(&state.candidates[n - 3]);
        last == third && last != mid
    }
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

    fn run(s: SolverState) -> Outcome {
        let scheduler = Scheduler::new(SolverConfig::default());
        let budget = Budget::from_config(scheduler.config());
        scheduler.solve(s, &budget).unwrap()
    }

    #[test]
    fn test_linear_equation_solves() {
        let out = run(state(&["2x + 3 = 11"], &["x"]));
        assert_eq!(out.status, Status::Solved);
        let best = out.best.unwrap();
        assert!(best.verified);
        assert!((best.values["x"] - 4.0).abs() < 1e-9);
        assert!(out.certificate.residuals.iter().all(|r| *r < 1e-9));
        assert!(out.iterations <= 8);
    }

    #[test]
    fn test_underdetermined_ends_partial_with_dof() {
        let out = run(state(&["x + y = 5"], &["x"]));
        assert_eq!(out.status, Status::Partial);
        assert!(out.certificate.unresolved_dof >= 1);
        // The partial answer is still a concrete verified assignment
        let best = out.best.unwrap();
        assert!(best.verified);
        assert!((best.values["x"] + best.values["y"] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_contradiction_is_infeasible_with_conflict_pair() {
        let out = run(state(&["x = 1", "x = 2"], &["x"]));
        assert_eq!(out.status, Status::Infeasible);
        assert_eq!(out.certificate.conflicts.len(), 1);
        let c = &out.certificate.conflicts[0];
        assert_eq!(c.constraints, (0, 1));
        assert!(c.rendered.0.contains("x"));
        assert!(c.rendered.1.contains("x"));
    }

    #[test]
    fn test_redundant_row_is_not_a_conflict() {
        let out = run(state(&["x + y = 2", "2x + 2y = 4"], &["x", "y"]));
        assert_ne!(out.status, Status::Infeasible);
    }

    #[test]
    fn test_two_by_two_linear_system() {
        let out = run(state(&["x + y = 5", "x - y = 1"], &["x", "y"]));
        assert_eq!(out.status, Status::Solved);
        let best = out.best.unwrap();
        assert!((best.values["x"] - 3.0).abs() < 1e-6);
        assert!((best.values["y"] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_quadratic_with_domain_restriction() {
        let out = run(state(&["x^2 = 4", "x >= 0"], &["x"]));
        assert_eq!(out.status, Status::Solved);
        assert!((out.best.unwrap().values["x"] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_domain_is_infeasible() {
        let out = run(state(&["x >= 3", "x <= 1"], &["x"]));
        assert_eq!(out.status, Status::Infeasible);
        assert!(out
            .certificate
            .explanation()
            .contains("domain of x is empty"));
    }

    #[test]
    fn test_integral_goal_solves_with_error_bound() {
        let s = SolverState::new(
            "integrate x^2 from 0 to 1",
            Vec::new(),
            Goal::Integrate {
                integrand: parse_expr("x^2").unwrap(),
                var: "x".into(),
                lo: 0.0,
                hi: 1.0,
            },
        );
        let out = run(s);
        assert_eq!(out.status, Status::Solved);
        let best = out.best.unwrap();
        assert!((best.scalar.unwrap() - 1.0 / 3.0).abs() < 1e-7);
        assert!(best.error_bound.is_some());
    }

    #[test]
    fn test_optimize_via_stationarity() {
        let s = SolverState::new(
            "minimize x^2 - 4x",
            Vec::new(),
            Goal::Optimize {
                objective: parse_expr("x^2 - 4x").unwrap(),
                minimize: true,
            },
        );
        let out = run(s);
        assert_eq!(out.status, Status::Solved);
        let best = out.best.unwrap();
        assert!((best.values["x"] - 2.0).abs() < 1e-6);
        assert!((best.scalar.unwrap() + 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_budget_is_respected() {
        let scheduler = Scheduler::new(SolverConfig::default());
        let budget = Budget {
            max_iterations: 2,
            time_limit: None,
        };
        // No real root exists, so the run must stop on the iteration cap
        let out = scheduler
            .solve(state(&["x^2 + 1 = 0"], &["x"]), &budget)
            .unwrap();
        assert!(out.iterations <= 2);
        assert!(matches!(out.status, Status::Partial | Status::Exhausted));
    }

    #[test]
    fn test_trace_records_operator_per_iteration() {
        let out = run(state(&["2x + 3 = 11"], &["x"]));
        assert!(!out.trace.is_empty());
        assert!(out.trace.iter().any(|t| t.operator.is_some()));
    }

    #[test]
    fn test_replan_preserves_best_candidate() {
        let scheduler = Scheduler::new(SolverConfig::default());
        let mut s = state(&["x + y = 5"], &["x", "y"]);
        let mut best = Candidate::assignment(
            [("x".to_string(), 3.0), ("y".to_string(), 2.0)].into(),
            "direct_solve",
        );
        best.verified = true;
        best.residuals = vec![0.0];
        s.best = Some(best.clone());

        for round in 0..2 * REPLAN_ROTATION.len() as u32 {
            scheduler.replan(&mut s, round, &BTreeSet::new());
            assert_eq!(s.best, Some(best.clone()));
        }
    }

    #[test]
    fn test_replan_rotation_skips_refuted_cases() {
        let scheduler = Scheduler::new(SolverConfig::default());
        let mut s = state(&["x^2 = 4"], &["x"]);
        s.case_splits = vec![
            vec![parse_relation("x = -2").unwrap()],
            vec![parse_relation("x = 0").unwrap()],
            vec![parse_relation("x = 2").unwrap()],
        ];
        s.activate_case(0);

        // Round 2 of the rotation is the case rotation; branch 1 is already
        // proven contradictory and must not be re-activated
        let refuted: BTreeSet<usize> = [1].into_iter().collect();
        let action = scheduler.replan(&mut s, 2, &refuted);
        assert_eq!(action, "rotate_case:2");
        assert_eq!(s.active_case, Some(2));

        // With every other branch refuted the rotation falls through to the
        // next usable replan action instead of re-entering a dead branch
        let refuted: BTreeSet<usize> = [0, 1].into_iter().collect();
        let action = scheduler.replan(&mut s, 2, &refuted);
        assert_eq!(action, "swap_representation:numeric");
        assert_eq!(s.active_case, Some(2));
    }

    #[test]
    fn test_final_best_is_verified_with_small_residual() {
        let out = run(state(&["x + y = 5"], &["x"]));
        let best = out.best.unwrap();
        assert!(best.verified);
        assert!(best.max_residual() <= 1e-6);
    }

    #[test]
    fn test_nonpolynomial_root_via_newton() {
        let out = run(state(&["cos(x) = x"], &["x"]));
        assert_eq!(out.status, Status::Solved);
        let x = out.best.unwrap().values["x"];
        assert!((x - 0.739085).abs() < 1e-3);
    }

    struct CannedFallback;

    impl Fallback for CannedFallback {
        fn name(&self) -> &str {
            "canned"
        }

        fn propose(&self, _state: &SolverState) -> Option<Candidate> {
            Some(Candidate::assignment(
                [("x".to_string(), 4.0)].into_iter().collect(),
                "canned",
            ))
        }
    }

    #[test]
    fn test_fallback_consulted_when_pool_is_silent() {
        // No constraints and no unknowns: every operator declines, so the
        // injected proposal source gets its turn
        let s = SolverState::new("anything", Vec::new(), Goal::Satisfy);
        let scheduler =
            Scheduler::new(SolverConfig::default()).with_fallback(Box::new(CannedFallback));
        let budget = Budget {
            max_iterations: 8,
            time_limit: None,
        };
        let out = scheduler.solve(s, &budget).unwrap();
        assert_eq!(out.status, Status::Solved);
        assert_eq!(out.best.unwrap().produced_by, "canned");
    }
}
