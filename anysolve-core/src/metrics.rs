//! # Progress Metrics
//!
//! Quantitative snapshot of a state: how many unknowns remain, how much
//! independent constraint information exists, and how far the best candidate
//! is from satisfying everything. Degrees of freedom are estimated as
//! `free variables - numeric Jacobian rank`, with the Jacobian formed by
//! central finite differences at probe points.

use crate::config::SolverConfig;
use crate::linalg::{self, RankAnalysis};
use crate::relation::Relation;
use crate::state::SolverState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub free_vars: usize,
    pub eq_count: usize,
    pub ineq_count: usize,
    /// Rank of the equality Jacobian at the probe point
    pub jacobian_rank: usize,
    /// free_vars - jacobian_rank; negative means overdetermined
    pub dof: i64,
    /// Indices (into the active view's equalities) of rows that added no
    /// independent information
    pub redundant: Vec<usize>,
    /// L2 norm of equality residuals at the current environment, when all
    /// constraints evaluate there
    pub residual_l2: Option<f64>,
    /// Constraints violated by the best candidate
    pub violations: usize,
    /// Scalar progress score the scheduler watches for stalls.
    /// Higher is better.
    pub progress: f64,
}

/// Probe offsets used when the state has no numeric bindings yet.
/// Several points guard against rank loss at a special point.
const PROBE_OFFSETS: [f64; 3] = [0.37, 1.13, -0.71];

pub struct MetricsEstimator<'a> {
    config: &'a SolverConfig,
}

impl<'a> MetricsEstimator<'a> {
    pub fn new(config: &'a SolverConfig) -> MetricsEstimator<'a> {
        MetricsEstimator { config }
    }

    pub fn estimate(&self, state: &SolverState) -> Metrics {
        let unknowns: Vec<String> = state.unknowns().into_iter().collect();
        let view = state.active_view();
        let equalities: Vec<&Relation> =
            view.relations.iter().filter(|r| r.op.is_equality()).collect();
        let ineq_count = view.relations.len() - equalities.len();

        let analysis = self.jacobian_rank(&equalities, &unknowns, state);
        let rank = analysis.as_ref().map(|a| a.rank).unwrap_or(0);
        let redundant = analysis.map(|a| a.redundant).unwrap_or_default();

        let residual_l2 = self.residual_l2(&equalities, state);
        let violations = self.best_violations(state);

        let free_vars = unknowns.len();
        let dof = free_vars as i64 - rank as i64;
        let progress = self.progress_score(free_vars, dof, residual_l2, violations, state);

        trace!(
            free_vars,
            rank,
            dof,
            redundant = redundant.len(),
            progress,
            "metrics estimated"
        );

        Metrics {
            free_vars,
            eq_count: equalities.len(),
            ineq_count,
            jacobian_rank: rank,
            dof,
            redundant,
            residual_l2,
            violations,
            progress,
        }
    }

    /// Full structural analysis of the equality Jacobian, including row
    /// dependence data used for infeasibility probes.
    pub fn analyze(&self, state: &SolverState) -> Option<RankAnalysis> {
        let unknowns: Vec<String> = state.unknowns().into_iter().collect();
        let view = state.active_view();
        let equalities: Vec<&Relation> =
            view.relations.iter().filter(|r| r.op.is_equality()).collect();
        self.jacobian_rank(&equalities, &unknowns, state)
    }

    fn jacobian_rank(
        &self,
        equalities: &[&Relation],
        unknowns: &[String],
        state: &SolverState,
    ) -> Option<RankAnalysis> {
        if equalities.is_empty() || unknowns.is_empty() {
            return Some(RankAnalysis {
                rank: 0,
                redundant: (0..equalities.len()).collect(),
                dependence: Vec::new(),
            });
        }

        // Accumulate the best analysis over probe points; a probe where some
        // constraint cannot be evaluated is skipped rather than failing the
        // whole estimate.
        let mut best: Option<RankAnalysis> = None;
        for &offset in &PROBE_OFFSETS {
            let env = self.probe_env(unknowns, state, offset);
            let jac = match self.jacobian_at(equalities, unknowns, &env) {
                Some(jac) => jac,
                None => continue,
            };
            let analysis = linalg::rank_and_redundant(&jac, self.config.pivot_rel_tol);
            match &best {
                Some(b) if analysis.rank <= b.rank => {}
                _ => best = Some(analysis),
            }
        }
        best
    }

    /// Probe environment: current bindings win; unbound variables get a
    /// deterministic off-origin value.
    pub fn probe_env(
        &self,
        unknowns: &[String],
        state: &SolverState,
        offset: f64,
    ) -> BTreeMap<String, f64> {
        let mut env = state.env.clone();
        for (i, name) in unknowns.iter().enumerate() {
            env.entry(name.clone())
                .or_insert(offset + 0.251 * (i as f64 + 1.0));
        }
        env
    }

    fn jacobian_at(
        &self,
        equalities: &[&Relation],
        unknowns: &[String],
        env: &BTreeMap<String, f64>,
    ) -> Option<Vec<Vec<f64>>> {
        let h = self.config.fd_step;
        let mut rows = Vec::with_capacity(equalities.len());
        for rel in equalities {
            let f = rel.residual_expr();
            let mut row = Vec::with_capacity(unknowns.len());
            for var in unknowns {
                let mut hi = env.clone();
                let mut lo = env.clone();
                let x = *hi.get(var)?;
                hi.insert(var.clone(), x + h);
                lo.insert(var.clone(), x - h);
                let d = (f.eval(&hi)? - f.eval(&lo)?) / (2.0 * h);
                row.push(d);
            }
            rows.push(row);
        }
        Some(rows)
    }

    fn residual_l2(&self, equalities: &[&Relation], state: &SolverState) -> Option<f64> {
        if equalities.is_empty() {
            return Some(0.0);
        }
        let mut residuals = Vec::with_capacity(equalities.len());
        for rel in equalities {
            residuals.push(rel.residual(&state.env)?);
        }
        Some(linalg::l2_norm(&residuals))
    }

    fn best_violations(&self, state: &SolverState) -> usize {
        let best = match &state.best {
            Some(b) => b,
            None => return 0,
        };
        state
            .original()
            .iter()
            .filter(|r| {
                r.violation(&best.values, self.config.residual_tol)
                    .map(|v| v > 0.0)
                    .unwrap_or(true)
            })
            .count()
    }

    /// Progress rises as unknowns get bound, dof shrinks, residuals shrink
    /// and verified candidates appear.
    fn progress_score(
        &self,
        free_vars: usize,
        dof: i64,
        residual_l2: Option<f64>,
        violations: usize,
        state: &SolverState,
    ) -> f64 {
        let mut score = 0.0;
        score -= free_vars as f64;
        score -= dof.max(0) as f64;
        if let Some(r) = residual_l2 {
            score += 1.0 / (1.0 + r);
        }
        if let Some(best) = &state.best {
            score += if best.verified { 10.0 } else { 1.0 };
            score -= violations as f64 * 0.5;
        }
        score += state.env.len() as f64 * 2.0;
        score
    }
}
