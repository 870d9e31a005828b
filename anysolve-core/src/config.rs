//! # Solver Configuration
//!
//! Tolerances and budgets live in one serializable struct so a run is fully
//! reproducible from its config. Defaults are tuned for double precision on
//! small textbook problems.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Absolute residual below which a constraint counts as satisfied
    pub residual_tol: f64,
    /// Relative threshold under which a Gaussian pivot counts as zero
    pub pivot_rel_tol: f64,
    /// Target absolute error for adaptive quadrature
    pub quadrature_tol: f64,
    /// Step used for finite-difference Jacobian columns
    pub fd_step: f64,
    /// Iterations with negligible progress change before declaring a stall
    pub stall_limit: u32,
    /// Progress deltas below this count as no movement
    pub stall_eps: f64,
    /// Hard cap on scheduler iterations
    pub max_iterations: u32,
    /// Replans allowed before giving up on a stalled run
    pub max_replans: u32,
    /// Distinct Newton starting points tried per numeric solve
    pub newton_seeds: u32,
    /// Newton iterations per starting point
    pub newton_iters: u32,
    /// Largest denominator considered when rationalizing a float
    pub rationalize_max_den: u64,
    /// Grid points per interval-refinement pass
    pub grid_points: u32,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig {
            residual_tol: 1e-6,
            pivot_rel_tol: 1e-9,
            quadrature_tol: 1e-8,
            fd_step: 1e-6,
            stall_limit: 3,
            stall_eps: 1e-12,
            max_iterations: 64,
            max_replans: 4,
            newton_seeds: 5,
            newton_iters: 32,
            rationalize_max_den: 10_000,
            grid_points: 64,
        }
    }
}

impl SolverConfig {
    /// Tight-budget profile used by quick CLI runs
    pub fn quick() -> SolverConfig {
        SolverConfig {
            max_iterations: 16,
            max_replans: 1,
            ..SolverConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_usable() {
        let c = SolverConfig::default();
        assert!(c.residual_tol > 0.0);
        assert!(c.max_iterations > 0);
        assert!(c.stall_limit >= 1);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let c: SolverConfig = serde_json::from_str(r#"{"max_iterations": 8}"#).unwrap();
        assert_eq!(c.max_iterations, 8);
        assert_eq!(c.residual_tol, SolverConfig::default().residual_tol);
    }
}
