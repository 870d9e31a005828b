//! # Candidates
//!
//! A candidate is a concrete proposed answer: a full variable assignment for
//! equation goals, or a scalar value for integral goals. Candidates carry
//! their own verification record so the best-so-far comparison never has to
//! recompute residuals.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Proposed variable assignment. Empty for scalar (integral) answers.
    pub values: BTreeMap<String, f64>,
    /// Scalar answer for integral and optimization goals
    pub scalar: Option<f64>,
    /// Per-constraint residual magnitudes recorded at verification time
    pub residuals: Vec<f64>,
    /// Estimated numeric error bound, when the producing method has one
    pub error_bound: Option<f64>,
    pub verified: bool,
    /// Name of the operator that produced this candidate
    pub produced_by: String,
}

impl Candidate {
    pub fn assignment(values: BTreeMap<String, f64>, produced_by: impl Into<String>) -> Candidate {
        Candidate {
            values,
            scalar: None,
            residuals: Vec::new(),
            error_bound: None,
            verified: false,
            produced_by: produced_by.into(),
        }
    }

    pub fn scalar(value: f64, produced_by: impl Into<String>) -> Candidate {
        Candidate {
            values: BTreeMap::new(),
            scalar: Some(value),
            residuals: Vec::new(),
            error_bound: None,
            verified: false,
            produced_by: produced_by.into(),
        }
    }

    pub fn with_error_bound(mut self, bound: f64) -> Candidate {
        self.error_bound = Some(bound);
        self
    }

    /// Worst recorded residual, infinity when never verified
    pub fn max_residual(&self) -> f64 {
        if self.residuals.is_empty() {
            return f64::INFINITY;
        }
        self.residuals.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Ranking: verified beats unverified, then smaller worst residual,
    /// then tighter error bound.
    pub fn better_than(&self, other: &Candidate) -> bool {
        if self.verified != other.verified {
            return self.verified;
        }
        let a = self.max_residual();
        let b = other.max_residual();
        if a != b {
            return a < b;
        }
        match (self.error_bound, other.error_bound) {
            (Some(x), Some(y)) => x < y,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Short human-readable rendering for logs and final output
    pub fn render(&self) -> String {
        if let Some(s) = self.scalar {
            return format!("{}", s);
        }
        self.values
            .iter()
            .map(|(k, v)| format!("{} = {}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
