//! # Certificates
//!
//! Every terminal outcome carries a certificate recording what was checked
//! and what the evidence was. Solved runs list residuals against the original
//! constraints; infeasible runs name the conflicting constraints; partial and
//! exhausted runs explain what is still open.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Solved,
    Partial,
    Infeasible,
    Exhausted,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Solved => "solved",
            Status::Partial => "partial",
            Status::Infeasible => "infeasible",
            Status::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pair of constraints shown to be mutually unsatisfiable, with the
/// witness residual separating them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Indices into the original constraint list
    pub constraints: (usize, usize),
    /// Rendered text of both constraints
    pub rendered: (String, String),
    /// Smallest combined residual found while probing the pair
    pub witness_gap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub status: Status,
    /// Residual magnitude per original constraint, in declaration order.
    /// Present for solved and for verified partial answers.
    pub residuals: Vec<f64>,
    /// Indices of original constraints violated by the reported candidate
    pub violated: Vec<usize>,
    /// Conflicting constraint pairs backing an infeasible verdict
    pub conflicts: Vec<Conflict>,
    /// Degrees of freedom left unresolved (partial outcomes)
    pub unresolved_dof: i64,
    /// Free-form notes: which check produced the verdict, budget state
    pub notes: Vec<String>,
}

impl Certificate {
    pub fn new(status: Status) -> Certificate {
        Certificate {
            status,
            residuals: Vec::new(),
            violated: Vec::new(),
            conflicts: Vec::new(),
            unresolved_dof: 0,
            notes: Vec::new(),
        }
    }

    pub fn solved(residuals: Vec<f64>) -> Certificate {
        Certificate {
            residuals,
            ..Certificate::new(Status::Solved)
        }
    }

    pub fn partial(unresolved_dof: i64) -> Certificate {
        Certificate {
            unresolved_dof,
            ..Certificate::new(Status::Partial)
        }
    }

    pub fn infeasible(conflicts: Vec<Conflict>) -> Certificate {
        Certificate {
            conflicts,
            ..Certificate::new(Status::Infeasible)
        }
    }

    pub fn exhausted() -> Certificate {
        Certificate::new(Status::Exhausted)
    }

    pub fn note(mut self, text: impl Into<String>) -> Certificate {
        self.notes.push(text.into());
        self
    }

    pub fn with_residuals(mut self, residuals: Vec<f64>) -> Certificate {
        self.residuals = residuals;
        self
    }

    pub fn with_violated(mut self, violated: Vec<usize>) -> Certificate {
        self.violated = violated;
        self
    }

    /// One-paragraph explanation suitable for CLI output
    pub fn explanation(&self) -> String {
        let mut out = match self.status {
            Status::Solved => format!(
                "all {} original constraints hold (max residual {:.3e})",
                self.residuals.len(),
                self.residuals.iter().copied().fold(0.0, f64::max),
            ),
            Status::Partial => format!(
                "best answer found; {} degree(s) of freedom remain unresolved",
                self.unresolved_dof
            ),
            Status::Infeasible => {
                let pairs: Vec<String> = self
                    .conflicts
                    .iter()
                    .map(|c| format!("'{}' vs '{}'", c.rendered.0, c.rendered.1))
                    .collect();
                format!("constraints conflict: {}", pairs.join("; "))
            }
            Status::Exhausted => "budget exhausted before reaching a verdict".to_string(),
        };
        if !self.violated.is_empty() {
            out.push_str(&format!("; violated constraints: {:?}", self.violated));
        }
        for n in &self.notes {
            out.push_str("; ");
            out.push_str(n);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solved_explanation_mentions_residuals() {
        let c = Certificate::solved(vec![0.0, 1e-9]);
        let text = c.explanation();
        assert!(text.contains("2 original constraints"));
    }

    #[test]
    fn test_partial_carries_dof() {
        let c = Certificate::partial(1);
        assert_eq!(c.status, Status::Partial);
        assert_eq!(c.unresolved_dof, 1);
        assert!(c.explanation().contains("1 degree"));
    }

    #[test]
    fn test_infeasible_names_conflicting_pair() {
        let c = Certificate::infeasible(vec![Conflict {
            constraints: (0, 1),
            rendered: ("x = 1".into(), "x = 2".into()),
            witness_gap: 1.0,
        }]);
        let text = c.explanation();
        assert!(text.contains("x = 1"));
        assert!(text.contains("x = 2"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let s = serde_json::to_string(&Status::Infeasible).unwrap();
        assert_eq!(s, "\"infeasible\"");
    }
}
