//! Agent-backed fallback proposals
//!
//! When the operator pool has nothing applicable left, the scheduler may
//! consult a [`Fallback`]. This one asks the agent for a concrete proposal
//! (an assignment or a scalar) and hands it back unverified; the scheduler
//! judges it against the original constraints like any other candidate.
//!
//! The core `Fallback` trait is synchronous, so this type owns a small
//! current-thread runtime and blocks on the call.

use crate::client::AgentClient;
use crate::provider::AgentProvider;
use crate::schema::ResponseSchema;
use anysolve_core::{Candidate, Fallback, Goal, SolverState};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::runtime::Runtime;
use tracing::warn;

const PROPOSE_SYSTEM: &str = "\
You propose a concrete answer to a math problem. Reply with a JSON object: \
{\"values\": {\"name\": number, ...}} for an assignment, or \
{\"scalar\": number} for a single numeric answer. Propose your best guess \
even if unsure; it will be checked independently.";

/// Asks the agent for a candidate when deterministic operators stall
pub struct AgentFallback<P: AgentProvider> {
    client: AgentClient<P>,
    runtime: Runtime,
}

impl<P: AgentProvider> AgentFallback<P> {
    pub fn new(client: AgentClient<P>) -> anysolve_error::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                anysolve_error::Error::unexpected("failed to build fallback runtime")
                    .with_operation("fallback::new")
                    .set_source(e)
            })?;
        Ok(Self { client, runtime })
    }

    fn render_prompt(state: &SolverState) -> String {
        let mut prompt = format!("Problem: {}\n\nConstraints:\n", state.problem_text);
        for rel in state.original() {
            prompt.push_str("  ");
            prompt.push_str(&rel.to_string());
            prompt.push('\n');
        }
        match &state.goal {
            Goal::SolveFor(vars) => {
                prompt.push_str(&format!("\nSolve for: {}\n", vars.join(", ")));
            }
            Goal::Integrate { integrand, var, lo, hi } => {
                prompt.push_str(&format!(
                    "\nEvaluate the integral of {} d{} from {} to {}\n",
                    integrand, var, lo, hi
                ));
            }
            Goal::Optimize { objective, minimize } => {
                prompt.push_str(&format!(
                    "\n{} {}\n",
                    if *minimize { "Minimize" } else { "Maximize" },
                    objective
                ));
            }
            Goal::Satisfy => prompt.push_str("\nFind any satisfying assignment\n"),
        }
        if !state.env.is_empty() {
            prompt.push_str("\nAlready established:\n");
            for (var, value) in &state.env {
                prompt.push_str(&format!("  {} = {}\n", var, value));
            }
        }
        prompt
    }

    fn candidate_from_value(value: &Value) -> Option<Candidate> {
        if let Some(obj) = value.get("values").and_then(Value::as_object) {
            let mut values = BTreeMap::new();
            for (name, v) in obj {
                values.insert(name.clone(), v.as_f64()?);
            }
            if !values.is_empty() {
                return Some(Candidate::assignment(values, "agent"));
            }
        }
        value
            .get("scalar")
            .and_then(Value::as_f64)
            .map(|x| Candidate::scalar(x, "agent"))
    }
}

impl<P: AgentProvider + Send + Sync> Fallback for AgentFallback<P> {
    fn name(&self) -> &str {
        "agent"
    }

    fn propose(&self, state: &SolverState) -> Option<Candidate> {
        let prompt = Self::render_prompt(state);
        let schema = ResponseSchema::new("proposal");

        // Blocking on the owned runtime panics from inside another tokio
        // runtime; block_in_place moves this worker off the async pool first.
        let call = || {
            self.runtime.block_on(self.client.call_checked(
                "proposer",
                PROPOSE_SYSTEM,
                &prompt,
                &schema,
            ))
        };
        let result = match tokio::runtime::Handle::try_current() {
            Ok(_) => tokio::task::block_in_place(call),
            Err(_) => call(),
        };

        match result {
            Ok(value) => {
                let cand = Self::candidate_from_value(&value);
                if cand.is_none() {
                    warn!("agent proposal had neither values nor scalar");
                }
                cand
            }
            Err(err) => {
                warn!(error = %err, "agent fallback failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticProvider;
    use anysolve_core::relation::parse_relation;

    fn state() -> SolverState {
        SolverState::new(
            "x plus y equals five",
            vec![parse_relation("x + y = 5").unwrap()],
            Goal::SolveFor(vec!["x".into(), "y".into()]),
        )
    }

    #[test]
    fn test_proposes_assignment() {
        let provider = StaticProvider::new(vec![r#"{"values": {"x": 2, "y": 3}}"#]);
        let fallback = AgentFallback::new(AgentClient::new(provider)).unwrap();

        let cand = fallback.propose(&state()).unwrap();
        assert_eq!(cand.values["x"], 2.0);
        assert_eq!(cand.values["y"], 3.0);
        assert_eq!(cand.produced_by, "agent");
        assert!(!cand.verified);
    }

    #[test]
    fn test_proposes_scalar() {
        let provider = StaticProvider::new(vec![r#"{"scalar": 0.25}"#]);
        let fallback = AgentFallback::new(AgentClient::new(provider)).unwrap();

        let cand = fallback.propose(&state()).unwrap();
        assert_eq!(cand.scalar, Some(0.25));
    }

    #[test]
    fn test_prompt_carries_constraints_and_goal() {
        let prompt = AgentFallback::<StaticProvider>::render_prompt(&state());
        assert!(prompt.contains("x + y = 5"));
        assert!(prompt.contains("Solve for: x, y"));
    }

    #[test]
    fn test_failure_yields_none() {
        let provider = StaticProvider::new(vec![]);
        let fallback = AgentFallback::new(AgentClient::new(provider)).unwrap();
        assert!(fallback.propose(&state()).is_none());
    }

    #[test]
    fn test_unusable_proposal_yields_none() {
        let provider = StaticProvider::new(vec![r#"{"reasoning": "hmm"}"#]);
        let fallback = AgentFallback::new(AgentClient::new(provider)).unwrap();
        assert!(fallback.propose(&state()).is_none());
    }
}
