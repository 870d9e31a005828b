//! Problem intake
//!
//! Turns free-form problem text into a `SolverState` through three checked
//! agent calls: normalize the wording, extract the constraint relations,
//! extract the goal. Every relation string the agent returns still goes
//! through the core parser, so a hallucinated relation fails here rather
//! than inside the solver.

use crate::client::AgentClient;
use crate::provider::AgentProvider;
use crate::schema::{FieldType, ResponseSchema};
use anysolve_core::expr::parse_expr;
use anysolve_core::relation::{parse_relation, Relation};
use anysolve_core::{Goal, QualFact, SolverState};
use anysolve_error::{Error, Result};
use serde_json::Value;
use tracing::info;

const NORMALIZE_SYSTEM: &str = "\
You rewrite math problems into plain statements. Expand word problems into \
explicit equations and inequalities written in ASCII math (use *, /, ^, \
sqrt, sin, cos, exp, ln). Keep every condition; do not solve anything. \
Reply with a JSON object: {\"text\": \"...\"}.";

const RELATIONS_SYSTEM: &str = "\
You extract constraints from a math problem statement. List every equation \
and inequality as a separate string using ASCII math with operators \
=, <=, >=, <, >. Name symbols exactly as the problem does. Symbols that \
stand for given constants go in \"parameters\"; variables the problem \
restricts to whole numbers go in \"integers\". Reply with a JSON object: \
{\"relations\": [\"...\"], \"parameters\": [\"...\"], \"integers\": [\"...\"]}.";

const GOAL_SYSTEM: &str = "\
You classify what a math problem asks for. Reply with a JSON object whose \
\"kind\" is one of: \
\"solve_for\" (with \"variables\": [names]), \
\"integrate\" (with \"integrand\", \"variable\", \"lo\", \"hi\"), \
\"optimize\" (with \"objective\" and \"minimize\": true|false), \
\"satisfy\" (no extra keys).";

/// Builds a `SolverState` from free-form problem text
pub struct ProblemExtractor<P: AgentProvider> {
    client: AgentClient<P>,
}

impl<P: AgentProvider> ProblemExtractor<P> {
    pub fn new(client: AgentClient<P>) -> Self {
        Self { client }
    }

    pub async fn extract(&self, text: &str) -> Result<SolverState> {
        let normalized = self.normalize(text).await?;
        info!(normalized = %normalized, "problem normalized");

        let extracted = self.extract_relations(&normalized).await?;
        let goal = self.extract_goal(&normalized).await?;

        let mut state = SolverState::new(normalized, extracted.relations, goal);
        state.parameters.extend(extracted.parameters);
        for var in extracted.integers {
            state.add_fact(var, QualFact::Integer);
        }
        Ok(state)
    }

    async fn normalize(&self, text: &str) -> Result<String> {
        let schema = ResponseSchema::new("normalize").require("text", FieldType::String);
        let value = self
            .client
            .call_checked("normalizer", NORMALIZE_SYSTEM, text, &schema)
            .await?;
        require_str(&value, "text")
    }

    async fn extract_relations(&self, text: &str) -> Result<ExtractedRelations> {
        let schema =
            ResponseSchema::new("relations").require("relations", FieldType::Array);
        let value = self
            .client
            .call_checked("relation_extractor", RELATIONS_SYSTEM, text, &schema)
            .await?;

        let mut relations = Vec::new();
        for item in require_array(&value, "relations")? {
            let raw = item.as_str().ok_or_else(|| {
                Error::schema_violation("relation_extractor", "relations must be strings")
                    .with_operation("extract::extract_relations")
            })?;
            let rel = parse_relation(raw)
                .map_err(|e| e.with_operation("extract::extract_relations"))?;
            relations.push(rel);
        }

        Ok(ExtractedRelations {
            relations,
            parameters: string_list(&value, "parameters"),
            integers: string_list(&value, "integers"),
        })
    }

    async fn extract_goal(&self, text: &str) -> Result<Goal> {
        let schema = ResponseSchema::new("goal").require("kind", FieldType::String);
        let value = self
            .client
            .call_checked("goal_extractor", GOAL_SYSTEM, text, &schema)
            .await?;
        goal_from_value(&value)
    }
}

fn goal_from_value(value: &Value) -> Result<Goal> {
    let kind = require_str(value, "kind")?;
    match kind.as_str() {
        "solve_for" => {
            let variables: Vec<String> = require_array(value, "variables")?
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
            if variables.is_empty() {
                return Err(Error::schema_violation(
                    "goal_extractor",
                    "solve_for needs at least one variable",
                )
                .with_operation("extract::extract_goal"));
            }
            Ok(Goal::SolveFor(variables))
        }
        "integrate" => {
            let integrand = parse_expr(&require_str(value, "integrand")?)
                .map_err(|e| e.with_operation("extract::extract_goal"))?;
            Ok(Goal::Integrate {
                integrand,
                var: require_str(value, "variable")?,
                lo: require_num(value, "lo")?,
                hi: require_num(value, "hi")?,
            })
        }
        "optimize" => {
            let objective = parse_expr(&require_str(value, "objective")?)
                .map_err(|e| e.with_operation("extract::extract_goal"))?;
            let minimize = value.get("minimize").and_then(Value::as_bool).unwrap_or(true);
            Ok(Goal::Optimize { objective, minimize })
        }
        "satisfy" => Ok(Goal::Satisfy),
        other => Err(Error::schema_violation(
            "goal_extractor",
            format!("unknown goal kind '{}'", other),
        )
        .with_operation("extract::extract_goal")),
    }
}

struct ExtractedRelations {
    relations: Vec<Relation>,
    parameters: Vec<String>,
    integers: Vec<String>,
}

/// Optional array of strings, absent means empty
fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn require_str(value: &Value, key: &'static str) -> Result<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            Error::schema_violation("extractor", format!("missing string key '{}'", key))
                .with_operation("extract")
        })
}

fn require_num(value: &Value, key: &'static str) -> Result<f64> {
    value.get(key).and_then(Value::as_f64).ok_or_else(|| {
        Error::schema_violation("extractor", format!("missing numeric key '{}'", key))
            .with_operation("extract")
    })
}

fn require_array<'a>(value: &'a Value, key: &'static str) -> Result<&'a Vec<Value>> {
    value.get(key).and_then(Value::as_array).ok_or_else(|| {
        Error::schema_violation("extractor", format!("missing array key '{}'", key))
            .with_operation("extract")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticProvider;
    use serde_json::json;

    fn extractor(responses: Vec<&str>) -> ProblemExtractor<StaticProvider> {
        ProblemExtractor::new(AgentClient::new(StaticProvider::new(responses)))
    }

    #[test]
    fn test_extract_solve_for_problem() {
        let ext = extractor(vec![
            r#"{"text": "x + y = 5 and x - y = 1, solve for x and y"}"#,
            r#"{"relations": ["x + y = 5", "x - y = 1"], "parameters": []}"#,
            r#"{"kind": "solve_for", "variables": ["x", "y"]}"#,
        ]);

        let state = tokio_test::block_on(ext.extract("A word problem about x and y"))
            .unwrap();

        assert_eq!(state.original().len(), 2);
        assert_eq!(state.goal, Goal::SolveFor(vec!["x".into(), "y".into()]));
        assert!(state.targets.contains("x"));
        assert!(state.unknowns().contains("y"));
    }

    #[test]
    fn test_extract_integral_problem() {
        let ext = extractor(vec![
            r#"{"text": "integrate x^2 from 0 to 1"}"#,
            r#"{"relations": []}"#,
            r#"{"kind": "integrate", "integrand": "x^2", "variable": "x", "lo": 0, "hi": 1}"#,
        ]);

        let state = tokio_test::block_on(ext.extract("area under x squared")).unwrap();

        match &state.goal {
            Goal::Integrate { var, lo, hi, .. } => {
                assert_eq!(var, "x");
                assert_eq!(*lo, 0.0);
                assert_eq!(*hi, 1.0);
            }
            other => panic!("expected integrate goal, got {:?}", other),
        }
        assert!(state.active_view().integrand.is_some());
    }

    #[test]
    fn test_extract_records_parameters_and_facts() {
        let ext = extractor(vec![
            r#"{"text": "a*n = 6 for given a, n a whole number"}"#,
            r#"{"relations": ["a*n = 6"], "parameters": ["a"], "integers": ["n"]}"#,
            r#"{"kind": "solve_for", "variables": ["n"]}"#,
        ]);

        let state = tokio_test::block_on(ext.extract("whole-number problem")).unwrap();

        assert!(state.parameters.contains("a"));
        assert!(state.has_fact("n", QualFact::Integer));
        assert_eq!(state.unknowns().len(), 1);
        assert!(state.unknowns().contains("n"));
    }

    #[test]
    fn test_bad_relation_string_fails() {
        let ext = extractor(vec![
            r#"{"text": "nonsense"}"#,
            r#"{"relations": ["x < y < z"]}"#,
        ]);

        let err = tokio_test::block_on(ext.extract("chained comparison")).unwrap_err();
        assert_eq!(err.kind(), anysolve_error::ErrorKind::ParseFailed);
    }

    #[test]
    fn test_goal_from_value_variants() {
        let goal = goal_from_value(&json!({"kind": "satisfy"})).unwrap();
        assert_eq!(goal, Goal::Satisfy);

        let goal = goal_from_value(&json!({
            "kind": "optimize", "objective": "x^2 - 4*x"
        }))
        .unwrap();
        match goal {
            Goal::Optimize { minimize, .. } => assert!(minimize),
            other => panic!("expected optimize goal, got {:?}", other),
        }

        let err = goal_from_value(&json!({"kind": "prove"})).unwrap_err();
        assert!(err.message().contains("unknown goal kind"));
    }
}
