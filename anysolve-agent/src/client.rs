//! Checked agent calls with retry-on-violation
//!
//! ## Design
//!
//! A call is a transcript of system + user messages. The raw response is
//! fence-stripped, parsed as JSON, and checked against the call's
//! [`ResponseSchema`]. A malformed response is not fatal: the client appends
//! the assistant turn and a feedback message listing the violations, then
//! asks again, up to `max_retries` extra attempts.

use crate::provider::{strip_fences, AgentProvider, ChatMessage};
use crate::schema::ResponseSchema;
use anysolve_error::{Error, Result};
use serde_json::Value;
use tracing::{debug, warn};

const DEFAULT_MAX_RETRIES: usize = 2;

/// Orchestrates schema-checked calls against a provider
pub struct AgentClient<P: AgentProvider> {
    provider: P,
    max_retries: usize,
}

impl<P: AgentProvider> AgentClient<P> {
    pub fn new(provider: P) -> Self {
        Self { provider, max_retries: DEFAULT_MAX_RETRIES }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Call the agent and validate the response against `schema`.
    ///
    /// Returns the parsed JSON value once it conforms. Parse failures and
    /// schema violations consume a retry each; provider errors consume a
    /// retry only while the provider marks them retryable.
    pub async fn call_checked(
        &self,
        agent: &str,
        system: &str,
        user: &str,
        schema: &ResponseSchema,
    ) -> Result<Value> {
        let mut transcript = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let mut last_issue = String::new();

        for attempt in 0..=self.max_retries {
            let content = match self.provider.call(&transcript).await {
                Ok(content) => content,
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    warn!(agent, attempt, error = %err, "provider call failed, retrying");
                    continue;
                }
                Err(err) => {
                    return Err(err
                        .with_operation("client::call_checked")
                        .with_context("agent", agent.to_string()))
                }
            };

            let payload = strip_fences(&content);
            let issues: Vec<String> = match serde_json::from_str::<Value>(payload) {
                Ok(value) => {
                    let violations = schema.check(&value);
                    if violations.is_empty() {
                        debug!(agent, attempt, "agent response accepted");
                        return Ok(value);
                    }
                    violations
                }
                Err(e) => vec![format!("response is not valid JSON: {}", e)],
            };

            last_issue = issues.join("; ");
            warn!(agent, attempt, issues = %last_issue, "agent response rejected");

            transcript.push(ChatMessage::assistant(&content));
            transcript.push(ChatMessage::user(format!(
                "Your previous response was rejected:\n- {}\n\n\
                 Reply again with only a JSON object matching the requested shape.",
                issues.join("\n- ")
            )));
        }

        Err(Error::schema_violation(agent.to_string(), last_issue)
            .with_operation("client::call_checked")
            .with_context("attempts", (self.max_retries + 1).to_string())
            .persist())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticProvider;
    use crate::schema::FieldType;

    fn relations_schema() -> ResponseSchema {
        ResponseSchema::new("relations").require("relations", FieldType::Array)
    }

    #[test]
    fn test_accepts_conforming_response() {
        let provider = StaticProvider::new(vec![r#"{"relations": ["x = 1"]}"#]);
        let client = AgentClient::new(provider);

        let value = tokio_test::block_on(client.call_checked(
            "relation_extractor",
            "extract relations",
            "x equals one",
            &relations_schema(),
        ))
        .unwrap();

        assert_eq!(value["relations"][0], "x = 1");
        assert_eq!(client.provider().call_count(), 1);
    }

    #[test]
    fn test_retries_with_violation_feedback() {
        let provider = StaticProvider::new(vec![
            r#"{"wrong": true}"#,
            r#"```json
{"relations": ["x = 1"]}
```"#,
        ]);
        let client = AgentClient::new(provider);

        let value = tokio_test::block_on(client.call_checked(
            "relation_extractor",
            "extract relations",
            "x equals one",
            &relations_schema(),
        ))
        .unwrap();

        assert_eq!(value["relations"][0], "x = 1");
        assert_eq!(client.provider().call_count(), 2);

        // the retry transcript carries the rejection as feedback
        let retry = client.provider().call_at(1).unwrap();
        assert_eq!(retry.len(), 4);
        assert!(retry[3].content.contains("missing required key 'relations'"));
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let provider = StaticProvider::new(vec!["not json", "still not json"]);
        let client = AgentClient::new(provider).with_max_retries(1);

        let err = tokio_test::block_on(client.call_checked(
            "relation_extractor",
            "extract relations",
            "x equals one",
            &relations_schema(),
        ))
        .unwrap_err();

        assert_eq!(err.kind(), anysolve_error::ErrorKind::SchemaViolation);
        assert!(!err.is_retryable());
        assert_eq!(client.provider().call_count(), 2);
    }

    #[test]
    fn test_permanent_provider_error_is_not_retried() {
        // empty queue makes the provider fail permanently on the first call
        let provider = StaticProvider::new(vec![]);
        let client = AgentClient::new(provider);

        let err = tokio_test::block_on(client.call_checked(
            "relation_extractor",
            "extract relations",
            "x equals one",
            &relations_schema(),
        ))
        .unwrap_err();

        assert_eq!(err.kind(), anysolve_error::ErrorKind::AgentFailed);
        assert_eq!(client.provider().call_count(), 1);
    }
}
