//! # anysolve-agent
//!
//! Agent-backed intake and fallback for the anysolve engine. The solver core
//! is deterministic; this crate supplies the two places where a language
//! model helps:
//!
//! - **Extraction**: turning free-form problem text into a `SolverState`
//!   (normalized text, parsed constraints, a structured goal).
//! - **Fallback**: proposing a candidate when the operator pool has nothing
//!   left to try. Proposals are never trusted; the scheduler verifies them
//!   against the original constraints like any other candidate.
//!
//! ## Design
//!
//! Every agent call goes through [`AgentClient::call_checked`], which parses
//! the response as JSON (stripping markdown fences) and validates it against
//! a [`ResponseSchema`]. Violations are recoverable: the client retries with
//! the violation list appended as feedback, up to `max_retries` attempts.

pub mod client;
pub mod extract;
pub mod fallback;
pub mod provider;
pub mod schema;

pub use client::AgentClient;
pub use extract::ProblemExtractor;
pub use fallback::AgentFallback;
pub use provider::{AgentProvider, ChatMessage, HttpProvider, ProviderConfig, StaticProvider};
pub use schema::{FieldType, ResponseSchema};
