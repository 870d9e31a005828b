//! The main Error type for anysolve

use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// The unified error type for all anysolve operations.
///
/// This error type provides:
/// - `kind`: What type of error occurred
/// - `message`: Human-readable description
/// - `status`: Whether the error is retryable
/// - `operation`: What operation caused the error
/// - `context`: Key-value pairs for debugging
/// - `source`: The underlying error (if any)
///
/// # Example
///
/// ```rust
/// use anysolve_error::{Error, ErrorKind, ErrorStatus};
///
/// let err = Error::new(ErrorKind::NumericDiverged, "newton iteration exceeded budget")
///     .with_operation("operator::newton_solve")
///     .with_status(ErrorStatus::Temporary)
///     .with_context("seed", "3")
///     .with_context("iterations", "32");
///
/// assert_eq!(err.kind(), ErrorKind::NumericDiverged);
/// assert!(err.status().is_retryable());
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// Create a new error with the given kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = if kind.is_retryable() {
            ErrorStatus::Temporary
        } else {
            ErrorStatus::Permanent
        };

        Self {
            kind,
            message: message.into(),
            status,
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error status
    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    /// Get the operation that caused this error
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Get the context key-value pairs
    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Get the source error (if any)
    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    // =========================================================================
    // Builders (chainable)
    // =========================================================================

    /// Set the error status
    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark as temporary (retryable)
    pub fn temporary(mut self) -> Self {
        self.status = ErrorStatus::Temporary;
        self
    }

    /// Mark as permanent (not retryable)
    pub fn permanent(mut self) -> Self {
        self.status = ErrorStatus::Permanent;
        self
    }

    /// Set the operation that caused this error.
    ///
    /// If an operation was already set, the previous one is moved to context
    /// as "called" to preserve the call chain.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() {
            self.context.push(("called", self.operation.to_string()));
        }
        self.operation = operation;
        self
    }

    /// Add context to the error
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Set the source error.
    ///
    /// # Panics (debug only)
    /// Panics in debug mode if source was already set.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source error already set");
        self.source = Some(source.into());
        self
    }

    // =========================================================================
    // Status mutations
    // =========================================================================

    /// Mark as persistent after failed retries
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }
}

// =============================================================================
// Display - compact, single-line format for logs
// =============================================================================

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;

        if !self.context.is_empty() {
            write!(f, ", context {{ ")?;
            for (i, (key, value)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", key, value)?;
            }
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        Ok(())
    }
}

// =============================================================================
// Debug - verbose, multi-line format for debugging
// =============================================================================

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;

        if !self.message.is_empty() {
            writeln!(f)?;
            writeln!(f, "    Message: {}", self.message)?;
        }

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "    Context:")?;
            for (key, value) in &self.context {
                writeln!(f, "        {}: {}", key, value)?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "    Source: {:?}", source)?;
        }

        Ok(())
    }
}

// =============================================================================
// std::error::Error implementation
// =============================================================================

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// =============================================================================
// Convenient From implementations (be careful not to leak raw errors!)
// =============================================================================

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::IoFailed, err.to_string())
            .with_operation("io")
            .set_source(err)
    }
}

// =============================================================================
// Convenience constructors
// =============================================================================

impl Error {
    /// Create an Unexpected error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    /// Create an Unsupported error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    /// Create a ParseFailed error
    pub fn parse_failed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        let input = input.into();
        Self::new(ErrorKind::ParseFailed, reason)
            .with_context("input", input)
    }

    /// Create an UnboundVariable error
    pub fn unbound_variable(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::UnboundVariable, format!("variable '{}' is not bound", name))
            .with_context("variable", name)
    }

    /// Create a NumericDiverged error
    pub fn numeric_diverged(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NumericDiverged, message)
    }

    /// Create a RepresentationBreakdown error
    pub fn representation_breakdown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RepresentationBreakdown, message)
    }

    /// Create a BudgetExhausted error
    pub fn budget_exhausted(iterations: usize) -> Self {
        Self::new(ErrorKind::BudgetExhausted, "iteration budget exhausted")
            .with_context("iterations", iterations.to_string())
    }

    /// Create an AgentFailed error
    pub fn agent_failed(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        let agent = agent.into();
        Self::new(ErrorKind::AgentFailed, reason)
            .with_context("agent", agent)
    }

    /// Create a SchemaViolation error
    pub fn schema_violation(agent: impl Into<String>, issues: impl Into<String>) -> Self {
        let agent = agent.into();
        Self::new(ErrorKind::SchemaViolation, issues)
            .with_context("agent", agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::new(ErrorKind::ParseFailed, "unexpected token ')'");
        assert_eq!(err.kind(), ErrorKind::ParseFailed);
        assert_eq!(err.message(), "unexpected token ')'");
        assert_eq!(err.status(), ErrorStatus::Permanent);
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::new(ErrorKind::NumericDiverged, "no sign change found")
            .with_operation("operator::interval_refine")
            .with_context("lo", "0")
            .with_context("hi", "10");

        assert_eq!(err.operation(), "operator::interval_refine");
        assert_eq!(err.context().len(), 2);
        assert_eq!(err.context()[0], ("lo", "0".to_string()));
    }

    #[test]
    fn test_operation_chaining() {
        let err = Error::new(ErrorKind::ExprUnavailable, "cannot differentiate")
            .with_operation("expr::differentiate")
            .with_operation("operator::differentiate");

        assert_eq!(err.operation(), "operator::differentiate");
        assert_eq!(err.context().len(), 1);
        assert_eq!(err.context()[0], ("called", "expr::differentiate".to_string()));
    }

    #[test]
    fn test_temporary_status() {
        let err = Error::new(ErrorKind::NumericDiverged, "reseed needed");
        assert!(err.is_retryable()); // NumericDiverged defaults to temporary

        let err = Error::new(ErrorKind::ParseFailed, "bad token");
        assert!(!err.is_retryable()); // ParseFailed defaults to permanent
    }

    #[test]
    fn test_persist() {
        let err = Error::new(ErrorKind::NetworkFailed, "connection refused")
            .temporary();
        assert!(err.is_retryable());

        let err = err.persist();
        assert!(!err.is_retryable());
        assert_eq!(err.status(), ErrorStatus::Persistent);
    }

    #[test]
    fn test_display() {
        let err = Error::new(ErrorKind::SchemaViolation, "missing key 'relations'")
            .with_operation("client::call_checked")
            .with_context("agent", "relation_extractor")
            .with_context("attempt", "2");

        let display = format!("{}", err);
        assert!(display.contains("SchemaViolation"));
        assert!(display.contains("temporary"));
        assert!(display.contains("client::call_checked"));
        assert!(display.contains("agent: relation_extractor"));
    }

    #[test]
    fn test_convenience_constructors() {
        let err = Error::unbound_variable("y");
        assert_eq!(err.kind(), ErrorKind::UnboundVariable);
        assert!(err.message().contains("y"));

        let err = Error::budget_exhausted(64);
        assert_eq!(err.kind(), ErrorKind::BudgetExhausted);

        let err = Error::agent_failed("tokenizer", "empty response");
        assert_eq!(err.kind(), ErrorKind::AgentFailed);
    }

    #[test]
    fn test_set_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = Error::new(ErrorKind::IoFailed, "problem file missing")
            .set_source(io_err);

        assert!(err.source_ref().is_some());
    }
}
