//! Error kinds for anysolve operations

use std::fmt;

/// The kind of error that occurred.
///
/// This enum categorizes errors to help users write clear error handling logic.
/// Users can match on ErrorKind to decide how to handle specific error cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// The requested feature or operation is not supported
    Unsupported,

    /// Invalid configuration or parameters
    ConfigInvalid,

    // =========================================================================
    // Expression / relation errors
    // =========================================================================
    /// Failed to parse an expression or relation string
    ParseFailed,

    /// The symbolic backend could not handle the expression
    ExprUnavailable,

    /// A variable referenced in an expression is not bound
    UnboundVariable,

    /// Invalid argument passed to a function
    InvalidArgument,

    // =========================================================================
    // Solver errors
    // =========================================================================
    /// Numeric search did not converge (reseed or switch operator)
    NumericDiverged,

    /// Symbolic blow-up or degenerate Jacobian (triggers replanning)
    RepresentationBreakdown,

    /// Candidate failed verification against the original constraints
    VerificationFailed,

    /// Iteration or time budget exhausted
    BudgetExhausted,

    /// No operator in the pool applies to the current state
    NoApplicableOperator,

    // =========================================================================
    // Agent errors
    // =========================================================================
    /// Agent call failed to produce a usable response
    AgentFailed,

    /// Agent output violated its response schema
    SchemaViolation,

    /// Agent endpoint unavailable
    AgentUnavailable,

    /// Rate limit exceeded
    RateLimited,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// IO operation failed
    IoFailed,

    /// Network error
    NetworkFailed,

    /// Serialization/deserialization failed
    SerializationFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::Unsupported => "Unsupported",
            ErrorKind::ConfigInvalid => "ConfigInvalid",

            // Expression / relation
            ErrorKind::ParseFailed => "ParseFailed",
            ErrorKind::ExprUnavailable => "ExprUnavailable",
            ErrorKind::UnboundVariable => "UnboundVariable",
            ErrorKind::InvalidArgument => "InvalidArgument",

            // Solver
            ErrorKind::NumericDiverged => "NumericDiverged",
            ErrorKind::RepresentationBreakdown => "RepresentationBreakdown",
            ErrorKind::VerificationFailed => "VerificationFailed",
            ErrorKind::BudgetExhausted => "BudgetExhausted",
            ErrorKind::NoApplicableOperator => "NoApplicableOperator",

            // Agent
            ErrorKind::AgentFailed => "AgentFailed",
            ErrorKind::SchemaViolation => "SchemaViolation",
            ErrorKind::AgentUnavailable => "AgentUnavailable",
            ErrorKind::RateLimited => "RateLimited",

            // IO
            ErrorKind::IoFailed => "IoFailed",
            ErrorKind::NetworkFailed => "NetworkFailed",
            ErrorKind::SerializationFailed => "SerializationFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NumericDiverged
                | ErrorKind::AgentFailed
                | ErrorKind::SchemaViolation
                | ErrorKind::AgentUnavailable
                | ErrorKind::RateLimited
                | ErrorKind::NetworkFailed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
