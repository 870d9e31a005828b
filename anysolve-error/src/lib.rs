//! # anysolve-error
//!
//! Unified error handling for anysolve - following OpenDAL's error handling practices.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., ParseFailed, NumericDiverged)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use anysolve_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::ParseFailed, "unbalanced parentheses in '2x + (3'")
//!         .with_operation("expr::parse")
//!         .with_context("input", "2x + (3"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All fallible functions return `Result<T, anysolve_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Numeric failures inside operators are signals, not errors; only the
//!   boundary surfaces them as `Error` values

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using anysolve Error
pub type Result<T> = std::result::Result<T, Error>;
