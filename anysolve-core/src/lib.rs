//! # Anysolve Core
//!
//! Deterministic anytime micro-solver engine: symbolic expressions, solver
//! state, a pool of rewrite/solve operators, a metrics estimator, a verifier
//! and the scheduler loop that drives them.
//!
//! The engine is pure computation: no I/O, no network, no clock beyond the
//! optional wall-clock budget check. External proposal sources plug in
//! through [`scheduler::Fallback`].
//!
//! ## Example
//!
//! ```no_run
//! use anysolve_core::relation::parse_relation;
//! use anysolve_core::scheduler::{Budget, Scheduler};
//! use anysolve_core::state::{Goal, SolverState};
//! use anysolve_core::config::SolverConfig;
//!
//! # fn run() -> anysolve_error::Result<()> {
//! let constraints = vec![parse_relation("2x + 3 = 11")?];
//! let state = SolverState::new("2x + 3 = 11", constraints, Goal::SolveFor(vec!["x".into()]));
//! let scheduler = Scheduler::new(SolverConfig::default());
//! let budget = Budget::from_config(scheduler.config());
//! let outcome = scheduler.solve(state, &budget)?;
//! println!("{}: {:?}", outcome.status, outcome.best);
//! # Ok(())
//! # }
//! ```

pub mod candidate;
pub mod certificate;
pub mod config;
pub mod expr;
pub mod linalg;
pub mod metrics;
pub mod operator;
pub mod relation;
pub mod scheduler;
pub mod state;
pub mod verify;

pub use candidate::Candidate;
pub use certificate::{Certificate, Conflict, Status};
pub use config::SolverConfig;
pub use scheduler::{Budget, Fallback, Outcome, Scheduler};
pub use state::{Goal, QualFact, SolverState};
