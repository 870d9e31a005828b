//! # anysolve CLI
//!
//! Command-line interface for the anytime solver.
//!
//! Usage:
//!   anysolve solve -r "x + y = 5" -r "x - y = 1" --solve-for x --solve-for y
//!   anysolve integrate "x^2" --var x --from 0 --to 1
//!   anysolve extract "A rectangle has perimeter 20..." --agent-url URL
//!
//! Examples:
//!   anysolve solve -r "2*x + 3 = 11" --solve-for x
//!   anysolve solve -r "x^2 = 4" -r "x >= 0" --solve-for x --verbose
//!   anysolve integrate "sin(x)" --var x --from 0 --to 3.14159265
//!   RUST_LOG=debug anysolve solve -r "cos(x) = x" --solve-for x

use anysolve_agent::{AgentClient, AgentFallback, HttpProvider, ProblemExtractor, ProviderConfig};
use anysolve_core::expr::parse_expr;
use anysolve_core::relation::parse_relation;
use anysolve_core::scheduler::Outcome;
use anysolve_core::{Budget, Goal, Scheduler, SolverConfig, SolverState, Status};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "anysolve")]
#[command(author, version, about = "anysolve - anytime micro-solver for math problems")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show the full run trace
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show the final answer
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a constraint system given as explicit relations
    Solve {
        /// A relation, e.g. "x + y = 5" (repeatable)
        #[arg(short, long = "relation", required = true)]
        relations: Vec<String>,

        /// Variable to solve for (repeatable; omit to accept any assignment)
        #[arg(long = "solve-for")]
        solve_for: Vec<String>,

        /// Symbol to treat as a given constant (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Evaluate a definite integral
    Integrate {
        /// The integrand, e.g. "x^2" or "sin(x)/x"
        integrand: String,

        /// Integration variable
        #[arg(long, default_value = "x")]
        var: String,

        /// Lower limit
        #[arg(long)]
        from: f64,

        /// Upper limit
        #[arg(long)]
        to: f64,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Extract a problem from free-form text via an agent, then solve it
    Extract {
        /// The problem statement
        #[arg(required = true)]
        text: String,

        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Iteration budget (default from solver config)
    #[arg(long)]
    max_iters: Option<u32>,

    /// Wall-clock budget in milliseconds
    #[arg(long)]
    time_budget_ms: Option<u64>,

    /// OpenAI-compatible endpoint for agent extraction and fallback proposals
    #[arg(long)]
    agent_url: Option<String>,

    /// Model name for the agent endpoint
    #[arg(long)]
    model: Option<String>,
}

fn budget_for(config: &SolverConfig, run: &RunArgs) -> Budget {
    let mut budget = Budget::from_config(config);
    if let Some(max_iters) = run.max_iters {
        budget.max_iterations = max_iters;
    }
    if let Some(ms) = run.time_budget_ms {
        budget = budget.with_time_limit(Duration::from_millis(ms));
    }
    budget
}

fn provider_config(run: &RunArgs) -> Option<ProviderConfig> {
    let base_url = run.agent_url.clone()?;
    let mut config = ProviderConfig::new(base_url);
    config.api_key = std::env::var("ANYSOLVE_API_KEY").ok();
    config.model = run.model.clone();
    Some(config)
}

fn build_scheduler(run: &RunArgs) -> Result<Scheduler, anysolve_error::Error> {
    let mut scheduler = Scheduler::new(SolverConfig::default());
    if let Some(config) = provider_config(run) {
        let provider = HttpProvider::new(config)?;
        let fallback = AgentFallback::new(AgentClient::new(provider))?;
        scheduler = scheduler.with_fallback(Box::new(fallback));
    }
    Ok(scheduler)
}

fn print_outcome(outcome: &Outcome, verbose: bool, quiet: bool) {
    if !quiet {
        println!("\n--- OUTCOME ---\n");
    }
    println!("status: {}", outcome.status);

    if let Some(best) = &outcome.best {
        println!("answer: {}", best.render());
        if let Some(bound) = best.error_bound {
            println!("error bound: {:.3e}", bound);
        }
    }

    if !quiet {
        println!("certificate: {}", outcome.certificate.explanation());
        println!("iterations: {}", outcome.iterations);
    }

    if verbose {
        println!("\n--- Run Trace ({} steps) ---", outcome.trace.len());
        for step in &outcome.trace {
            let operator = step.operator.as_deref().unwrap_or("-");
            let note = step
                .note
                .as_ref()
                .map(|n| format!(" ({})", n))
                .unwrap_or_default();
            println!(
                "  {:3}. {:?} {} delta {:+.3} progress {:.3}{}",
                step.iteration, step.phase, operator, step.progress_delta, step.progress, note
            );
        }
    }
}

/// Exit 0 when the run produced something usable
fn exit_code(outcome: &Outcome) -> i32 {
    match outcome.status {
        Status::Solved => 0,
        Status::Partial if outcome.best.is_some() => 0,
        _ => 1,
    }
}

fn run_solve(
    relations: &[String],
    solve_for: &[String],
    params: &[String],
    run: &RunArgs,
) -> Result<Outcome, anysolve_error::Error> {
    let mut parsed = Vec::new();
    for raw in relations {
        parsed.push(parse_relation(raw)?);
    }

    let goal = if solve_for.is_empty() {
        Goal::Satisfy
    } else {
        Goal::SolveFor(solve_for.to_vec())
    };

    let mut state = SolverState::new(relations.join("; "), parsed, goal);
    state.parameters.extend(params.iter().cloned());

    let scheduler = build_scheduler(run)?;
    let budget = budget_for(scheduler.config(), run);
    scheduler.solve(state, &budget)
}

fn run_integrate(
    integrand: &str,
    var: &str,
    from: f64,
    to: f64,
    run: &RunArgs,
) -> Result<Outcome, anysolve_error::Error> {
    let expr = parse_expr(integrand)?;
    let goal = Goal::Integrate {
        integrand: expr,
        var: var.to_string(),
        lo: from,
        hi: to,
    };
    let state = SolverState::new(
        format!("integral of {} d{} from {} to {}", integrand, var, from, to),
        Vec::new(),
        goal,
    );

    let scheduler = build_scheduler(run)?;
    let budget = budget_for(scheduler.config(), run);
    scheduler.solve(state, &budget)
}

async fn run_extract(text: &str, run: &RunArgs, quiet: bool) -> Result<Outcome, anysolve_error::Error> {
    let config = provider_config(run).ok_or_else(|| {
        anysolve_error::Error::unsupported("extract requires --agent-url")
            .with_operation("cli::extract")
    })?;

    let provider = HttpProvider::new(config)?;
    let extractor = ProblemExtractor::new(AgentClient::new(provider));
    let state = extractor.extract(text).await?;

    if !quiet {
        println!("extracted problem: {}", state.problem_text);
        for rel in state.original() {
            println!("  constraint: {}", rel);
        }
    }

    let scheduler = build_scheduler(run)?;
    let budget = budget_for(scheduler.config(), run);
    scheduler.solve(state, &budget)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Solve { relations, solve_for, params, run } => {
            run_solve(relations, solve_for, params, run)
        }
        Commands::Integrate { integrand, var, from, to, run } => {
            run_integrate(integrand, var, *from, *to, run)
        }
        Commands::Extract { text, run } => run_extract(text, run, cli.quiet).await,
    };

    match result {
        Ok(outcome) => {
            print_outcome(&outcome, cli.verbose, cli.quiet);
            std::process::exit(exit_code(&outcome));
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
