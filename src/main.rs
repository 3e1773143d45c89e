use mutator::config::{CoverageMode, MutationLevel, MutatorOptions};
use mutator::error::MutatorError;
use mutator::mutants::OperatorKind;
use mutator::output;
use mutator::pipeline::CargoProject;
use mutator::reporter::{CollectingReporter, DotProgressReporter, Reporter};
use mutator::state::{self, RunResult};

use std::process;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mutator", version, about = "Mutation testing for Rust crates")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run mutation testing on a cargo project
    Run(RunArgs),
    /// Show details for a survived mutant by ref
    Show {
        /// Mutant ref (e.g. @m1 or m1)
        #[arg(name = "ref")]
        mutant_ref: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Summary of last run
    Status {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Project directory (any directory inside the cargo project)
    #[arg(short, long, default_value = ".", env = "MUTATOR_PROJECT")]
    project: Utf8PathBuf,
    /// Only mutate these source files (repeatable)
    #[arg(short, long = "file")]
    files: Vec<Utf8PathBuf>,
    /// Function name to scope mutations to
    #[arg(long)]
    function: Option<String>,
    /// Mutation level: basic, standard, advanced or complete
    #[arg(long, default_value = "standard", env = "MUTATOR_LEVEL")]
    level: MutationLevel,
    /// Coverage mode: per-test or off
    #[arg(long, default_value = "per-test")]
    coverage: CoverageMode,
    /// Fixed per-mutant timeout in milliseconds (default: derived from baseline)
    #[arg(long, env = "MUTATOR_TIMEOUT_MS")]
    timeout_ms: Option<u64>,
    /// Timeout multiplier applied to baseline test durations
    #[arg(long, default_value = "3")]
    timeout_mult: f64,
    /// Timeout of each baseline test in milliseconds
    #[arg(long, default_value = "60000")]
    baseline_timeout_ms: u64,
    /// Worker threads (default: half the available cores)
    #[arg(short, long, env = "MUTATOR_JOBS")]
    jobs: Option<usize>,
    /// Run every candidate test even after one fails
    #[arg(long)]
    no_fail_fast: bool,
    /// Test mutants with disjoint test sets in one activation
    #[arg(long)]
    batch: bool,
    /// Operators to skip, comma separated (e.g. string_mut,block_remove)
    #[arg(long, value_delimiter = ',')]
    ignore_mutations: Vec<OperatorKind>,
    /// Extra argument for `cargo test --no-run` (repeatable)
    #[arg(long = "cargo-arg", allow_hyphen_values = true)]
    cargo_args: Vec<String>,
    /// Output JSON instead of human-readable text
    #[arg(long)]
    json: bool,
    /// Exit code only, no output
    #[arg(short, long)]
    quiet: bool,
    /// Session ID for isolation (default: auto-generated). Agents should pass their own.
    #[arg(long)]
    session: Option<String>,
}

impl RunArgs {
    fn options(&self) -> MutatorOptions {
        let defaults = MutatorOptions::default();
        MutatorOptions {
            level: self.level,
            coverage: self.coverage,
            concurrency: self.jobs.unwrap_or(defaults.concurrency),
            timeout: self.timeout_ms.map(Duration::from_millis),
            timeout_multiplier: self.timeout_mult,
            baseline_timeout: Duration::from_millis(self.baseline_timeout_ms),
            fail_fast: !self.no_fail_fast,
            batch_mutants: self.batch,
            ignored_operators: self.ignore_mutations.iter().copied().collect(),
            function: self.function.clone(),
            ..defaults
        }
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Show { mutant_ref, json } => cmd_show(mutant_ref, json),
        Commands::Status { json } => cmd_status(json),
    };

    process::exit(exit_code);
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_logging() {
    let filter = EnvFilter::try_from_env("MUTATOR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn generate_session_id() -> String {
    format!("{:08x}", fastrand::u32(..))
}

fn print_json<T: Serialize>(value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            output::print_error(&format!("Failed to serialize output: {}", e));
            false
        }
    }
}

fn exit_code_for(error: &MutatorError) -> i32 {
    match error {
        MutatorError::InvalidOptions(_) => 2,
        _ => 3,
    }
}

fn report_error(error: &MutatorError, quiet: bool) -> i32 {
    if !quiet {
        match error {
            MutatorError::BaselineFailed(tests) => output::print_error(&format!(
                "Tests fail before mutation. Fix failing tests first.\n{}",
                tests
            )),
            MutatorError::FatalBuild { reason, diagnostics } => {
                output::print_error(&format!("The project does not build: {}", reason));
                output::print_diagnostics(diagnostics);
            }
            other => output::print_error(&other.to_string()),
        }
    }
    exit_code_for(error)
}

fn cmd_run(args: RunArgs) -> i32 {
    if !args.project.exists() {
        if !args.quiet {
            output::print_error(&format!(
                "Project directory not found: {}. Check the path and try again.",
                args.project
            ));
        }
        return 2;
    }
    let project_dir = args.project.canonicalize_utf8().unwrap_or_else(|_| args.project.clone());

    let mut project = match CargoProject::open(&project_dir) {
        Ok(p) => p,
        Err(e) => return report_error(&e, args.quiet),
    };

    if !args.files.is_empty() {
        let files: Vec<Utf8PathBuf> = args
            .files
            .iter()
            .map(|f| f.canonicalize_utf8().unwrap_or_else(|_| f.clone()))
            .collect();
        if let Err(e) = project.restrict_to(&files) {
            return report_error(&e, args.quiet);
        }
    }

    if let Some(ref fn_name) = args.function {
        let available = match project.functions() {
            Ok(names) => names,
            Err(e) => return report_error(&e, args.quiet),
        };
        if !available.iter().any(|n| n == fn_name) {
            if !args.quiet {
                output::print_error(&format!(
                    "Function '{}' not found. Available: {}",
                    fn_name,
                    available.join(", ")
                ));
            }
            return 2;
        }
    }

    let options = args.options();
    let session_id = args.session.clone().unwrap_or_else(generate_session_id);

    let mut dots;
    let mut collecting = CollectingReporter::default();
    let reporter: &mut dyn Reporter = if args.json || args.quiet {
        &mut collecting
    } else {
        dots = DotProgressReporter::new(std::io::stderr());
        &mut dots
    };

    let outcome = match project.test(&options, &session_id, args.cargo_args.clone(), reporter) {
        Ok(o) => o,
        Err(e) => return report_error(&e, args.quiet),
    };

    let run_result = RunResult::from_outcome(&outcome, project.sources());
    finalize_results(&run_result, project.root(), args.json, args.quiet)
}

fn finalize_results(run_result: &RunResult, project: &Utf8Path, json_mode: bool, quiet: bool) -> i32 {
    state::save_last_run(run_result);
    let code = if run_result.survived > 0 { 1 } else { 0 };

    if quiet {
        return code;
    }

    if json_mode {
        if !print_json(run_result) {
            return 3;
        }
    } else if run_result.total == 0 {
        output::print_success("No mutable code found.");
    } else {
        output::print_run_result(run_result, project);
    }

    code
}

fn cmd_show(mutant_ref: String, json_mode: bool) -> i32 {
    let ref_id = mutant_ref.trim_start_matches('@');

    let last_run = match state::load_last_run() {
        Some(r) => r,
        None => {
            output::print_error("No previous run found. Run `mutator run` first.");
            return 2;
        }
    };

    let mutant = last_run.survived_mutants.iter().find(|m| m.ref_id == ref_id);
    match mutant {
        Some(m) => {
            if json_mode {
                if !print_json(m) {
                    return 3;
                }
            } else {
                output::print_mutant_detail(m);
            }
            0
        }
        None => {
            let valid: Vec<_> = last_run.survived_mutants.iter().map(|m| format!("@{}", m.ref_id)).collect();
            output::print_error(&format!(
                "Mutant @{} not found. Valid refs: {}",
                ref_id,
                valid.join(", ")
            ));
            2
        }
    }
}

fn cmd_status(json_mode: bool) -> i32 {
    match state::load_last_run() {
        Some(result) => {
            if json_mode {
                if !print_json(&result) {
                    return 3;
                }
            } else {
                output::print_status(&result);
            }
            0
        }
        None => {
            output::print_error("No previous run found. Run `mutator run` first.");
            2
        }
    }
}
