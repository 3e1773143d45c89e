use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};

use crate::compiler::{CargoCompiler, Compiler, TestBinaries};
use crate::config::MutatorOptions;
use crate::coverage::{CoverageRecorder, TestSelector};
use crate::error::{MutatorError, Result};
use crate::executor::{LibtestExecutor, TestExecutor};
use crate::generator::{self, SourceFile};
use crate::injector::MutationBatch;
use crate::mutants::{MutantTable, RunSummary};
use crate::orchestrator::{OrchestratorConfig, VerdictOrchestrator};
use crate::reporter::Reporter;
use crate::rollback::CompileRollback;
use crate::workspace::{self, Workspace};

/// Result of one complete mutation testing run.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub mutants: MutantTable,
    pub summary: RunSummary,
    pub duration: Duration,
    /// Compilations needed before the schemata build succeeded.
    pub build_attempts: usize,
}

/// Generate, inject, compile with rollback, record coverage and settle a
/// verdict for every mutant of one compilation unit.
pub struct MutationTestProcess<'a, C> {
    compiler: &'a C,
    options: &'a MutatorOptions,
}

impl<'a, C: Compiler> MutationTestProcess<'a, C> {
    pub fn new(compiler: &'a C, options: &'a MutatorOptions) -> Self {
        MutationTestProcess { compiler, options }
    }

    /// `make_executor` turns the built artifact into something that can run
    /// its tests. It is only called when at least one mutant made it into
    /// a successful build.
    pub fn run<E, F>(
        &self,
        sources: &[SourceFile],
        make_executor: F,
        reporter: &mut dyn Reporter,
    ) -> Result<PipelineOutcome>
    where
        E: TestExecutor,
        F: FnOnce(C::Artifact) -> Result<E>,
    {
        let started = Instant::now();
        self.options.validate()?;

        let mutants = generator::generate_mutants(sources, self.options)?;
        reporter.on_mutants_created(&mutants);
        tracing::info!(files = sources.len(), mutants = mutants.len(), "mutants generated");

        let batch = MutationBatch::inject(sources, mutants);
        if batch.live_mutants().is_empty() {
            let table = batch.mutants;
            let summary = report_settled(&table, reporter);
            return Ok(PipelineOutcome {
                mutants: table,
                summary,
                duration: started.elapsed(),
                build_attempts: 0,
            });
        }

        let built = CompileRollback::new(self.compiler).run(batch)?;
        let live = built.batch.live_mutants();
        let mut table = built.batch.mutants;
        if live.is_empty() {
            let summary = report_settled(&table, reporter);
            return Ok(PipelineOutcome {
                mutants: table,
                summary,
                duration: started.elapsed(),
                build_attempts: built.attempts,
            });
        }

        let executor = Arc::new(make_executor(built.artifact)?);
        let tests = executor.discover()?;
        if tests.is_empty() {
            return Err(MutatorError::NoTests);
        }
        tracing::info!(tests = tests.len(), "tests discovered");

        let recorder = CoverageRecorder::new(
            Arc::clone(&executor),
            self.options.concurrency,
            self.options.baseline_timeout,
        );
        let baseline = recorder.record(&tests, self.options.coverage, &live)?;
        let selector = TestSelector::new(&baseline);

        let orchestrator = VerdictOrchestrator::new(executor, OrchestratorConfig::from_options(self.options));
        let summary = orchestrator.run(&mut table, &selector, reporter)?;

        Ok(PipelineOutcome {
            mutants: table,
            summary,
            duration: started.elapsed(),
            build_attempts: built.attempts,
        })
    }
}

/// Every mutant is already terminal; report each of them once.
fn report_settled(table: &MutantTable, reporter: &mut dyn Reporter) -> RunSummary {
    for mutant in table.iter() {
        reporter.on_mutant_tested(mutant);
    }
    let summary = table.summary();
    reporter.on_all_mutants_tested(&summary);
    summary
}

/// A cargo project on disk and the source files that will be mutated.
#[derive(Debug)]
pub struct CargoProject {
    root: Utf8PathBuf,
    sources: Vec<SourceFile>,
}

impl CargoProject {
    /// Finds the project containing `start` and loads its source files.
    pub fn open(start: &Utf8Path) -> Result<CargoProject> {
        let root = workspace::find_project_root(start);
        if !root.join("Cargo.toml").is_file() {
            return Err(MutatorError::InvalidOptions(format!(
                "no Cargo.toml found at or above {}",
                start
            )));
        }
        let sources = workspace::discover_sources(&root)?;
        tracing::debug!(root = %root, files = sources.len(), "project opened");
        Ok(CargoProject { root, sources })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn sources(&self) -> &[SourceFile] {
        &self.sources
    }

    /// Keeps only `files`, given as absolute paths or relative to the root.
    pub fn restrict_to(&mut self, files: &[Utf8PathBuf]) -> Result<()> {
        let wanted: Vec<Utf8PathBuf> = files
            .iter()
            .map(|f| match f.strip_prefix(&self.root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => f.clone(),
            })
            .collect();
        if let Some(missing) = wanted.iter().find(|w| !self.sources.iter().any(|s| &s.path == *w)) {
            return Err(MutatorError::InvalidOptions(format!(
                "{} is not a source file of {}",
                missing, self.root
            )));
        }
        self.sources.retain(|s| wanted.contains(&s.path));
        Ok(())
    }

    /// Names of every function in the selected files, sorted and deduplicated.
    pub fn functions(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for source in &self.sources {
            names.extend(generator::list_functions(&source.text)?);
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Runs the whole pipeline against an isolated copy of the project.
    /// `cargo_args` are passed to every `cargo test --no-run`.
    pub fn test(
        &self,
        options: &MutatorOptions,
        session_id: &str,
        cargo_args: Vec<String>,
        reporter: &mut dyn Reporter,
    ) -> Result<PipelineOutcome> {
        let workspace = Arc::new(Workspace::prepare(&self.root, session_id)?);
        let compiler = CargoCompiler::new(Arc::clone(&workspace)).with_args(cargo_args);
        let process = MutationTestProcess::new(&compiler, options);
        process.run(
            &self.sources,
            |binaries: TestBinaries| {
                Ok(LibtestExecutor::new(
                    binaries.binaries,
                    workspace.root().to_path_buf(),
                    workspace.scratch_dir().to_path_buf(),
                ))
            },
            reporter,
        )
    }
}
