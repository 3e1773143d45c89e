use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use mutator::compiler::{CompileOutput, Compiler, Diagnostic, Severity};
use mutator::config::{CoverageMode, MutatorOptions};
use mutator::error::{MutatorError, Result};
use mutator::executor::{
    CancelToken, CoverageRun, ExecutorError, RunReport, RunRequest, TestExecutor, TestId,
    TestOutcome, TestVerdict,
};
use mutator::generator::SourceFile;
use mutator::injector::RenderedFile;
use mutator::mutants::{MutantId, MutantStatus, OperatorKind, Span};
use mutator::pipeline::MutationTestProcess;
use mutator::reporter::CollectingReporter;

const SOURCE: &str = r#"pub fn positive(x: i32) -> bool {
    x > 0
}

pub fn negate(b: bool) -> bool {
    !b
}
"#;

// Mutants at the default level: 1 `x >= 0`, 2 `x <= 0`, 3 `b`.

type Check = Box<dyn Fn(&str) -> Vec<Diagnostic> + Send + Sync>;

struct FakeCompiler {
    check: Check,
    builds: Mutex<usize>,
}

impl FakeCompiler {
    fn new(check: impl Fn(&str) -> Vec<Diagnostic> + Send + Sync + 'static) -> Self {
        FakeCompiler {
            check: Box::new(check),
            builds: Mutex::new(0),
        }
    }

    fn clean() -> Self {
        FakeCompiler::new(|_| vec![])
    }

    fn builds(&self) -> usize {
        *self.builds.lock().unwrap()
    }
}

impl Compiler for FakeCompiler {
    type Artifact = String;

    fn compile(&self, files: &[RenderedFile]) -> Result<CompileOutput<String>> {
        *self.builds.lock().unwrap() += 1;
        let text = files.first().map(|f| f.text.clone()).unwrap_or_default();
        let diagnostics = (self.check)(&text);
        if diagnostics.is_empty() {
            Ok(CompileOutput::Success(text))
        } else {
            Ok(CompileOutput::Failed(diagnostics))
        }
    }
}

/// Tests with fixed coverage; a test fails when one of its killers is active.
struct FakeExecutor {
    tests: Vec<TestId>,
    reaches: BTreeMap<TestId, BTreeSet<MutantId>>,
    killers: BTreeMap<TestId, BTreeSet<MutantId>>,
    baseline_failures: BTreeSet<TestId>,
    runs: Mutex<Vec<RunRequest>>,
}

impl FakeExecutor {
    fn new() -> Self {
        let positive = test("positive_is_strict");
        let negate = test("negate_flips");
        let unrelated = test("unrelated");
        FakeExecutor {
            tests: vec![positive.clone(), negate.clone(), unrelated.clone()],
            reaches: [
                (positive.clone(), ids(&[1, 2])),
                (negate.clone(), BTreeSet::new()),
                (unrelated, BTreeSet::new()),
            ]
            .into_iter()
            .collect(),
            killers: [(positive, ids(&[2]))].into_iter().collect(),
            baseline_failures: BTreeSet::new(),
            runs: Mutex::new(Vec::new()),
        }
    }

    fn runs(&self) -> Vec<RunRequest> {
        self.runs.lock().unwrap().clone()
    }
}

impl TestExecutor for FakeExecutor {
    fn discover(&self) -> std::result::Result<Vec<TestId>, ExecutorError> {
        Ok(self.tests.clone())
    }

    fn run_with_coverage(
        &self,
        test: &TestId,
        _timeout: Duration,
    ) -> std::result::Result<CoverageRun, ExecutorError> {
        let verdict = if self.baseline_failures.contains(test) {
            TestVerdict::Failed
        } else {
            TestVerdict::Passed
        };
        Ok(CoverageRun {
            outcome: TestOutcome {
                test: test.clone(),
                verdict,
                duration: Duration::from_millis(5),
            },
            timed_out: false,
            reached: self.reaches.get(test).cloned().unwrap_or_default(),
        })
    }

    fn run(&self, request: &RunRequest, _cancel: &CancelToken) -> std::result::Result<RunReport, ExecutorError> {
        self.runs.lock().unwrap().push(request.clone());
        let outcomes = request
            .tests
            .iter()
            .map(|t| {
                let killed = self
                    .killers
                    .get(t)
                    .is_some_and(|k| request.active.ids().iter().any(|id| k.contains(id)));
                TestOutcome {
                    test: t.clone(),
                    verdict: if killed { TestVerdict::Failed } else { TestVerdict::Passed },
                    duration: Duration::from_millis(5),
                }
            })
            .collect();
        Ok(RunReport {
            outcomes,
            timed_out: false,
        })
    }
}

fn test(name: &str) -> TestId {
    TestId::new("lib/demo", name)
}

fn ids(raw: &[u32]) -> BTreeSet<MutantId> {
    raw.iter().copied().map(MutantId).collect()
}

fn sources() -> Vec<SourceFile> {
    vec![SourceFile::new("src/lib.rs", SOURCE)]
}

fn options() -> MutatorOptions {
    MutatorOptions {
        concurrency: 2,
        ..MutatorOptions::default()
    }
}

#[test]
fn every_mutant_gets_a_verdict() {
    let compiler = FakeCompiler::clean();
    let executor = FakeExecutor::new();
    let options = options();
    let mut reporter = CollectingReporter::default();

    let outcome = MutationTestProcess::new(&compiler, &options)
        .run(&sources(), |artifact: String| {
            assert!(artifact.contains("is_active(3)"));
            Ok(executor)
        }, &mut reporter)
        .unwrap();

    assert_eq!(outcome.mutants.status(MutantId(1)), Some(MutantStatus::Survived));
    assert_eq!(outcome.mutants.status(MutantId(2)), Some(MutantStatus::Killed));
    assert_eq!(outcome.mutants.status(MutantId(3)), Some(MutantStatus::NoCoverage));
    assert_eq!(outcome.summary.total, 3);
    assert_eq!(outcome.summary.score, 0.5);
    assert_eq!(outcome.build_attempts, 1);
    assert_eq!(compiler.builds(), 1);

    assert_eq!(reporter.created, 3);
    let mut reported: Vec<MutantId> = reporter.tested.iter().map(|(id, _)| *id).collect();
    reported.sort();
    assert_eq!(reported, vec![MutantId(1), MutantId(2), MutantId(3)]);
    assert_eq!(reporter.summary, Some(outcome.summary.clone()));
}

#[test]
fn uncovered_mutants_are_never_executed() {
    let compiler = FakeCompiler::clean();
    let options = options();
    let mut reporter = CollectingReporter::default();
    let executor = std::sync::Arc::new(FakeExecutor::new());
    let shared = std::sync::Arc::clone(&executor);

    struct Shared(std::sync::Arc<FakeExecutor>);
    impl TestExecutor for Shared {
        fn discover(&self) -> std::result::Result<Vec<TestId>, ExecutorError> {
            self.0.discover()
        }
        fn run_with_coverage(&self, t: &TestId, d: Duration) -> std::result::Result<CoverageRun, ExecutorError> {
            self.0.run_with_coverage(t, d)
        }
        fn run(&self, r: &RunRequest, c: &CancelToken) -> std::result::Result<RunReport, ExecutorError> {
            self.0.run(r, c)
        }
    }

    MutationTestProcess::new(&compiler, &options)
        .run(&sources(), |_| Ok(Shared(shared)), &mut reporter)
        .unwrap();

    let runs = executor.runs();
    assert!(!runs.is_empty());
    assert!(runs.iter().all(|r| !r.active.ids().contains(&MutantId(3))));
    assert!(runs.iter().all(|r| r.tests == vec![test("positive_is_strict")]));
}

#[test]
fn mutant_that_breaks_the_build_is_rolled_back() {
    let compiler = FakeCompiler::new(|text| {
        let arm = "is_active(3) { ";
        match text.find(arm) {
            Some(at) => {
                let start = at + arm.len();
                vec![Diagnostic {
                    code: Some("E0308".into()),
                    file: "src/lib.rs".into(),
                    span: Span::new(start, start + 1),
                    severity: Severity::Error,
                    message: "mismatched types".into(),
                }]
            }
            None => vec![],
        }
    });
    let options = options();
    let mut reporter = CollectingReporter::default();

    let outcome = MutationTestProcess::new(&compiler, &options)
        .run(&sources(), |_| Ok(FakeExecutor::new()), &mut reporter)
        .unwrap();

    assert_eq!(outcome.mutants.status(MutantId(3)), Some(MutantStatus::CompileError));
    assert_eq!(outcome.mutants.status(MutantId(2)), Some(MutantStatus::Killed));
    assert_eq!(outcome.build_attempts, 2);
    assert_eq!(outcome.summary.compile_error, 1);
}

#[test]
fn coverage_off_tests_every_mutant_against_passing_tests() {
    let compiler = FakeCompiler::clean();
    let options = MutatorOptions {
        coverage: CoverageMode::Off,
        ..options()
    };
    let mut reporter = CollectingReporter::default();

    let outcome = MutationTestProcess::new(&compiler, &options)
        .run(&sources(), |_| Ok(FakeExecutor::new()), &mut reporter)
        .unwrap();

    assert_eq!(outcome.mutants.status(MutantId(2)), Some(MutantStatus::Killed));
    assert_eq!(outcome.mutants.status(MutantId(3)), Some(MutantStatus::Survived));
}

#[test]
fn ignored_operators_are_reported_without_running() {
    let compiler = FakeCompiler::clean();
    let options = MutatorOptions {
        ignored_operators: [OperatorKind::Boundary].into_iter().collect(),
        ..options()
    };
    let mut reporter = CollectingReporter::default();

    let outcome = MutationTestProcess::new(&compiler, &options)
        .run(&sources(), |artifact: String| {
            assert!(!artifact.contains("is_active(1)"));
            Ok(FakeExecutor::new())
        }, &mut reporter)
        .unwrap();

    assert_eq!(outcome.mutants.status(MutantId(1)), Some(MutantStatus::Ignored));
    assert_eq!(outcome.summary.ignored, 1);
    assert!(reporter.tested.contains(&(MutantId(1), MutantStatus::Ignored)));
}

#[test]
fn no_mutants_means_no_build() {
    let compiler = FakeCompiler::clean();
    let options = options();
    let mut reporter = CollectingReporter::default();
    let files = vec![SourceFile::new("src/lib.rs", "pub fn nothing() {}\n")];

    let outcome = MutationTestProcess::new(&compiler, &options)
        .run(&files, |_| Ok(FakeExecutor::new()), &mut reporter)
        .unwrap();

    assert_eq!(outcome.summary.total, 0);
    assert_eq!(outcome.summary.score, 1.0);
    assert_eq!(compiler.builds(), 0);
    assert!(reporter.summary.is_some());
}

#[test]
fn failing_baseline_aborts_the_run() {
    let compiler = FakeCompiler::clean();
    let options = options();
    let mut reporter = CollectingReporter::default();

    let result = MutationTestProcess::new(&compiler, &options).run(
        &sources(),
        |_| {
            let mut executor = FakeExecutor::new();
            executor.baseline_failures = executor.tests.iter().cloned().collect();
            Ok(executor)
        },
        &mut reporter,
    );

    assert!(matches!(result, Err(MutatorError::BaselineFailed(_))));
}

#[test]
fn no_tests_aborts_the_run() {
    let compiler = FakeCompiler::clean();
    let options = options();
    let mut reporter = CollectingReporter::default();

    let result = MutationTestProcess::new(&compiler, &options).run(
        &sources(),
        |_| {
            let mut executor = FakeExecutor::new();
            executor.tests.clear();
            Ok(executor)
        },
        &mut reporter,
    );

    assert!(matches!(result, Err(MutatorError::NoTests)));
}

#[test]
fn invalid_options_are_rejected_before_anything_runs() {
    let compiler = FakeCompiler::clean();
    let options = MutatorOptions {
        concurrency: 0,
        ..MutatorOptions::default()
    };
    let mut reporter = CollectingReporter::default();

    let result = MutationTestProcess::new(&compiler, &options).run(
        &sources(),
        |_| Ok(FakeExecutor::new()),
        &mut reporter,
    );

    assert!(matches!(result, Err(MutatorError::InvalidOptions(_))));
    assert_eq!(compiler.builds(), 0);
    assert_eq!(reporter.created, 0);
}
