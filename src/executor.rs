use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compiler::TestBinary;
use crate::error::MutatorError;
use crate::mutants::MutantId;
use crate::runtime::{ACTIVE_MUTANTS_ENV, COVERAGE_FILE_ENV};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestId {
    /// The test binary, e.g. `lib/demo` or `test/integration`.
    pub suite: String,
    pub name: String,
}

impl TestId {
    pub fn new(suite: impl Into<String>, name: impl Into<String>) -> Self {
        TestId {
            suite: suite.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.suite, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestVerdict {
    Passed,
    Failed,
    /// The test could not complete, e.g. its process aborted.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub test: TestId,
    pub verdict: TestVerdict,
    pub duration: Duration,
}

/// The mutants a test process runs with. Empty means none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveMutants(Vec<MutantId>);

impl ActiveMutants {
    pub fn none() -> Self {
        ActiveMutants(Vec::new())
    }

    pub fn of(ids: impl IntoIterator<Item = MutantId>) -> Self {
        ActiveMutants(ids.into_iter().filter(|id| *id != MutantId::NONE).collect())
    }

    pub fn ids(&self) -> &[MutantId] {
        &self.0
    }

    /// Value of the activation variable.
    pub fn env_value(&self) -> String {
        if self.0.is_empty() {
            return MutantId::NONE.0.to_string();
        }
        self.0
            .iter()
            .map(|id| id.0.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub active: ActiveMutants,
    pub tests: Vec<TestId>,
    pub timeout: Duration,
    /// Stop at the first failing test.
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<TestOutcome>,
    /// The run was stopped at its deadline or cancelled; outcomes are partial.
    pub timed_out: bool,
}

/// One baseline test run with coverage recording.
#[derive(Debug, Clone)]
pub struct CoverageRun {
    pub outcome: TestOutcome,
    pub timed_out: bool,
    pub reached: BTreeSet<MutantId>,
}

/// Shared flag telling an in-flight run to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor cannot run tests at all. Fatal for the unit.
    #[error("test executor unavailable: {0}")]
    Unavailable(String),
    /// One invocation broke for reasons unrelated to the active mutant.
    #[error("test run crashed: {0}")]
    Crashed(String),
}

impl From<ExecutorError> for MutatorError {
    fn from(err: ExecutorError) -> Self {
        MutatorError::ExecutorUnavailable(err.to_string())
    }
}

/// Runs tests of a built artifact with a given set of active mutants.
///
/// Implementations must honour `cancel` promptly and must never report a
/// test as passed unless it ran to completion.
pub trait TestExecutor: Send + Sync + 'static {
    fn discover(&self) -> Result<Vec<TestId>, ExecutorError>;

    /// Runs one test with no mutant active while recording which selectors
    /// it reaches.
    fn run_with_coverage(&self, test: &TestId, timeout: Duration) -> Result<CoverageRun, ExecutorError>;

    fn run(&self, request: &RunRequest, cancel: &CancelToken) -> Result<RunReport, ExecutorError>;
}

/// Drives libtest binaries produced by `cargo test --no-run`.
pub struct LibtestExecutor {
    suites: BTreeMap<String, TestBinary>,
    default_dir: Utf8PathBuf,
    scratch: Utf8PathBuf,
    counter: AtomicUsize,
}

impl LibtestExecutor {
    /// `default_dir` is the working directory of binaries whose package is
    /// unknown; coverage files are written under `scratch`.
    pub fn new(binaries: Vec<TestBinary>, default_dir: Utf8PathBuf, scratch: Utf8PathBuf) -> Self {
        let suites = binaries
            .into_iter()
            .map(|b| (suite_name(&b), b))
            .collect();
        LibtestExecutor {
            suites,
            default_dir,
            scratch,
            counter: AtomicUsize::new(0),
        }
    }

    fn command(&self, binary: &TestBinary, active: &ActiveMutants) -> Command {
        let dir = binary.package_dir.clone().unwrap_or_else(|| self.default_dir.clone());
        let mut cmd = Command::new(&binary.path);
        cmd.current_dir(&dir)
            .env("CARGO_MANIFEST_DIR", &dir)
            .env(ACTIVE_MUTANTS_ENV, active.env_value())
            .env_remove(COVERAGE_FILE_ENV)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        cmd
    }

    fn binary(&self, suite: &str) -> Result<&TestBinary, ExecutorError> {
        self.suites
            .get(suite)
            .ok_or_else(|| ExecutorError::Crashed(format!("unknown test suite {}", suite)))
    }

    fn list(&self, binary: &TestBinary, ignored: bool) -> Result<Vec<String>, ExecutorError> {
        let mut cmd = self.command(binary, &ActiveMutants::none());
        cmd.args(["--list", "--format", "terse"]);
        if ignored {
            cmd.arg("--ignored");
        }
        let output = cmd
            .output()
            .map_err(|e| ExecutorError::Unavailable(format!("{}: {}", binary.path, e)))?;
        if !output.status.success() {
            return Err(ExecutorError::Unavailable(format!(
                "{} --list exited with {}",
                binary.path, output.status
            )));
        }
        Ok(parse_test_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Runs `names` of one suite in a single process.
    fn run_suite(
        &self,
        suite: &str,
        names: &[&str],
        active: &ActiveMutants,
        deadline: Instant,
        cancel: &CancelToken,
        coverage_file: Option<&Utf8PathBuf>,
    ) -> Result<(Vec<TestOutcome>, bool), ExecutorError> {
        let binary = self.binary(suite)?;
        let mut cmd = self.command(binary, active);
        cmd.arg("--exact")
            .args(names)
            .args(["--test-threads=1", "--color", "never"]);
        if let Some(path) = coverage_file {
            cmd.env(COVERAGE_FILE_ENV, path);
        }

        let start = Instant::now();
        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ExecutorError::Unavailable(format!("{}: {}", binary.path, e))
            }
            _ => ExecutorError::Crashed(format!("{}: {}", binary.path, e)),
        })?;
        let finished = wait_with_deadline(child, deadline, cancel)
            .map_err(|e| ExecutorError::Crashed(e.to_string()))?;
        let elapsed = start.elapsed();

        let results = parse_test_results(&finished.stdout);
        let per_test = if results.is_empty() {
            elapsed
        } else {
            elapsed / results.len() as u32
        };
        let mut outcomes: Vec<TestOutcome> = results
            .into_iter()
            .map(|(name, verdict)| TestOutcome {
                test: TestId::new(suite, name),
                verdict,
                duration: per_test,
            })
            .collect();

        if finished.timed_out {
            return Ok((outcomes, true));
        }

        // An aborted process leaves the running test without a result line.
        let abnormal = finished.status.map(|s| !s.success()).unwrap_or(true);
        if abnormal && !outcomes.iter().any(|o| o.verdict == TestVerdict::Failed) {
            if let Some(name) = started_test(&finished.stdout) {
                outcomes.push(TestOutcome {
                    test: TestId::new(suite, name),
                    verdict: TestVerdict::Error,
                    duration: elapsed,
                });
            } else if names.len() == 1 && outcomes.is_empty() {
                outcomes.push(TestOutcome {
                    test: TestId::new(suite, names[0]),
                    verdict: TestVerdict::Error,
                    duration: elapsed,
                });
            }
        }
        Ok((outcomes, false))
    }
}

fn suite_name(binary: &TestBinary) -> String {
    if binary.kind.is_empty() {
        binary.target.clone()
    } else {
        format!("{}/{}", binary.kind, binary.target)
    }
}

impl TestExecutor for LibtestExecutor {
    fn discover(&self) -> Result<Vec<TestId>, ExecutorError> {
        let mut tests = Vec::new();
        for (suite, binary) in &self.suites {
            let ignored: BTreeSet<String> = self.list(binary, true)?.into_iter().collect();
            for name in self.list(binary, false)? {
                if !ignored.contains(&name) {
                    tests.push(TestId::new(suite.clone(), name));
                }
            }
        }
        tracing::debug!(tests = tests.len(), suites = self.suites.len(), "tests discovered");
        Ok(tests)
    }

    fn run_with_coverage(&self, test: &TestId, timeout: Duration) -> Result<CoverageRun, ExecutorError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.scratch.join(format!("coverage-{}.txt", n));
        let _ = std::fs::remove_file(&path);

        let start = Instant::now();
        let (outcomes, timed_out) = self.run_suite(
            &test.suite,
            &[test.name.as_str()],
            &ActiveMutants::none(),
            start + timeout,
            &CancelToken::new(),
            Some(&path),
        )?;
        let duration = start.elapsed();

        let reached = std::fs::read_to_string(&path)
            .map(|s| parse_reached(&s))
            .unwrap_or_default();
        let _ = std::fs::remove_file(&path);

        let verdict = match outcomes.iter().find(|o| o.test == *test) {
            Some(o) => o.verdict,
            None => TestVerdict::Error,
        };
        Ok(CoverageRun {
            outcome: TestOutcome {
                test: test.clone(),
                verdict,
                duration,
            },
            timed_out,
            reached,
        })
    }

    fn run(&self, request: &RunRequest, cancel: &CancelToken) -> Result<RunReport, ExecutorError> {
        let deadline = Instant::now() + request.timeout;
        let mut report = RunReport::default();

        let mut by_suite: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for test in &request.tests {
            by_suite.entry(test.suite.as_str()).or_default().push(test.name.as_str());
        }

        for (suite, names) in by_suite {
            // One process per test lets a failure stop the run early.
            let chunks: Vec<&[&str]> = if request.fail_fast {
                names.chunks(1).collect()
            } else {
                vec![names.as_slice()]
            };
            for chunk in chunks {
                let (outcomes, timed_out) =
                    self.run_suite(suite, chunk, &request.active, deadline, cancel, None)?;
                let failed = outcomes.iter().any(|o| o.verdict != TestVerdict::Passed);
                report.outcomes.extend(outcomes);
                if timed_out {
                    report.timed_out = true;
                    return Ok(report);
                }
                if failed && request.fail_fast {
                    return Ok(report);
                }
            }
        }
        Ok(report)
    }
}

struct Finished {
    status: Option<ExitStatus>,
    stdout: String,
    timed_out: bool,
}

/// Polls `child` until it exits, the deadline passes or the run is
/// cancelled. Stdout is drained on a separate thread so a chatty test can
/// never block on a full pipe.
fn wait_with_deadline(
    mut child: Child,
    deadline: Instant,
    cancel: &CancelToken,
) -> std::io::Result<Finished> {
    let reader = child.stdout.take().map(|mut out| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = out.read_to_string(&mut buf);
            buf
        })
    });

    let (status, timed_out) = loop {
        match child.try_wait() {
            Ok(Some(exit_status)) => break (Some(exit_status), false),
            Ok(None) => {
                if Instant::now() >= deadline || cancel.is_cancelled() {
                    let _ = child.kill();
                    let _ = child.wait();
                    break (None, true);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                let _ = child.kill();
                return Err(e);
            }
        }
    };

    let stdout = reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    Ok(Finished {
        status,
        stdout,
        timed_out,
    })
}

/// Test names from `--list --format terse` output (`name: test`).
pub fn parse_test_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.strip_suffix(": test"))
        .map(|name| name.to_string())
        .collect()
}

/// Completed tests from libtest's pretty output.
pub fn parse_test_results(stdout: &str) -> Vec<(String, TestVerdict)> {
    let mut results = Vec::new();
    for line in stdout.lines() {
        let Some(rest) = line.strip_prefix("test ") else {
            continue;
        };
        let Some((name, result)) = rest.rsplit_once(" ... ") else {
            continue;
        };
        let name = name.strip_suffix(" - should panic").unwrap_or(name);
        let verdict = match result.trim() {
            "ok" => TestVerdict::Passed,
            "FAILED" => TestVerdict::Failed,
            _ => continue,
        };
        results.push((name.to_string(), verdict));
    }
    results
}

/// The test whose start line was printed without a result, if any.
pub fn started_test(stdout: &str) -> Option<String> {
    let last = stdout.lines().rev().find(|l| l.starts_with("test "))?;
    let rest = last.strip_prefix("test ")?;
    let name = match rest.rsplit_once(" ...") {
        Some((name, result)) if result.trim().is_empty() => name,
        Some(_) => return None,
        None => rest,
    };
    let name = name.strip_suffix(" - should panic").unwrap_or(name);
    Some(name.to_string())
}

/// Mutant ids written by the runtime helper, one per line.
pub fn parse_reached(contents: &str) -> BTreeSet<MutantId> {
    contents
        .lines()
        .filter_map(|l| l.trim().parse::<u32>().ok())
        .filter(|id| *id != 0)
        .map(MutantId)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_output_keeps_tests_only() {
        let out = "tests::adds: test\ntests::slow: test\nbench_sum: benchmark\n\n3 tests, 0 benchmarks\n";
        assert_eq!(parse_test_list(out), vec!["tests::adds", "tests::slow"]);
    }

    #[test]
    fn results_are_parsed_from_pretty_output() {
        let out = "\nrunning 3 tests\ntest tests::a ... ok\ntest tests::b ... FAILED\ntest tests::c - should panic ... ok\ntest tests::d ... ignored\n\nfailures:\n";
        assert_eq!(
            parse_test_results(out),
            vec![
                ("tests::a".to_string(), TestVerdict::Passed),
                ("tests::b".to_string(), TestVerdict::Failed),
                ("tests::c".to_string(), TestVerdict::Passed),
            ]
        );
    }

    #[test]
    fn started_test_is_the_unfinished_one() {
        let out = "running 2 tests\ntest tests::a ... ok\ntest tests::b ... ";
        assert_eq!(started_test(out), Some("tests::b".to_string()));
        assert_eq!(started_test("test tests::a ... ok\n"), None);
    }

    #[test]
    fn active_mutants_env_value() {
        assert_eq!(ActiveMutants::none().env_value(), "0");
        assert_eq!(ActiveMutants::of([MutantId(3), MutantId(7)]).env_value(), "3,7");
        assert_eq!(ActiveMutants::of([MutantId(0)]).env_value(), "0");
    }

    #[test]
    fn reached_ids_ignore_noise() {
        let ids = parse_reached("3\n5\n\n3\nbogus\n0\n");
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![MutantId(3), MutantId(5)]);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn suite_names_include_the_target_kind() {
        let b = TestBinary {
            target: "demo".into(),
            kind: "lib".into(),
            path: "/t/demo".into(),
            package_dir: None,
        };
        assert_eq!(suite_name(&b), "lib/demo");
    }

    #[cfg(unix)]
    #[test]
    fn wait_with_deadline_kills_a_hung_process() {
        let child = Command::new("sleep")
            .arg("5")
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let start = Instant::now();
        let finished =
            wait_with_deadline(child, Instant::now() + Duration::from_millis(200), &CancelToken::new()).unwrap();
        assert!(finished.timed_out);
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn wait_with_deadline_collects_stdout() {
        let child = Command::new("echo")
            .arg("test a ... ok")
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let finished =
            wait_with_deadline(child, Instant::now() + Duration::from_secs(10), &CancelToken::new()).unwrap();
        assert!(!finished.timed_out);
        assert!(finished.status.unwrap().success());
        assert_eq!(parse_test_results(&finished.stdout).len(), 1);
    }
}
