use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::unbounded;

use crate::config::CoverageMode;
use crate::error::{MutatorError, Result};
use crate::executor::{CoverageRun, ExecutorError, TestExecutor, TestId, TestOutcome, TestVerdict};
use crate::mutants::MutantId;

/// Which tests reached which selector during the baseline. A mutant absent
/// from the map is covered by no test.
#[derive(Debug, Clone, Default)]
pub struct CoverageMap {
    tests: BTreeMap<MutantId, BTreeSet<TestId>>,
}

impl CoverageMap {
    pub fn record(&mut self, test: &TestId, reached: impl IntoIterator<Item = MutantId>) {
        for id in reached {
            self.tests.entry(id).or_default().insert(test.clone());
        }
    }

    /// Every mutant mapped to every test in `tests`.
    pub fn conservative<'a>(
        mutants: impl IntoIterator<Item = MutantId>,
        tests: impl IntoIterator<Item = &'a TestId> + Clone,
    ) -> Self {
        let mut map = CoverageMap::default();
        for id in mutants {
            map.record_all(id, tests.clone());
        }
        map
    }

    fn record_all<'a>(&mut self, id: MutantId, tests: impl IntoIterator<Item = &'a TestId>) {
        let set: BTreeSet<TestId> = tests.into_iter().cloned().collect();
        if !set.is_empty() {
            self.tests.insert(id, set);
        }
    }

    pub fn tests_for(&self, id: MutantId) -> Option<&BTreeSet<TestId>> {
        self.tests.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// Result of the unmutated test run.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    pub outcomes: Vec<TestOutcome>,
    pub coverage: CoverageMap,
    pub slowest: Duration,
}

impl Baseline {
    pub fn passing(&self) -> BTreeSet<TestId> {
        self.outcomes
            .iter()
            .filter(|o| o.verdict == TestVerdict::Passed)
            .map(|o| o.test.clone())
            .collect()
    }
}

pub struct CoverageRecorder<E> {
    executor: Arc<E>,
    concurrency: usize,
    timeout: Duration,
}

impl<E: TestExecutor> CoverageRecorder<E> {
    pub fn new(executor: Arc<E>, concurrency: usize, timeout: Duration) -> Self {
        CoverageRecorder {
            executor,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    /// Runs every test with no mutant active. Tests that fail, hang or
    /// crash contribute no coverage and are left out of the passing set;
    /// only an unavailable executor aborts the run.
    pub fn record(&self, tests: &[TestId], mode: CoverageMode, live: &BTreeSet<MutantId>) -> Result<Baseline> {
        if tests.is_empty() {
            return Err(MutatorError::NoTests);
        }
        let mut baseline = self.run_each(tests, mode)?;
        if mode == CoverageMode::Off {
            baseline.coverage = CoverageMap::conservative(live.iter().copied(), baseline.passing().iter());
        }

        let passing = baseline.passing();
        if passing.is_empty() {
            let failed: Vec<String> = baseline.outcomes.iter().map(|o| o.test.to_string()).collect();
            return Err(MutatorError::BaselineFailed(failed.join("\n")));
        }
        tracing::info!(
            tests = tests.len(),
            passing = passing.len(),
            covered = baseline.coverage.len(),
            slowest_ms = baseline.slowest.as_millis() as u64,
            "baseline recorded"
        );
        Ok(baseline)
    }

    /// Runs each test on its own under the baseline timeout. Reached
    /// mutants are kept only in per-test mode.
    fn run_each(&self, tests: &[TestId], mode: CoverageMode) -> Result<Baseline> {
        let (job_tx, job_rx) = unbounded::<TestId>();
        let (result_tx, result_rx) = unbounded::<(TestId, Result<CoverageRun, ExecutorError>)>();
        for test in tests {
            let _ = job_tx.send(test.clone());
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..self.concurrency.min(tests.len()) {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let executor = Arc::clone(&self.executor);
                let timeout = self.timeout;
                scope.spawn(move || {
                    for test in job_rx.iter() {
                        let run = executor.run_with_coverage(&test, timeout);
                        if result_tx.send((test, run)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut baseline = Baseline::default();
        for (test, run) in result_rx.iter() {
            match run {
                Ok(run) => {
                    let passed = run.outcome.verdict == TestVerdict::Passed && !run.timed_out;
                    if passed {
                        if mode == CoverageMode::PerTest {
                            baseline.coverage.record(&test, run.reached.iter().copied());
                        }
                        baseline.slowest = baseline.slowest.max(run.outcome.duration);
                        baseline.outcomes.push(run.outcome);
                    } else {
                        tracing::warn!(test = %test, timed_out = run.timed_out, "test fails without mutation; excluded");
                        baseline.outcomes.push(TestOutcome {
                            verdict: TestVerdict::Failed,
                            ..run.outcome
                        });
                    }
                }
                Err(ExecutorError::Unavailable(reason)) => {
                    return Err(MutatorError::ExecutorUnavailable(reason));
                }
                Err(ExecutorError::Crashed(reason)) => {
                    tracing::warn!(test = %test, %reason, "baseline run crashed; no coverage recorded");
                    baseline.outcomes.push(TestOutcome {
                        test,
                        verdict: TestVerdict::Error,
                        duration: Duration::ZERO,
                    });
                }
            }
        }
        baseline.outcomes.sort_by(|a, b| a.test.cmp(&b.test));
        Ok(baseline)
    }
}

/// Picks the tests a mutant has to run against.
pub struct TestSelector<'b> {
    coverage: &'b CoverageMap,
    /// Baseline duration of every passing test.
    durations: BTreeMap<TestId, Duration>,
}

impl<'b> TestSelector<'b> {
    pub fn new(baseline: &'b Baseline) -> Self {
        let durations = baseline
            .outcomes
            .iter()
            .filter(|o| o.verdict == TestVerdict::Passed)
            .map(|o| (o.test.clone(), o.duration))
            .collect();
        TestSelector {
            coverage: &baseline.coverage,
            durations,
        }
    }

    /// Covering tests that passed at baseline, fastest first. Empty means
    /// the mutant cannot be detected.
    pub fn candidates(&self, id: MutantId) -> Vec<TestId> {
        let Some(tests) = self.coverage.tests_for(id) else {
            return Vec::new();
        };
        let mut selected: Vec<TestId> = tests
            .iter()
            .filter(|t| self.durations.contains_key(*t))
            .cloned()
            .collect();
        selected.sort_by_key(|t| self.durations.get(t).copied().unwrap_or_default());
        selected
    }

    /// Baseline time of running `tests` one after another.
    pub fn estimated(&self, tests: &[TestId]) -> Duration {
        tests.iter().filter_map(|t| self.durations.get(t)).sum()
    }
}
