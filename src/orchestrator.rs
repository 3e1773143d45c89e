//! Turns test runs into mutant verdicts.
//!
//! The coordinator (the caller's thread) owns the mutant table and is its
//! only writer. Workers pull activations from a channel, run them against
//! the executor on a watched thread and send back what happened. A hung
//! execution is cancelled and abandoned at its deadline so it can never
//! stall the run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded, unbounded};

use crate::config::MutatorOptions;
use crate::coverage::TestSelector;
use crate::error::{MutatorError, Result};
use crate::executor::{
    ActiveMutants, CancelToken, ExecutorError, RunReport, RunRequest, TestExecutor, TestId,
    TestVerdict,
};
use crate::mutants::{MutantId, MutantStatus, MutantTable, RunSummary};
use crate::reporter::Reporter;

/// Upper bound on mutants sharing one activation.
const MAX_BATCH: usize = 16;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub concurrency: usize,
    pub fail_fast: bool,
    pub batch: bool,
    /// Fixed run timeout; derived from baseline durations when unset.
    pub timeout: Option<Duration>,
    pub timeout_multiplier: f64,
    pub timeout_extra: Duration,
    /// How long past its timeout a run may take before it is abandoned.
    pub grace: Duration,
}

impl OrchestratorConfig {
    pub fn from_options(options: &MutatorOptions) -> Self {
        OrchestratorConfig {
            concurrency: options.concurrency.max(1),
            fail_fast: options.fail_fast,
            batch: options.batch_mutants,
            timeout: options.timeout,
            timeout_multiplier: options.timeout_multiplier,
            timeout_extra: options.timeout_extra,
            grace: Duration::from_millis(500),
        }
    }

    fn timeout_for(&self, estimated: Duration) -> Duration {
        match self.timeout {
            Some(t) => t,
            None => estimated.mul_f64(self.timeout_multiplier) + self.timeout_extra,
        }
    }
}

#[derive(Debug, Clone)]
struct Job {
    mutants: Vec<MutantId>,
    tests: Vec<TestId>,
    timeout: Duration,
    /// Retries already spent on this activation.
    retries: u32,
}

enum JobOutcome {
    Finished(RunReport),
    /// The executor did not come back within timeout plus grace.
    Abandoned,
    Failed(ExecutorError),
}

enum Verdict {
    Decided(MutantStatus),
    Inconclusive,
}

pub struct VerdictOrchestrator<E> {
    executor: Arc<E>,
    config: OrchestratorConfig,
}

impl<E: TestExecutor> VerdictOrchestrator<E> {
    pub fn new(executor: Arc<E>, config: OrchestratorConfig) -> Self {
        VerdictOrchestrator { executor, config }
    }

    /// Gives every mutant a terminal status and reports each exactly once.
    /// Mutants that were terminal on entry are reported as they are.
    pub fn run(
        &self,
        table: &mut MutantTable,
        selector: &TestSelector<'_>,
        reporter: &mut dyn Reporter,
    ) -> Result<RunSummary> {
        for mutant in table.iter().filter(|m| m.status.is_terminal()) {
            reporter.on_mutant_tested(mutant);
        }

        let mut candidates: BTreeMap<MutantId, Vec<TestId>> = BTreeMap::new();
        for id in table.ids_with_status(MutantStatus::NotRun) {
            let tests = selector.candidates(id);
            if tests.is_empty() {
                finish(table, reporter, id, MutantStatus::NoCoverage);
            } else {
                candidates.insert(id, tests);
            }
        }

        if !candidates.is_empty() {
            let jobs = self.plan(&candidates, selector);
            tracing::info!(
                mutants = candidates.len(),
                activations = jobs.len(),
                workers = self.config.concurrency,
                "testing mutants"
            );
            self.execute(table, reporter, &candidates, selector, jobs)?;
        }

        let summary = table.summary();
        reporter.on_all_mutants_tested(&summary);
        Ok(summary)
    }

    fn single(&self, id: MutantId, tests: &[TestId], selector: &TestSelector<'_>, retries: u32) -> Job {
        Job {
            mutants: vec![id],
            tests: tests.to_vec(),
            timeout: self.config.timeout_for(selector.estimated(tests)),
            retries,
        }
    }

    /// One activation per mutant, or greedy batches of mutants whose
    /// candidate sets are pairwise disjoint.
    fn plan(&self, candidates: &BTreeMap<MutantId, Vec<TestId>>, selector: &TestSelector<'_>) -> Vec<Job> {
        if !self.config.batch {
            return candidates
                .iter()
                .map(|(id, tests)| self.single(*id, tests, selector, 0))
                .collect();
        }

        let mut groups: Vec<(Vec<MutantId>, BTreeSet<&TestId>)> = Vec::new();
        for (id, tests) in candidates {
            let slot = groups.iter_mut().find(|(members, used)| {
                members.len() < MAX_BATCH && tests.iter().all(|t| !used.contains(t))
            });
            match slot {
                Some((members, used)) => {
                    members.push(*id);
                    used.extend(tests.iter());
                }
                None => groups.push((vec![*id], tests.iter().collect())),
            }
        }

        groups
            .into_iter()
            .map(|(members, used)| {
                let tests: Vec<TestId> = used.into_iter().cloned().collect();
                Job {
                    mutants: members,
                    timeout: self.config.timeout_for(selector.estimated(&tests)),
                    tests,
                    retries: 0,
                }
            })
            .collect()
    }

    fn execute(
        &self,
        table: &mut MutantTable,
        reporter: &mut dyn Reporter,
        candidates: &BTreeMap<MutantId, Vec<TestId>>,
        selector: &TestSelector<'_>,
        jobs: Vec<Job>,
    ) -> Result<()> {
        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<(Job, JobOutcome)>();

        let workers: Vec<JoinHandle<()>> = (0..self.config.concurrency.min(jobs.len()).max(1))
            .map(|_| {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let executor = Arc::clone(&self.executor);
                let config = self.config.clone();
                thread::spawn(move || {
                    for job in job_rx.iter() {
                        let outcome = run_watched(&executor, &job, &config);
                        if result_tx.send((job, outcome)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(result_tx);

        let mut outstanding = 0usize;
        for job in jobs {
            submit(&job_tx, job, &mut outstanding);
        }

        let mut fatal: Option<MutatorError> = None;
        while outstanding > 0 {
            let Ok((job, outcome)) = result_rx.recv() else {
                break;
            };
            outstanding -= 1;
            let retries = self.settle(table, reporter, candidates, selector, job, outcome, &mut fatal);
            if fatal.is_none() {
                for job in retries {
                    submit(&job_tx, job, &mut outstanding);
                }
            }
        }

        drop(job_tx);
        for worker in workers {
            let _ = worker.join();
        }
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Applies the outcome of one activation. Returns the activations that
    /// have to run again.
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        table: &mut MutantTable,
        reporter: &mut dyn Reporter,
        candidates: &BTreeMap<MutantId, Vec<TestId>>,
        selector: &TestSelector<'_>,
        job: Job,
        outcome: JobOutcome,
        fatal: &mut Option<MutatorError>,
    ) -> Vec<Job> {
        let batched = job.mutants.len() > 1;
        let split = |retries: u32| -> Vec<Job> {
            job.mutants
                .iter()
                .map(|id| self.single(*id, &candidates[id], selector, retries))
                .collect()
        };

        match outcome {
            JobOutcome::Failed(ExecutorError::Unavailable(reason)) => {
                fatal.get_or_insert(MutatorError::ExecutorUnavailable(reason));
                Vec::new()
            }
            JobOutcome::Failed(ExecutorError::Crashed(reason)) => {
                if batched {
                    tracing::debug!(mutants = ?job.mutants, %reason, "batch crashed; splitting");
                    return split(job.retries);
                }
                if job.retries == 0 {
                    tracing::debug!(mutant = %job.mutants[0], %reason, "test run crashed; retrying");
                    return split(1);
                }
                tracing::warn!(mutant = %job.mutants[0], %reason, "test run crashed twice; marking survived");
                finish(table, reporter, job.mutants[0], MutantStatus::Survived);
                Vec::new()
            }
            JobOutcome::Abandoned => {
                if batched {
                    return split(job.retries);
                }
                finish(table, reporter, job.mutants[0], MutantStatus::Timeout);
                Vec::new()
            }
            JobOutcome::Finished(report) if report.timed_out => {
                if batched {
                    return split(job.retries);
                }
                finish(table, reporter, job.mutants[0], MutantStatus::Timeout);
                Vec::new()
            }
            JobOutcome::Finished(report) => {
                let mut again = Vec::new();
                for id in &job.mutants {
                    match classify(&candidates[id], &report) {
                        Verdict::Decided(status) => finish(table, reporter, *id, status),
                        Verdict::Inconclusive if batched || job.retries == 0 => {
                            tracing::debug!(mutant = %id, "inconclusive run; retrying alone");
                            again.push(self.single(*id, &candidates[id], selector, job.retries + 1));
                        }
                        Verdict::Inconclusive => {
                            tracing::warn!(mutant = %id, "no verdict after retry; marking survived");
                            finish(table, reporter, *id, MutantStatus::Survived);
                        }
                    }
                }
                again
            }
        }
    }
}

fn submit(tx: &Sender<Job>, job: Job, outstanding: &mut usize) {
    if tx.send(job).is_ok() {
        *outstanding += 1;
    }
}

fn finish(table: &mut MutantTable, reporter: &mut dyn Reporter, id: MutantId, status: MutantStatus) {
    if table.set_status(id, status) {
        if let Some(mutant) = table.get(id) {
            reporter.on_mutant_tested(mutant);
        }
    }
}

/// Verdict for one mutant from the outcomes of its own candidate tests.
fn classify(tests: &[TestId], report: &RunReport) -> Verdict {
    let own: BTreeSet<&TestId> = tests.iter().collect();
    let mut passed = BTreeSet::new();
    for outcome in report.outcomes.iter().filter(|o| own.contains(&o.test)) {
        match outcome.verdict {
            TestVerdict::Failed | TestVerdict::Error => return Verdict::Decided(MutantStatus::Killed),
            TestVerdict::Passed => {
                passed.insert(&outcome.test);
            }
        }
    }
    if passed.len() == own.len() {
        Verdict::Decided(MutantStatus::Survived)
    } else {
        Verdict::Inconclusive
    }
}

/// Runs one activation on its own thread and waits at most timeout plus
/// grace for it.
fn run_watched<E: TestExecutor>(executor: &Arc<E>, job: &Job, config: &OrchestratorConfig) -> JobOutcome {
    let request = RunRequest {
        active: ActiveMutants::of(job.mutants.iter().copied()),
        tests: job.tests.clone(),
        timeout: job.timeout,
        // A failure in a batch only decides the member it belongs to.
        fail_fast: config.fail_fast && job.mutants.len() == 1,
    };
    let cancel = CancelToken::new();
    let (tx, rx) = bounded(1);
    let handle = {
        let executor = Arc::clone(executor);
        let cancel = cancel.clone();
        thread::spawn(move || {
            let _ = tx.send(executor.run(&request, &cancel));
        })
    };

    match rx.recv_timeout(job.timeout + config.grace) {
        Ok(result) => {
            let _ = handle.join();
            match result {
                Ok(report) => JobOutcome::Finished(report),
                Err(err) => JobOutcome::Failed(err),
            }
        }
        Err(RecvTimeoutError::Timeout) => {
            cancel.cancel();
            tracing::debug!(mutants = ?job.mutants, timeout_ms = job.timeout.as_millis() as u64, "run abandoned");
            JobOutcome::Abandoned
        }
        Err(RecvTimeoutError::Disconnected) => {
            let _ = handle.join();
            JobOutcome::Failed(ExecutorError::Crashed("executor thread panicked".into()))
        }
    }
}
