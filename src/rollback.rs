//! Compile, attribute errors to mutants, exclude them, compile again.

use std::collections::BTreeSet;

use crate::compiler::{CompileOutput, Compiler, Diagnostic, Severity};
use crate::error::{MutatorError, Result};
use crate::injector::MutationBatch;
use crate::mutants::MutantId;

pub struct RollbackResult<A> {
    pub artifact: A,
    /// The batch as it was compiled; excluded mutants are `CompileError`.
    pub batch: MutationBatch,
    /// Mutants excluded, in the order they were rolled back.
    pub compile_errors: Vec<MutantId>,
    pub attempts: usize,
}

pub struct CompileRollback<'c, C> {
    compiler: &'c C,
}

impl<'c, C: Compiler> CompileRollback<'c, C> {
    pub fn new(compiler: &'c C) -> Self {
        CompileRollback { compiler }
    }

    /// Compiles `batch` until it builds, excluding the mutants blamed for
    /// each round of errors.
    ///
    /// Every failing round must exclude at least one live mutant and a
    /// mutant is put back at most once, so the loop runs at most
    /// `2 * live + 1` compilations. A round where no error can be blamed
    /// on a selector is fatal for the whole unit.
    pub fn run(&self, mut batch: MutationBatch) -> Result<RollbackResult<C::Artifact>> {
        let bound = 2 * batch.live_mutants().len() + 1;
        let mut compile_errors = Vec::new();

        for attempt in 1..=bound {
            let files = batch.rendered_files();
            let diagnostics = match self.compiler.compile(&files)? {
                CompileOutput::Success(artifact) => {
                    tracing::info!(
                        attempts = attempt,
                        excluded = compile_errors.len(),
                        live = batch.live_mutants().len(),
                        "build succeeded"
                    );
                    return Ok(RollbackResult {
                        artifact,
                        batch,
                        compile_errors,
                        attempts: attempt,
                    });
                }
                CompileOutput::Failed(diagnostics) => diagnostics,
            };

            let errors: Vec<&Diagnostic> = diagnostics
                .iter()
                .filter(|d| d.severity == Severity::Error)
                .collect();
            if errors.is_empty() {
                return Err(MutatorError::fatal_build(
                    "build failed without error diagnostics",
                    diagnostics,
                ));
            }

            let mut implicated = BTreeSet::new();
            let mut certain = BTreeSet::new();
            let mut unattributed = Vec::new();
            for error in &errors {
                let blame = batch.attribute(error);
                if blame.is_empty() {
                    unattributed.push((*error).clone());
                }
                if blame.certain {
                    certain.extend(blame.mutants.iter().copied());
                }
                implicated.extend(blame.mutants);
            }
            if implicated.is_empty() {
                return Err(MutatorError::fatal_build(
                    format!("{} error(s) outside every mutated fragment", unattributed.len()),
                    unattributed,
                ));
            }

            let tentative: BTreeSet<MutantId> = implicated.difference(&certain).copied().collect();
            let round = batch.roll_back(&implicated, &tentative);
            if round.removed.is_empty() {
                return Err(MutatorError::fatal_build(
                    "rollback excluded no mutant",
                    errors.into_iter().cloned().collect(),
                ));
            }
            tracing::debug!(
                attempt,
                errors = errors.len(),
                unattributed = unattributed.len(),
                excluded = ?round.removed,
                restored = ?round.restored,
                "rolled back mutants"
            );
            compile_errors.extend(round.removed);
            compile_errors.retain(|id| !round.restored.contains(id));
        }

        Err(MutatorError::fatal_build(
            format!("build still failing after {} attempts", bound),
            vec![],
        ))
    }
}
