use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

use crate::error::Result;
use crate::generator::SourceFile;
use crate::mutants::{Mutant, MutantStatus};
use crate::pipeline::PipelineOutcome;

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResult {
    pub score: f64,
    pub total: usize,
    pub killed: usize,
    pub survived: usize,
    pub timeout: usize,
    pub no_coverage: usize,
    pub compile_error: usize,
    pub ignored: usize,
    pub duration_ms: u64,
    pub survived_mutants: Vec<SurvivedMutant>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SurvivedMutant {
    pub ref_id: String,
    pub file: Utf8PathBuf,
    pub line: usize,
    pub column: usize,
    pub operator: String,
    pub description: String,
    pub original: String,
    pub replacement: String,
    pub diff: String,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

impl RunResult {
    /// Summarises a finished run. Survivors get refs `m1`, `m2`, ... in id
    /// order and a diff against the file they live in.
    pub fn from_outcome(outcome: &PipelineOutcome, sources: &[SourceFile]) -> RunResult {
        let survived_mutants = outcome
            .mutants
            .iter()
            .filter(|m| m.status == MutantStatus::Survived)
            .enumerate()
            .map(|(i, m)| {
                let diff = sources
                    .iter()
                    .find(|s| s.path == m.location.file)
                    .map(|s| mutant_diff(&s.text, m))
                    .unwrap_or_default();
                SurvivedMutant {
                    ref_id: format!("m{}", i + 1),
                    file: m.location.file.clone(),
                    line: m.location.line,
                    column: m.location.column,
                    operator: m.operator.name().to_string(),
                    description: m.description.clone(),
                    original: m.original.clone(),
                    replacement: m.replacement.clone(),
                    diff,
                    context_before: m.context_before.clone(),
                    context_after: m.context_after.clone(),
                }
            })
            .collect();

        let summary = &outcome.summary;
        RunResult {
            score: summary.score,
            total: summary.total,
            killed: summary.killed,
            survived: summary.survived,
            timeout: summary.timeout,
            no_coverage: summary.no_coverage,
            compile_error: summary.compile_error,
            ignored: summary.ignored,
            duration_ms: outcome.duration.as_millis() as u64,
            survived_mutants,
        }
    }

    /// Mutants that went through the test suite.
    pub fn testable(&self) -> usize {
        self.killed + self.timeout + self.survived
    }
}

/// Line diff between `source` and `source` with `mutant` applied, showing
/// changed lines only.
pub fn mutant_diff(source: &str, mutant: &Mutant) -> String {
    let span = mutant.location.span;
    let (Some(before), Some(after)) = (source.get(..span.start), source.get(span.end..)) else {
        return String::new();
    };
    let mutated = format!("{}{}{}", before, mutant.replacement, after);
    generate_diff(source, &mutated)
}

pub fn generate_diff(original: &str, mutated: &str) -> String {
    let diff = TextDiff::from_lines(original, mutated);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => output.push_str(&format!("- {}", change)),
            ChangeTag::Insert => output.push_str(&format!("+ {}", change)),
            ChangeTag::Equal => {}
        }
    }
    output
}

fn state_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".mutator-state.json")
}

pub fn save_last_run(result: &RunResult) {
    if let Err(e) = save_to_path(result, &state_path()) {
        tracing::warn!(error = %e, "could not save run state");
    }
}

pub fn load_last_run() -> Option<RunResult> {
    load_from_path(&state_path())
}

pub fn save_to_path(result: &RunResult, path: &Path) -> Result<()> {
    let json = serde_json::to_string(result)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_from_path(path: &Path) -> Option<RunResult> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}
