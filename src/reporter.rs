use std::io::Write;

use console::Style;

use crate::mutants::{Mutant, MutantId, MutantStatus, RunSummary};

/// Receives mutants as they reach a terminal status. `on_mutant_tested` is
/// called exactly once per mutant.
pub trait Reporter {
    fn on_mutants_created(&mut self, _mutants: &[Mutant]) {}

    fn on_mutant_tested(&mut self, mutant: &Mutant);

    fn on_all_mutants_tested(&mut self, _summary: &RunSummary) {}
}

/// Prints one character per executed mutant: `.` killed, `S` survived,
/// `T` timed out. The line is always terminated once the run ends.
pub struct DotProgressReporter<W> {
    out: W,
}

impl<W: Write> DotProgressReporter<W> {
    pub fn new(out: W) -> Self {
        DotProgressReporter { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for DotProgressReporter<W> {
    fn on_mutant_tested(&mut self, mutant: &Mutant) {
        let mark = match mutant.status {
            MutantStatus::Killed => Style::new().green().apply_to("."),
            MutantStatus::Survived => Style::new().red().bold().apply_to("S"),
            MutantStatus::Timeout => Style::new().yellow().apply_to("T"),
            _ => return,
        };
        let _ = write!(self.out, "{}", mark);
        let _ = self.out.flush();
    }

    fn on_all_mutants_tested(&mut self, _summary: &RunSummary) {
        let _ = writeln!(self.out);
    }
}

/// Keeps every notification; used by `--json` runs and tests.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub created: usize,
    pub tested: Vec<(MutantId, MutantStatus)>,
    pub summary: Option<RunSummary>,
}

impl Reporter for CollectingReporter {
    fn on_mutants_created(&mut self, mutants: &[Mutant]) {
        self.created = mutants.len();
    }

    fn on_mutant_tested(&mut self, mutant: &Mutant) {
        self.tested.push((mutant.id, mutant.status));
    }

    fn on_all_mutants_tested(&mut self, summary: &RunSummary) {
        self.summary = Some(summary.clone());
    }
}
