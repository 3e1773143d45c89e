use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Dense, 1-based mutant identifier. Id 0 means "no mutant active" and is
/// never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MutantId(pub u32);

impl MutantId {
    pub const NONE: MutantId = MutantId(0);

    pub fn index(self) -> usize {
        (self.0 as usize).saturating_sub(1)
    }
}

impl fmt::Display for MutantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    Boundary,
    NegateComparison,
    NegateEquality,
    LogicalFlip,
    Arithmetic,
    NegationRemoval,
    BooleanFlip,
    ReturnValue,
    BlockRemoval,
    StringLiteral,
    NullCoalescing,
    CompoundAssignment,
}

impl OperatorKind {
    pub const ALL: &'static [OperatorKind] = &[
        OperatorKind::Boundary,
        OperatorKind::NegateComparison,
        OperatorKind::NegateEquality,
        OperatorKind::LogicalFlip,
        OperatorKind::Arithmetic,
        OperatorKind::NegationRemoval,
        OperatorKind::BooleanFlip,
        OperatorKind::ReturnValue,
        OperatorKind::BlockRemoval,
        OperatorKind::StringLiteral,
        OperatorKind::NullCoalescing,
        OperatorKind::CompoundAssignment,
    ];

    /// Short name used on the command line and in reports.
    pub fn name(self) -> &'static str {
        match self {
            OperatorKind::Boundary => "boundary",
            OperatorKind::NegateComparison => "negate_cmp",
            OperatorKind::NegateEquality => "negate_eq",
            OperatorKind::LogicalFlip => "logic_flip",
            OperatorKind::Arithmetic => "arith",
            OperatorKind::NegationRemoval => "negate_remove",
            OperatorKind::BooleanFlip => "bool_flip",
            OperatorKind::ReturnValue => "return_val",
            OperatorKind::BlockRemoval => "block_remove",
            OperatorKind::StringLiteral => "string_mut",
            OperatorKind::NullCoalescing => "null_coalescing",
            OperatorKind::CompoundAssignment => "assign_op",
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperatorKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| {
                let names: Vec<_> = OperatorKind::ALL.iter().map(|k| k.name()).collect();
                format!("unknown operator '{}'. Known: {}", s, names.join(", "))
            })
    }
}

/// Whether a fragment is evaluated as an expression or must stay a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentContext {
    Expression,
    Block,
}

/// Half-open byte range into a source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Zero-length spans are treated as covering the byte they point at.
    pub fn overlaps(&self, other: Span) -> bool {
        let self_end = self.end.max(self.start + 1);
        let other_end = other.end.max(other.start + 1);
        self.start < other_end && other.start < self_end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: Utf8PathBuf,
    pub span: Span,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutantStatus {
    NotRun,
    CompileError,
    NoCoverage,
    Killed,
    Survived,
    Timeout,
    Ignored,
}

impl MutantStatus {
    pub fn is_terminal(self) -> bool {
        self != MutantStatus::NotRun
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutant {
    pub id: MutantId,
    pub operator: OperatorKind,
    pub description: String,
    pub original: String,
    pub replacement: String,
    pub context: FragmentContext,
    pub location: Location,
    pub status: MutantStatus,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

/// Arena of every mutant of a run, addressed by dense id. Records are
/// never removed; only their status moves, and only once.
#[derive(Debug, Clone, Default)]
pub struct MutantTable {
    mutants: Vec<Mutant>,
}

impl MutantTable {
    /// Builds the table; ids must be `1..=n` in order.
    pub fn new(mutants: Vec<Mutant>) -> Self {
        debug_assert!(
            mutants.iter().enumerate().all(|(i, m)| m.id.0 as usize == i + 1),
            "mutant ids must be dense and 1-based"
        );
        MutantTable { mutants }
    }

    pub fn len(&self) -> usize {
        self.mutants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutants.is_empty()
    }

    pub fn get(&self, id: MutantId) -> Option<&Mutant> {
        if id == MutantId::NONE {
            return None;
        }
        self.mutants.get(id.index())
    }

    pub fn status(&self, id: MutantId) -> Option<MutantStatus> {
        self.get(id).map(|m| m.status)
    }

    /// Moves a `NotRun` mutant to a terminal status. Returns false when the
    /// id is unknown or the mutant already has a terminal status.
    pub fn set_status(&mut self, id: MutantId, status: MutantStatus) -> bool {
        if id == MutantId::NONE || !status.is_terminal() {
            return false;
        }
        match self.mutants.get_mut(id.index()) {
            Some(m) if m.status == MutantStatus::NotRun => {
                m.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutant> {
        self.mutants.iter()
    }

    pub fn ids_with_status(&self, status: MutantStatus) -> Vec<MutantId> {
        self.mutants
            .iter()
            .filter(|m| m.status == status)
            .map(|m| m.id)
            .collect()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_mutants(&self.mutants)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub killed: usize,
    pub survived: usize,
    pub timeout: usize,
    pub no_coverage: usize,
    pub compile_error: usize,
    pub ignored: usize,
    pub not_run: usize,
    pub score: f64,
}

impl RunSummary {
    pub fn from_mutants(mutants: &[Mutant]) -> Self {
        let mut s = RunSummary {
            total: mutants.len(),
            ..RunSummary::default()
        };
        for m in mutants {
            match m.status {
                MutantStatus::Killed => s.killed += 1,
                MutantStatus::Survived => s.survived += 1,
                MutantStatus::Timeout => s.timeout += 1,
                MutantStatus::NoCoverage => s.no_coverage += 1,
                MutantStatus::CompileError => s.compile_error += 1,
                MutantStatus::Ignored => s.ignored += 1,
                MutantStatus::NotRun => s.not_run += 1,
            }
        }
        let testable = s.killed + s.timeout + s.survived;
        s.score = if testable > 0 {
            (s.killed + s.timeout) as f64 / testable as f64
        } else {
            1.0
        };
        s
    }

    /// Mutants that went through the test suite.
    pub fn testable(&self) -> usize {
        self.killed + self.timeout + self.survived
    }
}
