use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MutatorError, Result};
use crate::mutants::OperatorKind;

/// How aggressively to mutate. Each operator declares the lowest level at
/// which it is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationLevel {
    Basic,
    Standard,
    Advanced,
    Complete,
}

impl fmt::Display for MutationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationLevel::Basic => "basic",
            MutationLevel::Standard => "standard",
            MutationLevel::Advanced => "advanced",
            MutationLevel::Complete => "complete",
        };
        f.write_str(name)
    }
}

impl FromStr for MutationLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(MutationLevel::Basic),
            "standard" => Ok(MutationLevel::Standard),
            "advanced" => Ok(MutationLevel::Advanced),
            "complete" => Ok(MutationLevel::Complete),
            other => Err(format!(
                "unknown mutation level '{}'. Expected basic, standard, advanced or complete",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMode {
    /// Record which tests reach which selectors during the baseline run.
    PerTest,
    /// Every mutant is tested against every passing test.
    Off,
}

impl FromStr for CoverageMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "per-test" | "pertest" | "per_test" => Ok(CoverageMode::PerTest),
            "off" => Ok(CoverageMode::Off),
            other => Err(format!("unknown coverage mode '{}'. Expected per-test or off", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MutatorOptions {
    pub level: MutationLevel,
    pub coverage: CoverageMode,
    /// Worker threads for baseline and mutant runs.
    pub concurrency: usize,
    /// Fixed per-mutant timeout. When unset each run gets the summed
    /// baseline duration of its tests times `timeout_multiplier`, plus
    /// `timeout_extra`.
    pub timeout: Option<Duration>,
    pub timeout_multiplier: f64,
    pub timeout_extra: Duration,
    /// Timeout of each baseline (coverage) test.
    pub baseline_timeout: Duration,
    pub fail_fast: bool,
    pub batch_mutants: bool,
    pub ignored_operators: BTreeSet<OperatorKind>,
    /// Restrict mutation to a single function by name.
    pub function: Option<String>,
}

impl Default for MutatorOptions {
    fn default() -> Self {
        MutatorOptions {
            level: MutationLevel::Standard,
            coverage: CoverageMode::PerTest,
            concurrency: default_concurrency(),
            timeout: None,
            timeout_multiplier: 3.0,
            timeout_extra: Duration::from_millis(2000),
            baseline_timeout: Duration::from_secs(60),
            fail_fast: true,
            batch_mutants: false,
            ignored_operators: BTreeSet::new(),
            function: None,
        }
    }
}

impl MutatorOptions {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(MutatorError::InvalidOptions("concurrency must be at least 1".into()));
        }
        if !(self.timeout_multiplier.is_finite() && self.timeout_multiplier > 0.0) {
            return Err(MutatorError::InvalidOptions(format!(
                "timeout multiplier must be positive, got {}",
                self.timeout_multiplier
            )));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(MutatorError::InvalidOptions("timeout must be non-zero".into()));
        }
        Ok(())
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}
