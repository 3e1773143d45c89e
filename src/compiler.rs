use std::process::Command;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::{MutatorError, Result};
use crate::injector::RenderedFile;
use crate::mutants::Span;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    fn from_level(level: &str) -> Severity {
        match level {
            "error" | "error: internal compiler error" => Severity::Error,
            "warning" => Severity::Warning,
            _ => Severity::Note,
        }
    }
}

/// A compiler message located in a rendered file. `file` is relative to
/// the project root and `span` indexes the rendered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: Option<String>,
    pub file: Utf8PathBuf,
    pub span: Span,
    pub severity: Severity,
    pub message: String,
}

pub enum CompileOutput<A> {
    Success(A),
    Failed(Vec<Diagnostic>),
}

/// Builds the unit from its rendered files.
///
/// `Err` is reserved for failures of the build environment itself; a
/// build that runs and rejects the code is `CompileOutput::Failed`.
pub trait Compiler: Send + Sync {
    type Artifact: Send + Sync + 'static;

    fn compile(&self, files: &[RenderedFile]) -> Result<CompileOutput<Self::Artifact>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestBinary {
    /// Cargo target name, e.g. the crate name for unit tests or the file
    /// stem of an integration test.
    pub target: String,
    pub kind: String,
    pub path: Utf8PathBuf,
    /// Directory of the owning package; cargo runs tests from there.
    pub package_dir: Option<Utf8PathBuf>,
}

/// The test executables of a successful build.
#[derive(Debug, Clone, Default)]
pub struct TestBinaries {
    pub binaries: Vec<TestBinary>,
}

/// Compiles the workspace copy with `cargo test --no-run`.
pub struct CargoCompiler {
    workspace: Arc<Workspace>,
    extra_args: Vec<String>,
}

impl CargoCompiler {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        CargoCompiler {
            workspace,
            extra_args: Vec::new(),
        }
    }

    /// Extra arguments for `cargo test`, e.g. `--features`.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

impl Compiler for CargoCompiler {
    type Artifact = TestBinaries;

    fn compile(&self, files: &[RenderedFile]) -> Result<CompileOutput<TestBinaries>> {
        self.workspace.write_files(files)?;
        let root = self.workspace.root();

        let mut rustflags = std::env::var("RUSTFLAGS").unwrap_or_default();
        if !rustflags.is_empty() {
            rustflags.push(' ');
        }
        // Selectors add parentheses and unreachable arms; lints must not
        // turn those into errors.
        rustflags.push_str("--cap-lints=warn");

        let output = Command::new("cargo")
            .args(["test", "--no-run", "--message-format=json"])
            .arg("--manifest-path")
            .arg(root.join("Cargo.toml"))
            .args(&self.extra_args)
            .current_dir(root)
            .env("CARGO_TARGET_DIR", self.workspace.target_dir())
            .env("RUSTFLAGS", rustflags)
            .output()
            .map_err(|e| MutatorError::fatal_build(format!("failed to run cargo: {}", e), vec![]))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let build = parse_cargo_messages(&stdout, root);
        tracing::debug!(
            success = build.success,
            errors = build.diagnostics.iter().filter(|d| d.severity == Severity::Error).count(),
            binaries = build.binaries.len(),
            "cargo build finished"
        );

        if build.success && output.status.success() {
            return Ok(CompileOutput::Success(TestBinaries {
                binaries: build.binaries,
            }));
        }

        let errors: Vec<Diagnostic> = build
            .diagnostics
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .collect();
        if errors.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MutatorError::fatal_build(
                format!("cargo failed without diagnostics:\n{}", stderr.trim()),
                vec![],
            ));
        }
        Ok(CompileOutput::Failed(errors))
    }
}

#[derive(Debug, Default)]
pub struct CargoBuild {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub binaries: Vec<TestBinary>,
}

#[derive(Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
enum CargoMessage {
    CompilerMessage {
        message: RustcMessage,
    },
    CompilerArtifact {
        manifest_path: Option<Utf8PathBuf>,
        target: ArtifactTarget,
        profile: ArtifactProfile,
        executable: Option<Utf8PathBuf>,
    },
    BuildFinished {
        success: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct RustcMessage {
    message: String,
    code: Option<RustcCode>,
    level: String,
    #[serde(default)]
    spans: Vec<RustcSpan>,
}

#[derive(Deserialize)]
struct RustcCode {
    code: String,
}

#[derive(Deserialize)]
struct RustcSpan {
    file_name: String,
    byte_start: usize,
    byte_end: usize,
    is_primary: bool,
}

#[derive(Deserialize)]
struct ArtifactTarget {
    name: String,
    #[serde(default)]
    kind: Vec<String>,
}

#[derive(Deserialize)]
struct ArtifactProfile {
    test: bool,
}

/// Reads the JSON lines cargo prints with `--message-format=json`.
/// Messages without a primary span (summaries such as "aborting due to
/// previous error") are dropped.
pub fn parse_cargo_messages(stdout: &str, root: &Utf8Path) -> CargoBuild {
    let mut build = CargoBuild::default();
    for line in stdout.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let Ok(message) = serde_json::from_str::<CargoMessage>(line) else {
            continue;
        };
        match message {
            CargoMessage::CompilerMessage { message } => {
                let Some(primary) = message.spans.iter().find(|s| s.is_primary) else {
                    continue;
                };
                build.diagnostics.push(Diagnostic {
                    code: message.code.map(|c| c.code),
                    file: relative_to(root, &primary.file_name),
                    span: Span::new(primary.byte_start, primary.byte_end),
                    severity: Severity::from_level(&message.level),
                    message: message.message,
                });
            }
            CargoMessage::CompilerArtifact {
                manifest_path,
                target,
                profile,
                executable,
            } => {
                if let (true, Some(path)) = (profile.test, executable) {
                    build.binaries.push(TestBinary {
                        target: target.name,
                        kind: target.kind.first().cloned().unwrap_or_default(),
                        path,
                        package_dir: manifest_path
                            .as_deref()
                            .and_then(Utf8Path::parent)
                            .map(Utf8Path::to_path_buf),
                    });
                }
            }
            CargoMessage::BuildFinished { success } => build.success = success,
            CargoMessage::Other => {}
        }
    }
    build
}

fn relative_to(root: &Utf8Path, file_name: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(file_name);
    match path.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}
