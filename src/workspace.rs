use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::Result;
use crate::generator::SourceFile;
use crate::injector::RenderedFile;

const SKIP_NAMES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".jj",
    "target",
    ".idea",
    ".vscode",
    ".mutator-state.json",
];

const SKIP_SUFFIXES: &[&str] = &[".mutator.bak", ".orig", ".rej"];

/// Directories whose `.rs` files are never mutation targets.
const NON_TARGET_DIRS: &[&str] = &["tests", "benches", "examples"];

fn should_skip(name: &str) -> bool {
    SKIP_NAMES.iter().any(|s| *s == name) || SKIP_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn copy_dir_filtered(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if should_skip(&name_str) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let ft = entry.file_type()?;
        if ft.is_dir() {
            copy_dir_filtered(&src_path, &dst_path)?;
        } else if ft.is_file() {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Walks up from `start` to the outermost directory holding a `Cargo.toml`
/// with a `[workspace]` table, or the nearest `Cargo.toml` otherwise.
pub fn find_project_root(start: &Utf8Path) -> Utf8PathBuf {
    let mut nearest: Option<&Utf8Path> = None;
    let mut workspace: Option<&Utf8Path> = None;
    let mut dir = if start.is_file() {
        start.parent().unwrap_or(start)
    } else {
        start
    };
    loop {
        let manifest = dir.join("Cargo.toml");
        if manifest.is_file() {
            nearest.get_or_insert(dir);
            if fs::read_to_string(&manifest)
                .map(|m| m.lines().any(|l| l.trim() == "[workspace]"))
                .unwrap_or(false)
            {
                workspace = Some(dir);
            }
        }
        match dir.parent() {
            Some(parent) if parent != dir => dir = parent,
            _ => break,
        }
    }
    workspace.or(nearest).unwrap_or(start).to_path_buf()
}

/// Every library or binary source file below `root`, as paths relative to
/// `root` in a stable order.
pub fn discover_sources(root: &Utf8Path) -> Result<Vec<SourceFile>> {
    let mut paths = Vec::new();
    collect_rs_files(root, root, &mut paths)?;
    paths.sort();
    let mut files = Vec::with_capacity(paths.len());
    for rel in paths {
        let text = fs::read_to_string(root.join(&rel))?;
        files.push(SourceFile::new(rel, text));
    }
    Ok(files)
}

fn collect_rs_files(root: &Utf8Path, dir: &Utf8Path, out: &mut Vec<Utf8PathBuf>) -> Result<()> {
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        let name = entry.file_name();
        if should_skip(name) || name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let ft = entry.file_type()?;
        if ft.is_dir() {
            if NON_TARGET_DIRS.contains(&name) && !is_under_src(root, path) {
                continue;
            }
            collect_rs_files(root, path, out)?;
        } else if ft.is_file() && name.ends_with(".rs") && is_under_src(root, path) {
            if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_path_buf());
            }
        }
    }
    Ok(())
}

fn is_under_src(root: &Utf8Path, path: &Utf8Path) -> bool {
    path.strip_prefix(root)
        .map(|rel| rel.components().any(|c| c.as_str() == "src"))
        .unwrap_or(false)
}

/// An isolated copy of the project. The original tree is never written to;
/// rendered files land in the copy and builds use a target directory owned
/// by the copy.
pub struct Workspace {
    root: Utf8PathBuf,
    target_dir: Utf8PathBuf,
    scratch: Utf8PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl Workspace {
    pub fn prepare(project_root: &Utf8Path, session_id: &str) -> Result<Workspace> {
        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("mutator-{}-", session_id))
            .tempdir()?;
        let base = Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf()).map_err(|p| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("temporary directory {} is not UTF-8", p.display()),
            )
        })?;
        let root = base.join("project");
        copy_dir_filtered(project_root.as_std_path(), root.as_std_path())?;
        let scratch = base.join("scratch");
        fs::create_dir_all(&scratch)?;
        tracing::debug!(from = %project_root, to = %root, "project copied");

        Ok(Workspace {
            root,
            target_dir: base.join("target"),
            scratch,
            _temp_dir: temp_dir,
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn target_dir(&self) -> &Utf8Path {
        &self.target_dir
    }

    /// Directory for coverage files of test runs.
    pub fn scratch_dir(&self) -> &Utf8Path {
        &self.scratch
    }

    /// Overwrites the copies of `files`; paths are relative to the root.
    pub fn write_files(&self, files: &[RenderedFile]) -> Result<()> {
        for file in files {
            fs::write(self.root.join(&file.path), &file.text)?;
        }
        Ok(())
    }
}
