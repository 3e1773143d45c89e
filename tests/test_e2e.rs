use std::path::Path;
use std::process::Command;

use mutator::state::{self, RunResult, SurvivedMutant};

fn mutator_bin() -> &'static str {
    env!("CARGO_BIN_EXE_mutator")
}

fn create_cargo_project(dir: &Path) {
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(
        dir.join("Cargo.toml"),
        "[package]\nname = \"demo\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[dependencies]\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("src/lib.rs"),
        r#"pub fn add(a: i32, b: i32) -> i32 {
    a + b
}

pub fn is_positive(n: i32) -> bool {
    n > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds() {
        assert_eq!(add(1, 2), 3);
        assert_eq!(add(-1, 1), 0);
    }

    #[test]
    fn positive() {
        assert!(is_positive(1));
        assert!(!is_positive(-1));
    }
}
"#,
    )
    .unwrap();
}

fn saved_run() -> RunResult {
    RunResult {
        score: 0.5,
        total: 2,
        killed: 1,
        survived: 1,
        timeout: 0,
        no_coverage: 0,
        compile_error: 0,
        ignored: 0,
        duration_ms: 100,
        survived_mutants: vec![SurvivedMutant {
            ref_id: "m1".into(),
            file: "src/lib.rs".into(),
            line: 6,
            column: 5,
            operator: "boundary".into(),
            description: "replace > with >=".into(),
            original: "n > 0".into(),
            replacement: "n >= 0".into(),
            diff: "-     n > 0\n+     n >= 0\n".into(),
            context_before: vec![],
            context_after: vec![],
        }],
    }
}

#[test]
fn e2e_missing_project_is_a_usage_error() {
    let dir = tempfile::TempDir::new().unwrap();

    let output = Command::new(mutator_bin())
        .args(["run", "--project", "does-not-exist"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run mutator");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_invalid_function_name() {
    let dir = tempfile::TempDir::new().unwrap();
    create_cargo_project(dir.path());

    let output = Command::new(mutator_bin())
        .args(["run", "--function", "nonexistent_func"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run mutator");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "should report function not found: {stderr}");
    assert!(stderr.contains("is_positive"), "should list available functions: {stderr}");
}

#[test]
fn e2e_file_outside_the_project() {
    let dir = tempfile::TempDir::new().unwrap();
    create_cargo_project(dir.path());

    let output = Command::new(mutator_bin())
        .args(["run", "--file", "src/missing.rs"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run mutator");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_status_without_a_run() {
    let dir = tempfile::TempDir::new().unwrap();

    let output = Command::new(mutator_bin())
        .args(["status"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run mutator status");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_show_and_status_read_the_saved_run() {
    let dir = tempfile::TempDir::new().unwrap();
    state::save_to_path(&saved_run(), &dir.path().join(".mutator-state.json")).unwrap();

    let show = Command::new(mutator_bin())
        .args(["show", "@m1", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run mutator show");
    assert!(show.status.success());
    let mutant: serde_json::Value =
        serde_json::from_str(String::from_utf8_lossy(&show.stdout).trim()).unwrap();
    assert_eq!(mutant["replacement"], "n >= 0");

    let missing = Command::new(mutator_bin())
        .args(["show", "m9"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run mutator show");
    assert_eq!(missing.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&missing.stderr).contains("@m1"));

    let status = Command::new(mutator_bin())
        .args(["status", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run mutator status");
    assert!(status.status.success());
    let result: serde_json::Value =
        serde_json::from_str(String::from_utf8_lossy(&status.stdout).trim()).unwrap();
    assert_eq!(result["total"], 2);
}

#[test]
fn e2e_full_run_json_output() {
    let dir = tempfile::TempDir::new().unwrap();
    create_cargo_project(dir.path());
    let original = std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap();

    let output = Command::new(mutator_bin())
        .args(["run", "--json", "--jobs", "2", "--session", "e2e-full"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run mutator");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let result: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "Invalid JSON: {e}\nstdout: {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    });

    assert!(result["total"].as_u64().unwrap() > 0, "should find mutants");
    assert!(result["killed"].as_u64().unwrap() > 0, "should kill some mutants");
    assert!(result["survived_mutants"].is_array());
    assert!(dir.path().join(".mutator-state.json").exists());

    let after = std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap();
    assert_eq!(original, after, "the project itself is never modified");

    let leftover = std::fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("mutator-e2e-full"))
        .count();
    assert_eq!(leftover, 0, "session directories are removed after the run");
}

#[test]
fn e2e_hanging_mutant_times_out() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("Cargo.toml"),
        "[package]\nname = \"spin\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[dependencies]\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("src/lib.rs"),
        r#"pub fn spin(limit: u32) -> u32 {
    let mut i = 0;
    while i < limit {
        if true {
            i += 1;
        }
    }
    i
}

#[cfg(test)]
mod tests {
    #[test]
    fn spins_up_to_the_limit() {
        assert_eq!(super::spin(3), 3);
    }
}
"#,
    )
    .unwrap();

    let started = std::time::Instant::now();
    let output = Command::new(mutator_bin())
        .args(["run", "--json", "--level", "basic", "--timeout-ms", "2000", "--session", "e2e-spin"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run mutator");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let result: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "Invalid JSON: {e}\nstdout: {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    });

    assert_eq!(result["total"], 1, "only `true` is mutated at the basic level");
    assert_eq!(result["timeout"], 1);
    assert_eq!(result["survived"], 0);
    assert_eq!(output.status.code(), Some(0), "a timeout counts as detected");
    assert!(
        started.elapsed() < std::time::Duration::from_secs(120),
        "the hung test process is killed instead of awaited"
    );
}
