//! The helper module appended to every mutated file.
//!
//! Selectors call `is_active(id)`, which reads the active mutant set from the
//! environment of the test process, so each worker process carries its own
//! activation. When a coverage file is configured the first hit of every
//! selector is appended to it.

use camino::Utf8Path;

pub const RUNTIME_MODULE: &str = "__mutator_runtime";

/// Comma separated ids of the mutants active in a test process.
pub const ACTIVE_MUTANTS_ENV: &str = "MUTATOR_ACTIVE_MUTANTS";

/// File that receives one reached selector id per line.
pub const COVERAGE_FILE_ENV: &str = "MUTATOR_COVERAGE_FILE";

/// Absolute path of the helper module as seen from inside `file`.
pub fn runtime_path(file: &Utf8Path) -> String {
    format!("{}::{}", module_path_for(file), RUNTIME_MODULE)
}

/// Module path of a source file following the default cargo layout:
/// `src/lib.rs` is `crate`, `src/net/mod.rs` and `src/net.rs` are
/// `crate::net`. Binaries are crate roots of their own: `src/bin/tool.rs`
/// and `src/bin/tool/main.rs` are `crate`, `src/bin/tool/cli.rs` is
/// `crate::cli`.
pub fn module_path_for(file: &Utf8Path) -> String {
    let components: Vec<&str> = file.components().map(|c| c.as_str()).collect();
    let src_pos = components.iter().rposition(|c| *c == "src");
    let mut rel: &[&str] = match src_pos {
        Some(pos) => &components[pos + 1..],
        None => &components[..],
    };

    if rel.first() == Some(&"bin") {
        if rel.len() <= 2 {
            return "crate".to_string();
        }
        rel = &rel[2..];
    }

    let mut segments: Vec<String> = Vec::new();
    for (i, part) in rel.iter().enumerate() {
        let last = i + 1 == rel.len();
        if last {
            let stem = part.strip_suffix(".rs").unwrap_or(part);
            if i == 0 && (stem == "lib" || stem == "main") {
                continue;
            }
            if stem != "mod" {
                segments.push(stem.to_string());
            }
        } else {
            segments.push(part.to_string());
        }
    }

    if segments.is_empty() {
        "crate".to_string()
    } else {
        format!("crate::{}", segments.join("::"))
    }
}

pub fn helper_source() -> String {
    format!(
        r#"

#[doc(hidden)]
#[allow(dead_code, unused_imports, unreachable_pub, clippy::all)]
mod {module} {{
    use std::collections::BTreeSet;
    use std::io::Write;
    use std::sync::{{Mutex, OnceLock}};

    fn active() -> &'static BTreeSet<u32> {{
        static ACTIVE: OnceLock<BTreeSet<u32>> = OnceLock::new();
        ACTIVE.get_or_init(|| {{
            std::env::var("{active_env}")
                .map(|v| {{
                    v.split(',')
                        .filter_map(|s| s.trim().parse::<u32>().ok())
                        .filter(|id| *id != 0)
                        .collect()
                }})
                .unwrap_or_default()
        }})
    }}

    fn record(id: u32) {{
        static SINK: OnceLock<Option<String>> = OnceLock::new();
        static SEEN: Mutex<BTreeSet<u32>> = Mutex::new(BTreeSet::new());
        let Some(path) = SINK.get_or_init(|| std::env::var("{coverage_env}").ok()) else {{
            return;
        }};
        let mut seen = match SEEN.lock() {{
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }};
        if seen.insert(id) {{
            if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(path) {{
                let _ = writeln!(f, "{{}}", id);
            }}
        }}
    }}

    #[inline(never)]
    pub(crate) fn is_active(id: u32) -> bool {{
        record(id);
        active().contains(&id)
    }}
}}
"#,
        module = RUNTIME_MODULE,
        active_env = ACTIVE_MUTANTS_ENV,
        coverage_env = COVERAGE_FILE_ENV,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_roots_map_to_crate() {
        assert_eq!(module_path_for(Utf8Path::new("src/lib.rs")), "crate");
        assert_eq!(module_path_for(Utf8Path::new("src/main.rs")), "crate");
        assert_eq!(module_path_for(Utf8Path::new("src/bin/tool.rs")), "crate");
        assert_eq!(module_path_for(Utf8Path::new("src/bin/tool/main.rs")), "crate");
    }

    #[test]
    fn modules_of_a_multi_file_binary() {
        assert_eq!(module_path_for(Utf8Path::new("src/bin/tool/cli.rs")), "crate::cli");
        assert_eq!(module_path_for(Utf8Path::new("src/bin/tool/net/mod.rs")), "crate::net");
        assert_eq!(
            module_path_for(Utf8Path::new("src/bin/tool/net/tcp.rs")),
            "crate::net::tcp"
        );
    }

    #[test]
    fn nested_modules() {
        assert_eq!(module_path_for(Utf8Path::new("src/net.rs")), "crate::net");
        assert_eq!(module_path_for(Utf8Path::new("src/net/mod.rs")), "crate::net");
        assert_eq!(module_path_for(Utf8Path::new("src/net/tcp.rs")), "crate::net::tcp");
    }

    #[test]
    fn workspace_member_paths_use_the_last_src() {
        assert_eq!(
            module_path_for(Utf8Path::new("crates/core/src/math.rs")),
            "crate::math"
        );
    }

    #[test]
    fn helper_declares_the_module_and_reads_both_variables() {
        let src = helper_source();
        assert!(src.contains(&format!("mod {} {{", RUNTIME_MODULE)));
        assert!(src.contains(ACTIVE_MUTANTS_ENV));
        assert!(src.contains(COVERAGE_FILE_ENV));
        assert!(src.contains("pub(crate) fn is_active(id: u32) -> bool"));
    }
}
