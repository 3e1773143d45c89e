use camino::{Utf8Path, Utf8PathBuf};
use tree_sitter::{Node, Parser, Tree};

use crate::config::MutatorOptions;
use crate::error::{MutatorError, Result};
use crate::mutants::{Location, Mutant, MutantId, MutantStatus, Span};
use crate::operators::{self, NodeSite, OperatorDescriptor};
use crate::runtime::RUNTIME_MODULE;

/// A source file of the compilation unit, path relative to the project root.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: Utf8PathBuf,
    pub text: String,
}

impl SourceFile {
    pub fn new(path: impl Into<Utf8PathBuf>, text: impl Into<String>) -> Self {
        SourceFile {
            path: path.into(),
            text: text.into(),
        }
    }
}

pub fn parse(path: &Utf8Path, source: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    let language = tree_sitter_rust::LANGUAGE;
    parser
        .set_language(&language.into())
        .map_err(|_| MutatorError::Parse { path: path.to_owned() })?;
    parser
        .parse(source, None)
        .ok_or_else(|| MutatorError::Parse { path: path.to_owned() })
}

pub fn list_functions(source: &str) -> Result<Vec<String>> {
    let tree = parse(Utf8Path::new("<input>"), source)?;
    let mut names = Vec::new();
    collect_function_names(tree.root_node(), source, &mut names);
    Ok(names)
}

fn collect_function_names(node: Node, source: &str, names: &mut Vec<String>) {
    if node.kind() == "function_item" && !is_test_code(node, source) {
        if let Some(name_node) = node.child_by_field_name("name") {
            names.push(node_text(name_node, source).to_string());
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_function_names(child, source, names);
    }
}

/// Generates every mutant of the unit. Ids are dense across files, in the
/// order the files are given, so the same input always yields the same ids.
pub fn generate_mutants(files: &[SourceFile], options: &MutatorOptions) -> Result<Vec<Mutant>> {
    let generator = Generator::new(options);
    let mut mutants = Vec::new();
    for file in files {
        generator.discover(file, &mut mutants)?;
    }
    tracing::debug!(files = files.len(), mutants = mutants.len(), "mutants generated");
    Ok(mutants)
}

struct Generator<'o> {
    operators: Vec<&'static OperatorDescriptor>,
    options: &'o MutatorOptions,
}

impl<'o> Generator<'o> {
    fn new(options: &'o MutatorOptions) -> Self {
        Generator {
            operators: operators::enabled_operators(options.level),
            options,
        }
    }

    fn discover(&self, file: &SourceFile, mutants: &mut Vec<Mutant>) -> Result<()> {
        let tree = parse(&file.path, &file.text)?;
        if tree.root_node().has_error() {
            tracing::warn!(file = %file.path, "source has syntax errors; mutating the parseable parts");
        }
        let lines: Vec<&str> = file.text.lines().collect();
        let mut walk = Walk {
            file,
            lines: &lines,
            mutants,
        };

        match self.options.function.as_deref() {
            Some(name) => {
                if let Some(func) = find_function(tree.root_node(), name, &file.text) {
                    self.walk_node(func, NodeSite::default(), &mut walk);
                }
            }
            None => self.collect_all_functions(tree.root_node(), &mut walk),
        }
        Ok(())
    }

    fn collect_all_functions(&self, node: Node, walk: &mut Walk) {
        let file = walk.file;
        if should_skip_node(node, &file.text) {
            return;
        }
        if node.kind() == "function_item" {
            self.walk_node(node, NodeSite::default(), walk);
            return;
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect_all_functions(child, walk);
        }
    }

    fn walk_node(&self, node: Node, site: NodeSite, walk: &mut Walk) {
        let file = walk.file;
        let source = file.text.as_str();
        if should_skip_node(node, source) || site.field == Some("pattern") {
            return;
        }

        for op in &self.operators {
            if !op.node_kinds.contains(&node.kind()) {
                continue;
            }
            for replacement in (op.apply)(node, source, site) {
                walk.push(node, op, replacement, self.options);
            }
        }

        let mut cursor = node.walk();
        if cursor.goto_first_child() {
            loop {
                let child_site = NodeSite {
                    parent_kind: Some(node.kind()),
                    field: cursor.field_name(),
                };
                self.walk_node(cursor.node(), child_site, walk);
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
        }
    }
}

struct Walk<'a> {
    file: &'a SourceFile,
    lines: &'a [&'a str],
    mutants: &'a mut Vec<Mutant>,
}

impl Walk<'_> {
    fn push(
        &mut self,
        node: Node,
        op: &OperatorDescriptor,
        replacement: operators::Replacement,
        options: &MutatorOptions,
    ) {
        let id = MutantId(self.mutants.len() as u32 + 1);
        let row = node.start_position().row;
        let (context_before, context_after) = get_context(self.lines, row, 2);
        let status = if options.ignored_operators.contains(&op.kind) {
            MutantStatus::Ignored
        } else {
            MutantStatus::NotRun
        };
        self.mutants.push(Mutant {
            id,
            operator: op.kind,
            description: replacement.description,
            original: node_text(node, &self.file.text).to_string(),
            replacement: replacement.text,
            context: replacement.context,
            location: Location {
                file: self.file.path.clone(),
                span: Span::new(node.start_byte(), node.end_byte()),
                line: row + 1,
                column: node.start_position().column + 1,
            },
            status,
            context_before,
            context_after,
        });
    }
}

fn find_function<'a>(node: Node<'a>, name: &str, source: &str) -> Option<Node<'a>> {
    if node.kind() == "function_item" {
        if let Some(name_node) = node.child_by_field_name("name") {
            if node_text(name_node, source) == name {
                return Some(node);
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = find_function(child, name, source) {
            return Some(found);
        }
    }
    None
}

/// Nodes whose subtree must never be mutated: metadata, compile-time
/// contexts, patterns, injected helper code and the tests themselves.
fn should_skip_node(node: Node, source: &str) -> bool {
    match node.kind() {
        "attribute_item" | "inner_attribute_item" | "macro_invocation" | "macro_definition"
        | "const_item" | "static_item" | "const_block" | "enum_item" | "array_type"
        | "use_declaration" => return true,
        kind if kind.ends_with("_pattern") || kind == "match_pattern" => return true,
        _ => {}
    }
    if node.kind() == "mod_item" {
        if let Some(name) = node.child_by_field_name("name") {
            if node_text(name, source) == RUNTIME_MODULE {
                return true;
            }
        }
    }
    if node.kind() == "function_item" && is_const_fn(node, source) {
        return true;
    }
    if matches!(node.kind(), "function_item" | "mod_item") && is_test_code(node, source) {
        return true;
    }
    false
}

fn is_const_fn(node: Node, source: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|c| c.kind() == "function_modifiers" && node_text(c, source).contains("const"));
    found
}

/// Looks at the attributes directly above an item for `#[test]`-style or
/// `#[cfg(test)]` markers.
fn is_test_code(node: Node, source: &str) -> bool {
    let mut prev = node.prev_sibling();
    while let Some(sibling) = prev {
        match sibling.kind() {
            "attribute_item" => {
                let text: String = node_text(sibling, source)
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                if text == "#[test]"
                    || text.ends_with("::test]")
                    || text.starts_with("#[cfg(test")
                    || text.starts_with("#[cfg(all(test")
                {
                    return true;
                }
            }
            "line_comment" | "block_comment" => {}
            _ => break,
        }
        prev = sibling.prev_sibling();
    }
    false
}

fn get_context(lines: &[&str], line_idx: usize, range: usize) -> (Vec<String>, Vec<String>) {
    if line_idx >= lines.len() {
        return (vec![], vec![]);
    }
    let start = line_idx.saturating_sub(range);
    let end = (line_idx + range + 1).min(lines.len());
    let before: Vec<String> = lines[start..line_idx].iter().map(|s| s.to_string()).collect();
    let after: Vec<String> = if line_idx + 1 < end {
        lines[line_idx + 1..end].iter().map(|s| s.to_string()).collect()
    } else {
        vec![]
    };
    (before, after)
}

fn node_text<'a>(node: Node<'a>, source: &'a str) -> &'a str {
    &source[node.start_byte()..node.end_byte()]
}
