//! Mutant schemata.
//!
//! Every mutated fragment of a file is replaced by a selector that picks
//! one of the fragment's replacements when its mutant is active and the
//! original fragment otherwise. Selectors nest by span containment; a
//! nested selector is rendered inside the original branch of its parent
//! while replacements are always rendered from unmutated text. The
//! selectors form a tree whose nodes only reference mutant ids, so
//! excluding a mutant is a local edit followed by a re-render.

use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8PathBuf;

use crate::compiler::Diagnostic;
use crate::generator::SourceFile;
use crate::mutants::{FragmentContext, Mutant, MutantId, MutantStatus, MutantTable, Span};
use crate::runtime;

/// Source text handed to the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub path: Utf8PathBuf,
    pub text: String,
}

#[derive(Debug, Clone)]
struct Arm {
    mutant: MutantId,
    replacement: String,
}

#[derive(Debug, Clone)]
struct SelectorNode {
    span: Span,
    context: FragmentContext,
    arms: Vec<Arm>,
    children: Vec<usize>,
}

/// Where a live selector landed in the rendered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorRegion {
    pub whole: Span,
    pub arms: Vec<(MutantId, Span)>,
    pub original: Span,
    pub depth: usize,
}

impl SelectorRegion {
    pub fn mutants(&self) -> impl Iterator<Item = MutantId> + '_ {
        self.arms.iter().map(|(id, _)| *id)
    }
}

/// Mutants blamed for one error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blame {
    pub mutants: Vec<MutantId>,
    /// The error lies inside the blamed replacement itself. Otherwise the
    /// blame is a tie-break and may be lifted once an enclosing selector
    /// is collapsed.
    pub certain: bool,
}

impl Blame {
    fn certain(id: MutantId) -> Self {
        Blame {
            mutants: vec![id],
            certain: true,
        }
    }

    fn tentative(mutants: Vec<MutantId>) -> Self {
        Blame {
            mutants,
            certain: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mutants.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct InjectedFile {
    path: Utf8PathBuf,
    original: String,
    runtime_path: String,
    nodes: Vec<SelectorNode>,
    parents: Vec<Option<usize>>,
    roots: Vec<usize>,
    owner: BTreeMap<MutantId, usize>,
    collapsed: BTreeMap<MutantId, Arm>,
    rendered: String,
    regions: Vec<SelectorRegion>,
}

impl InjectedFile {
    /// Builds the selector tree for `mutants`, which must all belong to
    /// `source`. Returns the file and the ids that could not be placed
    /// because their fragment partially overlaps another one.
    pub fn build(source: &SourceFile, mutants: &[&Mutant]) -> (InjectedFile, Vec<MutantId>) {
        let mut ordered: Vec<&Mutant> = mutants.to_vec();
        ordered.sort_by(|a, b| {
            let (sa, sb) = (a.location.span, b.location.span);
            sa.start
                .cmp(&sb.start)
                .then(sb.end.cmp(&sa.end))
                .then(a.id.cmp(&b.id))
        });

        let mut nodes: Vec<SelectorNode> = Vec::new();
        let mut parents = Vec::new();
        let mut roots = Vec::new();
        let mut owner = BTreeMap::new();
        let mut rejected = Vec::new();
        let mut stack: Vec<usize> = Vec::new();

        for mutant in ordered {
            let span = mutant.location.span;
            if span.end > source.text.len() || span.is_empty() {
                rejected.push(mutant.id);
                continue;
            }

            // Same fragment as the innermost open selector: another arm.
            if let Some(&top) = stack.last() {
                if nodes[top].span == span {
                    nodes[top].arms.push(Arm {
                        mutant: mutant.id,
                        replacement: mutant.replacement.clone(),
                    });
                    owner.insert(mutant.id, top);
                    continue;
                }
            }

            let mut partial = false;
            while let Some(&top) = stack.last() {
                let top_span = nodes[top].span;
                if top_span.contains(span) {
                    break;
                }
                if top_span.end > span.start {
                    partial = true;
                    break;
                }
                stack.pop();
            }
            if partial {
                rejected.push(mutant.id);
                continue;
            }

            let idx = nodes.len();
            nodes.push(SelectorNode {
                span,
                context: mutant.context,
                arms: vec![Arm {
                    mutant: mutant.id,
                    replacement: mutant.replacement.clone(),
                }],
                children: Vec::new(),
            });
            match stack.last() {
                Some(&parent) => nodes[parent].children.push(idx),
                None => roots.push(idx),
            }
            parents.push(stack.last().copied());
            owner.insert(mutant.id, idx);
            stack.push(idx);
        }

        let mut file = InjectedFile {
            path: source.path.clone(),
            original: source.text.clone(),
            runtime_path: runtime::runtime_path(&source.path),
            nodes,
            parents,
            roots,
            owner,
            collapsed: BTreeMap::new(),
            rendered: String::new(),
            regions: Vec::new(),
        };
        file.render();
        (file, rejected)
    }

    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    pub fn regions(&self) -> &[SelectorRegion] {
        &self.regions
    }

    pub fn live_mutants(&self) -> BTreeSet<MutantId> {
        self.nodes
            .iter()
            .flat_map(|n| n.arms.iter().map(|a| a.mutant))
            .collect()
    }

    /// Removes the arms of `ids`, restoring their fragments to the
    /// unconditional original. Returns the ids that were actually live.
    pub fn collapse(&mut self, ids: &BTreeSet<MutantId>) -> Vec<MutantId> {
        let mut removed = Vec::new();
        for id in ids {
            let Some(&idx) = self.owner.get(id) else {
                continue;
            };
            let arms = &mut self.nodes[idx].arms;
            if let Some(pos) = arms.iter().position(|a| a.mutant == *id) {
                self.collapsed.insert(*id, arms.remove(pos));
                removed.push(*id);
            }
        }
        if !removed.is_empty() {
            self.render();
        }
        removed
    }

    /// Puts back the arms of `candidates` whose selector lies inside the
    /// selector of any mutant in `outer`. Returns the ids restored.
    pub fn restore_enclosed(
        &mut self,
        outer: &[MutantId],
        candidates: &BTreeSet<MutantId>,
    ) -> Vec<MutantId> {
        let outer_nodes: BTreeSet<usize> = outer
            .iter()
            .filter_map(|id| self.owner.get(id).copied())
            .collect();
        let mut restored = Vec::new();
        for id in candidates {
            let Some(&idx) = self.owner.get(id) else {
                continue;
            };
            if !self.ancestors(idx).any(|a| outer_nodes.contains(&a)) {
                continue;
            }
            if let Some(arm) = self.collapsed.remove(id) {
                let arms = &mut self.nodes[idx].arms;
                arms.push(arm);
                arms.sort_by_key(|a| a.mutant);
                restored.push(*id);
            }
        }
        if !restored.is_empty() {
            self.render();
        }
        restored
    }

    fn ancestors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.parents[idx], move |&p| self.parents[p])
    }

    /// Mutants implicated by an error at `span` of the rendered text.
    ///
    /// The innermost selector enclosing the span is blamed. A span inside
    /// one replacement arm blames that arm's mutant. Otherwise the error
    /// sits between chained arms, where rustc reports the `if`/`else`
    /// mismatch on the branch following the offending arm, so the last arm
    /// ending before the span is blamed (the first arm when none does).
    /// A span that no selector encloses but that overlaps some selectors
    /// blames every innermost overlapped selector. Empty when nothing
    /// matches.
    pub fn attribute(&self, span: Span) -> Blame {
        let enclosing = self
            .regions
            .iter()
            .filter(|r| r.whole.contains(span) || (span.is_empty() && r.whole.overlaps(span)))
            .max_by_key(|r| r.depth);

        if let Some(region) = enclosing {
            if let Some((id, _)) = region.arms.iter().find(|(_, arm)| arm.contains(span)) {
                return Blame::certain(*id);
            }
            let preceding = region
                .arms
                .iter()
                .rev()
                .find(|(_, arm)| arm.end <= span.start)
                .or(region.arms.first());
            return Blame::tentative(preceding.map(|(id, _)| *id).into_iter().collect());
        }

        let overlapping: Vec<&SelectorRegion> = self
            .regions
            .iter()
            .filter(|r| r.whole.overlaps(span))
            .collect();
        let innermost = overlapping.iter().filter(|r| {
            !overlapping
                .iter()
                .any(|other| other.whole != r.whole && r.whole.contains(other.whole))
        });
        let mut ids: Vec<MutantId> = innermost.flat_map(|r| r.mutants()).collect();
        ids.sort();
        ids.dedup();
        Blame::tentative(ids)
    }

    fn render(&mut self) {
        let mut out = String::with_capacity(self.original.len() * 2);
        let mut regions = Vec::new();
        let roots = self.roots.clone();
        self.render_range(&mut out, &mut regions, 0, self.original.len(), &roots, 0);
        if self.nodes.iter().any(|n| !n.arms.is_empty()) {
            out.push_str(&runtime::helper_source());
        }
        self.rendered = out;
        self.regions = regions;
    }

    fn render_range(
        &self,
        out: &mut String,
        regions: &mut Vec<SelectorRegion>,
        start: usize,
        end: usize,
        children: &[usize],
        depth: usize,
    ) {
        let mut cursor = start;
        for &child in children {
            let span = self.nodes[child].span;
            out.push_str(&self.original[cursor..span.start]);
            self.render_node(out, regions, child, depth);
            cursor = span.end;
        }
        out.push_str(&self.original[cursor..end]);
    }

    fn render_node(
        &self,
        out: &mut String,
        regions: &mut Vec<SelectorRegion>,
        idx: usize,
        depth: usize,
    ) {
        let node = &self.nodes[idx];
        if node.arms.is_empty() {
            self.render_range(out, regions, node.span.start, node.span.end, &node.children, depth);
            return;
        }

        let whole_start = out.len();
        let mut arms = Vec::with_capacity(node.arms.len());
        match node.context {
            FragmentContext::Expression => out.push('('),
            FragmentContext::Block => out.push_str("{ "),
        }
        for (i, arm) in node.arms.iter().enumerate() {
            if i > 0 {
                out.push_str(" else ");
            }
            out.push_str(&format!("if {}::is_active({}) ", self.runtime_path, arm.mutant.0));
            let arm_start = out.len();
            match node.context {
                FragmentContext::Expression => {
                    out.push_str("{ ");
                    out.push_str(&arm.replacement);
                    out.push_str(" }");
                }
                FragmentContext::Block => out.push_str(&arm.replacement),
            }
            arms.push((arm.mutant, Span::new(arm_start, out.len())));
        }
        out.push_str(" else ");
        let original_start = out.len();
        match node.context {
            FragmentContext::Expression => {
                out.push_str("{ ");
                self.render_range(out, regions, node.span.start, node.span.end, &node.children, depth + 1);
                out.push_str(" }");
            }
            FragmentContext::Block => {
                self.render_range(out, regions, node.span.start, node.span.end, &node.children, depth + 1);
            }
        }
        let original_end = out.len();
        match node.context {
            FragmentContext::Expression => out.push(')'),
            FragmentContext::Block => out.push_str(" }"),
        }
        regions.push(SelectorRegion {
            whole: Span::new(whole_start, out.len()),
            arms,
            original: Span::new(original_start, original_end),
            depth,
        });
    }
}

/// All mutants of one compilation unit together with the injected files.
pub struct MutationBatch {
    pub mutants: MutantTable,
    files: Vec<InjectedFile>,
    /// Excluded on a tie-break; put back once an enclosing selector goes.
    tentative: BTreeSet<MutantId>,
    restored: BTreeSet<MutantId>,
}

/// What one rollback round changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rollback {
    pub removed: Vec<MutantId>,
    pub restored: Vec<MutantId>,
}

impl MutationBatch {
    /// Injects every `NotRun` mutant. Fragments that cannot be placed are
    /// marked `CompileError` straight away.
    pub fn inject(sources: &[SourceFile], mutants: Vec<Mutant>) -> MutationBatch {
        let mut table = MutantTable::new(mutants);
        let mut files = Vec::new();
        let mut rejected = Vec::new();

        for source in sources {
            let candidates: Vec<&Mutant> = table
                .iter()
                .filter(|m| m.status == MutantStatus::NotRun && m.location.file == source.path)
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let (file, bad) = InjectedFile::build(source, &candidates);
            rejected.extend(bad);
            files.push(file);
        }

        for id in rejected {
            tracing::debug!(mutant = %id, "fragment overlaps another selector; excluded");
            table.set_status(id, MutantStatus::CompileError);
        }

        MutationBatch {
            mutants: table,
            files,
            tentative: BTreeSet::new(),
            restored: BTreeSet::new(),
        }
    }

    pub fn files(&self) -> &[InjectedFile] {
        &self.files
    }

    pub fn rendered_files(&self) -> Vec<RenderedFile> {
        self.files
            .iter()
            .map(|f| RenderedFile {
                path: f.path.clone(),
                text: f.rendered.clone(),
            })
            .collect()
    }

    pub fn live_mutants(&self) -> BTreeSet<MutantId> {
        self.files.iter().flat_map(|f| f.live_mutants()).collect()
    }

    /// Mutants blamed for `diagnostic`; empty when it is outside every
    /// injected file or selector.
    pub fn attribute(&self, diagnostic: &Diagnostic) -> Blame {
        self.files
            .iter()
            .find(|f| f.path == diagnostic.file)
            .map(|f| f.attribute(diagnostic.span))
            .unwrap_or_default()
    }

    /// Collapses `ids` in every file and marks them `CompileError`.
    ///
    /// Mutants in `tentative` were blamed only because their selector was
    /// the innermost one around an error. When a later round collapses a
    /// selector enclosing them they are put back once, so an error that
    /// really belonged to the outer mutant does not exclude them too.
    pub fn roll_back(&mut self, ids: &BTreeSet<MutantId>, tentative: &BTreeSet<MutantId>) -> Rollback {
        let mut removed = Vec::new();
        for file in &mut self.files {
            removed.extend(file.collapse(ids));
        }
        for id in &removed {
            self.mutants.set_status(*id, MutantStatus::CompileError);
            if tentative.contains(id) && !self.restored.contains(id) {
                self.tentative.insert(*id);
            }
        }

        let mut restored = Vec::new();
        for file in &mut self.files {
            restored.extend(file.restore_enclosed(&removed, &self.tentative));
        }
        for id in &restored {
            self.tentative.remove(id);
            self.restored.insert(*id);
            self.mutants.set_status(*id, MutantStatus::NotRun);
        }

        Rollback { removed, restored }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutants::{Location, OperatorKind};

    fn mutant(id: u32, start: usize, end: usize, replacement: &str, ctx: FragmentContext) -> Mutant {
        Mutant {
            id: MutantId(id),
            operator: OperatorKind::Arithmetic,
            description: String::new(),
            original: String::new(),
            replacement: replacement.into(),
            context: ctx,
            location: Location {
                file: "src/lib.rs".into(),
                span: Span::new(start, end),
                line: 1,
                column: 1,
            },
            status: MutantStatus::NotRun,
            context_before: vec![],
            context_after: vec![],
        }
    }

    fn body(rendered: &str) -> &str {
        rendered.split("\n\n#[doc(hidden)]").next().unwrap()
    }

    const SRC: &str = "fn f(a: i32, b: i32) -> i32 { a + b * 2 }";

    fn source() -> SourceFile {
        SourceFile::new("src/lib.rs", SRC)
    }

    #[test]
    fn single_selector_keeps_original_in_else_branch() {
        let start = SRC.find("a + b").unwrap();
        let end = SRC.find(" }").unwrap();
        let m = mutant(1, start, end, "a - b * 2", FragmentContext::Expression);
        let (file, rejected) = InjectedFile::build(&source(), &[&m]);
        assert!(rejected.is_empty());
        assert_eq!(
            body(file.rendered()),
            "fn f(a: i32, b: i32) -> i32 { (if crate::__mutator_runtime::is_active(1) { a - b * 2 } else { a + b * 2 }) }"
        );
        assert!(file.rendered().contains("mod __mutator_runtime"));
    }

    #[test]
    fn nested_selector_renders_inside_original_branch_only() {
        let outer_start = SRC.find("a + b").unwrap();
        let outer_end = SRC.find(" }").unwrap();
        let inner_start = SRC.find("b * 2").unwrap();
        let outer = mutant(1, outer_start, outer_end, "a - b * 2", FragmentContext::Expression);
        let inner = mutant(2, inner_start, outer_end, "b / 2", FragmentContext::Expression);
        let (file, _) = InjectedFile::build(&source(), &[&inner, &outer]);
        assert_eq!(
            body(file.rendered()),
            "fn f(a: i32, b: i32) -> i32 { (if crate::__mutator_runtime::is_active(1) { a - b * 2 } else { a + (if crate::__mutator_runtime::is_active(2) { b / 2 } else { b * 2 }) }) }"
        );
        let inner_region = file.regions().iter().find(|r| r.depth == 1).unwrap();
        assert_eq!(inner_region.arms[0].0, MutantId(2));
    }

    #[test]
    fn same_fragment_chains_arms() {
        let start = SRC.find("a + b").unwrap();
        let end = SRC.find(" }").unwrap();
        let m1 = mutant(1, start, end, "a - b * 2", FragmentContext::Expression);
        let m2 = mutant(2, start, end, "a * b * 2", FragmentContext::Expression);
        let (file, _) = InjectedFile::build(&source(), &[&m1, &m2]);
        assert!(body(file.rendered()).contains(
            "(if crate::__mutator_runtime::is_active(1) { a - b * 2 } else if crate::__mutator_runtime::is_active(2) { a * b * 2 } else { a + b * 2 })"
        ));
        assert_eq!(file.regions().len(), 1);
        assert_eq!(file.regions()[0].arms.len(), 2);
    }

    #[test]
    fn block_context_keeps_a_block() {
        let src = "fn g(c: bool) { if c { run(); } }";
        let start = src.find("{ run").unwrap();
        let end = src.rfind(" }").unwrap();
        let m = mutant(1, start, end, "{}", FragmentContext::Block);
        let (file, _) = InjectedFile::build(&SourceFile::new("src/lib.rs", src), &[&m]);
        assert_eq!(
            body(file.rendered()),
            "fn g(c: bool) { if c { if crate::__mutator_runtime::is_active(1) {} else { run(); } } }"
        );
    }

    #[test]
    fn collapsing_every_mutant_restores_the_original_text() {
        let start = SRC.find("a + b").unwrap();
        let end = SRC.find(" }").unwrap();
        let inner_start = SRC.find("b * 2").unwrap();
        let outer = mutant(1, start, end, "a - b * 2", FragmentContext::Expression);
        let inner = mutant(2, inner_start, end, "b / 2", FragmentContext::Expression);
        let (mut file, _) = InjectedFile::build(&source(), &[&outer, &inner]);

        let removed = file.collapse(&[MutantId(1)].into_iter().collect());
        assert_eq!(removed, vec![MutantId(1)]);
        assert_eq!(
            body(file.rendered()),
            "fn f(a: i32, b: i32) -> i32 { a + (if crate::__mutator_runtime::is_active(2) { b / 2 } else { b * 2 }) }"
        );

        file.collapse(&[MutantId(2)].into_iter().collect());
        assert_eq!(file.rendered(), SRC);
        assert!(file.regions().is_empty());
        assert!(file.live_mutants().is_empty());
    }

    #[test]
    fn partial_overlap_is_rejected() {
        let a = mutant(1, 0, 10, "x", FragmentContext::Expression);
        let b = mutant(2, 5, 15, "y", FragmentContext::Expression);
        let (file, rejected) = InjectedFile::build(&source(), &[&a, &b]);
        assert_eq!(rejected, vec![MutantId(2)]);
        assert_eq!(file.live_mutants().into_iter().collect::<Vec<_>>(), vec![MutantId(1)]);
    }

    #[test]
    fn attribution_blames_the_arm_containing_the_error() {
        let start = SRC.find("a + b").unwrap();
        let end = SRC.find(" }").unwrap();
        let m1 = mutant(1, start, end, "a - b * 2", FragmentContext::Expression);
        let m2 = mutant(2, start, end, "a * b * 2", FragmentContext::Expression);
        let (file, _) = InjectedFile::build(&source(), &[&m1, &m2]);
        let rendered = file.rendered();
        let pos = rendered.find("a * b * 2").unwrap();
        let blame = file.attribute(Span::new(pos, pos + 9));
        assert_eq!(blame.mutants, vec![MutantId(2)]);
        assert!(blame.certain);
    }

    #[test]
    fn error_after_a_chained_arm_blames_only_that_arm() {
        let start = SRC.find("a + b").unwrap();
        let end = SRC.find(" }").unwrap();
        let m1 = mutant(1, start, end, "a - b * 2", FragmentContext::Expression);
        let m2 = mutant(2, start, end, "Some(a)", FragmentContext::Expression);
        let m3 = mutant(3, start, end, "a", FragmentContext::Expression);
        let (file, _) = InjectedFile::build(&source(), &[&m1, &m2, &m3]);
        let rendered = file.rendered();

        // `if 2 { Some(a) } else if 3 { a } else { .. }` fails on its else branch.
        let from = rendered.find(" else if crate::__mutator_runtime::is_active(3)").unwrap() + 1;
        let to = rendered.find("a + b * 2").unwrap() + 11;
        let blame = file.attribute(Span::new(from, to));
        assert_eq!(blame.mutants, vec![MutantId(2)]);
        assert!(!blame.certain);

        let whole = file.regions()[0].whole;
        assert_eq!(file.attribute(whole).mutants, vec![MutantId(1)]);
    }

    #[test]
    fn attribution_prefers_the_innermost_selector() {
        let start = SRC.find("a + b").unwrap();
        let end = SRC.find(" }").unwrap();
        let inner_start = SRC.find("b * 2").unwrap();
        let outer = mutant(1, start, end, "a - b * 2", FragmentContext::Expression);
        let inner = mutant(2, inner_start, end, "b / 2", FragmentContext::Expression);
        let (file, _) = InjectedFile::build(&source(), &[&outer, &inner]);
        let pos = file.rendered().find("b / 2").unwrap();
        assert_eq!(file.attribute(Span::new(pos, pos + 1)).mutants, vec![MutantId(2)]);
    }

    #[test]
    fn collapsing_an_outer_selector_restores_tentative_inner_ones() {
        let start = SRC.find("a + b").unwrap();
        let end = SRC.find(" }").unwrap();
        let inner_start = SRC.find("b * 2").unwrap();
        let outer = mutant(1, start, end, "a - b * 2", FragmentContext::Expression);
        let inner = mutant(2, inner_start, end, "b / 2", FragmentContext::Expression);
        let (mut file, _) = InjectedFile::build(&source(), &[&outer, &inner]);

        file.collapse(&[MutantId(2)].into_iter().collect());
        let candidates: BTreeSet<MutantId> = [MutantId(2)].into_iter().collect();
        assert!(file.restore_enclosed(&[], &candidates).is_empty());

        let removed = file.collapse(&[MutantId(1)].into_iter().collect());
        assert_eq!(file.restore_enclosed(&removed, &candidates), vec![MutantId(2)]);
        assert_eq!(
            file.live_mutants().into_iter().collect::<Vec<_>>(),
            vec![MutantId(2)]
        );
        assert!(file.rendered().contains("is_active(2) { b / 2 }"));
    }

    #[test]
    fn attribution_outside_selectors_is_empty() {
        let start = SRC.find("a + b").unwrap();
        let end = SRC.find(" }").unwrap();
        let m = mutant(1, start, end, "a - b * 2", FragmentContext::Expression);
        let (file, _) = InjectedFile::build(&source(), &[&m]);
        assert!(file.attribute(Span::new(0, 2)).is_empty());
    }

    #[test]
    fn attribution_across_adjacent_selectors_blames_both() {
        let src = "fn h() -> bool { let x = 1 + 2; let y = 3 - 4; x < y }";
        let s1 = src.find("1 + 2").unwrap();
        let s2 = src.find("3 - 4").unwrap();
        let a = mutant(1, s1, s1 + 5, "1 - 2", FragmentContext::Expression);
        let b = mutant(2, s2, s2 + 5, "3 + 4", FragmentContext::Expression);
        let (file, _) = InjectedFile::build(&SourceFile::new("src/lib.rs", src), &[&a, &b]);
        let r = file.rendered();
        let from = r.find("let x").unwrap();
        let to = r.find("x < y").unwrap();
        assert_eq!(file.attribute(Span::new(from, to)).mutants, vec![MutantId(1), MutantId(2)]);
    }

    #[test]
    fn batch_groups_mutants_per_file() {
        let lib = SourceFile::new("src/lib.rs", SRC);
        let other = SourceFile::new("src/other.rs", "fn z() -> bool { true }");
        let start = SRC.find("a + b").unwrap();
        let end = SRC.find(" }").unwrap();
        let m1 = mutant(1, start, end, "a - b * 2", FragmentContext::Expression);
        let mut m2 = mutant(2, 17, 21, "false", FragmentContext::Expression);
        m2.location.file = "src/other.rs".into();
        let batch = MutationBatch::inject(&[lib, other], vec![m1, m2]);
        assert_eq!(batch.files().len(), 2);
        let rendered = batch.rendered_files();
        assert!(rendered[1].text.contains("crate::other::__mutator_runtime::is_active(2)"));
    }

    #[test]
    fn ignored_mutants_are_not_injected() {
        let start = SRC.find("a + b").unwrap();
        let end = SRC.find(" }").unwrap();
        let mut m = mutant(1, start, end, "a - b * 2", FragmentContext::Expression);
        m.status = MutantStatus::Ignored;
        let batch = MutationBatch::inject(&[source()], vec![m]);
        assert!(batch.files().is_empty());
        assert!(batch.live_mutants().is_empty());
    }
}
