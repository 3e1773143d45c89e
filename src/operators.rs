//! The mutation catalogue.
//!
//! Every operator is a pure function from a syntax node to zero or more
//! replacement fragments. The table is fixed; the generator selects
//! descriptors by node kind and filters them by mutation level.

use tree_sitter::Node;

use crate::config::MutationLevel;
use crate::mutants::{FragmentContext, OperatorKind};

/// One candidate replacement for the fragment spanned by the matched node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub description: String,
    pub text: String,
    pub context: FragmentContext,
}

/// Where the matched node sits in its parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeSite<'a> {
    pub parent_kind: Option<&'a str>,
    pub field: Option<&'a str>,
}

pub struct OperatorDescriptor {
    pub kind: OperatorKind,
    pub level: MutationLevel,
    pub node_kinds: &'static [&'static str],
    pub apply: fn(Node, &str, NodeSite) -> Vec<Replacement>,
}

pub static CATALOGUE: &[OperatorDescriptor] = &[
    OperatorDescriptor {
        kind: OperatorKind::NegateEquality,
        level: MutationLevel::Basic,
        node_kinds: &["binary_expression"],
        apply: apply_equality,
    },
    OperatorDescriptor {
        kind: OperatorKind::LogicalFlip,
        level: MutationLevel::Basic,
        node_kinds: &["binary_expression"],
        apply: apply_logical,
    },
    OperatorDescriptor {
        kind: OperatorKind::BooleanFlip,
        level: MutationLevel::Basic,
        node_kinds: &["boolean_literal"],
        apply: apply_boolean,
    },
    OperatorDescriptor {
        kind: OperatorKind::NullCoalescing,
        level: MutationLevel::Basic,
        node_kinds: &["call_expression"],
        apply: apply_null_coalescing,
    },
    OperatorDescriptor {
        kind: OperatorKind::Boundary,
        level: MutationLevel::Standard,
        node_kinds: &["binary_expression"],
        apply: apply_boundary,
    },
    OperatorDescriptor {
        kind: OperatorKind::NegateComparison,
        level: MutationLevel::Standard,
        node_kinds: &["binary_expression"],
        apply: apply_negate_comparison,
    },
    OperatorDescriptor {
        kind: OperatorKind::Arithmetic,
        level: MutationLevel::Standard,
        node_kinds: &["binary_expression"],
        apply: apply_arithmetic,
    },
    OperatorDescriptor {
        kind: OperatorKind::NegationRemoval,
        level: MutationLevel::Standard,
        node_kinds: &["unary_expression"],
        apply: apply_negation_removal,
    },
    OperatorDescriptor {
        kind: OperatorKind::CompoundAssignment,
        level: MutationLevel::Standard,
        node_kinds: &["compound_assignment_expr"],
        apply: apply_compound_assignment,
    },
    OperatorDescriptor {
        kind: OperatorKind::ReturnValue,
        level: MutationLevel::Advanced,
        node_kinds: &["return_expression"],
        apply: apply_return_value,
    },
    OperatorDescriptor {
        kind: OperatorKind::BlockRemoval,
        level: MutationLevel::Advanced,
        node_kinds: &["block"],
        apply: apply_block_removal,
    },
    OperatorDescriptor {
        kind: OperatorKind::StringLiteral,
        level: MutationLevel::Complete,
        node_kinds: &["string_literal"],
        apply: apply_string,
    },
];

/// Descriptors enabled at `level`, in catalogue order.
pub fn enabled_operators(level: MutationLevel) -> Vec<&'static OperatorDescriptor> {
    CATALOGUE.iter().filter(|op| op.level <= level).collect()
}

// Token tables. These stay string-level so they can be checked without a
// parser.

pub fn boundary_replacement(op: &str) -> Option<&'static str> {
    match op {
        ">" => Some(">="),
        ">=" => Some(">"),
        "<" => Some("<="),
        "<=" => Some("<"),
        _ => None,
    }
}

pub fn negated_comparison(op: &str) -> Option<&'static str> {
    match op {
        ">" => Some("<="),
        ">=" => Some("<"),
        "<" => Some(">="),
        "<=" => Some(">"),
        _ => None,
    }
}

pub fn negated_equality(op: &str) -> Option<&'static str> {
    match op {
        "==" => Some("!="),
        "!=" => Some("=="),
        _ => None,
    }
}

pub fn flipped_logical(op: &str) -> Option<&'static str> {
    match op {
        "&&" => Some("||"),
        "||" => Some("&&"),
        _ => None,
    }
}

pub fn arithmetic_replacement(op: &str) -> Option<&'static str> {
    match op {
        "+" => Some("-"),
        "-" => Some("+"),
        "*" => Some("/"),
        "/" => Some("*"),
        "%" => Some("/"),
        _ => None,
    }
}

pub fn compound_assignment_replacement(op: &str) -> Option<&'static str> {
    match op {
        "+=" => Some("-="),
        "-=" => Some("+="),
        "*=" => Some("/="),
        "/=" => Some("*="),
        "%=" => Some("/="),
        _ => None,
    }
}

pub fn flipped_boolean(text: &str) -> Option<&'static str> {
    match text {
        "true" => Some("false"),
        "false" => Some("true"),
        _ => None,
    }
}

/// Replacement for `return <expr>`; `None` when no useful mutation exists.
pub fn return_replacement(expr_text: &str) -> Option<&'static str> {
    let trimmed = expr_text.trim();
    match trimmed {
        "true" => Some("return false"),
        "false" => Some("return true"),
        "None" | "()" | "Ok(())" => None,
        "0" => Some("return 1"),
        _ if trimmed.starts_with('"') => Some("return \"\".to_string()"),
        _ if trimmed.starts_with("vec!") || trimmed.starts_with("Vec::") => Some("return vec![]"),
        _ => Some("return Default::default()"),
    }
}

pub fn string_replacement(text: &str) -> &'static str {
    if text == "\"\"" {
        "\"mutator_xx\""
    } else {
        "\"\""
    }
}

fn node_text<'s>(node: Node, source: &'s str) -> &'s str {
    &source[node.start_byte()..node.end_byte()]
}

/// Re-emits `node` with its `operator` child swapped for `new_op`.
fn with_operator(node: Node, source: &str, new_op: &str) -> Option<String> {
    let op = node.child_by_field_name("operator")?;
    let text = node_text(node, source);
    let rel_start = op.start_byte() - node.start_byte();
    let rel_end = op.end_byte() - node.start_byte();
    Some(format!("{}{}{}", &text[..rel_start], new_op, &text[rel_end..]))
}

fn binary_operator<'s>(node: Node, source: &'s str) -> Option<&'s str> {
    node.child_by_field_name("operator").map(|op| node_text(op, source))
}

fn swap_operator(
    node: Node,
    source: &str,
    table: fn(&str) -> Option<&'static str>,
) -> Vec<Replacement> {
    let Some(op) = binary_operator(node, source) else {
        return vec![];
    };
    let Some(new_op) = table(op) else {
        return vec![];
    };
    match with_operator(node, source, new_op) {
        Some(text) => vec![Replacement {
            description: format!("replace {} with {}", op, new_op),
            text,
            context: FragmentContext::Expression,
        }],
        None => vec![],
    }
}

fn apply_equality(node: Node, source: &str, _site: NodeSite) -> Vec<Replacement> {
    swap_operator(node, source, negated_equality)
}

fn apply_logical(node: Node, source: &str, _site: NodeSite) -> Vec<Replacement> {
    swap_operator(node, source, flipped_logical)
}

fn apply_boundary(node: Node, source: &str, _site: NodeSite) -> Vec<Replacement> {
    swap_operator(node, source, boundary_replacement)
}

fn apply_negate_comparison(node: Node, source: &str, _site: NodeSite) -> Vec<Replacement> {
    swap_operator(node, source, negated_comparison)
}

fn apply_arithmetic(node: Node, source: &str, _site: NodeSite) -> Vec<Replacement> {
    // String concatenation (`String + &str`) has no arithmetic counterpart.
    if binary_operator(node, source) == Some("+") {
        if let Some(left) = node.child_by_field_name("left") {
            if left.kind() == "string_literal" || left.kind() == "raw_string_literal" {
                return vec![];
            }
        }
    }
    swap_operator(node, source, arithmetic_replacement)
}

fn apply_compound_assignment(node: Node, source: &str, _site: NodeSite) -> Vec<Replacement> {
    swap_operator(node, source, compound_assignment_replacement)
}

fn apply_negation_removal(node: Node, source: &str, _site: NodeSite) -> Vec<Replacement> {
    let Some(op) = node.child(0) else {
        return vec![];
    };
    if op.kind() != "!" {
        return vec![];
    }
    let Some(operand) = node.child(1) else {
        return vec![];
    };
    vec![Replacement {
        description: "remove negation".to_string(),
        text: node_text(operand, source).to_string(),
        context: FragmentContext::Expression,
    }]
}

fn apply_boolean(node: Node, source: &str, site: NodeSite) -> Vec<Replacement> {
    // `return true` is already covered by the return value operator.
    if site.parent_kind == Some("return_expression") {
        return vec![];
    }
    let text = node_text(node, source);
    match flipped_boolean(text) {
        Some(flipped) => vec![Replacement {
            description: format!("replace {} with {}", text, flipped),
            text: flipped.to_string(),
            context: FragmentContext::Expression,
        }],
        None => vec![],
    }
}

fn apply_return_value(node: Node, source: &str, _site: NodeSite) -> Vec<Replacement> {
    if node.named_child_count() == 0 {
        return vec![];
    }
    let Some(expr) = node.named_child(0) else {
        return vec![];
    };
    match return_replacement(node_text(expr, source)) {
        Some(text) => vec![Replacement {
            description: format!("replace return value with {}", text.trim_start_matches("return ")),
            text: text.to_string(),
            context: FragmentContext::Expression,
        }],
        None => vec![],
    }
}

fn apply_block_removal(node: Node, source: &str, site: NodeSite) -> Vec<Replacement> {
    if site.parent_kind != Some("if_expression") || site.field != Some("consequence") {
        return vec![];
    }
    let text = node_text(node, source);
    let inner = text.trim_start_matches('{').trim_end_matches('}');
    if inner.trim().is_empty() {
        return vec![];
    }
    vec![Replacement {
        description: "remove if body".to_string(),
        text: "{}".to_string(),
        context: FragmentContext::Block,
    }]
}

fn apply_string(node: Node, source: &str, _site: NodeSite) -> Vec<Replacement> {
    let text = node_text(node, source);
    // Byte strings and C strings have different types from `""`.
    if !text.starts_with('"') {
        return vec![];
    }
    let replacement = string_replacement(text);
    vec![Replacement {
        description: format!("replace string literal with {}", replacement),
        text: replacement.to_string(),
        context: FragmentContext::Expression,
    }]
}

/// `a.unwrap_or(b)` and `a.or(b)`: the closest Rust has to a
/// null-coalescing expression.
fn apply_null_coalescing(node: Node, source: &str, _site: NodeSite) -> Vec<Replacement> {
    let Some(function) = node.child_by_field_name("function") else {
        return vec![];
    };
    if function.kind() != "field_expression" {
        return vec![];
    }
    let (Some(receiver), Some(method)) = (
        function.child_by_field_name("value"),
        function.child_by_field_name("field"),
    ) else {
        return vec![];
    };
    let method_name = node_text(method, source);
    if method_name != "unwrap_or" && method_name != "or" {
        return vec![];
    }
    let Some(arguments) = node.child_by_field_name("arguments") else {
        return vec![];
    };
    if arguments.named_child_count() != 1 {
        return vec![];
    }
    let Some(fallback) = arguments.named_child(0) else {
        return vec![];
    };
    let left = node_text(receiver, source);
    let right = node_text(fallback, source);

    vec![
        Replacement {
            description: "null coalescing mutation (left to right)".to_string(),
            text: format!("({}).{}({})", right, method_name, left),
            context: FragmentContext::Expression,
        },
        Replacement {
            description: "null coalescing mutation (remove right)".to_string(),
            text: format!("({})", left),
            context: FragmentContext::Expression,
        },
        Replacement {
            description: "null coalescing mutation (remove left)".to_string(),
            text: format!("({})", right),
            context: FragmentContext::Expression,
        },
    ]
}
