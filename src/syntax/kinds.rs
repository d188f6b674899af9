//! Perl node kinds the extractor and the context assembler care about.
//!
//! The lists cover the node names used by the tree-sitter-perl grammar plus the
//! older names some grammar releases still emit, so matching is by membership
//! rather than by a single literal.

pub const PACKAGE: &[&str] = &["package_statement"];

pub const ROUTINE: &[&str] = &[
    "subroutine_declaration_statement",
    "method_declaration_statement",
    "function_definition",
];

pub const ANONYMOUS_ROUTINE: &[&str] = &[
    "anonymous_subroutine_expression",
    "anonymous_method_expression",
    "anonymous_function",
];

pub const LOOP: &[&str] = &[
    "loop_statement",
    "for_statement",
    "cstyle_for_statement",
    "foreach_statement",
    "while_statement",
    "until_statement",
    "for_statement_1",
    "for_statement_2",
];

pub const CONDITIONAL: &[&str] = &[
    "conditional_statement",
    "if_statement",
    "unless_statement",
    "conditional_expression",
];

pub const BLOCK: &[&str] = &["block"];

pub const BINARY: &[&str] = &["binary_expression"];

pub const VARIABLE_DECLARATION: &[&str] = &[
    "variable_declaration",
    "multi_var_declaration",
    "single_var_declaration",
];

pub const COMMENT: &[&str] = &["comment", "comments", "pod"];

/// Groups scanned by the enclosing-block search, highest priority first.
pub const ENCLOSING_PRIORITY: &[&[&str]] = &[
    ROUTINE,
    ANONYMOUS_ROUTINE,
    LOOP,
    CONDITIONAL,
    BLOCK,
    PACKAGE,
    BINARY,
    VARIABLE_DECLARATION,
];

pub fn is_one_of(kind: &str, group: &[&str]) -> bool {
    group.contains(&kind)
}
