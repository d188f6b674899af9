pub mod kinds;

use anyhow::{anyhow, Result};
use tree_sitter::{Language, Node, Parser, Tree, TreeCursor};

pub fn perl_language() -> Language {
    tree_sitter_perl::LANGUAGE.into()
}

pub fn perl_parser() -> Result<Parser> {
    let mut parser = Parser::new();
    parser.set_language(&perl_language())?;
    Ok(parser)
}

pub fn parse(parser: &mut Parser, source: &str) -> Result<Tree> {
    parser
        .parse(source, None)
        .ok_or_else(|| anyhow!("Failed to parse source"))
}

pub fn text_for_node<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

/// End of `node` without trailing whitespace. Statement nodes in the Perl
/// grammar swallow the newline that follows them.
pub fn content_end(node: Node<'_>, source: &str) -> usize {
    let text = text_for_node(node, source);
    node.start_byte() + text.trim_end().len()
}

/// Node text up to [`content_end`].
pub fn trimmed_text_for_node<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    text_for_node(node, source).trim_end()
}

/// Pre-order walk over every node under the cursor.
pub fn walk(mut cursor: TreeCursor<'_>, f: &mut impl FnMut(Node<'_>)) {
    loop {
        let node = cursor.node();
        f(node);

        if cursor.goto_first_child() {
            continue;
        }

        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Deepest node whose byte range strictly contains `offset`
/// (`start < offset < end`).
pub fn smallest_containing(root: Node<'_>, offset: usize) -> Option<Node<'_>> {
    let contains = |n: &Node<'_>| n.start_byte() < offset && offset < n.end_byte();
    if !contains(&root) {
        return None;
    }
    let mut current = root;
    'descend: loop {
        let mut cursor = current.walk();
        for child in current.children(&mut cursor) {
            if contains(&child) {
                current = child;
                continue 'descend;
            }
        }
        return Some(current);
    }
}

/// `node` followed by each of its ancestors up to the root.
pub fn chain_to_root(node: Node<'_>) -> Vec<Node<'_>> {
    let mut out = vec![node];
    let mut current = node;
    while let Some(parent) = current.parent() {
        out.push(parent);
        current = parent;
    }
    out
}
