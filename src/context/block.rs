use crate::indexer::extract::{EntityKind, StructuralEntity};
use crate::syntax::{self, kinds};
use anyhow::Result;
use tree_sitter::Parser;

/// Returned when no block of interest surrounds the cursor.
pub const FILE_SCOPE: &str = "file_scope";

/// Source text of the block enclosing `offset`, chosen by kind priority
/// rather than by distance: a routine anywhere above the cursor beats a
/// nearer bare block.
pub fn enclosing_block_from_tree(parser: &mut Parser, text: &str, offset: usize) -> Result<String> {
    let tree = syntax::parse(parser, text)?;
    let Some(mut node) = syntax::smallest_containing(tree.root_node(), offset) else {
        return Ok(FILE_SCOPE.to_string());
    };
    if kinds::is_one_of(node.kind(), kinds::COMMENT) {
        if let Some(parent) = node.parent() {
            node = parent;
        }
    }

    let chain = syntax::chain_to_root(node);
    for group in kinds::ENCLOSING_PRIORITY {
        if let Some(found) = chain.iter().find(|n| kinds::is_one_of(n.kind(), group)) {
            return Ok(syntax::trimmed_text_for_node(*found, text).to_string());
        }
    }
    Ok(FILE_SCOPE.to_string())
}

/// Pattern-strategy equivalent: the innermost routine entity around `offset`.
pub fn enclosing_block_from_entities(entities: &[StructuralEntity], offset: usize) -> String {
    entities
        .iter()
        .filter(|e| e.kind == EntityKind::Routine && e.range.strictly_contains(offset))
        .min_by_key(|e| e.range.len())
        .map(|e| e.content.clone())
        .unwrap_or_else(|| FILE_SCOPE.to_string())
}
