pub mod delimiters;
pub mod entity;
pub mod pattern;
pub mod tree;

use std::sync::Arc;

use crate::config::SyntaxStrategy;

pub use entity::{ByteSpan, EntityKind, StructuralEntity};
pub use pattern::PatternExtractor;
pub use tree::TreeExtractor;

/// Turns a file's text into its structural entities.
///
/// Implementations are deterministic for a given `(path, content)` and never
/// fail; problems are logged and the result degrades to coarser entities.
pub trait StructureExtractor: Send + Sync {
    fn strategy(&self) -> SyntaxStrategy;
    fn extract(&self, path: &str, content: &str) -> Vec<StructuralEntity>;
}

/// Picks the extractor once, at construction. A tree strategy whose grammar
/// does not load falls back to patterns.
pub fn extractor_for(
    strategy: SyntaxStrategy,
    whole_file_max_bytes: usize,
) -> Arc<dyn StructureExtractor> {
    match strategy {
        SyntaxStrategy::Tree => match TreeExtractor::new(whole_file_max_bytes) {
            Ok(extractor) => Arc::new(extractor),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "Perl grammar unavailable, extracting with patterns"
                );
                Arc::new(PatternExtractor::new(whole_file_max_bytes))
            }
        },
        SyntaxStrategy::Pattern => Arc::new(PatternExtractor::new(whole_file_max_bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_requested_strategy() {
        assert_eq!(
            extractor_for(SyntaxStrategy::Tree, 100).strategy(),
            SyntaxStrategy::Tree
        );
        assert_eq!(
            extractor_for(SyntaxStrategy::Pattern, 100).strategy(),
            SyntaxStrategy::Pattern
        );
    }

    #[test]
    fn strategies_agree_on_simple_modules() {
        let source = "package Shop::Cart;\nuse strict;\n\nsub add {\n  my ($self, $item) = @_;\n  push @{ $self->{items} }, $item;\n}\n\nsub total {\n  my ($self) = @_;\n  return 0;\n}\n\n1;\n";
        let tree = extractor_for(SyntaxStrategy::Tree, 10_000).extract("lib/Shop/Cart.pm", source);
        let pattern =
            extractor_for(SyntaxStrategy::Pattern, 10_000).extract("lib/Shop/Cart.pm", source);
        let summary = |entities: &[StructuralEntity]| {
            entities
                .iter()
                .map(|e| (e.name.clone(), e.kind, e.range.start))
                .collect::<Vec<_>>()
        };
        assert_eq!(summary(&tree), summary(&pattern));
    }
}
