use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

use super::entity::{finish_entities, package_at, qualify, ByteSpan, EntityKind, StructuralEntity};
use super::pattern::PatternExtractor;
use super::StructureExtractor;
use crate::config::SyntaxStrategy;
use crate::syntax::{self, kinds, text_for_node};

static DECLARED_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:package|sub|method)\s+([A-Za-z_][\w:]*)").expect("valid regex")
});

static ASSIGN_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\s*(?:(?:my|our|local|state)\s*)?[\$\*]\s*\{?\s*['"]?([A-Za-z_][\w:]*)['"]?\s*\}?\s*=\s*$"#,
    )
    .expect("valid regex")
});

/// Extraction over a tree-sitter-perl syntax tree.
#[derive(Debug, Clone)]
pub struct TreeExtractor {
    whole_file_max_bytes: usize,
    fallback: PatternExtractor,
}

impl TreeExtractor {
    /// Fails when the Perl grammar cannot be loaded.
    pub fn new(whole_file_max_bytes: usize) -> Result<Self> {
        syntax::perl_parser()?;
        Ok(Self {
            whole_file_max_bytes,
            fallback: PatternExtractor::new(whole_file_max_bytes),
        })
    }

    fn try_extract(&self, path: &str, source: &str) -> Result<Vec<StructuralEntity>> {
        let mut parser = syntax::perl_parser()?;
        let tree = syntax::parse(&mut parser, source)?;
        let root = tree.root_node();

        let mut packages: Vec<(String, usize)> = Vec::new();
        let mut found: Vec<(String, ByteSpan)> = Vec::new();

        syntax::walk(root.walk(), &mut |node| {
            let kind = node.kind();
            if kinds::is_one_of(kind, kinds::PACKAGE) {
                if let Some(name) = declared_name(node, source) {
                    packages.push((name, node.start_byte()));
                }
            } else if kinds::is_one_of(kind, kinds::ROUTINE) {
                if !has_body(node) {
                    return;
                }
                if let Some(name) = declared_name(node, source) {
                    found.push((name, span_of(node, source)));
                }
            } else if kinds::is_one_of(kind, kinds::ANONYMOUS_ROUTINE) {
                if let Some(name) = assigned_name(node, source) {
                    found.push((name, span_of(node, source)));
                }
            }
        });

        let routines = found
            .into_iter()
            .map(|(name, range)| {
                let qualified = qualify(package_at(&packages, range.start), &name);
                StructuralEntity::new(qualified, EntityKind::Routine, source, range)
            })
            .collect();

        Ok(finish_entities(
            path,
            source,
            packages,
            routines,
            source.len() < self.whole_file_max_bytes,
        ))
    }
}

impl StructureExtractor for TreeExtractor {
    fn strategy(&self) -> SyntaxStrategy {
        SyntaxStrategy::Tree
    }

    fn extract(&self, path: &str, content: &str) -> Vec<StructuralEntity> {
        match self.try_extract(path, content) {
            Ok(entities) => entities,
            Err(err) => {
                tracing::warn!(
                    file = %path,
                    error = %err,
                    "Syntax tree extraction failed, using pattern fallback"
                );
                self.fallback.extract_with_file(path, content)
            }
        }
    }
}

fn span_of(node: Node<'_>, source: &str) -> ByteSpan {
    ByteSpan {
        start: node.start_byte(),
        end: syntax::content_end(node, source),
    }
}

fn declared_name(node: Node<'_>, source: &str) -> Option<String> {
    if let Some(name_node) = node.child_by_field_name("name") {
        let name = text_for_node(name_node, source).trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }
    DECLARED_NAME_RE
        .captures(text_for_node(node, source))
        .map(|caps| caps[1].to_string())
}

/// `sub foo;` declares without defining.
fn has_body(node: Node<'_>) -> bool {
    if node.child_by_field_name("body").is_some() {
        return true;
    }
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| kinds::is_one_of(child.kind(), kinds::BLOCK));
    found
}

/// Name of the variable or glob an anonymous routine is assigned to, if any.
fn assigned_name(node: Node<'_>, source: &str) -> Option<String> {
    let mut current = node;
    for _ in 0..3 {
        current = current.parent()?;
        let lhs = source.get(current.start_byte()..node.start_byte())?;
        if let Some(caps) = ASSIGN_TARGET_RE.captures(lhs) {
            return Some(caps[1].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> Vec<StructuralEntity> {
        TreeExtractor::new(0).unwrap().extract("x.pm", source)
    }

    fn names(entities: &[StructuralEntity]) -> Vec<(&str, EntityKind)> {
        entities.iter().map(|e| (e.name.as_str(), e.kind)).collect()
    }

    #[test]
    fn extracts_routines_qualified_by_open_package() {
        let source = "package App::Util;\nuse strict;\n\nsub trim {\n  my ($s) = @_;\n  return $s;\n}\n\npackage App::Other;\n\nsub go {\n  return 1;\n}\n\n1;\n";
        let entities = extract(source);
        assert_eq!(
            names(&entities),
            vec![
                ("App::Util", EntityKind::Package),
                ("App::Util::trim", EntityKind::Routine),
                ("App::Other", EntityKind::Package),
                ("App::Other::go", EntityKind::Routine),
            ]
        );
        assert_eq!(entities[0].range.end, entities[2].range.start);
        assert_eq!(entities[2].range.end, source.len());
        assert!(entities[1].content.starts_with("sub trim"));
        assert!(entities[1].content.ends_with('}'));
        assert_eq!(entities[1].line, 4);
    }

    #[test]
    fn names_assigned_anonymous_routines_only() {
        let source = "my $handler = sub {\n  return 1;\n};\nrun(sub { 2 });\n";
        let entities = extract(source);
        assert_eq!(names(&entities), vec![("handler", EntityKind::Routine)]);
        assert!(entities[0].content.starts_with("sub"));
    }

    #[test]
    fn nested_routines_are_not_prefixed_by_parent() {
        let source = "package Outer;\nsub outer {\n  my $inner = sub {\n    return 1;\n  };\n  return $inner;\n}\n";
        let entities = extract(source);
        assert_eq!(
            names(&entities),
            vec![
                ("Outer", EntityKind::Package),
                ("Outer::outer", EntityKind::Routine),
                ("Outer::inner", EntityKind::Routine),
            ]
        );
    }

    #[test]
    fn includes_whole_file_below_threshold() {
        let extractor = TreeExtractor::new(10_000).unwrap();
        let entities = extractor.extract("lib/A.pm", "sub a { 1 }\n");
        assert_eq!(entities[0].kind, EntityKind::File);
        assert_eq!(entities[0].name, "lib/A.pm");
        assert_eq!(entities[0].content, "sub a { 1 }\n");
    }

    #[test]
    fn reextraction_is_identical() {
        let source = "package P;\nsub a { 1 }\nsub b { my $c = sub { 2 }; }\npackage Q;\nsub d { 3 }\n";
        let extractor = TreeExtractor::new(10_000).unwrap();
        assert_eq!(extractor.extract("p.pm", source), extractor.extract("p.pm", source));
    }
}
