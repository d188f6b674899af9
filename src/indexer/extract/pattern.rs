use once_cell::sync::Lazy;
use regex::Regex;

use super::delimiters::DelimiterScanner;
use super::entity::{finish_entities, package_at, qualify, ByteSpan, EntityKind, StructuralEntity};
use super::StructureExtractor;
use crate::config::SyntaxStrategy;

static PACKAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t]*(package\s+([A-Za-z_][\w:]*))").expect("valid regex")
});

static ROUTINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t]*((?:sub|method)\s+([A-Za-z_][\w:]*))").expect("valid regex")
});

static ASSIGNED_ROUTINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[ \t]*(?:(?:my|our|local|state)\s+)?[\$\*]([A-Za-z_][\w:]*)\s*=\s*(sub|method)\b",
    )
    .expect("valid regex")
});

/// Line-oriented extraction used when no syntax tree is available.
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    whole_file_max_bytes: usize,
}

impl PatternExtractor {
    pub fn new(whole_file_max_bytes: usize) -> Self {
        Self {
            whole_file_max_bytes,
        }
    }

    /// Same as `extract`, but the whole-file entity is always present.
    pub fn extract_with_file(&self, path: &str, content: &str) -> Vec<StructuralEntity> {
        extract_patterns(path, content, true)
    }
}

impl StructureExtractor for PatternExtractor {
    fn strategy(&self) -> SyntaxStrategy {
        SyntaxStrategy::Pattern
    }

    fn extract(&self, path: &str, content: &str) -> Vec<StructuralEntity> {
        extract_patterns(path, content, content.len() < self.whole_file_max_bytes)
    }
}

fn extract_patterns(path: &str, content: &str, include_file: bool) -> Vec<StructuralEntity> {
    let scanner = DelimiterScanner::new(content);
    let mut packages: Vec<(String, usize)> = Vec::new();
    let mut found: Vec<(String, ByteSpan)> = Vec::new();

    let mut line_start = 0;
    for line in content.split_inclusive('\n') {
        let offset = line_start;
        line_start += line.len();

        if let Some(caps) = PACKAGE_RE.captures(line) {
            let (Some(decl), Some(name)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let start = offset + decl.start();
            if scanner.is_code(start) {
                packages.push((name.as_str().to_string(), start));
            }
            continue;
        }

        if let Some(caps) = ROUTINE_RE.captures(line) {
            let (Some(decl), Some(name)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let start = offset + decl.start();
            if !scanner.is_code(start) {
                continue;
            }
            if let Some(end) = scanner.block_end(offset + name.end()) {
                found.push((name.as_str().to_string(), ByteSpan { start, end }));
            }
            continue;
        }

        if let Some(caps) = ASSIGNED_ROUTINE_RE.captures(line) {
            let (Some(name), Some(keyword)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let start = offset + keyword.start();
            if !scanner.is_code(start) {
                continue;
            }
            if let Some(end) = scanner.block_end(offset + keyword.end()) {
                found.push((name.as_str().to_string(), ByteSpan { start, end }));
            }
        }
    }

    let routines = found
        .into_iter()
        .map(|(name, range)| {
            let qualified = qualify(package_at(&packages, range.start), &name);
            StructuralEntity::new(qualified, EntityKind::Routine, content, range)
        })
        .collect();

    finish_entities(path, content, packages, routines, include_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entities: &[StructuralEntity]) -> Vec<(&str, EntityKind)> {
        entities.iter().map(|e| (e.name.as_str(), e.kind)).collect()
    }

    #[test]
    fn extracts_packages_and_routines() {
        let source = "package App::Util;\nuse strict;\n\nsub trim {\n  my ($s) = @_;\n  $s =~ s/^\\s+//;\n  return $s;\n}\n\npackage App::Other;\nsub go { 1 }\n1;\n";
        let entities = PatternExtractor::new(10_000).extract("lib/App/Util.pm", source);
        assert_eq!(
            names(&entities),
            vec![
                ("lib/App/Util.pm", EntityKind::File),
                ("App::Util", EntityKind::Package),
                ("App::Util::trim", EntityKind::Routine),
                ("App::Other", EntityKind::Package),
                ("App::Other::go", EntityKind::Routine),
            ]
        );
        let trim = &entities[2];
        assert!(trim.content.starts_with("sub trim {"));
        assert!(trim.content.ends_with("return $s;\n}"));
        assert_eq!(trim.line, 4);
    }

    #[test]
    fn match_literals_do_not_cut_routines_short() {
        let source = "sub strip {\n  my ($l) = @_;\n  if ($l =~ /^#/) {\n    return;\n  }\n  return $l;\n}\nsub fields { return split /}/, $_[0]; }\n";
        let entities = PatternExtractor::new(0).extract("strip.pl", source);
        assert_eq!(
            names(&entities),
            vec![("strip", EntityKind::Routine), ("fields", EntityKind::Routine)]
        );
        assert!(entities[0].content.ends_with("return $l;\n}"));
        assert_eq!(entities[1].content, "sub fields { return split /}/, $_[0]; }");
    }

    #[test]
    fn routines_without_package_are_unqualified() {
        let source = "sub helper { 1 }\n";
        let entities = PatternExtractor::new(0).extract("script.pl", source);
        assert_eq!(names(&entities), vec![("helper", EntityKind::Routine)]);
    }

    #[test]
    fn assigned_anonymous_routines_are_named() {
        let source = "package Cb;\nmy $on_done = sub {\n  return 1;\n};\n*alias = sub { 2 };\nmy $x = 1;\n";
        let entities = PatternExtractor::new(0).extract("cb.pl", source);
        assert_eq!(
            names(&entities),
            vec![
                ("Cb", EntityKind::Package),
                ("Cb::on_done", EntityKind::Routine),
                ("Cb::alias", EntityKind::Routine),
            ]
        );
        assert!(entities[1].content.starts_with("sub {"));
    }

    #[test]
    fn ignores_forward_declarations_and_commented_code() {
        let source = "sub later;\n# sub fake { }\n=pod\n\nsub doc_only { }\n\n=cut\nsub real { }\n";
        let entities = PatternExtractor::new(0).extract("x.pl", source);
        assert_eq!(names(&entities), vec![("real", EntityKind::Routine)]);
    }

    #[test]
    fn comment_braces_do_not_end_routine() {
        let source = "sub f {\n  my $n = $#list; # } not the end\n  return $n;\n}\nsub g { }\n";
        let entities = PatternExtractor::new(0).extract("x.pl", source);
        assert!(entities[0].content.ends_with("return $n;\n}"));
    }

    #[test]
    fn whole_file_is_forced_when_requested() {
        let source = "x".repeat(50);
        let entities = PatternExtractor::new(10).extract_with_file("big.pl", &source);
        assert_eq!(names(&entities), vec![("big.pl", EntityKind::File)]);
    }
}
