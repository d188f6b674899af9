//! Import directives: extraction from source text and resolution to files
//! and symbol definitions inside the workspace.

pub mod resolver;

pub use resolver::{ImportResolution, ImportResolver, ResolvedDefinition, SymbolResolution};

use crate::indexer::extract::delimiters::DelimiterScanner;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Module,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Import {
    pub module_or_file: String,
    pub symbols: Vec<String>,
    pub kind: ImportKind,
}

static MODULE_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(use|no|require)\s+([A-Za-z_]\w*(?:::\w+)*)")
        .expect("valid regex")
});

static FILE_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:require|do)\s*\(?\s*(?:'([^'\n]+)'|"([^"\n]+)")"#)
        .expect("valid regex")
});

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*v?\d[\d._]*").expect("valid regex"));

static QW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bqw\s*([^\w\s])").expect("valid regex"));

static QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"'([^']*)'|"([^"]*)""#).expect("valid regex"));

static BAREWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[&$@%]?[A-Za-z_:][\w:]*$").expect("valid regex"));

/// All `use`/`no`/`require` and `do FILE` directives in `text`, in order of
/// first appearance. Pragmas and version requirements are skipped; repeated
/// modules are merged into one entry.
pub fn extract_imports(text: &str) -> Vec<Import> {
    let scanner = DelimiterScanner::new(text);
    let cleaned = scanner.without_comments();
    let mut found: Vec<(usize, Import)> = Vec::new();

    for caps in MODULE_IMPORT_RE.captures_iter(&cleaned) {
        let (Some(keyword), Some(name)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if !scanner.is_code(keyword.start()) || is_pragma(name.as_str()) {
            continue;
        }
        let end = scanner.statement_end(keyword.start()).max(name.end());
        let tail = cleaned[name.end()..end].trim_end_matches(';');
        // `require` never carries an import list.
        let symbols = if keyword.as_str() == "require" {
            Vec::new()
        } else {
            parse_symbol_list(tail)
        };
        found.push((
            keyword.start(),
            Import {
                module_or_file: name.as_str().to_string(),
                symbols,
                kind: ImportKind::Module,
            },
        ));
    }

    for caps in FILE_IMPORT_RE.captures_iter(&cleaned) {
        let Some(whole) = caps.get(0) else { continue };
        let start = whole.start() + (whole.len() - whole.as_str().trim_start().len());
        if !scanner.is_code(start) {
            continue;
        }
        let Some(file) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        found.push((
            start,
            Import {
                module_or_file: file.as_str().to_string(),
                symbols: Vec::new(),
                kind: ImportKind::File,
            },
        ));
    }

    found.sort_by_key(|(offset, _)| *offset);
    merge_duplicates(found.into_iter().map(|(_, import)| import))
}

fn is_pragma(name: &str) -> bool {
    !name.contains("::") && name.chars().all(|c| !c.is_ascii_uppercase())
}

fn merge_duplicates(imports: impl Iterator<Item = Import>) -> Vec<Import> {
    let mut out: Vec<Import> = Vec::new();
    for import in imports {
        match out
            .iter_mut()
            .find(|i| i.kind == import.kind && i.module_or_file == import.module_or_file)
        {
            Some(existing) => {
                for symbol in import.symbols {
                    if !existing.symbols.contains(&symbol) {
                        existing.symbols.push(symbol);
                    }
                }
            }
            None => out.push(import),
        }
    }
    out
}

/// Symbols named after the module in a `use` statement.
fn parse_symbol_list(tail: &str) -> Vec<String> {
    let tail = VERSION_RE.replace(tail, "");
    let tail = tail.trim().trim_start_matches(',').trim();

    let mut symbols = Vec::new();
    let mut rest = tail;
    let mut saw_qw = false;
    while let Some(caps) = QW_RE.captures(rest) {
        let (Some(whole), Some(open)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        saw_qw = true;
        let open_char = open.as_str().chars().next().unwrap_or('(');
        let close_char = closing_delimiter(open_char);
        let body_start = whole.end();
        let body_end = rest[body_start..]
            .find(close_char)
            .map(|i| body_start + i)
            .unwrap_or(rest.len());
        symbols.extend(rest[body_start..body_end].split_whitespace().map(str::to_string));
        rest = &rest[(body_end + close_char.len_utf8()).min(rest.len())..];
    }
    if saw_qw {
        return normalize_symbols(symbols);
    }

    if QUOTED_RE.is_match(tail) {
        for caps in QUOTED_RE.captures_iter(tail) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                symbols.extend(m.as_str().split_whitespace().map(str::to_string));
            }
        }
        return normalize_symbols(symbols);
    }

    let bare = tail
        .split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    if bare.iter().all(|t| BAREWORD_RE.is_match(t)) {
        normalize_symbols(bare)
    } else {
        Vec::new()
    }
}

fn normalize_symbols(symbols: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol.trim_start_matches('&').to_string();
        if !symbol.is_empty() && !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}

fn closing_delimiter(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        '<' => '>',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn module(name: &str, symbols: &[&str]) -> Import {
        Import {
            module_or_file: name.to_string(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            kind: ImportKind::Module,
        }
    }

    #[test]
    fn qw_list() {
        assert_eq!(
            extract_imports("use Foo::Bar qw(a b);\n"),
            vec![module("Foo::Bar", &["a", "b"])]
        );
    }

    #[test_case("use List::Util qw/max min/;", &["max", "min"] ; "slash delimiter")]
    #[test_case("use List::Util qw{max\n  min};", &["max", "min"] ; "multiline braces")]
    #[test_case("use List::Util 'max';", &["max"] ; "single quoted")]
    #[test_case("use List::Util 'max', \"min\";", &["max", "min"] ; "several quoted")]
    #[test_case("use List::Util 1.45 qw(uniq);", &["uniq"] ; "version skipped")]
    #[test_case("use List::Util;", &[] ; "no list")]
    #[test_case("use List::Util ();", &[] ; "empty parens")]
    #[test_case("use POSIX floor, ceil;", &["floor", "ceil"] ; "bareword tail")]
    #[test_case("use Exporter::Tiny qw(&helper :all);", &["helper", ":all"] ; "ampersand and tag")]
    fn symbol_lists(src: &str, expected: &[&str]) {
        let imports = extract_imports(src);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].symbols, expected);
    }

    #[test]
    fn skips_pragmas_and_versions() {
        let src = "use strict;\nuse warnings;\nuse 5.010;\nuse v5.36;\nuse lib 'lib';\nuse App::Cart;\n";
        assert_eq!(extract_imports(src), vec![module("App::Cart", &[])]);
    }

    #[test]
    fn require_and_no_are_modules() {
        let src = "require Data::Dumper;\nno Moose;\n";
        assert_eq!(
            extract_imports(src),
            vec![module("Data::Dumper", &[]), module("Moose", &[])]
        );
    }

    #[test]
    fn file_imports() {
        let src = "require 'helpers.pl';\ndo \"config/local.pl\";\n";
        let imports = extract_imports(src);
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].module_or_file, "helpers.pl");
        assert_eq!(imports[0].kind, ImportKind::File);
        assert_eq!(imports[1].module_or_file, "config/local.pl");
    }

    #[test]
    fn duplicates_merge() {
        let src = "use Foo qw(a b);\nuse Foo qw(b c);\n";
        assert_eq!(extract_imports(src), vec![module("Foo", &["a", "b", "c"])]);
    }

    #[test]
    fn ignores_comments_pod_and_strings() {
        let src = "# use Hidden::One;\n=pod\n\nuse Hidden::Two;\n\n=cut\nmy $s = \"\nuse Hidden::Three;\n\";\nuse Real;\n";
        assert_eq!(extract_imports(src), vec![module("Real", &[])]);
    }

    #[test]
    fn keeps_source_order() {
        let src = "use B::Mod;\nrequire 'a.pl';\nuse A::Mod;\n";
        let names: Vec<_> = extract_imports(src)
            .into_iter()
            .map(|i| i.module_or_file)
            .collect();
        assert_eq!(names, vec!["B::Mod", "a.pl", "A::Mod"]);
    }
}
