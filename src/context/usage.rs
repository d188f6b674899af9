use crate::imports::{Import, ImportKind};
use crate::indexer::extract::delimiters::DelimiterScanner;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static IMPORT_STATEMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:use|no|require)\b").expect("valid regex"));

/// Imported modules the code actually touches, with the imported symbols it
/// uses. A module referenced only as `Module->` or `Module::` maps to an
/// empty list. Import statements and comments do not count as uses.
pub fn used_modules(text: &str, imports: &[Import]) -> BTreeMap<String, Vec<String>> {
    let body = code_without_imports(text);
    let mut out = BTreeMap::new();

    for import in imports.iter().filter(|i| i.kind == ImportKind::Module) {
        let used: Vec<String> = import
            .symbols
            .iter()
            .filter(|s| !s.starts_with(':'))
            .filter(|s| symbol_pattern(s).is_some_and(|re| re.is_match(&body)))
            .cloned()
            .collect();

        let referenced = module_pattern(&import.module_or_file).is_some_and(|re| re.is_match(&body));
        if !used.is_empty() || referenced {
            out.insert(import.module_or_file.clone(), used);
        }
    }
    out
}

fn code_without_imports(text: &str) -> String {
    let scanner = DelimiterScanner::new(text);
    let mut bytes = scanner.without_comments().into_bytes();
    for m in IMPORT_STATEMENT_RE.find_iter(text) {
        let start = m.start() + (m.len() - m.as_str().trim_start().len());
        if !scanner.is_code(start) {
            continue;
        }
        let end = scanner.statement_end(start);
        for b in &mut bytes[start..end] {
            if *b != b'\n' {
                *b = b' ';
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn symbol_pattern(symbol: &str) -> Option<Regex> {
    let pattern = match symbol.chars().next()? {
        '$' | '@' | '%' => format!(r"{}\b", regex::escape(symbol)),
        _ => format!(r"(?:^|[^\w$@%:]){}\b", regex::escape(symbol)),
    };
    Regex::new(&pattern).ok()
}

fn module_pattern(module: &str) -> Option<Regex> {
    Regex::new(&format!(
        r"(?:^|[^\w$@%:]){}(?:->|::)",
        regex::escape(module)
    ))
    .ok()
}
