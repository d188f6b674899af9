use crate::indexer::extract::delimiters::DelimiterScanner;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([$@%])([A-Za-z_]\w*)(\s*[\[{])?").expect("valid regex"));

static DECLARATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:my|our|local|state)\b\s*(\([^)]*\)|[$@%][A-Za-z_]\w*)")
        .expect("valid regex")
});

static DECLARED_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[$@%][A-Za-z_]\w*").expect("valid regex"));

/// Variables referenced in `block`, sigil normalised to the container they
/// name: `$h{k}` is `%h`, `$a[0]` is `@a`. Order of first use.
pub fn referenced_variables(block: &str) -> Vec<String> {
    let scanner = DelimiterScanner::new(block);
    let cleaned = scanner.without_comments();
    let mut out: Vec<String> = Vec::new();
    for caps in VARIABLE_RE.captures_iter(&cleaned) {
        let (Some(sigil), Some(name)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        // `$` directly after another sigil is a dereference, not a variable.
        if sigil.start() > 0 && matches!(cleaned.as_bytes()[sigil.start() - 1], b'$' | b'@' | b'%') {
            continue;
        }
        let sigil = match (sigil.as_str(), caps.get(3).map(|m| m.as_str().trim())) {
            ("$", Some("{")) => "%",
            ("$", Some("[")) => "@",
            (s, _) => s,
        };
        let var = format!("{sigil}{}", name.as_str());
        if !out.contains(&var) {
            out.push(var);
        }
    }
    out
}

/// For each variable referenced in `block`, the statement that first
/// declares it anywhere in `document`. Statements shared by several
/// variables are reported once.
pub fn variable_definitions(document: &str, block: &str) -> Vec<String> {
    let wanted = referenced_variables(block);
    if wanted.is_empty() {
        return Vec::new();
    }

    let scanner = DelimiterScanner::new(document);
    let cleaned = scanner.without_comments();
    let mut first_decl: HashMap<String, (usize, usize)> = HashMap::new();
    for caps in DECLARATION_RE.captures_iter(&cleaned) {
        let (Some(whole), Some(declared)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !scanner.is_code(whole.start()) {
            continue;
        }
        let end = scanner.statement_end(whole.start());
        for name in DECLARED_NAME_RE.find_iter(declared.as_str()) {
            first_decl
                .entry(name.as_str().to_string())
                .or_insert((whole.start(), end));
        }
    }

    let mut seen = Vec::new();
    let mut out = Vec::new();
    for var in &wanted {
        let Some(&(start, end)) = first_decl.get(var) else {
            continue;
        };
        if seen.contains(&start) {
            continue;
        }
        seen.push(start);
        out.push(document[start..end].trim_end().to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_element_access() {
        let vars = referenced_variables("$h{key} = $a[0] + $x; push @a, %h;");
        assert_eq!(vars, vec!["%h", "@a", "$x"]);
    }

    #[test]
    fn skips_comments() {
        assert_eq!(referenced_variables("# $ghost\n$real = 1;"), vec!["$real"]);
    }

    #[test]
    fn finds_first_declaration() {
        let doc = "my $total = 0;\nmy %seen;\nsub add {\n  my ($a, $b) = @_;\n  $seen{$a}++;\n  $total += $a + $b;\n}\nmy $total = 5;\n";
        let block = "sub add {\n  my ($a, $b) = @_;\n  $seen{$a}++;\n  $total += $a + $b;\n}";
        let defs = variable_definitions(doc, block);
        assert_eq!(
            defs,
            vec!["my ($a, $b) = @_;", "my %seen;", "my $total = 0;"]
        );
    }

    #[test]
    fn multiline_declaration_is_kept_whole() {
        let doc = "our %config = (\n  name => 'x',\n);\nprint $config{name};\n";
        let defs = variable_definitions(doc, "print $config{name};");
        assert_eq!(defs, vec!["our %config = (\n  name => 'x',\n);"]);
    }

    #[test]
    fn undeclared_variables_are_skipped() {
        assert!(variable_definitions("print $x;\n", "print $x;").is_empty());
    }
}
