use super::{Import, ImportKind};
use crate::config::Config;
use crate::indexer::extract::delimiters::DelimiterScanner;
use crate::indexer::pipeline::scan::should_skip_dir;
use crate::indexer::pipeline::utils::truncate_chars;
use crate::path::PathNormalizer;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_]\w*$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDefinition {
    pub filepath: String,
    pub content: String,
    pub line: usize,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolResolution {
    pub qualified_name: String,
    pub definition: Option<ResolvedDefinition>,
}

/// One import with everything that could be found for it. Misses stay in
/// the list as `None` so callers can tell "not found" from "not tried".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResolution {
    pub import: Import,
    pub definition: Option<ResolvedDefinition>,
    pub symbols: Vec<SymbolResolution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefinitionForm {
    Routine,
    GlobAlias,
    AssignedRoutine,
}

impl DefinitionForm {
    fn kind(self) -> &'static str {
        match self {
            DefinitionForm::Routine | DefinitionForm::AssignedRoutine => "routine",
            DefinitionForm::GlobAlias => "alias",
        }
    }
}

#[derive(Clone)]
pub struct ImportResolver {
    config: Arc<Config>,
    paths: Arc<PathNormalizer>,
}

impl ImportResolver {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let paths = PathNormalizer::from_std_base(&config.base_dir)
            .context("Workspace root is not a UTF-8 path")?;
        Ok(Self {
            config,
            paths: Arc::new(paths),
        })
    }

    /// `Foo::Bar` -> `Foo/Bar.pm`.
    pub fn module_relative_path(module: &str) -> PathBuf {
        let mut path: PathBuf = module.split("::").filter(|p| !p.is_empty()).collect();
        path.set_extension("pm");
        path
    }

    /// Physical file for an import. Modules are tried under `lib/`, then the
    /// root, then anywhere; files next to the importer, then the root, then
    /// anywhere. The first candidate inside the workspace wins.
    pub fn locate(&self, import: &Import, current_file: &Path) -> Option<PathBuf> {
        let root = &self.config.base_dir;
        let relative = match import.kind {
            ImportKind::Module => Self::module_relative_path(&import.module_or_file),
            ImportKind::File => PathBuf::from(&import.module_or_file),
        };

        let direct = match import.kind {
            ImportKind::Module => vec![root.join("lib").join(&relative), root.join(&relative)],
            ImportKind::File => {
                let current = self.config.normalize_path_to_base(current_file);
                let dir = current.parent().unwrap_or(root).to_path_buf();
                vec![dir.join(&relative), root.join(&relative)]
            }
        };

        direct
            .into_iter()
            .find(|candidate| self.is_workspace_file(candidate))
            .or_else(|| self.search_recursive(&relative))
    }

    /// Definition text for the import itself: the located file's content.
    pub fn resolve(&self, import: &Import, current_file: &Path) -> Option<ResolvedDefinition> {
        let file = self.locate(import, current_file)?;
        let text = read_lossy(&file)?;
        Some(self.whole_file_definition(&file, &text, import.kind))
    }

    /// Where `name` is defined in `file`. The first line that defines it as a
    /// `sub`, a glob alias or an assigned anonymous routine wins.
    pub fn resolve_symbol(&self, file: &Path, name: &str) -> Option<ResolvedDefinition> {
        if !IDENTIFIER_RE.is_match(name) {
            return None;
        }
        let file = self.config.normalize_path_to_base(file);
        if !self.is_workspace_file(&file) {
            return None;
        }
        let text = read_lossy(&file)?;
        self.symbol_in_text(&file, &text, name)
    }

    pub fn resolve_all(&self, imports: &[Import], current_file: &Path) -> Vec<ImportResolution> {
        imports
            .iter()
            .map(|import| {
                let located = self
                    .locate(import, current_file)
                    .and_then(|file| read_lossy(&file).map(|text| (file, text)));
                if located.is_none() {
                    tracing::debug!(import = %import.module_or_file, "Import not found in workspace");
                }

                let definition = located
                    .as_ref()
                    .map(|(file, text)| self.whole_file_definition(file, text, import.kind));

                let symbols = import
                    .symbols
                    .iter()
                    .filter(|s| !s.starts_with(':'))
                    .map(|symbol| SymbolResolution {
                        qualified_name: format!("{}::{}", import.module_or_file, symbol),
                        definition: located.as_ref().and_then(|(file, text)| {
                            IDENTIFIER_RE
                                .is_match(symbol)
                                .then(|| self.symbol_in_text(file, text, symbol))
                                .flatten()
                        }),
                    })
                    .collect();

                ImportResolution {
                    import: import.clone(),
                    definition,
                    symbols,
                }
            })
            .collect()
    }

    fn whole_file_definition(&self, file: &Path, text: &str, kind: ImportKind) -> ResolvedDefinition {
        ResolvedDefinition {
            filepath: self.display_key(file),
            content: truncate_chars(text, self.config.whole_file_max_bytes).to_string(),
            line: 1,
            kind: match kind {
                ImportKind::Module => "module",
                ImportKind::File => "file",
            }
            .to_string(),
        }
    }

    fn symbol_in_text(&self, file: &Path, text: &str, name: &str) -> Option<ResolvedDefinition> {
        let (start, end, line, form) = find_definition(text, name)?;
        Some(ResolvedDefinition {
            filepath: self.display_key(file),
            content: text[start..end].to_string(),
            line,
            kind: form.kind().to_string(),
        })
    }

    fn display_key(&self, file: &Path) -> String {
        self.paths
            .index_key(file)
            .unwrap_or_else(|_| file.to_string_lossy().replace('\\', "/"))
    }

    fn is_workspace_file(&self, path: &Path) -> bool {
        path.is_file() && self.paths.index_key(path).is_ok()
    }

    fn search_recursive(&self, relative: &Path) -> Option<PathBuf> {
        let mut matches = Vec::new();
        let mut stack = vec![self.config.base_dir.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    if !should_skip_dir(&self.config, &path) {
                        stack.push(path);
                    }
                } else if file_type.is_file() && path.ends_with(relative) {
                    matches.push(path);
                }
            }
        }
        matches.sort();
        matches.into_iter().next()
    }
}

fn read_lossy(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) => {
            tracing::debug!(file = %path.display(), error = %err, "Failed to read import target");
            None
        }
    }
}

/// `(start, end, 1-based line, form)` of the first definition of `name`.
fn find_definition(text: &str, name: &str) -> Option<(usize, usize, usize, DefinitionForm)> {
    let escaped = regex::escape(name);
    let patterns = [
        (
            DefinitionForm::Routine,
            Regex::new(&format!(r"^[ \t]*(sub\s+(?:\w+::)*{escaped}\b)")).ok()?,
        ),
        (
            DefinitionForm::GlobAlias,
            Regex::new(&format!(r"^[ \t]*(\*(?:\w+::)*{escaped}\s*=)")).ok()?,
        ),
        (
            DefinitionForm::AssignedRoutine,
            Regex::new(&format!(
                r"^[ \t]*((?:(?:my|our)\s+)?\${escaped}\s*=\s*sub\b)"
            ))
            .ok()?,
        ),
    ];

    let scanner = DelimiterScanner::new(text);
    let mut offset = 0;
    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let line_offset = offset;
        offset += line.len();

        for (form, re) in &patterns {
            let Some(m) = re.captures(line).and_then(|c| c.get(1)) else {
                continue;
            };
            let start = line_offset + m.start();
            if !scanner.is_code(start) {
                continue;
            }
            let end = match form {
                DefinitionForm::Routine => match scanner.block_end(start) {
                    Some(end) => end,
                    // Forward declaration; keep looking.
                    None => continue,
                },
                DefinitionForm::GlobAlias => scanner.statement_end(start),
                DefinitionForm::AssignedRoutine => scanner
                    .block_end(start)
                    .map(|end| scanner.statement_end(end).max(end))
                    .unwrap_or_else(|| scanner.statement_end(start)),
            };
            return Some((start, end, idx + 1, *form));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, ImportResolver) {
        let dir = tempfile::tempdir().unwrap();
        for (rel, body) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        let config = Arc::new(Config::for_base_dir(dir.path()));
        let resolver = ImportResolver::new(config).unwrap();
        (dir, resolver)
    }

    fn module(name: &str, symbols: &[&str]) -> Import {
        Import {
            module_or_file: name.to_string(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            kind: ImportKind::Module,
        }
    }

    fn file(name: &str) -> Import {
        Import {
            module_or_file: name.to_string(),
            symbols: Vec::new(),
            kind: ImportKind::File,
        }
    }

    #[test]
    fn module_path() {
        assert_eq!(
            ImportResolver::module_relative_path("Foo::Bar::Baz"),
            PathBuf::from("Foo/Bar/Baz.pm")
        );
    }

    #[test]
    fn prefers_lib_then_root_then_anywhere() {
        let (_dir, r) = setup(&[
            ("lib/Foo/Bar.pm", "package Foo::Bar; # lib\n1;\n"),
            ("Foo/Bar.pm", "package Foo::Bar; # root\n1;\n"),
            ("vendorish/Foo/Bar.pm", "package Foo::Bar; # deep\n1;\n"),
        ]);
        let found = r.resolve(&module("Foo::Bar", &[]), Path::new("bin/run.pl")).unwrap();
        assert_eq!(found.filepath, "lib/Foo/Bar.pm");
        assert_eq!(found.kind, "module");
        assert_eq!(found.line, 1);
    }

    #[test]
    fn falls_back_to_recursive_search() {
        let (_dir, r) = setup(&[
            ("modules/b/Foo/Bar.pm", "1;\n"),
            ("modules/a/Foo/Bar.pm", "1;\n"),
        ]);
        let found = r.resolve(&module("Foo::Bar", &[]), Path::new("x.pl")).unwrap();
        assert_eq!(found.filepath, "modules/a/Foo/Bar.pm");
    }

    #[test]
    fn recursive_search_skips_excluded_dirs() {
        let (_dir, r) = setup(&[("blib/lib/Foo.pm", "1;\n")]);
        assert!(r.resolve(&module("Foo", &[]), Path::new("x.pl")).is_none());
    }

    #[test]
    fn file_imports_prefer_the_importers_directory() {
        let (_dir, r) = setup(&[
            ("bin/helpers.pl", "# bin\n"),
            ("helpers.pl", "# root\n"),
        ]);
        let found = r.resolve(&file("helpers.pl"), Path::new("bin/run.pl")).unwrap();
        assert_eq!(found.filepath, "bin/helpers.pl");
        assert_eq!(found.kind, "file");

        let found = r.resolve(&file("helpers.pl"), Path::new("t/basic.t")).unwrap();
        assert_eq!(found.filepath, "helpers.pl");
    }

    #[test]
    fn file_imports_cannot_escape_workspace() {
        let outer = tempfile::tempdir().unwrap();
        let workspace = outer.path().join("ws");
        fs::create_dir_all(&workspace).unwrap();
        fs::write(outer.path().join("secret.pl"), "1;\n").unwrap();
        let r = ImportResolver::new(Arc::new(Config::for_base_dir(&workspace))).unwrap();

        assert!(r.resolve(&file("../secret.pl"), Path::new("run.pl")).is_none());
    }

    #[test_case("sub trim {\n  return 1;\n}\n", "trim", "sub trim {\n  return 1;\n}", "routine" ; "named sub")]
    #[test_case("*trim = \\&strip;\n", "trim", "*trim = \\&strip;", "alias" ; "glob alias")]
    #[test_case("our $trim = sub { 1 };\n", "trim", "$trim = sub { 1 };", "routine" ; "assigned sub")]
    #[test_case("sub trim;\nsub trim { 2 }\n", "trim", "sub trim { 2 }", "routine" ; "skips forward declaration")]
    #[test_case("sub trim_all { 1 }\nsub trim { 2 }\n", "trim", "sub trim { 2 }", "routine" ; "word boundary")]
    #[test_case("sub trim {\n  return if $_[0] =~ /^#/;\n  return $_[0];\n}\n", "trim", "return $_[0];\n}", "routine" ; "match literal with hash")]
    fn finds_definitions(src: &str, name: &str, expected: &str, kind: &str) {
        let (start, end, _, form) = find_definition(src, name).unwrap();
        let content = &src[start..end];
        assert!(content.ends_with(expected), "{content}");
        assert_eq!(form.kind(), kind);
    }

    #[test]
    fn first_matching_line_wins() {
        let src = "*helper = \\&other;\nsub helper { 1 }\n";
        let (_, _, line, form) = find_definition(src, "helper").unwrap();
        assert_eq!(line, 1);
        assert_eq!(form, DefinitionForm::GlobAlias);
    }

    #[test]
    fn ignores_definitions_in_pod() {
        let src = "=head1 EXAMPLE\n\nsub helper { 0 }\n\n=cut\n\nsub helper { 1 }\n";
        let (_, _, line, _) = find_definition(src, "helper").unwrap();
        assert_eq!(line, 7);
    }

    #[test]
    fn rejects_non_identifiers() {
        let (_dir, r) = setup(&[("lib/Foo.pm", "sub a { 1 }\n")]);
        assert!(r.resolve_symbol(Path::new("lib/Foo.pm"), ":all").is_none());
        assert!(r.resolve_symbol(Path::new("lib/Foo.pm"), "a.*").is_none());
        assert!(r.resolve_symbol(Path::new("lib/Foo.pm"), "a").is_some());
    }

    #[test]
    fn resolve_all_keeps_misses() {
        let (_dir, r) = setup(&[(
            "lib/Foo/Bar.pm",
            "package Foo::Bar;\nsub a {\n  1;\n}\n1;\n",
        )]);
        let imports = vec![module("Foo::Bar", &["a", "b", ":all"]), module("Missing::Mod", &["x"])];
        let out = r.resolve_all(&imports, Path::new("bin/run.pl"));

        assert_eq!(out.len(), 2);
        assert!(out[0].definition.is_some());
        assert_eq!(out[0].symbols.len(), 2);
        assert_eq!(out[0].symbols[0].qualified_name, "Foo::Bar::a");
        let a = out[0].symbols[0].definition.as_ref().unwrap();
        assert_eq!(a.line, 2);
        assert_eq!(a.content, "sub a {\n  1;\n}");
        assert_eq!(out[0].symbols[1].qualified_name, "Foo::Bar::b");
        assert!(out[0].symbols[1].definition.is_none());

        assert!(out[1].definition.is_none());
        assert_eq!(out[1].symbols[0].qualified_name, "Missing::Mod::x");
        assert!(out[1].symbols[0].definition.is_none());
    }
}
