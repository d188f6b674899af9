//! CLI argument parsing and help text

use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Index,
    Search { query: String, limit: usize },
    /// `line` and `column` are 1-based, as editors show them.
    Context { file: PathBuf, line: usize, column: usize },
    Watch,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Index => "index",
            Command::Search { .. } => "search",
            Command::Context { .. } => "context",
            Command::Watch => "watch",
        }
    }
}

const DEFAULT_SEARCH_LIMIT: usize = 10;

pub fn wants_help(args: &[String]) -> bool {
    args.iter()
        .skip(1)
        .any(|a| a == "-h" || a == "--help" || a == "help")
}

pub fn wants_version(args: &[String]) -> bool {
    args.iter()
        .skip(1)
        .any(|a| a == "-V" || a == "--version" || a == "version")
}

/// Subcommand from `args` (program name first). No subcommand means `index`.
pub fn parse_command(args: &[String]) -> Result<Command> {
    let mut rest = args.iter().skip(1).map(String::as_str);
    match rest.next() {
        None | Some("index") => Ok(Command::Index),
        Some("watch") => Ok(Command::Watch),
        Some("search") => {
            let query = rest
                .next()
                .ok_or_else(|| anyhow!("search needs a query"))?
                .to_string();
            let limit = match rest.next() {
                Some(raw) => parse_number("limit", raw)?,
                None => DEFAULT_SEARCH_LIMIT,
            };
            Ok(Command::Search { query, limit })
        }
        Some("context") => {
            let file = rest
                .next()
                .ok_or_else(|| anyhow!("context needs <file> <line> <column>"))?;
            let line = parse_number("line", rest.next().unwrap_or(""))?;
            let column = parse_number("column", rest.next().unwrap_or(""))?;
            if line == 0 || column == 0 {
                bail!("line and column start at 1");
            }
            Ok(Command::Context {
                file: PathBuf::from(file),
                line,
                column,
            })
        }
        Some(other) => bail!("unknown command: {other} (see --help)"),
    }
}

fn parse_number(what: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow!("{what} must be a number, got {raw:?}"))
}

pub fn print_help() {
    println!("codebase-context-engine");
    println!();
    println!("Semantic index and cursor context for Perl workspaces.");
    println!();
    println!("Usage:");
    println!("  codebase-context-engine [index]");
    println!("  codebase-context-engine search <query> [limit]");
    println!("  codebase-context-engine context <file> <line> <column>   (1-based)");
    println!("  codebase-context-engine watch");
    println!("  codebase-context-engine --help");
    println!("  codebase-context-engine --version");
    println!();
    println!("Results are printed as JSON on stdout; logs go to stderr.");
    println!();
    println!("Required env:");
    println!("  BASE_DIR=/absolute/path/to/workspace");
    println!();
    println!("Common env (defaults shown):");
    println!("  VECTOR_DB_PATH=./.ctxeng/vectors      (resolved under BASE_DIR if relative)");
    println!("  EMBEDDINGS_BACKEND=fastembed|hash     (default: fastembed)");
    println!("  EMBEDDINGS_MODEL_REPO=org/repo        (default: BAAI/bge-base-en-v1.5)");
    println!("  EMBEDDINGS_MODEL_DIR=/path/to/cache");
    println!("  EMBEDDINGS_DEVICE=cpu|metal           (default: cpu)");
    println!("  EMBEDDING_BATCH_SIZE=32");
    println!("  SOURCE_EXTENSIONS=pl,pm,t");
    println!("  SYNTAX_STRATEGY=tree|pattern          (default: tree)");
    println!("  CONTEXT_LINES_BEFORE=50  CONTEXT_LINES_AFTER=20");
    println!("  WATCH_DEBOUNCE_MS=250");
    println!("  LOG_DIR=/path/to/logs                 (daily rolling file, in addition to stderr)");
    println!("  RUST_LOG=info");
}

pub fn print_version() {
    println!("{}", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("bin")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn wants_help_and_version_detect_common_flags() {
        assert!(wants_help(&args(&["--help"])));
        assert!(wants_help(&args(&["-h"])));
        assert!(wants_version(&args(&["--version"])));
        assert!(wants_version(&args(&["-V"])));
        assert!(!wants_help(&args(&[])));
        assert!(!wants_version(&args(&[])));
    }

    #[test_case(&[], Command::Index ; "default")]
    #[test_case(&["watch"], Command::Watch ; "watch")]
    #[test_case(&["search", "parse config"], Command::Search { query: "parse config".into(), limit: 10 } ; "search default limit")]
    #[test_case(&["search", "trim", "3"], Command::Search { query: "trim".into(), limit: 3 } ; "search limit")]
    #[test_case(&["context", "lib/A.pm", "12", "5"], Command::Context { file: "lib/A.pm".into(), line: 12, column: 5 } ; "context")]
    fn parses(list: &[&str], expected: Command) {
        assert_eq!(parse_command(&args(list)).unwrap(), expected);
    }

    #[test_case(&["search"] ; "search without query")]
    #[test_case(&["context", "a.pl", "x", "1"] ; "bad line")]
    #[test_case(&["context", "a.pl", "0", "1"] ; "zero line")]
    #[test_case(&["frobnicate"] ; "unknown")]
    fn rejects(list: &[&str]) {
        assert!(parse_command(&args(list)).is_err());
    }
}
