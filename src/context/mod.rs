//! Context around a cursor: the text window, the enclosing block, imports and
//! the symbols and variables the block depends on, plus an optional advanced
//! part drawn from the workspace and the semantic index.

pub mod block;
pub mod project;
pub mod usage;
pub mod variables;
pub mod window;

use crate::{
    config::{Config, SyntaxStrategy},
    document::{Document, Position},
    error::EngineError,
    imports::{extract_imports, Import, ImportResolution, ImportResolver},
    indexer::{
        extract::{PatternExtractor, StructureExtractor},
        pipeline::{utils::truncate_chars, IndexCoordinator, RelevantCode},
    },
    syntax,
};
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;

pub use block::FILE_SCOPE;
pub use window::TextWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    Basic,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicContext {
    pub code_prefix: String,
    pub code_suffix: String,
    pub current_block: String,
    pub imports: Vec<Import>,
    pub used_modules: BTreeMap<String, Vec<String>>,
    pub variable_definitions: Vec<String>,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdvancedContext {
    NotRequested,
    Available {
        project_structure: Vec<String>,
        import_definitions: Vec<ImportResolution>,
        related_code: Vec<RelevantCode>,
    },
    Degraded {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledContext {
    pub basic: BasicContext,
    pub advanced: AdvancedContext,
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    strategy: SyntaxStrategy,
    lines_before: usize,
    lines_after: usize,
    whole_file_max_bytes: usize,
    related_code_limit: usize,
    project_structure_limit: usize,
    max_query_chars: usize,
}

impl ContextAssembler {
    pub fn new(config: &Config) -> Self {
        Self {
            strategy: config.syntax_strategy,
            lines_before: config.context_lines_before,
            lines_after: config.context_lines_after,
            whole_file_max_bytes: config.whole_file_max_bytes,
            related_code_limit: config.related_code_limit,
            project_structure_limit: config.project_structure_limit,
            max_query_chars: config.max_embed_chars,
        }
    }

    pub fn window_around(&self, doc: &Document, pos: Position) -> TextWindow {
        window::window_around(doc, pos, self.lines_before, self.lines_after)
    }

    /// Text of the block around the cursor, or [`FILE_SCOPE`].
    pub fn enclosing_block(&self, doc: &Document, pos: Position) -> String {
        let Some(offset) = doc.offset_at(pos) else {
            return FILE_SCOPE.to_string();
        };
        match self.strategy {
            SyntaxStrategy::Tree => {
                let result = syntax::perl_parser().and_then(|mut parser| {
                    block::enclosing_block_from_tree(&mut parser, doc.text(), offset)
                });
                match result {
                    Ok(block) => block,
                    Err(err) => {
                        tracing::warn!(
                            file = %doc.file_name(),
                            error = %err,
                            "Parse failed, locating block with patterns"
                        );
                        self.pattern_block(doc, offset)
                    }
                }
            }
            SyntaxStrategy::Pattern => self.pattern_block(doc, offset),
        }
    }

    fn pattern_block(&self, doc: &Document, offset: usize) -> String {
        let entities = PatternExtractor::new(self.whole_file_max_bytes)
            .extract(&doc.file_name(), doc.text());
        block::enclosing_block_from_entities(&entities, offset)
    }

    /// Everything derivable from the document alone. Fails only when the
    /// cursor is not inside the document.
    pub fn basic(&self, doc: &Document, pos: Position) -> Result<BasicContext, EngineError> {
        if pos.line >= doc.line_count() {
            return Err(EngineError::out_of_range(
                &doc.file_name(),
                pos,
                doc.line_count(),
            ));
        }

        let window = self.window_around(doc, pos);
        let current_block = self.enclosing_block(doc, pos);
        let imports = extract_imports(doc.text());
        let used_modules = usage::used_modules(doc.text(), &imports);

        let scope = if current_block == FILE_SCOPE {
            doc.line(pos.line).unwrap_or_default()
        } else {
            current_block.as_str()
        };
        let variable_definitions = variables::variable_definitions(doc.text(), scope);

        Ok(BasicContext {
            code_prefix: window.prefix,
            code_suffix: window.suffix,
            current_block,
            imports,
            used_modules,
            variable_definitions,
            file_name: doc.file_name(),
        })
    }

    /// Basic context, plus the advanced part when `mode` asks for it. Any
    /// failure in the advanced part degrades it instead of failing the call.
    pub async fn assemble(
        &self,
        doc: &Document,
        pos: Position,
        mode: ContextMode,
        coordinator: &IndexCoordinator,
        resolver: &ImportResolver,
    ) -> Result<AssembledContext, EngineError> {
        let basic = self.basic(doc, pos)?;
        let advanced = match mode {
            ContextMode::Basic => AdvancedContext::NotRequested,
            ContextMode::Full => match self.advanced(doc, &basic, coordinator, resolver).await {
                Ok(advanced) => advanced,
                Err(err) => {
                    tracing::warn!(
                        file = %basic.file_name,
                        error = %err,
                        "Advanced context unavailable, using basic context"
                    );
                    AdvancedContext::Degraded {
                        reason: format!("{err:#}"),
                    }
                }
            },
        };
        Ok(AssembledContext { basic, advanced })
    }

    async fn advanced(
        &self,
        doc: &Document,
        basic: &BasicContext,
        coordinator: &IndexCoordinator,
        resolver: &ImportResolver,
    ) -> anyhow::Result<AdvancedContext> {
        let project_structure =
            project::project_structure(coordinator, self.project_structure_limit).await?;

        let import_definitions = {
            let resolver = resolver.clone();
            let imports = basic.imports.clone();
            let current = doc.path().to_path_buf();
            tokio::task::spawn_blocking(move || resolver.resolve_all(&imports, &current))
                .await
                .context("Import resolution task failed")?
        };

        let query = if basic.current_block == FILE_SCOPE {
            basic.code_prefix.as_str()
        } else {
            basic.current_block.as_str()
        };
        let related_code = coordinator
            .find_relevant_code(
                truncate_chars(query, self.max_query_chars),
                self.related_code_limit,
            )
            .await?;

        Ok(AdvancedContext::Available {
            project_structure,
            import_definitions,
            related_code,
        })
    }
}
