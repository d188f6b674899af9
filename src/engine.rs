use crate::{
    backend::{
        interpret_response, AssistantBackend, BackendReply, BackendRequest, ContextPayload,
        RequestKind,
    },
    config::Config,
    context::{AssembledContext, ContextAssembler, ContextMode},
    coordination::{request_key, CheckCoordinator, CheckOutcome, SingleFlight},
    document::{Document, Position},
    error::EngineError,
    imports::ImportResolver,
    indexer::pipeline::{
        stats::{IndexProgress, IndexRunOutcome},
        watch::{spawn_watch, FsEvent, WatchHandle},
        IndexCoordinator, RelevantCode,
    },
};
use anyhow::{Context, Result};
use std::{path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Entry point for a host: one per workspace. Owns the semantic index, the
/// context assembler and the request bookkeeping.
pub struct Engine {
    config: Arc<Config>,
    coordinator: IndexCoordinator,
    resolver: ImportResolver,
    assembler: ContextAssembler,
    backend: Option<Arc<dyn AssistantBackend>>,
    requests: SingleFlight<BackendReply>,
    checks: CheckCoordinator,
}

impl Engine {
    pub async fn open(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let coordinator = IndexCoordinator::open(config.clone())
            .await
            .context("Failed to open semantic index")?;
        Self::from_coordinator(coordinator)
    }

    pub fn from_coordinator(coordinator: IndexCoordinator) -> Result<Self> {
        let config = coordinator.config().clone();
        let resolver = ImportResolver::new(config.clone())?;
        let assembler = ContextAssembler::new(&config);
        Ok(Self {
            config,
            coordinator,
            resolver,
            assembler,
            backend: None,
            requests: SingleFlight::new(),
            checks: CheckCoordinator::new(),
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn AssistantBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn coordinator(&self) -> &IndexCoordinator {
        &self.coordinator
    }

    pub fn resolver(&self) -> &ImportResolver {
        &self.resolver
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    pub async fn assemble_context(
        &self,
        doc: &Document,
        pos: Position,
        mode: ContextMode,
    ) -> Result<AssembledContext, EngineError> {
        self.assembler
            .assemble(doc, pos, mode, &self.coordinator, &self.resolver)
            .await
    }

    /// Asks the backend for code at the cursor. Identical requests made while
    /// one is outstanding share its reply.
    pub async fn complete(
        &self,
        doc: &Document,
        pos: Position,
        kind: RequestKind,
    ) -> Result<BackendReply, EngineError> {
        let backend = self.backend.clone().ok_or(EngineError::NoBackend)?;
        let file_name = doc.file_name();
        let version = doc.version().to_string();
        let line = pos.line.to_string();
        let character = pos.character.to_string();
        let key = request_key(&[
            file_name.as_str(),
            version.as_str(),
            line.as_str(),
            character.as_str(),
            doc.line(pos.line).unwrap_or_default(),
            kind.as_str(),
        ]);

        let assembler = self.assembler.clone();
        let coordinator = self.coordinator.clone();
        let resolver = self.resolver.clone();
        let doc = doc.clone();
        self.requests
            .submit(&key, move || async move {
                let context = assembler
                    .assemble(&doc, pos, ContextMode::Full, &coordinator, &resolver)
                    .await?;
                let request = BackendRequest {
                    kind,
                    context: ContextPayload::from(&context),
                };
                let reply = backend
                    .send(request)
                    .await
                    .context("Assistant backend request failed")?;
                Ok::<_, anyhow::Error>(interpret_response(kind, &reply))
            })
            .await
            .map_err(EngineError::Shared)
    }

    /// Runs an error check for `doc`. Starting a check supersedes any check
    /// still running; a superseded check reports `Discarded`, never a result.
    pub async fn analyze_errors(
        &self,
        doc: &Document,
        pos: Position,
    ) -> Result<CheckOutcome<BackendReply>, EngineError> {
        let backend = self.backend.clone().ok_or(EngineError::NoBackend)?;
        let epoch = self.checks.begin();

        let work = async {
            let context = self
                .assemble_context(doc, pos, ContextMode::Basic)
                .await?;
            let request = BackendRequest {
                kind: RequestKind::ErrorCheck,
                context: ContextPayload::from(&context),
            };
            let reply = backend.send(request).await.map_err(EngineError::Backend)?;
            Ok::<_, EngineError>(interpret_response(RequestKind::ErrorCheck, &reply))
        };

        tokio::select! {
            _ = epoch.token().cancelled() => {
                tracing::debug!(epoch = epoch.id(), file = %doc.file_name(), "Error check superseded");
                Ok(CheckOutcome::Discarded)
            }
            result = work => {
                if !self.checks.is_current(&epoch) {
                    return Ok(CheckOutcome::Discarded);
                }
                Ok(self.checks.publish(&epoch, result?))
            }
        }
    }

    pub fn cancel_error_check(&self) {
        self.checks.cancel_current();
    }

    pub async fn index_all<F>(&self, on_progress: F, cancel: &CancellationToken) -> Result<IndexRunOutcome>
    where
        F: Fn(IndexProgress) + Send + Sync,
    {
        self.coordinator.index_all(on_progress, cancel).await
    }

    pub async fn index_one(&self, path: &Path) -> Result<usize> {
        self.coordinator.index_one(path).await
    }

    pub async fn remove_from_index(&self, path: &Path) -> Result<()> {
        self.coordinator.remove_from_index(path).await
    }

    pub async fn find_relevant_code(&self, query: &str, limit: usize) -> Result<Vec<RelevantCode>> {
        self.coordinator.find_relevant_code(query, limit).await
    }

    pub async fn handle_event(&self, event: FsEvent) {
        self.coordinator.handle_event(event).await
    }

    pub fn spawn_watch(&self) -> Result<WatchHandle> {
        spawn_watch(self.coordinator.clone())
    }
}
