//! The assistant backend seam: what the engine sends and how replies are read.

use crate::context::{AdvancedContext, AssembledContext};
use crate::imports::ImportResolution;
use crate::indexer::pipeline::RelevantCode;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Completion,
    Alternatives,
    ErrorCheck,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Completion => "completion",
            RequestKind::Alternatives => "alternatives",
            RequestKind::ErrorCheck => "error_check",
        }
    }
}

/// Request body handed to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    pub code_prefix: String,
    pub code_suffix: String,
    pub current_block: String,
    pub imports: BTreeMap<String, Vec<String>>,
    pub used_modules: BTreeMap<String, Vec<String>>,
    pub variable_definitions: Vec<String>,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_structure: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_definitions: Option<Vec<ImportResolution>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_code_structures: Option<Vec<RelevantCode>>,
}

impl From<&AssembledContext> for ContextPayload {
    fn from(ctx: &AssembledContext) -> Self {
        let basic = &ctx.basic;
        let imports = basic
            .imports
            .iter()
            .map(|i| (i.module_or_file.clone(), i.symbols.clone()))
            .collect();
        let (project_structure, import_definitions, related_code_structures) = match &ctx.advanced {
            AdvancedContext::Available {
                project_structure,
                import_definitions,
                related_code,
            } => (
                Some(project_structure.clone()),
                Some(import_definitions.clone()),
                Some(related_code.clone()),
            ),
            AdvancedContext::NotRequested | AdvancedContext::Degraded { .. } => (None, None, None),
        };

        Self {
            code_prefix: basic.code_prefix.clone(),
            code_suffix: basic.code_suffix.clone(),
            current_block: basic.current_block.clone(),
            imports,
            used_modules: basic.used_modules.clone(),
            variable_definitions: basic.variable_definitions.clone(),
            file_name: basic.file_name.clone(),
            project_structure,
            import_definitions,
            related_code_structures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendRequest {
    pub kind: RequestKind,
    pub context: ContextPayload,
}

/// Transport to the assistant. Implementations own auth, retries and
/// timeouts; the engine only sees the JSON reply.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn send(&self, request: BackendRequest) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorLocation {
    Line(u64),
    CodeChunk(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedError {
    pub location: ErrorLocation,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BackendReply {
    Code(String),
    Alternatives(Vec<String>),
    Errors(Vec<ReportedError>),
    Malformed { reason: String },
}

impl BackendReply {
    fn malformed(reason: impl Into<String>) -> Self {
        BackendReply::Malformed {
            reason: reason.into(),
        }
    }
}

/// Reads a reply by its shape. `kind` only decides what an empty array means.
pub fn interpret_response(kind: RequestKind, reply: &Value) -> BackendReply {
    match reply {
        Value::String(code) => BackendReply::Code(code.clone()),
        Value::Array(items) if items.is_empty() => match kind {
            RequestKind::ErrorCheck => BackendReply::Errors(Vec::new()),
            RequestKind::Completion | RequestKind::Alternatives => {
                BackendReply::Alternatives(Vec::new())
            }
        },
        Value::Array(items) => {
            if items.iter().all(Value::is_string) {
                string_list(items).map_or_else(
                    || BackendReply::malformed("alternatives must be strings"),
                    BackendReply::Alternatives,
                )
            } else {
                error_list(items)
            }
        }
        Value::Object(map) => {
            if let Some(code) = map.get("code") {
                return match code.as_str() {
                    Some(code) => BackendReply::Code(code.to_string()),
                    None => BackendReply::malformed("`code` is not a string"),
                };
            }
            if let Some(alternatives) = map.get("alternatives") {
                return match alternatives.as_array().and_then(|a| string_list(a)) {
                    Some(list) => BackendReply::Alternatives(list),
                    None => BackendReply::malformed("`alternatives` is not a list of strings"),
                };
            }
            if let Some(errors) = map.get("errors") {
                return match errors.as_array() {
                    Some(items) => error_list(items),
                    None => BackendReply::malformed("`errors` is not a list"),
                };
            }
            BackendReply::malformed("object has none of `code`, `alternatives`, `errors`")
        }
        Value::Null => BackendReply::malformed("empty reply"),
        Value::Bool(_) | Value::Number(_) => BackendReply::malformed("unexpected scalar reply"),
    }
}

fn string_list(items: &[Value]) -> Option<Vec<String>> {
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn error_list(items: &[Value]) -> BackendReply {
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return BackendReply::malformed(format!("error {idx} is not an object"));
        };
        let Some(message) = obj.get("message").and_then(Value::as_str) else {
            return BackendReply::malformed(format!("error {idx} has no message"));
        };
        let location = if let Some(line) = obj.get("line").and_then(Value::as_u64) {
            ErrorLocation::Line(line)
        } else if let Some(chunk) = obj
            .get("code_chunk")
            .or_else(|| obj.get("codeChunk"))
            .and_then(Value::as_str)
        {
            ErrorLocation::CodeChunk(chunk.to_string())
        } else {
            return BackendReply::malformed(format!("error {idx} has no line or code_chunk"));
        };
        out.push(ReportedError {
            location,
            message: message.to_string(),
        });
    }
    BackendReply::Errors(out)
}
