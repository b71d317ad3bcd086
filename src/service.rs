//!
//! tabletalk service layer
//! -----------------------
//! Transport-free orchestration of the upload and query-generation
//! pipelines. The HTTP layer in `server` is a thin binding over `Engine`;
//! everything testable lives here.
//!
//! Upload path: ingestion pipeline -> table store + schema registry.
//! Query path: precondition checks -> prompt -> LLM collaborator ->
//! response extractor -> query gate -> serialized rows.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::extract::extract;
use crate::gate::{run_gated, QueryOutcome};
use crate::ingest::{ingest_batch, UploadedFile};
use crate::llm::QueryGenerator;
use crate::prompt::build_prompt;
use crate::registry::SchemaRegistry;
use crate::store::TableStore;

/// Confirmation returned from a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub message: String,
    pub schemas: Vec<String>,
}

/// Full response for one generated query. `result` is `null` whenever the
/// gate blocked execution; an engine failure appears as `{ "error": ... }`
/// inside `result` while the surrounding fields stay intact.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateReport {
    pub sql: String,
    pub python: String,
    pub pyspark: String,
    pub explanation: String,
    pub warning: String,
    pub result: Option<QueryOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub ok: bool,
    pub llm_configured: bool,
}

/// Shared application engine. Cheap to clone; all clones operate on the
/// same store and registry.
#[derive(Clone)]
pub struct Engine {
    store: TableStore,
    registry: SchemaRegistry,
    generator: Option<Arc<dyn QueryGenerator>>,
}

impl Engine {
    pub fn new(store: TableStore, generator: Option<Arc<dyn QueryGenerator>>) -> Self {
        Self { store, registry: SchemaRegistry::new(), generator }
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Ingest an upload batch and publish its schemas.
    pub fn upload(&self, files: &[UploadedFile]) -> ApiResult<UploadReport> {
        let descriptors = ingest_batch(&self.store, &self.registry, files)?;
        Ok(UploadReport {
            message: "Files uploaded".to_string(),
            schemas: descriptors.iter().map(|d| d.render()).collect(),
        })
    }

    /// Generate SQL/Python/PySpark for a question and execute the SQL when
    /// the gate allows it.
    ///
    /// Precondition failures (`NoDataset`, `EmptyQuestion`, `LlmUnavailable`)
    /// are reported before any collaborator call is attempted.
    pub async fn generate(&self, question: &str) -> ApiResult<GenerateReport> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ApiError::EmptyQuestion);
        }
        if self.registry.is_empty() {
            return Err(ApiError::NoDataset);
        }
        let Some(generator) = self.generator.clone() else {
            return Err(ApiError::LlmUnavailable);
        };

        let prompt = build_prompt(&self.registry.render(), question);
        info!(target: "tabletalk::service", "generating query: question_len={}", question.len());

        // The collaborator call blocks on the network; keep it off the
        // async workers.
        let raw = tokio::task::spawn_blocking(move || generator.generate(&prompt))
            .await
            .map_err(|e| ApiError::Generation(format!("generation task failed: {e}")))?
            .map_err(|e| {
                warn!(target: "tabletalk::service", "collaborator call failed: {e:#}");
                ApiError::Generation(e.to_string())
            })?;

        let cmd = extract(&raw).inspect_err(|_| {
            warn!(target: "tabletalk::service", "extraction failed on {} bytes of model output", raw.len());
        })?;

        let result = run_gated(&self.store, &cmd);
        Ok(GenerateReport {
            sql: cmd.sql,
            python: cmd.python,
            pyspark: cmd.pyspark,
            explanation: cmd.explanation,
            warning: cmd.warning,
            result,
        })
    }

    pub fn health(&self) -> Health {
        Health { ok: true, llm_configured: self.generator.is_some() }
    }
}
