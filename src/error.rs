//! Unified application error model.
//! One enum covers every request-level failure the service can report; each
//! variant maps to an HTTP status for the axum frontend. Query execution
//! failures are deliberately NOT here: they are contained at the gate
//! boundary and surfaced inside the response body (see `gate`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Upload called with no files at all.
    #[error("upload batch is empty")]
    EmptyBatch,

    /// A recognized file in the batch could not be parsed. Batch-abort
    /// policy: nothing from the batch is loaded when this is raised.
    #[error("failed to ingest '{file}': {message}")]
    Ingestion { file: String, message: String },

    /// Query generation requested before any upload populated the registry.
    #[error("no dataset loaded; upload one or more files first")]
    NoDataset,

    /// Blank or whitespace-only question.
    #[error("question must not be empty")]
    EmptyQuestion,

    /// No LLM client is configured (missing API key at startup).
    #[error("no language model is configured")]
    LlmUnavailable,

    /// The LLM collaborator call itself failed (network, auth, bad status).
    #[error("language model call failed: {0}")]
    Generation(String),

    /// The collaborator responded but no structured command could be
    /// recovered from its output. Carries the raw text for diagnostics.
    #[error("model output contained no recoverable command")]
    Extraction { raw: String },
}

impl ApiError {
    /// Map to an HTTP status code for the axum frontend.
    pub fn http_status(&self) -> u16 {
        match self {
            ApiError::EmptyBatch | ApiError::EmptyQuestion => 400,
            ApiError::Ingestion { .. } => 422,
            ApiError::NoDataset => 409,
            ApiError::LlmUnavailable => 503,
            ApiError::Generation(_) | ApiError::Extraction { .. } => 502,
        }
    }

    /// Stable machine-readable code for error payloads.
    pub fn code_str(&self) -> &'static str {
        match self {
            ApiError::EmptyBatch => "empty_batch",
            ApiError::Ingestion { .. } => "ingestion_error",
            ApiError::NoDataset => "no_dataset",
            ApiError::EmptyQuestion => "empty_question",
            ApiError::LlmUnavailable => "llm_unavailable",
            ApiError::Generation(_) => "generation_error",
            ApiError::Extraction { .. } => "extraction_error",
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
