//!
//! tabletalk response extractor
//! ----------------------------
//! Recovers exactly one structured command from whatever text the LLM
//! returned. Models routinely wrap JSON in prose or markdown fences, so
//! extraction runs in ordered stages: strip fences and parse strictly, then
//! fall back to the greedy first-`{`-to-last-`}` substring of the original
//! text. If neither parses, extraction fails loudly with the raw text kept
//! for diagnostics; it never fabricates an empty command.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// Matches a whole reply wrapped in one fenced code block, any language tag.
static FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*(.*?)\s*```$").unwrap()
});

/// The structured command recovered from LLM output.
///
/// Every field is optional on the wire and defaults when absent; absence
/// only affects gating later, never extraction. `is_modification` must be a
/// JSON boolean when present; anything else fails that parse attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedQuery {
    pub sql: String,
    pub python: String,
    pub pyspark: String,
    pub explanation: String,
    pub warning: String,
    pub is_modification: bool,
}

/// Extract a single `GeneratedQuery` from raw model output.
pub fn extract(raw: &str) -> ApiResult<GeneratedQuery> {
    let trimmed = raw.trim();

    // Stage 1+2: unwrap a fenced block if the whole reply is one, then try a
    // strict parse of the cleaned text.
    let cleaned = match FENCE_REGEX.captures(trimmed) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(trimmed),
        None => trimmed,
    };
    if let Ok(cmd) = serde_json::from_str::<GeneratedQuery>(cleaned) {
        return Ok(cmd);
    }

    // Stage 3: greedy brace span over the original text. This recovers JSON
    // surrounded by commentary at the cost of assuming one object per reply.
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Ok(cmd) = serde_json::from_str::<GeneratedQuery>(&raw[start..=end]) {
                return Ok(cmd);
            }
        }
    }

    Err(ApiError::Extraction { raw: raw.to_string() })
}
