//! Helpers for turning raw model replies into structured values.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::{ParseStage, PlanningError};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_-]*").expect("fence regex should be valid"));

/// Remove Markdown code-fence markers (```` ``` ```` / ```` ```json ````) and trim.
pub fn strip_code_fences(raw: &str) -> String {
    FENCE_RE.replace_all(raw, "").trim().to_string()
}

/// Strip fences and deserialize a JSON reply.
pub fn parse_json_reply<T: DeserializeOwned>(
    raw: &str,
    stage: ParseStage,
) -> Result<T, PlanningError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(&cleaned).map_err(|err| PlanningError::parse(stage, err.to_string()))
}
