//! Linear plan files (`{"steps": [...]}`) with schema validation.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::Step;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

static PLAN_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).map_err(|err| err.to_string())?;
    jsonschema::validator_for(&schema).map_err(|err| err.to_string())
});

/// On-disk shape of a linear plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFile {
    pub steps: Vec<Step>,
}

/// Check a plan document against the bundled schema.
pub fn validate_plan_value(plan: &Value) -> Result<()> {
    let validator = PLAN_VALIDATOR
        .as_ref()
        .map_err(|err| anyhow!("invalid bundled plan schema: {err}"))?;
    let messages = validator
        .iter_errors(plan)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    if !messages.is_empty() {
        return Err(anyhow!(
            "plan schema validation failed:\n- {}",
            messages.join("\n- ")
        ));
    }
    Ok(())
}

/// Load and validate a plan file.
pub fn load_plan(path: &Path) -> Result<Vec<Step>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {}", path.display()))?;
    validate_plan_value(&value).with_context(|| format!("validate plan {}", path.display()))?;
    let plan: PlanFile = serde_json::from_value(value)
        .with_context(|| format!("deserialize plan {}", path.display()))?;
    Ok(plan.steps)
}

pub fn write_plan(path: &Path, steps: &[Step]) -> Result<()> {
    let plan = PlanFile {
        steps: steps.to_vec(),
    };
    let mut buf = serde_json::to_string_pretty(&plan)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write plan {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("plan.json");
        let mut tooling = Step::new("Search", "Search for flights");
        tooling.use_tool = true;
        tooling.tool_name = Some("search".to_string());
        let steps = vec![Step::new("Outline", "Outline the trip"), tooling];

        write_plan(&path, &steps).expect("write");
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"step_name\": \"Outline\""));

        assert_eq!(load_plan(&path).expect("load"), steps);
    }

    #[test]
    fn schema_rejects_missing_description_and_extra_fields() {
        let err = validate_plan_value(&json!({"steps": [{"step_name": "x"}]}))
            .expect_err("missing description");
        assert!(err.to_string().contains("plan schema validation failed"));

        assert!(
            validate_plan_value(&json!({
                "steps": [{"step_name": "x", "step_description": "y", "priority": 1}]
            }))
            .is_err()
        );
        assert!(validate_plan_value(&json!({"steps": []})).is_err());
    }

    #[test]
    fn load_reports_the_file_on_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bad.json");
        fs::write(&path, "{\"steps\": \"nope\"}").expect("write");
        let err = load_plan(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("bad.json"));
    }
}
