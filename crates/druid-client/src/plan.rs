//! Parsing of `EXPLAIN PLAN FOR` output.

use crate::error::{ClientError, Result};
use serde_json::Value;

const PLAN_MARKER: &str = "DruidQueryRel(query=[";
const SIG_MARKER: &str = "], signature=[{";
const TAIL_MARKER: &str = "}])";

/// A Druid query plan.
///
/// Plans of native queries (`DruidQueryRel`) are split into the native query
/// JSON, the output signature and the referenced resources. Plans of system
/// table scans only carry the raw text.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    row: Value,
    plan_text: String,
    plan_json: Option<Value>,
    columns: Vec<String>,
    types: Vec<String>,
    resources: Option<Value>,
}

impl QueryPlan {
    /// Parse an explain row (an object with `PLAN` and `RESOURCES` columns).
    pub fn from_row(row: Value) -> Result<Self> {
        let plan_text = row
            .get("PLAN")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::InvalidResponse("explain row has no PLAN".to_string()))?
            .to_string();

        let mut plan = QueryPlan {
            row,
            plan_text,
            plan_json: None,
            columns: Vec::new(),
            types: Vec::new(),
            resources: None,
        };

        let (Some(body), Some(sig_pos)) = (
            plan.plan_text.strip_prefix(PLAN_MARKER),
            plan.plan_text.find(SIG_MARKER),
        ) else {
            return Ok(plan);
        };
        let json_text = &body[..sig_pos - PLAN_MARKER.len()];
        plan.plan_json = Some(serde_json::from_str(json_text)?);

        let signature = plan.plan_text[sig_pos + SIG_MARKER.len()..].trim_end();
        let signature = signature.strip_suffix(TAIL_MARKER).unwrap_or(signature);
        for col in signature.split(", ") {
            if let Some((name, sql_type)) = col.split_once(':') {
                plan.columns.push(name.to_string());
                plan.types.push(sql_type.to_string());
            }
        }

        plan.resources = match plan.row.get("RESOURCES") {
            Some(Value::String(text)) => Some(serde_json::from_str(text)?),
            Some(other) if !other.is_null() => Some(other.clone()),
            _ => None,
        };
        Ok(plan)
    }

    /// The explain row as returned by Druid.
    pub fn row(&self) -> &Value {
        &self.row
    }

    /// Raw plan text.
    pub fn plan(&self) -> &str {
        &self.plan_text
    }

    /// Native query JSON, for native query plans.
    pub fn plan_details(&self) -> Option<&Value> {
        self.plan_json.as_ref()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    /// Tables and other resources the query reads.
    pub fn resources(&self) -> Option<&Value> {
        self.resources.as_ref()
    }
}

impl std::fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.plan_text)
    }
}
