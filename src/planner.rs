//! Turn a deck request into an ordered list of data-service queries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::{complete, Attribution, ChatGateway, ProviderError};
use crate::llm_output::extract_json;
use crate::prompts::{planner_prompt, DEFAULT_DATA_DOMAIN};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Overrides the pipeline model for planning when set.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Static description of the data the service can answer.
    #[serde(default = "default_data_domain")]
    pub data_domain: String,
}

fn default_max_queries() -> usize {
    6
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1_024
}
fn default_data_domain() -> String {
    DEFAULT_DATA_DOMAIN.to_string()
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_queries: default_max_queries(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            data_domain: default_data_domain(),
        }
    }
}

/// Non-empty, de-duplicated query list plus the model's rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub queries: Vec<String>,
    pub rationale: String,
}

/// A plan plus the cost of producing it.
#[derive(Debug, Clone)]
pub struct PlannedQueries {
    pub plan: QueryPlan,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
    pub raw_output: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] ProviderError),
    #[error("planner output is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("planner output has no `queries` field")]
    MissingQueries,
    #[error("planner `queries` is not an array")]
    QueriesNotArray,
    #[error("planner query at position {0} is not a string")]
    NonStringQuery(usize),
    #[error("planner produced no queries")]
    NoQueries,
}

// =============================================================================
// Planning
// =============================================================================

/// One planning call. No retries; the caller decides whether to rerun.
pub async fn plan_queries(
    gateway: &dyn ChatGateway,
    model: &str,
    config: &PlannerConfig,
    request: &str,
) -> Result<PlannedQueries, PlanningError> {
    let prompt = planner_prompt(request, config.max_queries, &config.data_domain);
    let model = config.model.as_deref().unwrap_or(model);

    let resp = complete(
        gateway,
        model,
        &prompt.system,
        &prompt.user,
        config.temperature,
        config.max_tokens,
        true,
        Attribution::new("deck::planner"),
    )
    .await?;

    let mut plan = parse_plan(&resp.content)?;
    if plan.queries.len() > config.max_queries {
        tracing::debug!(
            planned = plan.queries.len(),
            max = config.max_queries,
            "truncating query plan"
        );
        plan.queries.truncate(config.max_queries.max(1));
    }

    tracing::info!(
        template = %prompt.template_slug,
        queries = plan.queries.len(),
        input_tokens = resp.input_tokens,
        output_tokens = resp.output_tokens,
        "planned data queries"
    );

    Ok(PlannedQueries {
        plan,
        input_tokens: resp.input_tokens,
        output_tokens: resp.output_tokens,
        cost_nanodollars: resp.cost_nanodollars,
        raw_output: resp.content,
    })
}

/// Parse planner output into a plan.
///
/// Blank queries are dropped and repeats removed, keeping first occurrence.
pub fn parse_plan(raw: &str) -> Result<QueryPlan, PlanningError> {
    let json_str = extract_json(raw);
    let value: Value = serde_json::from_str(json_str).map_err(|e| {
        let preview: String = raw.chars().take(300).collect();
        PlanningError::InvalidJson(format!("{e}; raw: {preview}"))
    })?;

    let Value::Object(map) = value else {
        return Err(PlanningError::InvalidJson(
            "top-level value is not an object".to_string(),
        ));
    };

    let queries = match map.get("queries") {
        None | Some(Value::Null) => return Err(PlanningError::MissingQueries),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(PlanningError::QueriesNotArray),
    };

    let mut plan_queries: Vec<String> = Vec::with_capacity(queries.len());
    for (i, item) in queries.iter().enumerate() {
        let Value::String(q) = item else {
            return Err(PlanningError::NonStringQuery(i));
        };
        let q = q.trim();
        if q.is_empty() || plan_queries.iter().any(|existing| existing == q) {
            continue;
        }
        plan_queries.push(q.to_string());
    }

    if plan_queries.is_empty() {
        return Err(PlanningError::NoQueries);
    }

    let rationale = map
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(QueryPlan {
        queries: plan_queries,
        rationale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rationale_defaults_to_empty() {
        let plan = parse_plan(r#"{"queries": ["q1"]}"#).unwrap();
        assert_eq!(plan.queries, vec!["q1"]);
        assert_eq!(plan.rationale, "");
    }

    #[test]
    fn empty_queries_fail() {
        assert!(matches!(
            parse_plan(r#"{"queries": []}"#),
            Err(PlanningError::NoQueries)
        ));
        assert!(matches!(
            parse_plan(r#"{"queries": ["  ", ""]}"#),
            Err(PlanningError::NoQueries)
        ));
    }

    #[test]
    fn structural_failures_are_distinguished() {
        assert!(matches!(
            parse_plan("not json at all"),
            Err(PlanningError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"rationale": "x"}"#),
            Err(PlanningError::MissingQueries)
        ));
        assert!(matches!(
            parse_plan(r#"{"queries": "q1"}"#),
            Err(PlanningError::QueriesNotArray)
        ));
        assert!(matches!(
            parse_plan(r#"{"queries": ["q1", 7]}"#),
            Err(PlanningError::NonStringQuery(1))
        ));
    }

    #[test]
    fn fenced_output_and_duplicates() {
        let raw = "```json\n{\"queries\": [\"a\", \" a \", \"b\"], \"rationale\": \" why \"}\n```";
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.queries, vec!["a", "b"]);
        assert_eq!(plan.rationale, "why");
    }
}
