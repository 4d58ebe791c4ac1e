use std::sync::Mutex;

use async_trait::async_trait;
use deck_harness::gateway::{ChatGateway, ChatRequest, ChatResponse, ProviderError, Role};
use deck_harness::planner::{parse_plan, plan_queries, PlannerConfig};
use deck_harness::PlanningError;

/// Answers every call with the same text and remembers the requests.
struct FixedGateway {
    reply: String,
    seen: Mutex<Vec<ChatRequest>>,
}

impl FixedGateway {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatGateway for FixedGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.seen.lock().unwrap().push(req);
        let mut resp = ChatResponse::text(self.reply.clone());
        resp.input_tokens = 300;
        resp.output_tokens = 40;
        resp.cost_nanodollars = 1_500;
        Ok(resp)
    }
}

struct FailingGateway;

#[async_trait]
impl ChatGateway for FailingGateway {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        Err(ProviderError::provider("openrouter", "upstream down", true))
    }
}

#[tokio::test]
async fn plan_is_parsed_from_fenced_json_and_accounted() {
    let gateway = FixedGateway::new(
        "Here is the plan:\n```json\n{\"queries\": [\"monthly revenue for 2024\", \"revenue by region\"], \"rationale\": \"trend plus breakdown\"}\n```",
    );
    let planned = plan_queries(
        &gateway,
        "anthropic/claude-sonnet-4.5",
        &PlannerConfig::default(),
        "Q4 board deck on revenue",
    )
    .await
    .unwrap();

    assert_eq!(
        planned.plan.queries,
        vec!["monthly revenue for 2024", "revenue by region"]
    );
    assert_eq!(planned.plan.rationale, "trend plus breakdown");
    assert_eq!(planned.input_tokens, 300);
    assert_eq!(planned.cost_nanodollars, 1_500);

    let seen = gateway.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let req = &seen[0];
    assert!(req.json_mode);
    assert_eq!(req.model.model_id(), "anthropic/claude-sonnet-4.5");
    assert_eq!(req.messages[0].role, Role::System);
    assert!(req.messages[1].content.contains("Q4 board deck on revenue"));
}

#[tokio::test]
async fn planner_model_override_and_query_cap_apply() {
    let gateway = FixedGateway::new(r#"{"queries": ["a", "b", "c", "d"]}"#);
    let config = PlannerConfig {
        model: Some("openai/gpt-5-mini".into()),
        max_queries: 2,
        ..Default::default()
    };
    let planned = plan_queries(&gateway, "anthropic/claude-sonnet-4.5", &config, "deck")
        .await
        .unwrap();

    assert_eq!(planned.plan.queries, vec!["a", "b"]);
    assert_eq!(planned.plan.rationale, "");
    let seen = gateway.seen.lock().unwrap();
    assert_eq!(seen[0].model.model_id(), "openai/gpt-5-mini");
}

#[tokio::test]
async fn empty_query_list_is_a_planning_error() {
    let gateway = FixedGateway::new(r#"{"queries": [], "rationale": "nothing to ask"}"#);
    let err = plan_queries(&gateway, "m", &PlannerConfig::default(), "deck")
        .await
        .unwrap_err();
    assert!(matches!(err, PlanningError::NoQueries));
}

#[tokio::test]
async fn provider_failures_surface_as_llm_errors() {
    let err = plan_queries(&FailingGateway, "m", &PlannerConfig::default(), "deck")
        .await
        .unwrap_err();
    assert!(matches!(err, PlanningError::Llm(_)));
}

#[test]
fn malformed_plans_are_rejected_with_specific_errors() {
    assert!(matches!(
        parse_plan("no json at all"),
        Err(PlanningError::InvalidJson(_))
    ));
    assert!(matches!(
        parse_plan(r#"{"rationale": "x"}"#),
        Err(PlanningError::MissingQueries)
    ));
    assert!(matches!(
        parse_plan(r#"{"queries": "revenue"}"#),
        Err(PlanningError::QueriesNotArray)
    ));
    assert!(matches!(
        parse_plan(r#"{"queries": ["ok", 7]}"#),
        Err(PlanningError::NonStringQuery(1))
    ));
    assert!(matches!(
        parse_plan(r#"{"queries": ["  ", ""]}"#),
        Err(PlanningError::NoQueries)
    ));
}

#[test]
fn duplicate_and_padded_queries_are_normalized() {
    let plan = parse_plan(r#"{"queries": [" revenue by month ", "revenue by month", "churn"]}"#)
        .unwrap();
    assert_eq!(plan.queries, vec!["revenue by month", "churn"]);
}
