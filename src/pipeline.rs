//! Request → deck pipeline and slide-edit loop.
//!
//! New deck: plan → execute → summarize → generate → parse.
//! Edit: generate (edit mode) → reconcile, retried with the rejection fed
//! back to the model, then applied to the caller's deck.
//!
//! Stages run strictly one after another; only query execution fans out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::cache::QueryCache;
use crate::config::PipelineConfig;
use crate::dataservice::{ConversationHandle, DataService};
use crate::deck::{DeckError, SlideDeck};
use crate::executor::{QueryExecutor, QueryOutcome, QueryResult};
use crate::gateway::ChatGateway;
use crate::generation::{generate_html, GenerationError, GenerationInput, GenerationMode};
use crate::planner::{plan_queries, PlanningError};
use crate::prompts::EditContext;
use crate::reconcile::{reconcile, validate_indices, ReconciliationError, ReplacementPatch};
use crate::summarize::{estimate_tokens, summarize, SummarizedResult};
use crate::trace::{PipelineTrace, Stage, TraceSink};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub original_rows: usize,
    pub summarized_rows: usize,
    pub original_tokens: usize,
    pub summarized_tokens: usize,
    pub queries_failed: usize,
}

impl CompressionStats {
    /// Summarized tokens over original tokens; 1.0 when nothing was retrieved.
    pub fn token_ratio(&self) -> f64 {
        if self.original_tokens == 0 {
            1.0
        } else {
            self.summarized_tokens as f64 / self.original_tokens as f64
        }
    }
}

/// One planned query and what the generation prompt saw for it.
#[derive(Debug, Clone, Serialize)]
pub struct QuerySummary {
    pub query: String,
    pub cached: bool,
    pub latency_ms: u64,
    pub result: SummarizedResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewDeckOutput {
    pub html: String,
    pub deck: SlideDeck,
    pub queries_planned: Vec<String>,
    pub rationale: String,
    pub summaries: Vec<QuerySummary>,
    pub compression_stats: CompressionStats,
    pub slide_count: usize,
    pub conversation: ConversationHandle,
    pub trace: PipelineTrace,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditOutput {
    pub patch: ReplacementPatch,
    pub attempts: u32,
    pub trace: PipelineTrace,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub patch: ReplacementPatch,
    pub attempts: u32,
    /// Slide count after the patch was applied.
    pub slide_count: usize,
    pub trace: PipelineTrace,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("Deck error: {0}")]
    Deck(#[from] DeckError),
    #[error("Edit rejected: {0}")]
    Reconciliation(#[from] ReconciliationError),
    #[error("Edit rejected after {attempts} attempts: {last_error}")]
    EditAttemptsExhausted { attempts: u32, last_error: String },
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct DeckPipeline {
    gateway: Arc<dyn ChatGateway>,
    executor: QueryExecutor,
    config: PipelineConfig,
    trace_sink: Option<Arc<dyn TraceSink>>,
}

impl DeckPipeline {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        service: Arc<dyn DataService>,
        config: PipelineConfig,
    ) -> Self {
        let executor = QueryExecutor::new(service, config.executor.clone());
        Self {
            gateway,
            executor,
            config,
            trace_sink: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.executor = self.executor.with_cache(cache);
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Build a new deck in a fresh data-service conversation.
    pub async fn generate_new(
        &self,
        request: &str,
        max_slides: usize,
    ) -> Result<NewDeckOutput, PipelineError> {
        self.generate_new_in(request, max_slides, &ConversationHandle::fresh())
            .await
    }

    /// Build a new deck, continuing the caller's data-service conversation.
    pub async fn generate_new_in(
        &self,
        request: &str,
        max_slides: usize,
        conversation: &ConversationHandle,
    ) -> Result<NewDeckOutput, PipelineError> {
        if request.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "request must not be empty".into(),
            ));
        }
        if max_slides == 0 {
            return Err(PipelineError::InvalidRequest(
                "max_slides must be at least 1".into(),
            ));
        }

        let mut trace = PipelineTrace::new();
        let sink = self.trace_sink.as_deref();
        tracing::info!(run_id = %trace.run_id, max_slides, "starting new deck");

        // --- Plan ---
        let started = Instant::now();
        let planned = match plan_queries(
            self.gateway.as_ref(),
            &self.config.model,
            &self.config.planner,
            request,
        )
        .await
        {
            Ok(planned) => planned,
            Err(e) => {
                let event = trace
                    .event(Stage::Plan, "planning failed")
                    .latency(elapsed_ms(started))
                    .error(e.to_string());
                trace.push(event, sink);
                return Err(e.into());
            }
        };
        let event = trace
            .event(
                Stage::Plan,
                format!("{} queries planned", planned.plan.queries.len()),
            )
            .latency(elapsed_ms(started))
            .tokens(planned.input_tokens, planned.output_tokens)
            .cost(planned.cost_nanodollars);
        trace.push(event, sink);
        let plan = planned.plan;

        // --- Execute ---
        let started = Instant::now();
        let mut results = self.executor.execute_all(&plan.queries, conversation).await;
        let failed = results.values().filter(|r| !r.is_success()).count();
        let event = trace
            .event(
                Stage::Execute,
                format!("{} queries, {failed} failed", results.len()),
            )
            .latency(elapsed_ms(started));
        trace.push(event, sink);

        // --- Summarize ---
        let started = Instant::now();
        let (summaries, stats, next_conversation) =
            self.summarize_results(&plan.queries, &mut results, conversation);
        let event = trace
            .event(
                Stage::Summarize,
                format!(
                    "{} -> {} rows, {} -> {} tokens",
                    stats.original_rows,
                    stats.summarized_rows,
                    stats.original_tokens,
                    stats.summarized_tokens
                ),
            )
            .latency(elapsed_ms(started));
        trace.push(event, sink);

        // --- Generate ---
        let data_sections: Vec<String> = summaries
            .iter()
            .map(|s| s.result.to_prompt_section(&s.query))
            .collect();
        let generated = match generate_html(
            self.gateway.as_ref(),
            &self.config.model,
            &self.config.generation,
            GenerationInput {
                request,
                data_sections,
                mode: GenerationMode::NewDeck { max_slides },
            },
        )
        .await
        {
            Ok(generated) => generated,
            Err(e) => {
                let event = trace
                    .event(Stage::Generate, "generation failed")
                    .error(e.to_string());
                trace.push(event, sink);
                return Err(e.into());
            }
        };
        let event = trace
            .event(Stage::Generate, format!("{} chars", generated.html.len()))
            .latency(generated.latency_ms)
            .tokens(generated.input_tokens, generated.output_tokens)
            .cost(generated.cost_nanodollars);
        trace.push(event, sink);

        // --- Parse ---
        let started = Instant::now();
        let mut deck = SlideDeck::parse(&generated.html)?;
        let mut html = generated.html;
        if deck.len() > max_slides {
            tracing::warn!(
                generated = deck.len(),
                max_slides,
                "model exceeded the slide cap; dropping trailing slides"
            );
            deck.truncate(max_slides);
            html = deck.knit();
        }
        let event = trace
            .event(Stage::Parse, format!("{} slides", deck.len()))
            .latency(elapsed_ms(started));
        trace.push(event, sink);

        let (input_tokens, output_tokens) = trace.total_tokens();
        tracing::info!(
            run_id = %trace.run_id,
            slides = deck.len(),
            queries_failed = stats.queries_failed,
            input_tokens,
            output_tokens,
            cost_usd = trace.total_cost_nanodollars() as f64 / 1e9,
            "deck generated"
        );

        Ok(NewDeckOutput {
            slide_count: deck.len(),
            html,
            deck,
            queries_planned: plan.queries,
            rationale: plan.rationale,
            summaries,
            compression_stats: stats,
            conversation: next_conversation,
            trace,
        })
    }

    /// Regenerate `existing_slide_htmls` (the slides at `original_indices`).
    ///
    /// Only checks the replacement against itself; see [`Self::edit_deck`] for
    /// checks against the rest of a deck.
    pub async fn generate_edit(
        &self,
        request: &str,
        existing_slide_htmls: &[String],
        original_indices: &[usize],
    ) -> Result<EditOutput, PipelineError> {
        validate_edit_request(request, existing_slide_htmls, original_indices)?;
        let mut trace = PipelineTrace::new();
        let (patch, attempts) = self
            .edit_loop(
                request,
                existing_slide_htmls,
                original_indices,
                EditContext::default(),
                |_| Ok(()),
                &mut trace,
            )
            .await?;
        Ok(EditOutput {
            patch,
            attempts,
            trace,
        })
    }

    /// Edit the slides at `original_indices` of `deck` in place.
    ///
    /// Replacement canvas IDs must not collide with untouched slides. On any
    /// error `deck` is left as it was.
    pub async fn edit_deck(
        &self,
        deck: &mut SlideDeck,
        request: &str,
        original_indices: &[usize],
    ) -> Result<EditOutcome, PipelineError> {
        let range = validate_indices(original_indices)?;
        if range.end > deck.len() {
            return Err(DeckError::IndexOutOfRange {
                index: range.end - 1,
                len: deck.len(),
            }
            .into());
        }
        let slide_htmls: Vec<String> = deck.slides[range.clone()]
            .iter()
            .map(|s| s.html.clone())
            .collect();
        validate_edit_request(request, &slide_htmls, original_indices)?;
        let context = EditContext {
            chart_scripts: deck.chart_scripts_for(range.clone()),
            reserved_canvas_ids: deck.canvas_ids_outside(range).into_iter().collect(),
        };

        let mut trace = PipelineTrace::new();
        let (patch, attempts) = {
            let current: &SlideDeck = deck;
            self.edit_loop(
                request,
                &slide_htmls,
                original_indices,
                context,
                |patch| patch.check_collisions(current),
                &mut trace,
            )
            .await?
        };

        let started = Instant::now();
        patch.apply(deck)?;
        let event = trace
            .event(
                Stage::Apply,
                format!("net change {:+}, {} slides", patch.net_change, deck.len()),
            )
            .latency(elapsed_ms(started));
        trace.push(event, self.trace_sink.as_deref());

        Ok(EditOutcome {
            slide_count: deck.len(),
            patch,
            attempts,
            trace,
        })
    }

    async fn edit_loop(
        &self,
        request: &str,
        slide_htmls: &[String],
        original_indices: &[usize],
        context: EditContext,
        accept: impl Fn(&ReplacementPatch) -> Result<(), ReconciliationError>,
        trace: &mut PipelineTrace,
    ) -> Result<(ReplacementPatch, u32), PipelineError> {
        let sink = self.trace_sink.as_deref();
        let max_attempts = self.config.max_edit_attempts.max(1);
        let mut feedback: Option<String> = None;

        for attempt in 1..=max_attempts {
            let generated = generate_html(
                self.gateway.as_ref(),
                &self.config.model,
                &self.config.generation,
                GenerationInput {
                    request,
                    data_sections: Vec::new(),
                    mode: GenerationMode::Edit {
                        slide_htmls: slide_htmls.to_vec(),
                        context: context.clone(),
                        feedback: feedback.take(),
                    },
                },
            )
            .await;

            let generated = match generated {
                Ok(generated) => generated,
                Err(GenerationError::Unusable(reason)) => {
                    let event = trace
                        .event(Stage::Generate, "unusable edit output")
                        .attempt(attempt)
                        .error(reason.clone());
                    trace.push(event, sink);
                    if attempt == max_attempts {
                        return Err(GenerationError::Unusable(reason).into());
                    }
                    feedback = Some(format!("Your previous answer was unusable: {reason}"));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let event = trace
                .event(Stage::Generate, format!("{} chars", generated.html.len()))
                .attempt(attempt)
                .latency(generated.latency_ms)
                .tokens(generated.input_tokens, generated.output_tokens)
                .cost(generated.cost_nanodollars);
            trace.push(event, sink);

            let outcome = reconcile(&generated.html, original_indices)
                .and_then(|patch| accept(&patch).map(|()| patch));

            match outcome {
                Ok(patch) => {
                    let event = trace
                        .event(
                            Stage::Reconcile,
                            format!(
                                "{} -> {} slides",
                                patch.original_indices.len(),
                                patch.replacement_slides.len()
                            ),
                        )
                        .attempt(attempt);
                    trace.push(event, sink);
                    return Ok((patch, attempt));
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, error = %e, "edit response rejected");
                    let event = trace
                        .event(Stage::Reconcile, "edit rejected")
                        .attempt(attempt)
                        .error(e.to_string());
                    trace.push(event, sink);
                    if attempt == max_attempts {
                        if max_attempts == 1 {
                            return Err(e.into());
                        }
                        return Err(PipelineError::EditAttemptsExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    feedback = Some(e.to_string());
                }
            }
        }

        Err(PipelineError::InvalidRequest(
            "max_edit_attempts must be at least 1".into(),
        ))
    }

    fn summarize_results(
        &self,
        queries: &[String],
        results: &mut HashMap<String, QueryResult>,
        conversation: &ConversationHandle,
    ) -> (Vec<QuerySummary>, CompressionStats, ConversationHandle) {
        let mut stats = CompressionStats::default();
        let mut summaries = Vec::with_capacity(queries.len());
        let mut next_conversation = conversation.clone();

        for query in queries {
            let Some(result) = results.remove(query) else {
                continue;
            };
            let summarized = match &result.outcome {
                QueryOutcome::Success {
                    payload,
                    conversation,
                } => {
                    stats.original_tokens += estimate_tokens(&payload.to_json_string());
                    if !conversation.is_fresh() {
                        next_conversation = conversation.clone();
                    }
                    summarize(payload, query, &self.config.summarizer)
                }
                QueryOutcome::Failure { reason } => {
                    stats.queries_failed += 1;
                    SummarizedResult::error(reason.clone())
                }
            };

            stats.original_rows += summarized.original_row_count();
            stats.summarized_rows += summarized.summarized_row_count();
            stats.summarized_tokens += estimate_tokens(&summarized.to_prompt_section(query));

            summaries.push(QuerySummary {
                query: query.clone(),
                cached: result.cached,
                latency_ms: result.latency_ms,
                result: summarized,
            });
        }

        (summaries, stats, next_conversation)
    }
}

fn validate_edit_request(
    request: &str,
    slide_htmls: &[String],
    original_indices: &[usize],
) -> Result<(), PipelineError> {
    if request.trim().is_empty() {
        return Err(PipelineError::InvalidRequest(
            "edit request must not be empty".into(),
        ));
    }
    validate_indices(original_indices)?;
    if slide_htmls.len() != original_indices.len() {
        return Err(PipelineError::InvalidRequest(format!(
            "{} slides supplied for {} indices",
            slide_htmls.len(),
            original_indices.len()
        )));
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_ratio_handles_empty_runs() {
        let stats = CompressionStats::default();
        assert_eq!(stats.token_ratio(), 1.0);
        let stats = CompressionStats {
            original_tokens: 1_000,
            summarized_tokens: 250,
            ..Default::default()
        };
        assert!((stats.token_ratio() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn edit_request_shape_is_checked() {
        let htmls = vec!["<div class=\"slide\"></div>".to_string()];
        assert!(matches!(
            validate_edit_request("x", &htmls, &[0, 1]),
            Err(PipelineError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_edit_request(" ", &htmls, &[0]),
            Err(PipelineError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_edit_request("x", &htmls, &[]),
            Err(PipelineError::Reconciliation(
                ReconciliationError::EmptyIndices
            ))
        ));
        assert!(validate_edit_request("x", &htmls, &[4]).is_ok());
    }
}
