#![forbid(unsafe_code)]

//! # deck-harness
//!
//! Turn a natural-language request into an editable HTML slide deck backed by
//! real data.
//!
//! A planner call turns the request into data-service queries. The queries run
//! in parallel with per-query fault isolation, and their results are
//! summarized into a bounded, prompt-sized form (time-series sampling or
//! categorical top-N with aggregates). A generation call then writes the deck.
//! Later edits regenerate a contiguous run of slides and are validated as a
//! replacement patch before they touch the deck.

pub mod cache;
pub mod config;
pub mod dataservice;
pub mod deck;
pub mod executor;
pub mod gateway;
pub mod generation;
pub mod llm_output;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod reconcile;
pub mod summarize;
pub mod trace;

pub use cache::{QueryCache, QueryCacheKey, SqliteQueryCache};
pub use config::{ConfigError, PipelineConfig};
pub use dataservice::{
    ConversationHandle, DataService, DataServiceError, DataServiceResponse, HttpDataService,
    QueryPayload, Row, UnavailableDataService,
};
pub use deck::{DeckError, DeckView, Slide, SlideDeck};
pub use executor::{ExecutorConfig, QueryExecutor, QueryOutcome, QueryResult};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use generation::{GeneratedHtml, GenerationError};
pub use pipeline::{
    CompressionStats, DeckPipeline, EditOutcome, EditOutput, NewDeckOutput, PipelineError,
};
pub use planner::{PlanningError, QueryPlan};
pub use reconcile::{reconcile, ReconciliationError, ReplacementPatch};
pub use summarize::{summarize, summarize_rows, SummarizedResult, SummarizerConfig};
pub use trace::{JsonlTraceSink, PipelineTrace, Stage, StageEvent, TraceError, TraceSink, TraceWorker};
