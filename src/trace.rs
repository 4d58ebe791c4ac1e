//! Pipeline stage trace: returned with every run and optionally streamed to JSONL.

use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Execute,
    Summarize,
    Generate,
    Parse,
    Reconcile,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub timestamp_ms: i64,
    pub run_id: Uuid,
    pub stage: Stage,
    /// Edit attempt number, for stages that retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub latency_ms: u64,
    pub detail: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageEvent {
    pub fn new(run_id: Uuid, stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            timestamp_ms: now_epoch_ms(),
            run_id,
            stage,
            attempt: None,
            latency_ms: 0,
            detail: detail.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            error: None,
        }
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn cost(mut self, nanodollars: i64) -> Self {
        self.cost_nanodollars = nanodollars;
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Ordered stage events for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTrace {
    pub run_id: Uuid,
    pub events: Vec<StageEvent>,
}

impl PipelineTrace {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            events: Vec::new(),
        }
    }

    pub fn event(&self, stage: Stage, detail: impl Into<String>) -> StageEvent {
        StageEvent::new(self.run_id, stage, detail)
    }

    pub fn push(&mut self, event: StageEvent, sink: Option<&dyn TraceSink>) {
        if let Some(sink) = sink {
            if let Err(e) = sink.record(event.clone()) {
                tracing::warn!(error = %e, "failed to record trace event");
            }
        }
        self.events.push(event);
    }

    pub fn total_cost_nanodollars(&self) -> i64 {
        self.events.iter().map(|e| e.cost_nanodollars).sum()
    }

    pub fn total_tokens(&self) -> (u64, u64) {
        self.events.iter().fold((0, 0), |(i, o), e| {
            (i + e.input_tokens as u64, o + e.output_tokens as u64)
        })
    }
}

impl Default for PipelineTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("trace channel closed")]
    Closed,
    #[error("trace worker failed: {0}")]
    Join(String),
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: StageEvent) -> Result<(), TraceError>;
}

#[derive(Clone)]
pub struct JsonlTraceSink {
    sender: mpsc::Sender<StageEvent>,
}

pub struct TraceWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TraceError>>>,
}

impl TraceWorker {
    pub fn join(mut self) -> Result<(), TraceError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(TraceError::Join("trace worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlTraceSink {
    /// Truncates `path`. Drop every sink clone, then `join` the worker to flush.
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<StageEvent>();
        let handle = std::thread::spawn(move || write_trace_loop(file, receiver));
        Ok((
            Self { sender },
            TraceWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: StageEvent) -> Result<(), TraceError> {
        self.sender.send(event).map_err(|_| TraceError::Closed)
    }
}

fn write_trace_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<StageEvent>,
) -> Result<(), TraceError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line = serde_json::to_string(&event).map_err(|e| TraceError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
