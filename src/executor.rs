//! Bounded-parallel execution of planned queries against the data service.
//!
//! Every query runs in its own task under a shared semaphore and a per-query
//! timeout. A failed, timed-out or panicking query becomes a `Failure` entry;
//! it never cancels its siblings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::cache::{QueryCache, QueryCacheKey};
use crate::dataservice::{ConversationHandle, DataService, QueryPayload};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Cache namespace; distinguishes data services sharing one cache file.
    #[serde(default = "default_cache_namespace")]
    pub cache_namespace: String,
}

fn default_max_concurrency() -> usize {
    5
}
fn default_query_timeout_secs() -> u64 {
    60
}
fn default_cache_namespace() -> String {
    "default".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            query_timeout_secs: default_query_timeout_secs(),
            cache_namespace: default_cache_namespace(),
        }
    }
}

impl ExecutorConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Success {
        payload: QueryPayload,
        conversation: ConversationHandle,
    },
    Failure {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub outcome: QueryOutcome,
    pub latency_ms: u64,
    pub cached: bool,
}

impl QueryResult {
    fn failure(query: &str, reason: impl Into<String>, started: Instant) -> Self {
        Self {
            query: query.to_string(),
            outcome: QueryOutcome::Failure {
                reason: reason.into(),
            },
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, QueryOutcome::Success { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            QueryOutcome::Failure { reason } => Some(reason),
            QueryOutcome::Success { .. } => None,
        }
    }
}

pub struct QueryExecutor {
    service: Arc<dyn DataService>,
    cache: Option<Arc<dyn QueryCache>>,
    semaphore: Arc<Semaphore>,
    config: ExecutorConfig,
}

impl QueryExecutor {
    pub fn new(service: Arc<dyn DataService>, config: ExecutorConfig) -> Self {
        let permits = config.max_concurrency.max(1);
        Self {
            service,
            cache: None,
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every distinct query and return one result per distinct query.
    pub async fn execute_all(
        &self,
        queries: &[String],
        handle: &ConversationHandle,
    ) -> HashMap<String, QueryResult> {
        let mut results = HashMap::with_capacity(queries.len());
        if queries.is_empty() {
            return results;
        }

        let mut distinct: Vec<String> = Vec::with_capacity(queries.len());
        let mut joins = Vec::with_capacity(queries.len());
        for query in queries {
            if distinct.contains(query) {
                continue;
            }
            let task = QueryTask {
                query: query.clone(),
                handle: handle.clone(),
                service: self.service.clone(),
                cache: self.cache.clone(),
                namespace: self.config.cache_namespace.clone(),
                timeout: self.config.query_timeout(),
            };
            let sem = self.semaphore.clone();
            joins.push(tokio::spawn(async move {
                let started = Instant::now();
                let Ok(_permit) = sem.acquire_owned().await else {
                    return QueryResult::failure(&task.query, "executor shut down", started);
                };
                task.run().await
            }));
            distinct.push(query.clone());
        }

        let started = Instant::now();
        let joined = join_all(joins).await;
        for (query, joined) in distinct.into_iter().zip(joined) {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(query = %query, error = %e, "query task panicked");
                    QueryResult::failure(&query, format!("query task panicked: {e}"), started)
                }
            };
            results.insert(query, result);
        }

        let failed = results.values().filter(|r| !r.is_success()).count();
        tracing::info!(
            queries = results.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "executed data queries"
        );
        results
    }
}

struct QueryTask {
    query: String,
    handle: ConversationHandle,
    service: Arc<dyn DataService>,
    cache: Option<Arc<dyn QueryCache>>,
    namespace: String,
    timeout: Duration,
}

impl QueryTask {
    async fn run(self) -> QueryResult {
        let started = Instant::now();
        let key = QueryCacheKey::new(&self.namespace, &self.query);

        if let Some(cache) = &self.cache {
            match cache.get(&key).await {
                Ok(Some(payload)) => {
                    tracing::debug!(query = %self.query, "query cache hit");
                    return QueryResult {
                        query: self.query,
                        outcome: QueryOutcome::Success {
                            payload,
                            conversation: self.handle,
                        },
                        latency_ms: started.elapsed().as_millis() as u64,
                        cached: true,
                    };
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(query = %self.query, error = %e, "query cache read failed"),
            }
        }

        let call = self.service.execute(&self.query, &self.handle);
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(query = %self.query, code = e.code(), error = %e, "data query failed");
                return QueryResult::failure(&self.query, e.to_string(), started);
            }
            Err(_) => {
                tracing::warn!(
                    query = %self.query,
                    timeout_secs = self.timeout.as_secs(),
                    "data query timed out"
                );
                return QueryResult::failure(
                    &self.query,
                    format!("timed out after {}s", self.timeout.as_secs()),
                    started,
                );
            }
        };

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&key, &response.payload).await {
                tracing::warn!(query = %self.query, error = %e, "query cache write failed");
            }
        }

        QueryResult {
            query: self.query,
            outcome: QueryOutcome::Success {
                payload: response.payload,
                conversation: response.conversation,
            },
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
        }
    }
}
