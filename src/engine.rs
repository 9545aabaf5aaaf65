use crate::aggregate::{RawResults, ResultAggregator, Results};
use crate::batch::{BatchError, BatchExecutor};
use crate::config::{ConfigError, EngineConfig};
use crate::filter::{self, CompileError};
use crate::matcher::PatternMatcher;
use crate::pattern::{Pattern, Route};
use crate::store::{RecordStore, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("record store failed: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QueryError {
    /// Message safe to show the person who asked. Causes stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            QueryError::Compile(CompileError::FilterRequired(_)) => {
                "Please narrow the question: mention a department, status, priority, location, or time period.".to_string()
            }
            QueryError::Store(_) => "The case records could not be read. Please try again later.".to_string(),
            QueryError::Batch(BatchError::Timeout { .. }) => "The analysis took too long to finish. Please try again.".to_string(),
            QueryError::Batch(_) => "The analysis job failed. Please try again.".to_string(),
            QueryError::Config(_) => "The query engine is not configured correctly.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub intents: Pattern,
    pub mongo_query: Value,
    pub result_count: usize,
    pub route: Route,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Results>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

impl QueryResponse {
    pub fn failure(query: &str, message: String) -> Self {
        Self { success: false, results: None, response: None, error: Some(message), query: query.to_string(), debug: None }
    }
}

/// What a query would do, without touching the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub query: String,
    pub intents: Pattern,
    pub route: Route,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mongo_query: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct QueryEngine {
    matcher: PatternMatcher,
    store: Arc<dyn RecordStore>,
    executor: BatchExecutor,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn RecordStore>, config: &EngineConfig) -> Self {
        Self { matcher: PatternMatcher::default(), store, executor: BatchExecutor::from_config(config) }
    }

    /// Like [`QueryEngine::new`], but rejects an invalid config first.
    pub fn from_config(store: Arc<dyn RecordStore>, config: &EngineConfig) -> Result<Self, QueryError> {
        config.validate()?;
        Ok(Self::new(store, config))
    }

    pub fn with_parts(matcher: PatternMatcher, store: Arc<dyn RecordStore>, executor: BatchExecutor) -> Self {
        Self { matcher, store, executor }
    }

    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }

    pub fn explain(&self, query: &str, now: DateTime<Utc>) -> Explanation {
        let intents = self.matcher.match_query(query);
        let route = intents.route();
        let (mongo_query, error) = match filter::compile(&intents, now) {
            Ok(f) => (Some(f.to_document()), None),
            Err(e) => (None, Some(QueryError::from(e).user_message())),
        };
        Explanation { query: query.to_string(), intents, route, mongo_query, error }
    }

    pub async fn answer(&self, query: &str) -> QueryResponse {
        self.answer_at(query, Utc::now()).await
    }

    /// Answer with `now` as the evaluation instant. Failures become an error payload.
    pub async fn answer_at(&self, query: &str, now: DateTime<Utc>) -> QueryResponse {
        match self.try_answer(query, now).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(query, error = %e, "query failed");
                QueryResponse::failure(query, e.user_message())
            }
        }
    }

    pub async fn try_answer(&self, query: &str, now: DateTime<Utc>) -> Result<QueryResponse, QueryError> {
        let pattern = self.matcher.match_query(query);
        let filter = filter::compile(&pattern, now)?;
        let route = pattern.route();

        let (raw, job_name) = match route {
            Route::Direct => (RawResults::Records(self.store.find(&filter)?), None),
            Route::Batch => {
                let outcome = self.executor.execute_with_retry(self.store.as_ref(), &filter, now).await?;
                (RawResults::Entries(outcome.entries), Some(outcome.job_name))
            }
        };
        let formatted = ResultAggregator::format(raw, &pattern);
        let result_count = formatted.results.len();
        info!(query, route = ?route, result_count, "answered query");

        Ok(QueryResponse {
            success: true,
            response: Some(formatted.response),
            results: Some(formatted.results),
            error: None,
            query: query.to_string(),
            debug: Some(DebugInfo { intents: pattern, mongo_query: filter.to_document(), result_count, route, job_name }),
        })
    }
}
