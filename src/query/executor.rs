use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::gcp::CredentialsError;
use crate::query::render::RenderedQuery;

/// One result row, column name to value, in the warehouse's column order.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("warehouse connection error: {0}")]
    Connection(String),

    #[error("query would bill more than the {limit} byte limit: {message}")]
    BytesBilledLimitExceeded { limit: u64, message: String },

    #[error("warehouse rejected the query (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected warehouse response: {0}")]
    Response(String),

    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub job_id: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub total_bytes_processed: Option<u64>,
}

impl QueryResult {
    pub fn preview(&self, limit: usize) -> Vec<Row> {
        self.rows.iter().take(limit).cloned().collect()
    }

    /// The full row set as the JSON array handed to the model.
    pub fn rows_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.rows)
    }
}

/// Runs rendered statements against the warehouse.
///
/// Implementations submit each statement exactly once and never retry.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &RenderedQuery) -> Result<QueryResult, QueryError>;
}
