use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::config::WarehouseConfig;
use crate::gcp::Credentials;
use crate::query::executor::{QueryError, QueryExecutor, QueryResult, Row};
use crate::query::render::RenderedQuery;

const BYTES_BILLED_LIMIT_REASON: &str = "bytesBilledLimitExceeded";
// Server-side wait per request; an unfinished job is polled again.
const WAIT_TIMEOUT_MS: u64 = 10_000;
const JOB_LABEL: &str = "nl-ga4";

pub struct BigQueryExecutor {
    client: reqwest::Client,
    api_url: String,
    project_id: String,
    location: Option<String>,
    maximum_bytes_billed: u64,
    credentials: Credentials,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<WireParameter<'a>>,
    maximum_bytes_billed: String,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    labels: BTreeMap<&'static str, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireParameter<'a> {
    name: &'a str,
    parameter_type: ParameterType,
    parameter_value: ParameterValue<'a>,
}

#[derive(Serialize)]
struct ParameterType {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ParameterValue<'a> {
    value: &'a str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
    total_bytes_processed: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableFieldSchema>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct TableFieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<TableFieldSchema>,
}

impl TableFieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }

    fn is_record(&self) -> bool {
        matches!(self.field_type.as_str(), "RECORD" | "STRUCT")
    }
}

#[derive(Deserialize, Debug)]
struct TableRow {
    #[serde(default)]
    f: Vec<Value>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
}

impl BigQueryExecutor {
    pub fn new(config: &WarehouseConfig, project_id: String, credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            project_id,
            location: config.location.clone(),
            maximum_bytes_billed: config.maximum_bytes_billed,
            credentials,
        }
    }

    async fn submit(&self, query: &RenderedQuery, token: &str) -> Result<QueryResponse, QueryError> {
        let request = QueryRequest {
            query: &query.sql,
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: query
                .parameters
                .iter()
                .map(|p| WireParameter {
                    name: &p.name,
                    parameter_type: ParameterType { kind: "STRING" },
                    parameter_value: ParameterValue { value: &p.value },
                })
                .collect(),
            maximum_bytes_billed: self.maximum_bytes_billed.to_string(),
            timeout_ms: WAIT_TIMEOUT_MS,
            location: self.location.as_deref(),
            labels: BTreeMap::from([
                ("application", JOB_LABEL.to_string()),
                ("template", job_label_value(&query.template_name)),
            ]),
        };

        let url = format!("{}/projects/{}/queries", self.api_url, self.project_id);
        self.send(self.client.post(&url).bearer_auth(token).json(&request))
            .await
    }

    async fn fetch_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
        token: &str,
    ) -> Result<QueryResponse, QueryError> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.api_url, self.project_id, job.job_id
        );

        let mut params = vec![("timeoutMs", WAIT_TIMEOUT_MS.to_string())];
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token.to_string()));
        }

        self.send(self.client.get(&url).bearer_auth(token).query(&params))
            .await
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, QueryError> {
        let response = request
            .send()
            .await
            .map_err(|e| QueryError::Connection(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Connection(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            error!("BigQuery responded with status code: {} - {}", status, body);
            return Err(error_from_body(status.as_u16(), &body, self.maximum_bytes_billed));
        }

        serde_json::from_str(&body).map_err(|e| {
            QueryError::Response(format!("Failed to parse BigQuery response: {} - Response was: {}", e, body))
        })
    }
}

#[async_trait]
impl QueryExecutor for BigQueryExecutor {
    async fn execute(&self, query: &RenderedQuery) -> Result<QueryResult, QueryError> {
        let started = Instant::now();
        info!(template = %query.template_name, "Submitting BigQuery job");
        debug!("BigQuery statement: {}", query.sql);

        let token = self.credentials.bearer_token().await?;
        let mut page = self.submit(query, &token).await?;
        let job = page.job_reference.clone();

        while !page.job_complete {
            let job = job.as_ref().ok_or_else(|| {
                QueryError::Response("incomplete job returned without a job reference".to_string())
            })?;
            debug!(job_id = %job.job_id, "Waiting for BigQuery job to complete");
            page = self.fetch_results(job, None, &token).await?;
        }

        let fields = page.schema.take().unwrap_or_default().fields;
        let mut rows = decode_rows(&fields, std::mem::take(&mut page.rows));
        let total_bytes_processed = page
            .total_bytes_processed
            .as_deref()
            .and_then(|b| b.parse().ok());

        let mut next_page = page.page_token.take();
        while let Some(page_token) = next_page {
            let job = job.as_ref().ok_or_else(|| {
                QueryError::Response("paged result returned without a job reference".to_string())
            })?;
            let mut page = self.fetch_results(job, Some(&page_token), &token).await?;
            rows.extend(decode_rows(&fields, std::mem::take(&mut page.rows)));
            next_page = page.page_token.take();
        }

        info!(
            template = %query.template_name,
            rows = rows.len(),
            bytes_processed = ?total_bytes_processed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "BigQuery job finished"
        );

        Ok(QueryResult {
            job_id: job.map(|j| j.job_id),
            columns: fields.iter().map(|f| f.name.clone()).collect(),
            rows,
            total_bytes_processed,
        })
    }
}

// Label values: lowercase letters, digits, `_` and `-`, at most 63 chars.
fn job_label_value(name: &str) -> String {
    name.chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(63)
        .collect()
}

pub(crate) fn error_from_body(status: u16, body: &str, limit: u64) -> QueryError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if envelope.error.errors.iter().any(|e| e.reason == BYTES_BILLED_LIMIT_REASON) => {
            QueryError::BytesBilledLimitExceeded {
                limit,
                message: envelope.error.message,
            }
        }
        Ok(envelope) => QueryError::Rejected {
            status,
            message: envelope.error.message,
        },
        Err(_) => QueryError::Rejected {
            status,
            message: body.trim().to_string(),
        },
    }
}

fn decode_rows(fields: &[TableFieldSchema], rows: Vec<TableRow>) -> Vec<Row> {
    rows.iter().map(|row| decode_record(fields, &row.f)).collect()
}

// `cells` are the `{"v": ...}` wrappers of one row or record.
pub(crate) fn decode_record(fields: &[TableFieldSchema], cells: &[Value]) -> Row {
    fields
        .iter()
        .zip(cells)
        .map(|(field, cell)| {
            let value = cell.get("v").unwrap_or(&Value::Null);
            (field.name.clone(), decode_value(field, value))
        })
        .collect()
}

fn decode_value(field: &TableFieldSchema, value: &Value) -> Value {
    if !field.is_repeated() {
        return decode_single(field, value);
    }
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| decode_single(field, item.get("v").unwrap_or(&Value::Null)))
                .collect(),
        ),
        Value::Null => Value::Array(Vec::new()),
        other => other.clone(),
    }
}

fn decode_single(field: &TableFieldSchema, value: &Value) -> Value {
    match value {
        Value::Object(record) if field.is_record() => {
            let cells = record
                .get("f")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            Value::Object(decode_record(&field.fields, cells))
        }
        Value::String(raw) => decode_scalar(&field.field_type, raw).unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

fn decode_scalar(field_type: &str, raw: &str) -> Option<Value> {
    match field_type {
        "INTEGER" | "INT64" => raw.parse::<i64>().ok().map(Value::from),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "BOOLEAN" | "BOOL" => match raw {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        "TIMESTAMP" => decode_timestamp(raw).map(Value::String),
        _ => None,
    }
}

// BigQuery sends TIMESTAMP cells as floating-point epoch seconds.
fn decode_timestamp(raw: &str) -> Option<String> {
    let seconds = raw.parse::<f64>().ok()?;
    let micros = (seconds * 1_000_000.0).round() as i64;
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    let at = DateTime::<Utc>::from_timestamp(micros.div_euclid(1_000_000), nanos)?;
    Some(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}
