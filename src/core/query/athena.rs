use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    EngineColumn, EngineError, ExecutionState, QueryEngine, ResultPage, StatusReport,
    SubmitRequest,
};
use crate::core::aws::AwsClient;

// ── StartQueryExecution ──

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartQueryExecutionRequest<'a> {
    query_string: &'a str,
    query_execution_context: QueryExecutionContext<'a>,
    result_configuration: ResultConfiguration<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    work_group: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecutionContext<'a> {
    database: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    catalog: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ResultConfiguration<'a> {
    output_location: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartQueryExecutionResponse {
    query_execution_id: String,
}

// ── GetQueryExecution / StopQueryExecution ──

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecutionIdRequest<'a> {
    query_execution_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueryExecutionResponse {
    query_execution: QueryExecutionInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecutionInfo {
    status: QueryExecutionStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecutionStatus {
    state: String,
    #[serde(default)]
    state_change_reason: Option<String>,
    /// Epoch seconds.
    #[serde(default)]
    completion_date_time: Option<f64>,
    #[serde(default)]
    athena_error: Option<AthenaErrorInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AthenaErrorInfo {
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct Empty {}

// ── GetQueryResults ──

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueryResultsRequest<'a> {
    query_execution_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
    max_results: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueryResultsResponse {
    result_set: AthenaResultSet,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AthenaResultSet {
    #[serde(default)]
    rows: Vec<AthenaRow>,
    #[serde(default)]
    result_set_metadata: Option<ResultSetMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AthenaRow {
    #[serde(default)]
    data: Vec<AthenaDatum>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AthenaDatum {
    #[serde(default)]
    var_char_value: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultSetMetadata {
    #[serde(default)]
    column_info: Vec<AthenaColumnInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AthenaColumnInfo {
    name: String,
    #[serde(rename = "Type")]
    type_name: String,
}

/// Amazon Athena over its JSON 1.1 API.
pub struct AthenaEngine {
    aws: AwsClient,
}

impl AthenaEngine {
    pub fn new(aws: AwsClient) -> Self {
        Self { aws }
    }
}

#[async_trait]
impl QueryEngine for AthenaEngine {
    async fn submit(&self, request: &SubmitRequest<'_>) -> Result<String, EngineError> {
        let body = StartQueryExecutionRequest {
            query_string: request.sql,
            query_execution_context: QueryExecutionContext {
                database: request.database,
                catalog: request.catalog,
            },
            result_configuration: ResultConfiguration {
                output_location: request.output_location,
            },
            work_group: request.work_group,
        };
        let res: StartQueryExecutionResponse = self
            .aws
            .call_json("AmazonAthena.StartQueryExecution", &body)
            .await?;
        Ok(res.query_execution_id)
    }

    async fn status(&self, execution_id: &str) -> Result<StatusReport, EngineError> {
        let res: GetQueryExecutionResponse = self
            .aws
            .call_json(
                "AmazonAthena.GetQueryExecution",
                &ExecutionIdRequest {
                    query_execution_id: execution_id,
                },
            )
            .await?;
        status_from_athena(res.query_execution.status)
    }

    async fn results_page(
        &self,
        execution_id: &str,
        next_token: Option<&str>,
        max_results: u32,
    ) -> Result<ResultPage, EngineError> {
        let res: GetQueryResultsResponse = self
            .aws
            .call_json(
                "AmazonAthena.GetQueryResults",
                &GetQueryResultsRequest {
                    query_execution_id: execution_id,
                    next_token,
                    max_results,
                },
            )
            .await?;
        Ok(page_from_athena(res, next_token.is_none()))
    }

    async fn cancel(&self, execution_id: &str) -> Result<(), EngineError> {
        let _: Empty = self
            .aws
            .call_json(
                "AmazonAthena.StopQueryExecution",
                &ExecutionIdRequest {
                    query_execution_id: execution_id,
                },
            )
            .await?;
        Ok(())
    }
}

fn status_from_athena(status: QueryExecutionStatus) -> Result<StatusReport, EngineError> {
    let Some(state) = ExecutionState::from_engine(&status.state) else {
        return Err(EngineError::Rejected {
            code: "UnknownState".to_string(),
            message: format!("engine reported unknown state '{}'", status.state),
        });
    };
    let message = status
        .athena_error
        .and_then(|e| e.error_message)
        .or(status.state_change_reason);
    let completed_at = status
        .completion_date_time
        .and_then(|secs| DateTime::<Utc>::from_timestamp_millis((secs * 1000.0) as i64));
    Ok(StatusReport {
        state,
        message,
        completed_at,
    })
}

/// Athena repeats the column labels as the first row of the first page.
fn page_from_athena(res: GetQueryResultsResponse, first_page: bool) -> ResultPage {
    let columns: Vec<EngineColumn> = res
        .result_set
        .result_set_metadata
        .map(|m| m.column_info)
        .unwrap_or_default()
        .into_iter()
        .map(|c| EngineColumn {
            name: c.name,
            type_name: c.type_name,
        })
        .collect();

    let mut rows: Vec<Vec<Option<String>>> = res
        .result_set
        .rows
        .into_iter()
        .map(|r| r.data.into_iter().map(|d| d.var_char_value).collect())
        .collect();

    if first_page && let Some(first) = rows.first() {
        let is_header = first.len() == columns.len()
            && first
                .iter()
                .zip(&columns)
                .all(|(cell, col)| cell.as_deref() == Some(col.name.as_str()));
        if is_header {
            rows.remove(0);
        } else if !columns.is_empty() {
            warn!("First result page has no header row; keeping all rows");
        }
    }
    debug!(
        "Result page: {} rows, more={}",
        rows.len(),
        res.next_token.is_some()
    );

    ResultPage {
        columns,
        rows,
        next_token: res.next_token,
    }
}
