//! Pages through a finished execution and types every cell.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::PipelineSettings;
use super::error::PipelineError;
use super::poller::Backoff;
use super::types::{ColumnMeta, ResultSet, Row, Value};
use crate::core::query::{EngineColumn, QueryEngine, ResultPage};
use crate::core::schema::{ColumnType, SchemaCatalog};

/// Fetches every page of a SUCCEEDED execution, then builds the typed result set.
/// Either the whole set is returned or an error; there is no partial result.
pub async fn fetch_results(
    engine: &dyn QueryEngine,
    catalog: &SchemaCatalog,
    execution_id: &str,
    settings: &PipelineSettings,
    cancel: &CancellationToken,
) -> Result<ResultSet, PipelineError> {
    let mut pages: Vec<ResultPage> = Vec::new();
    let mut next_token: Option<String> = None;
    let mut total_rows = 0usize;

    loop {
        let page = fetch_page(
            engine,
            execution_id,
            next_token.as_deref(),
            settings,
            cancel,
        )
        .await?;
        total_rows += page.rows.len();
        if total_rows > settings.max_result_rows {
            warn!(execution_id = %execution_id, "Result exceeds {} rows", settings.max_result_rows);
            return Err(PipelineError::ResultTooLarge {
                limit: settings.max_result_rows,
            });
        }
        next_token = page.next_token.clone();
        pages.push(page);
        if next_token.is_none() {
            break;
        }
    }

    let result = build_result_set(execution_id, catalog, &pages)?;
    info!(
        execution_id = %execution_id,
        "Fetched {} rows across {} page(s)",
        result.len(),
        pages.len()
    );
    Ok(result)
}

async fn fetch_page(
    engine: &dyn QueryEngine,
    execution_id: &str,
    token: Option<&str>,
    settings: &PipelineSettings,
    cancel: &CancellationToken,
) -> Result<ResultPage, PipelineError> {
    let mut backoff = Backoff::new(settings.poll.base, settings.poll.max_interval);
    let mut failures = 0u32;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            res = tokio::time::timeout(
                settings.call_timeout,
                engine.results_page(execution_id, token, settings.page_size),
            ) => res,
        };
        let message = match outcome {
            Ok(Ok(page)) => return Ok(page),
            Ok(Err(e)) if e.is_transient() => e.to_string(),
            Ok(Err(e)) => {
                return Err(PipelineError::ResultParse(format!(
                    "results request rejected: {}",
                    e
                )));
            }
            Err(_) => format!(
                "results call timed out after {}s",
                settings.call_timeout.as_secs_f64()
            ),
        };

        failures += 1;
        warn!(execution_id = %execution_id, attempt = failures, "Transient results failure: {}", message);
        if failures > settings.poll.max_transient_retries {
            return Err(PipelineError::TransientPoll {
                attempts: failures,
                message,
            });
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            _ = tokio::time::sleep(backoff.next_delay()) => {}
        }
    }
}

/// Pure conversion of raw pages; identical pages always yield identical result sets.
pub fn build_result_set(
    execution_id: &str,
    catalog: &SchemaCatalog,
    pages: &[ResultPage],
) -> Result<ResultSet, PipelineError> {
    let engine_columns: &[EngineColumn] = pages
        .iter()
        .map(|p| p.columns.as_slice())
        .find(|c| !c.is_empty())
        .unwrap_or(&[]);
    let columns = resolve_columns(catalog, engine_columns)?;

    let mut rows = Vec::new();
    for (page_no, page) in pages.iter().enumerate() {
        if !page.columns.is_empty() && page.columns != engine_columns {
            return Err(PipelineError::ResultParse(format!(
                "column set changed on page {}",
                page_no + 1
            )));
        }
        for raw in &page.rows {
            rows.push(convert_row(&columns, raw)?);
        }
    }
    debug!(execution_id = %execution_id, "Typed {} rows", rows.len());

    Ok(ResultSet {
        execution_id: execution_id.to_string(),
        columns,
        rows,
    })
}

/// Declared schema type first; otherwise the engine-reported type (aggregates, aliases).
fn resolve_columns(
    catalog: &SchemaCatalog,
    engine_columns: &[EngineColumn],
) -> Result<Vec<ColumnMeta>, PipelineError> {
    engine_columns
        .iter()
        .map(|c| {
            let column_type = catalog
                .column_type(&c.name)
                .or_else(|| ColumnType::from_type_name(&c.type_name))
                .ok_or_else(|| {
                    PipelineError::ResultParse(format!(
                        "column '{}' has unsupported type '{}'",
                        c.name, c.type_name
                    ))
                })?;
            Ok(ColumnMeta {
                name: c.name.clone(),
                column_type,
            })
        })
        .collect()
}

fn convert_row(columns: &[ColumnMeta], raw: &[Option<String>]) -> Result<Row, PipelineError> {
    if raw.len() != columns.len() {
        return Err(PipelineError::ResultParse(format!(
            "row has {} cells, expected {}",
            raw.len(),
            columns.len()
        )));
    }
    let cells = columns
        .iter()
        .zip(raw)
        .map(|(col, cell)| {
            let value = match cell {
                None => Value::Null,
                Some(text) => parse_value(col, text)?,
            };
            Ok((col.name.clone(), value))
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;
    Ok(Row { cells })
}

fn parse_value(col: &ColumnMeta, text: &str) -> Result<Value, PipelineError> {
    let mismatch = || {
        PipelineError::ResultParse(format!(
            "value '{}' in column '{}' is not a {}",
            text, col.name, col.column_type
        ))
    };
    match col.column_type {
        ColumnType::String => Ok(Value::String(text.to_string())),
        ColumnType::Double => text.trim().parse::<f64>().map(Value::Double).map_err(|_| mismatch()),
        ColumnType::Timestamp => parse_timestamp(text).map(Value::Timestamp).ok_or_else(mismatch),
    }
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let text = raw.trim();
    let text = text.strip_suffix(" UTC").unwrap_or(text);
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
