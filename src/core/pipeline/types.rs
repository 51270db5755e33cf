use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::core::query::{ExecutionState, can_transition};
use crate::core::schema::ColumnType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// A validated single read-only `SELECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery {
    pub sql: String,
    pub question_id: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryExecution {
    pub execution_id: String,
    pub state: ExecutionState,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl QueryExecution {
    pub fn submitted(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            state: ExecutionState::Queued,
            submitted_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }

    /// Applies an observed state. Backward moves are stale reads and are dropped; returns
    /// whether the observation was applied.
    pub fn observe(
        &mut self,
        state: ExecutionState,
        message: Option<String>,
        completed_at: Option<DateTime<Utc>>,
    ) -> bool {
        if !can_transition(self.state, state) {
            warn!(
                execution_id = %self.execution_id,
                "Ignoring state regression {} -> {}",
                self.state,
                state
            );
            return false;
        }
        self.state = state;
        if state.is_terminal() {
            self.completed_at = Some(completed_at.unwrap_or_else(Utc::now));
            self.error_message = message;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Double(f64),
    #[serde(serialize_with = "serialize_timestamp")]
    Timestamp(NaiveDateTime),
    Null,
}

fn serialize_timestamp<S: serde::Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.format(TIMESTAMP_DISPLAY).to_string())
}

const TIMESTAMP_DISPLAY: &str = "%Y-%m-%d %H:%M:%S%.3f";

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Double(d) => write!(f, "{}", d),
            Value::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_DISPLAY)),
            Value::Null => f.write_str("NULL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub column_type: ColumnType,
}

/// Cells in column order, each tagged with its column name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub cells: Vec<(String, Value)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    /// `name=value, name=value`
    pub fn describe(&self) -> String {
        self.cells
            .iter()
            .map(|(name, v)| format!("{}={}", name, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    pub execution_id: String,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub query: GeneratedQuery,
    /// `None` when synthesis fell back to the deterministic summary.
    pub result: Option<Arc<ResultSet>>,
}

impl Answer {
    pub fn is_degraded(&self) -> bool {
        self.result.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_execution_ignores_later_observations() {
        let mut exec = QueryExecution::submitted("q-1");
        assert!(exec.observe(ExecutionState::Running, None, None));
        assert!(exec.observe(ExecutionState::Failed, Some("boom".into()), None));
        assert!(exec.completed_at.is_some());
        assert!(!exec.observe(ExecutionState::Running, None, None));
        assert_eq!(exec.state, ExecutionState::Failed);
        assert_eq!(exec.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn running_does_not_regress_to_queued() {
        let mut exec = QueryExecution::submitted("q-2");
        exec.observe(ExecutionState::Running, None, None);
        assert!(!exec.observe(ExecutionState::Queued, None, None));
        assert_eq!(exec.state, ExecutionState::Running);
    }

    #[test]
    fn values_display_plainly() {
        assert_eq!(Value::Double(23.5).to_string(), "23.5");
        assert_eq!(Value::Double(3.0).to_string(), "3");
        assert_eq!(Value::Null.to_string(), "NULL");
        let ts = NaiveDateTime::parse_from_str("2024-05-01 08:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(Value::Timestamp(ts).to_string(), "2024-05-01 08:00:00.000");
    }
}
