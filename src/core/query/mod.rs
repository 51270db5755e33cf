//! The asynchronous query engine seam: submit, poll status, page through results, cancel.

pub mod athena;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::aws::AwsError;

pub use athena::AthenaEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Queued => "QUEUED",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Succeeded => "SUCCEEDED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Cancelled => "CANCELLED",
        }
    }

    pub fn from_engine(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "QUEUED" => Some(ExecutionState::Queued),
            "RUNNING" => Some(ExecutionState::Running),
            "SUCCEEDED" => Some(ExecutionState::Succeeded),
            "FAILED" => Some(ExecutionState::Failed),
            "CANCELLED" | "CANCELED" => Some(ExecutionState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-only lifecycle. Staying put is allowed; terminal states never move.
pub fn can_transition(from: ExecutionState, to: ExecutionState) -> bool {
    if from == to {
        return true;
    }
    match from {
        ExecutionState::Queued => true,
        ExecutionState::Running => to.is_terminal(),
        ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Cancelled => false,
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest<'a> {
    pub sql: &'a str,
    pub output_location: &'a str,
    pub database: &'a str,
    pub catalog: Option<&'a str>,
    pub work_group: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: ExecutionState,
    /// Engine diagnostic, set for FAILED/CANCELLED.
    pub message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    pub fn new(state: ExecutionState) -> Self {
        Self {
            state,
            message: None,
            completed_at: None,
        }
    }

    pub fn failed(state: ExecutionState, message: &str) -> Self {
        Self {
            state,
            message: Some(message.to_string()),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineColumn {
    pub name: String,
    /// Engine type name, e.g. `varchar`, `double`, `bigint`.
    pub type_name: String,
}

/// One page of raw rows. `None` cells are SQL NULL.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultPage {
    pub columns: Vec<EngineColumn>,
    pub rows: Vec<Vec<Option<String>>>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("{0}")]
    Transport(String),
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transport(_) | EngineError::Throttled(_))
    }
}

impl From<AwsError> for EngineError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::Transport(m) => EngineError::Transport(m),
            AwsError::Throttled(m) => EngineError::Throttled(m),
            AwsError::Service { code, message } => EngineError::Rejected { code, message },
            AwsError::Credentials(m) => EngineError::Rejected {
                code: "CredentialsError".to_string(),
                message: m,
            },
            AwsError::Decode(m) => EngineError::Rejected {
                code: "MalformedResponse".to_string(),
                message: m,
            },
        }
    }
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Starts an execution and returns its id.
    async fn submit(&self, request: &SubmitRequest<'_>) -> Result<String, EngineError>;

    async fn status(&self, execution_id: &str) -> Result<StatusReport, EngineError>;

    /// Rows only, without any engine header row.
    async fn results_page(
        &self,
        execution_id: &str,
        next_token: Option<&str>,
        max_results: u32,
    ) -> Result<ResultPage, EngineError>;

    async fn cancel(&self, execution_id: &str) -> Result<(), EngineError>;
}
