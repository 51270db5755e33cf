use std::time::Duration;

use thiserror::Error;

use crate::core::query::ExecutionState;

/// Failures that end a question. Synthesis failures never appear here; they degrade instead.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("SQL generation failed: {0}")]
    Generation(String),

    #[error("generated text is not a SELECT statement (starts with '{found}')")]
    InvalidQueryKind { found: String },

    #[error("query submission rejected: {0}")]
    Submission(String),

    #[error("status polling failed {attempts} times in a row: {message}")]
    TransientPoll { attempts: u32, message: String },

    #[error("query {state}: {message}")]
    QueryExecution {
        state: ExecutionState,
        message: String,
    },

    #[error("query did not finish within {}s", .0.as_secs())]
    QueryTimeout(Duration),

    #[error("could not read query results: {0}")]
    ResultParse(String),

    #[error("query returned more than {limit} rows")]
    ResultTooLarge { limit: usize },

    #[error("question was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Short label used in logs and the HTTP surface.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Generation(_) => "generation_error",
            PipelineError::InvalidQueryKind { .. } => "invalid_query_kind",
            PipelineError::Submission(_) => "submission_error",
            PipelineError::TransientPoll { .. } => "transient_poll_error",
            PipelineError::QueryExecution { .. } => "query_execution_error",
            PipelineError::QueryTimeout(_) => "query_timeout",
            PipelineError::ResultParse(_) => "result_parse_error",
            PipelineError::ResultTooLarge { .. } => "result_too_large",
            PipelineError::Cancelled => "cancelled",
        }
    }

    /// The sentence shown to the user in place of an answer.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Generation(_) => {
                "Sorry, I couldn't reach the language model to write a query. Please try again shortly."
                    .to_string()
            }
            PipelineError::InvalidQueryKind { .. } => {
                "Sorry, I can only answer questions with read-only SELECT queries, and I couldn't produce one for that question."
                    .to_string()
            }
            PipelineError::Submission(reason) => {
                format!("The query engine rejected the generated query: {}", reason)
            }
            PipelineError::TransientPoll { .. } => {
                "I lost contact with the query engine while waiting for results. Please try again."
                    .to_string()
            }
            PipelineError::QueryExecution { state, message } => match state {
                ExecutionState::Cancelled => format!("The query was cancelled: {}", message),
                _ => format!("The query failed: {}", message),
            },
            PipelineError::QueryTimeout(budget) => format!(
                "The query took longer than {} seconds and was stopped. Try narrowing the question.",
                budget.as_secs()
            ),
            PipelineError::ResultParse(_) => {
                "The query ran, but its results came back in a shape I couldn't read.".to_string()
            }
            PipelineError::ResultTooLarge { limit } => format!(
                "The query returned more than {} rows, which is too many to summarize. Try narrowing the question, for example to one device or a shorter time range.",
                limit
            ),
            PipelineError::Cancelled => {
                "This question was cancelled before it finished.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_diagnostic_reaches_the_user() {
        let err = PipelineError::QueryExecution {
            state: ExecutionState::Failed,
            message: "COLUMN_NOT_FOUND: humidty".to_string(),
        };
        assert!(err.user_message().contains("COLUMN_NOT_FOUND: humidty"));
        assert_eq!(err.kind(), "query_execution_error");
    }

    #[test]
    fn oversized_results_ask_for_a_narrower_question() {
        let err = PipelineError::ResultTooLarge { limit: 10_000 };
        assert_eq!(err.kind(), "result_too_large");
        assert!(err.user_message().contains("more than 10000 rows"));
        assert!(err.user_message().contains("narrowing"));
        assert!(!err.user_message().contains("shape"));
    }

    #[test]
    fn timeout_message_names_the_budget() {
        let err = PipelineError::QueryTimeout(Duration::from_secs(60));
        assert!(err.user_message().contains("60 seconds"));
        assert_eq!(err.to_string(), "query did not finish within 60s");
    }
}
