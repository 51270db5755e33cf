//! Question → SQL → execution → rows → answer.

pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod poller;
pub mod sql_gen;
pub mod synth;
pub mod types;

#[cfg(test)]
pub(crate) mod tests;

use std::time::Duration;

use crate::core::config::AppConfig;
use crate::core::query::SubmitRequest;

pub use error::PipelineError;
pub use orchestrator::{ConversationContext, Failure, Orchestrator, Reply, Turn};
pub use poller::PollPolicy;
pub use types::{Answer, ColumnMeta, GeneratedQuery, Question, QueryExecution, ResultSet, Row, Value};

/// Per-question knobs resolved from the configuration once at startup.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_location: String,
    pub database: String,
    pub catalog: Option<String>,
    pub work_group: Option<String>,
    pub poll: PollPolicy,
    pub call_timeout: Duration,
    pub sample_rows: usize,
    pub page_size: u32,
    pub max_result_rows: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let Some(output_location) = config.athena.output_location.clone() else {
            anyhow::bail!("athena.output_location is not set");
        };
        let p = &config.pipeline;
        Ok(Self {
            output_location,
            database: config.athena.database.clone(),
            catalog: config.athena.catalog.clone(),
            work_group: config.athena.work_group.clone(),
            poll: PollPolicy {
                base: p.poll_base(),
                max_interval: p.poll_max(),
                max_wait: p.max_wait(),
                max_transient_retries: p.max_transient_retries,
                call_timeout: p.call_timeout(),
            },
            call_timeout: p.call_timeout(),
            sample_rows: p.sample_rows,
            page_size: p.page_size,
            max_result_rows: p.max_result_rows,
        })
    }

    pub fn submit_request<'a>(&'a self, sql: &'a str) -> SubmitRequest<'a> {
        SubmitRequest {
            sql,
            output_location: &self.output_location,
            database: &self.database,
            catalog: self.catalog.as_deref(),
            work_group: self.work_group.as_deref(),
        }
    }
}
