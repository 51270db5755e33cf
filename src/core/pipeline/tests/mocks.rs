//! Scripted collaborators shared by the pipeline and HTTP tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::core::llm::{ChatMessage, LlmClient, LlmProvider, ProviderType};
use crate::core::pipeline::{Orchestrator, PipelineSettings, PollPolicy};
use crate::core::query::{
    EngineColumn, EngineError, ExecutionState, QueryEngine, ResultPage, StatusReport,
    SubmitRequest,
};
use crate::core::schema::devices_catalog;

#[derive(Debug, Clone)]
pub(crate) enum LlmStep {
    Text(String),
    Fail(String),
    Hang,
}

pub(crate) fn text(s: &str) -> LlmStep {
    LlmStep::Text(s.to_string())
}

/// Replays one step per `generate` call and records every prompt.
pub(crate) struct ScriptedLlm {
    steps: Mutex<VecDeque<LlmStep>>,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new(steps: Vec<LlmStep>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAI
    }

    async fn generate(&self, _model_id: &str, messages: &[ChatMessage]) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(LlmStep::Text(t)) => Ok(t),
            Some(LlmStep::Fail(e)) => Err(anyhow!(e)),
            Some(LlmStep::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Err(anyhow!("no scripted response left")),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum StatusStep {
    Report(StatusReport),
    Transient,
    Rejected,
    Hang,
}

pub(crate) fn state(s: ExecutionState) -> StatusStep {
    StatusStep::Report(StatusReport::new(s))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EngineCall {
    Submit(String),
    Status,
    Results(Option<String>),
    Cancel,
}

/// In-memory query engine. The last status step repeats forever.
pub(crate) struct MockEngine {
    submit_error: Mutex<Option<EngineError>>,
    submit_delay: Mutex<Duration>,
    statuses: Mutex<VecDeque<StatusStep>>,
    pages: Mutex<HashMap<Option<String>, ResultPage>>,
    page_failures: Mutex<u32>,
    pub calls: Mutex<Vec<EngineCall>>,
}

impl MockEngine {
    pub fn new(statuses: Vec<StatusStep>) -> Self {
        Self {
            submit_error: Mutex::new(None),
            submit_delay: Mutex::new(Duration::ZERO),
            statuses: Mutex::new(statuses.into()),
            pages: Mutex::new(HashMap::new()),
            page_failures: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// QUEUED → RUNNING → SUCCEEDED with a one-cell `_col0` result.
    pub fn single_value(value: &str) -> Self {
        MockEngine::new(vec![
            state(ExecutionState::Queued),
            state(ExecutionState::Running),
            state(ExecutionState::Succeeded),
        ])
        .with_page(None, page(&[("_col0", "double")], &[&[Some(value)]], None))
    }

    pub fn with_page(self, token: Option<&str>, page: ResultPage) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(token.map(str::to_string), page);
        self
    }

    pub fn with_submit_error(self, error: EngineError) -> Self {
        *self.submit_error.lock().unwrap() = Some(error);
        self
    }

    /// The engine accepts the query at once but answers only after `delay`.
    pub fn with_submit_delay(self, delay: Duration) -> Self {
        *self.submit_delay.lock().unwrap() = delay;
        self
    }

    pub fn with_page_failures(self, n: u32) -> Self {
        *self.page_failures.lock().unwrap() = n;
        self
    }

    fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn submit_count(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Submit(_)))
    }

    pub fn status_count(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Status))
    }

    pub fn results_count(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Results(_)))
    }

    pub fn cancel_count(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Cancel))
    }
}

#[async_trait]
impl QueryEngine for MockEngine {
    async fn submit(&self, request: &SubmitRequest<'_>) -> Result<String, EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::Submit(request.sql.to_string()));
        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.submit_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok("exec-1".to_string()),
        }
    }

    async fn status(&self, _execution_id: &str) -> Result<StatusReport, EngineError> {
        self.calls.lock().unwrap().push(EngineCall::Status);
        let step = {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.pop_front()
            } else {
                statuses.front().cloned()
            }
        };
        match step {
            Some(StatusStep::Report(r)) => Ok(r),
            Some(StatusStep::Transient) => Err(EngineError::Transport("connection reset".into())),
            Some(StatusStep::Rejected) => Err(EngineError::Rejected {
                code: "InvalidRequestException".into(),
                message: "QueryExecution exec-1 was not found".into(),
            }),
            Some(StatusStep::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Ok(StatusReport::new(ExecutionState::Running)),
        }
    }

    async fn results_page(
        &self,
        _execution_id: &str,
        next_token: Option<&str>,
        _max_results: u32,
    ) -> Result<ResultPage, EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::Results(next_token.map(str::to_string)));
        {
            let mut failures = self.page_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(EngineError::Throttled("Rate exceeded".into()));
            }
        }
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(&next_token.map(str::to_string))
            .cloned()
            .unwrap_or_default())
    }

    async fn cancel(&self, _execution_id: &str) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(EngineCall::Cancel);
        Ok(())
    }
}

pub(crate) fn page(
    columns: &[(&str, &str)],
    rows: &[&[Option<&str>]],
    next_token: Option<&str>,
) -> ResultPage {
    ResultPage {
        columns: columns
            .iter()
            .map(|(name, ty)| EngineColumn {
                name: name.to_string(),
                type_name: ty.to_string(),
            })
            .collect(),
        rows: rows
            .iter()
            .map(|r| r.iter().map(|c| c.map(str::to_string)).collect())
            .collect(),
        next_token: next_token.map(str::to_string),
    }
}

pub(crate) fn test_settings() -> PipelineSettings {
    PipelineSettings {
        output_location: "s3://athena-results/".to_string(),
        database: "iot_database".to_string(),
        catalog: None,
        work_group: None,
        poll: PollPolicy::default(),
        call_timeout: Duration::from_secs(10),
        sample_rows: 50,
        page_size: 1000,
        max_result_rows: 10_000,
    }
}

pub(crate) fn orchestrator_with(
    llm: Arc<ScriptedLlm>,
    engine: Arc<MockEngine>,
    settings: PipelineSettings,
) -> Orchestrator {
    let client = LlmClient::new(llm, "test-model", Duration::from_secs(30));
    Orchestrator::new(Arc::new(devices_catalog()), client, engine, settings)
}

pub(crate) fn orchestrator(llm: Arc<ScriptedLlm>, engine: Arc<MockEngine>) -> Orchestrator {
    orchestrator_with(llm, engine, test_settings())
}

pub(crate) const AVG_SQL_REPLY: &str =
    "```sql\nSELECT AVG(temperature) FROM devices WHERE device_name = 'A';\n```";
pub(crate) const AVG_SQL: &str = "SELECT AVG(temperature) FROM devices WHERE device_name = 'A'";
