use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::PipelineError;
use super::fetcher::fetch_results;
use super::poller::{abandon, poll_until_terminal};
use super::sql_gen::SqlGenerator;
use super::synth::AnswerSynthesizer;
use super::types::{Answer, Question, QueryExecution};
use super::PipelineSettings;
use crate::core::aws::{AwsClient, CredentialsProvider};
use crate::core::config::AppConfig;
use crate::core::llm::LlmClient;
use crate::core::query::{AthenaEngine, QueryEngine};
use crate::core::schema::SchemaCatalog;

/// A failed question, with the SQL when generation got that far.
#[derive(Debug, Clone)]
pub struct Failure {
    pub sql: Option<String>,
    pub error: PipelineError,
}

impl Failure {
    fn before_sql(error: PipelineError) -> Self {
        Self { sql: None, error }
    }
}

/// What callers see: always two strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub sql: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl Reply {
    pub fn is_error(&self) -> bool {
        self.error_kind.is_some()
    }
}

impl From<Result<Answer, Failure>> for Reply {
    fn from(result: Result<Answer, Failure>) -> Self {
        match result {
            Ok(answer) => Reply {
                sql: answer.query.sql,
                answer: answer.text,
                error_kind: None,
            },
            Err(failure) => Reply {
                sql: failure.sql.unwrap_or_default(),
                answer: failure.error.user_message(),
                error_kind: Some(failure.error.kind()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub question: String,
    pub sql: String,
    pub answer: String,
}

/// Turns kept per conversation unless configured otherwise.
pub const DEFAULT_MAX_TURNS: usize = 50;

/// One conversation's history and its in-flight question, owned by the caller.
/// History keeps the most recent `max_turns` turns.
#[derive(Debug)]
pub struct ConversationContext {
    pub id: String,
    history: Vec<Turn>,
    inflight: Option<CancellationToken>,
    max_turns: usize,
    last_active: Instant,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: Vec::new(),
            inflight: None,
            max_turns: DEFAULT_MAX_TURNS,
            last_active: Instant::now(),
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    /// Starts a new question, cancelling any question it supersedes.
    pub fn begin(&mut self) -> CancellationToken {
        if let Some(previous) = self.inflight.take() {
            info!(conversation_id = %self.id, "Superseding in-flight question");
            previous.cancel();
        }
        let token = CancellationToken::new();
        self.inflight = Some(token.clone());
        self.last_active = Instant::now();
        token
    }

    /// Records a finished question. Cancelled questions leave no turn.
    pub fn record(&mut self, token: &CancellationToken, question: &str, reply: &Reply) {
        self.last_active = Instant::now();
        // Every superseded token was cancelled in `begin`, so a live one is current.
        if token.is_cancelled() {
            // A cancelled in-flight token belongs to no running question.
            if self.inflight.as_ref().is_some_and(|t| t.is_cancelled()) {
                self.inflight = None;
            }
            return;
        }
        self.inflight = None;
        self.history.push(Turn {
            question: question.to_string(),
            sql: reply.sql.clone(),
            answer: reply.answer.clone(),
        });
        if self.history.len() > self.max_turns {
            let excess = self.history.len() - self.max_turns;
            self.history.drain(..excess);
        }
    }

    /// Time of the last `begin` or `record`.
    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub fn cancel(&mut self) {
        if let Some(token) = self.inflight.take() {
            token.cancel();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inflight.is_some()
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }
}

/// Sequences generation, submission, polling, fetching and synthesis for one question.
pub struct Orchestrator {
    catalog: Arc<SchemaCatalog>,
    engine: Arc<dyn QueryEngine>,
    generator: SqlGenerator,
    synthesizer: AnswerSynthesizer,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        llm: LlmClient,
        engine: Arc<dyn QueryEngine>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            generator: SqlGenerator::new(llm.clone(), catalog.clone()),
            synthesizer: AnswerSynthesizer::new(llm, settings.sample_rows),
            catalog,
            engine,
            settings,
        }
    }

    /// Wires Athena, the schema source and the generation provider from configuration.
    /// A schema that cannot be loaded is an error; the process should not start without one.
    pub async fn from_config(
        config: &AppConfig,
        credentials: Arc<CredentialsProvider>,
    ) -> anyhow::Result<Self> {
        let region = config.athena.region.as_str();
        let call_timeout = config.pipeline.call_timeout();

        let glue = match config.schema {
            Some(_) => None,
            None => Some(AwsClient::new(
                "glue",
                "glue",
                region,
                config.glue.endpoint.as_deref(),
                credentials.clone(),
                call_timeout,
            )?),
        };
        let catalog = SchemaCatalog::load(config, glue.as_ref())
            .await
            .map_err(|e| e.context("failed to load the schema catalog"))?;

        let athena = AwsClient::new(
            "athena",
            "athena",
            region,
            config.athena.endpoint.as_deref(),
            credentials.clone(),
            call_timeout,
        )?;
        let llm = LlmClient::from_config(
            &config.llm,
            credentials,
            region,
            config.pipeline.generation_timeout(),
        )?;
        let settings = PipelineSettings::from_config(config)?;
        info!(
            "Pipeline ready: database {}, results in {}",
            settings.database, settings.output_location
        );

        Ok(Self::new(
            Arc::new(catalog),
            llm,
            Arc::new(AthenaEngine::new(athena)),
            settings,
        ))
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// `(sql, answer)`; never fails. On error the SQL may be empty and the answer explains.
    pub async fn answer(&self, question: &str) -> (String, String) {
        let reply = self.answer_with_cancel(question, CancellationToken::new()).await;
        (reply.sql, reply.answer)
    }

    pub async fn answer_with_cancel(&self, question: &str, cancel: CancellationToken) -> Reply {
        let question = Question::new(question);
        self.run(&question, &cancel).await.into()
    }

    /// Single-owner conversations (the CLI REPL). Shared contexts should use
    /// `begin`/`record` around `answer_with_cancel` instead of holding the borrow.
    pub async fn answer_in(&self, context: &mut ConversationContext, question: &str) -> Reply {
        let token = context.begin();
        let reply = self.answer_with_cancel(question, token.clone()).await;
        context.record(&token, question, &reply);
        reply
    }

    pub async fn run(
        &self,
        question: &Question,
        cancel: &CancellationToken,
    ) -> Result<Answer, Failure> {
        info!(question_id = %question.id, "Question: {}", question.text);
        let result = self.run_stages(question, cancel).await;
        if let Err(failure) = &result {
            warn!(
                question_id = %question.id,
                kind = failure.error.kind(),
                "Question failed: {}",
                failure.error
            );
        }
        result
    }

    async fn run_stages(
        &self,
        question: &Question,
        cancel: &CancellationToken,
    ) -> Result<Answer, Failure> {
        let query = unless_cancelled(cancel, self.generator.generate(question))
            .await
            .map_err(Failure::before_sql)?;
        let with_sql = |error: PipelineError| Failure {
            sql: Some(query.sql.clone()),
            error,
        };

        if cancel.is_cancelled() {
            return Err(with_sql(PipelineError::Cancelled));
        }
        // Submission is not raced against `cancel`: once the engine accepts the query its
        // id is needed to stop it.
        let execution_id = self.submit(&query.sql).await.map_err(with_sql)?;
        info!(question_id = %question.id, execution_id = %execution_id, "Query submitted");
        if cancel.is_cancelled() {
            info!(execution_id = %execution_id, "Cancelled during submission");
            let error = abandon(
                self.engine.as_ref(),
                &execution_id,
                &self.settings.poll,
                PipelineError::Cancelled,
            )
            .await;
            return Err(with_sql(error));
        }

        let mut guard = ExecutionGuard::new(
            self.engine.clone(),
            &execution_id,
            self.settings.call_timeout,
        );
        let polled = poll_until_terminal(
            self.engine.as_ref(),
            QueryExecution::submitted(execution_id),
            &self.settings.poll,
            cancel,
        )
        .await;
        guard.disarm();
        let execution = polled.map_err(with_sql)?;
        info!(
            question_id = %question.id,
            execution_id = %execution.execution_id,
            "Query succeeded"
        );

        let result = fetch_results(
            self.engine.as_ref(),
            &self.catalog,
            &execution.execution_id,
            &self.settings,
            cancel,
        )
        .await
        .map_err(with_sql)?;

        let synthesis = self.synthesizer.synthesize(question, query.clone(), Arc::new(result));
        unless_cancelled(cancel, async { Ok(synthesis.await) })
            .await
            .map_err(with_sql)
    }

    async fn submit(&self, sql: &str) -> Result<String, PipelineError> {
        let request = self.settings.submit_request(sql);
        match tokio::time::timeout(self.settings.call_timeout, self.engine.submit(&request)).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e)) => Err(PipelineError::Submission(e.to_string())),
            Err(_) => Err(PipelineError::Submission(format!(
                "submission timed out after {}s",
                self.settings.call_timeout.as_secs_f64()
            ))),
        }
    }
}

/// Stops a live remote execution when the question's future is dropped mid-poll, e.g. an
/// HTTP client that disconnected. Disarmed once polling has returned.
struct ExecutionGuard {
    engine: Arc<dyn QueryEngine>,
    execution_id: Option<String>,
    call_timeout: Duration,
}

impl ExecutionGuard {
    fn new(engine: Arc<dyn QueryEngine>, execution_id: &str, call_timeout: Duration) -> Self {
        Self {
            engine,
            execution_id: Some(execution_id.to_string()),
            call_timeout,
        }
    }

    fn disarm(&mut self) {
        self.execution_id = None;
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        let Some(id) = self.execution_id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(execution_id = %id, "No runtime to cancel the abandoned execution");
            return;
        };
        warn!(execution_id = %id, "Question dropped while polling; cancelling the execution");
        let engine = self.engine.clone();
        let call_timeout = self.call_timeout;
        runtime.spawn(async move {
            match tokio::time::timeout(call_timeout, engine.cancel(&id)).await {
                Ok(Ok(())) => info!(execution_id = %id, "Cancel requested"),
                Ok(Err(e)) => warn!(execution_id = %id, "Cancel failed: {}", e),
                Err(_) => warn!(execution_id = %id, "Cancel call timed out"),
            }
        });
    }
}

async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        res = fut => res,
    }
}
