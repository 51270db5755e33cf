
use std::sync::Arc;

use e2e_harness::{MockAthenaServer, MockLlmServer, MockServer, TestResult, bind_not_permitted};
use sensorsql::core::aws::{Credentials, CredentialsProvider};
use sensorsql::core::config::AppConfig;
use sensorsql::core::pipeline::Orchestrator;
use sensorsql::interfaces::web::ApiServer;

const AVG_SQL: &str = "SELECT AVG(temperature) FROM devices WHERE device_name = 'A'";

fn mock_config(athena: &MockAthenaServer, llm: &MockLlmServer) -> TestResult<AppConfig> {
    let toml = format!(
        r#"
[athena]
output_location = "s3://athena-results/"
endpoint = "{athena}"

[schema]
table = "devices"
columns = [
    {{ name = "device_name", type = "string" }},
    {{ name = "temperature", type = "double" }},
    {{ name = "humidity", type = "double" }},
    {{ name = "timestamp", type = "timestamp" }},
]

[llm]
provider = "openai"
model = "mock-model"
base_url = "{llm}"
api_key_env = "SENSORSQL_E2E_UNSET_KEY"

[pipeline]
poll_base_ms = 10
poll_max_ms = 50
max_wait_secs = 10
"#,
        athena = athena.endpoint(),
        llm = llm.base_url(),
    );
    Ok(AppConfig::from_toml_str(&toml)?)
}

fn static_credentials() -> Arc<CredentialsProvider> {
    Arc::new(CredentialsProvider::from_static(Credentials::new(
        "AKIDEXAMPLE",
        "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
    )))
}

async fn start_mocks() -> TestResult<Option<(MockAthenaServer, MockLlmServer)>> {
    let athena = match MockAthenaServer::start().await {
        Ok(server) => server,
        Err(e) if bind_not_permitted(e.as_ref()) => {
            eprintln!("Skipping e2e test: local bind not permitted ({e})");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let llm = MockLlmServer::start().await?;
    Ok(Some((athena, llm)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn answers_average_temperature_over_http() -> TestResult<()> {
    let Some((athena, llm)) = start_mocks().await? else {
        return Ok(());
    };
    let config = mock_config(&athena, &llm)?;
    let orchestrator = Orchestrator::from_config(&config, static_credentials()).await?;

    let (sql, answer) = orchestrator
        .answer("What is the average temperature for device A?")
        .await;

    assert_eq!(sql, AVG_SQL);
    assert!(answer.contains("23.5"), "answer: {answer}");

    athena.with_log(|log| {
        assert_eq!(log.submitted_sql, vec![AVG_SQL.to_string()]);
        assert_eq!(log.targets[0], "AmazonAthena.StartQueryExecution");
        assert!(
            log.targets
                .iter()
                .filter(|t| *t == "AmazonAthena.GetQueryExecution")
                .count()
                >= 2
        );
        assert_eq!(
            log.targets.last().map(String::as_str),
            Some("AmazonAthena.GetQueryResults")
        );
        assert!(log.stopped.is_empty());
        assert_eq!(log.authorizations.len(), log.targets.len());
        assert!(
            log.authorizations
                .iter()
                .all(|a| a.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"))
        );
    });
    assert_eq!(llm.responses().len(), 2);

    athena.shutdown().await;
    llm.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_query_reports_engine_diagnostic() -> TestResult<()> {
    let Some((athena, llm)) = start_mocks().await? else {
        return Ok(());
    };
    let config = mock_config(&athena, &llm)?;
    let orchestrator = Orchestrator::from_config(&config, static_credentials()).await?;

    let reply = orchestrator
        .answer_with_cancel(
            "Show the broken humidity column",
            tokio_util::sync::CancellationToken::new(),
        )
        .await;

    assert_eq!(reply.sql, "SELECT humidty FROM devices");
    assert_eq!(reply.error_kind, Some("query_execution_error"));
    assert!(reply.answer.contains("COLUMN_NOT_FOUND"), "answer: {}", reply.answer);
    athena.with_log(|log| {
        assert!(
            !log.targets
                .iter()
                .any(|t| t == "AmazonAthena.GetQueryResults")
        );
    });
    // Only the SQL prompt reached the model.
    assert_eq!(llm.responses().len(), 1);

    athena.shutdown().await;
    llm.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mutating_sql_never_reaches_athena() -> TestResult<()> {
    let Some((athena, llm)) = start_mocks().await? else {
        return Ok(());
    };
    let config = mock_config(&athena, &llm)?;
    let orchestrator = Orchestrator::from_config(&config, static_credentials()).await?;

    let (sql, answer) = orchestrator.answer("please delete everything").await;

    assert!(sql.is_empty());
    assert!(answer.contains("SELECT"), "answer: {answer}");
    athena.with_log(|log| assert!(log.targets.is_empty()));

    athena.shutdown().await;
    llm.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn api_server_answers_ask_requests() -> TestResult<()> {
    let Some((athena, llm)) = start_mocks().await? else {
        return Ok(());
    };
    let config = mock_config(&athena, &llm)?;
    let orchestrator = Orchestrator::from_config(&config, static_credentials()).await?;
    let api = MockServer::spawn(ApiServer::new(Arc::new(orchestrator)).router(0)).await?;

    let client = reqwest::Client::new();
    let response = client
        .post(api.url("/api/ask"))
        .json(&serde_json::json!({
            "question": "What is the average temperature for device A?",
            "conversation_id": "e2e"
        }))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["sql"], AVG_SQL);
    assert!(body["answer"].as_str().unwrap_or("").contains("23.5"));
    assert_eq!(body["conversation_id"], "e2e");

    let history: serde_json::Value = client
        .get(api.url("/api/conversations/e2e"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(history["success"], true);
    assert_eq!(history["turns"].as_array().map(Vec::len), Some(1));

    api.shutdown().await;
    athena.shutdown().await;
    llm.shutdown().await;
    Ok(())
}
