use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::mocks::*;
use crate::core::pipeline::types::Question;
use crate::core::schema::devices_catalog;

#[tokio::test(start_paused = true)]
async fn average_temperature_question_returns_sql_and_answer() {
    let llm = ScriptedLlm::new(vec![
        text(AVG_SQL_REPLY),
        text("The average temperature for device A is 23.5 degrees."),
    ]);
    let engine = Arc::new(MockEngine::single_value("23.5"));
    let orch = orchestrator(llm.clone(), engine.clone());

    let (sql, answer) = orch
        .answer("What is the average temperature for device A?")
        .await;

    assert_eq!(sql, AVG_SQL);
    assert!(answer.contains("23.5"));
    assert_eq!(engine.submit_count(), 1);
    assert_eq!(engine.cancel_count(), 0);
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn answer_prompt_carries_question_sql_and_rows() {
    let llm = ScriptedLlm::new(vec![text(AVG_SQL_REPLY), text("23.5 degrees.")]);
    let engine = Arc::new(MockEngine::single_value("23.5"));
    let orch = orchestrator(llm.clone(), engine);

    orch.answer("What is the average temperature for device A?")
        .await;

    let prompts = llm.prompts.lock().unwrap();
    let synthesis = &prompts[1][1].content;
    assert!(synthesis.contains("What is the average temperature for device A?"));
    assert!(synthesis.contains(AVG_SQL));
    assert!(synthesis.contains("_col0\n23.5"));
}

#[tokio::test(start_paused = true)]
async fn degraded_synthesis_still_returns_sql_and_row_data() {
    let llm = ScriptedLlm::new(vec![
        text(AVG_SQL_REPLY),
        LlmStep::Fail("model overloaded".into()),
    ]);
    let engine = Arc::new(MockEngine::single_value("23.5"));
    let orch = orchestrator(llm, engine);

    let question = Question::new("What is the average temperature for device A?");
    let answer = orch
        .run(&question, &CancellationToken::new())
        .await
        .unwrap();

    assert!(answer.is_degraded());
    assert_eq!(answer.query.sql, AVG_SQL);
    assert_eq!(
        answer.text,
        "Query succeeded; first row: _col0=23.5 (1 row total)."
    );
}

#[tokio::test(start_paused = true)]
async fn empty_synthesis_text_degrades_too() {
    let llm = ScriptedLlm::new(vec![text(AVG_SQL_REPLY), text("   \n")]);
    let engine = Arc::new(MockEngine::single_value("23.5"));
    let (sql, answer) = orchestrator(llm, engine).answer("avg temp for A?").await;
    assert_eq!(sql, AVG_SQL);
    assert!(answer.starts_with("Query succeeded; first row: _col0=23.5"));
}

#[tokio::test(start_paused = true)]
async fn hanging_synthesis_times_out_into_fallback() {
    let llm = ScriptedLlm::new(vec![text(AVG_SQL_REPLY), LlmStep::Hang]);
    let engine = Arc::new(MockEngine::single_value("23.5"));
    let (_, answer) = orchestrator(llm, engine).answer("avg temp for A?").await;
    assert!(answer.contains("23.5"));
}

#[tokio::test(start_paused = true)]
async fn accepted_sql_only_references_catalog_columns() {
    let llm = ScriptedLlm::new(vec![
        text("SELECT device_name, AVG(humidity) AS avg_humidity FROM devices GROUP BY device_name ORDER BY avg_humidity DESC"),
        text("Device B is the most humid."),
    ]);
    let engine = Arc::new(MockEngine::single_value("1"));
    let (sql, _) = orchestrator(llm, engine).answer("Which device is most humid?").await;

    assert!(sql.to_ascii_uppercase().starts_with("SELECT"));
    let catalog = devices_catalog();
    let non_columns = [
        "SELECT", "AVG", "AS", "FROM", "GROUP", "BY", "ORDER", "DESC", "devices", "avg_humidity",
    ];
    for word in sql
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .filter(|w| !non_columns.iter().any(|k| k.eq_ignore_ascii_case(w)))
    {
        assert!(
            catalog.column_type(word).is_some(),
            "'{word}' is not a catalog column"
        );
    }
}
