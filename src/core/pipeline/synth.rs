//! Rows → natural-language answer, degrading to a deterministic summary.

use std::sync::Arc;

use tracing::{info, warn};

use super::types::{Answer, GeneratedQuery, Question, ResultSet};
use crate::core::llm::{ChatMessage, LlmClient};

const ANSWER_INSTRUCTIONS: &str = "You answer questions about IoT sensor data. \
You are given the user's question, the SQL that was run and a sample of its result rows. \
Answer in one or two plain sentences using only those rows. Quote the numbers you rely on. \
If the rows are empty, say that no matching data was found.";

pub fn build_answer_prompt(
    question: &str,
    sql: &str,
    result: &ResultSet,
    sample_rows: usize,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(ANSWER_INSTRUCTIONS),
        ChatMessage::user(format!(
            "Question: {}\n\nSQL:\n{}\n\nResult:\n{}",
            question,
            sql,
            render_sample(result, sample_rows)
        )),
    ]
}

/// Pipe table of at most `sample_rows` rows plus a count of the rest.
pub fn render_sample(result: &ResultSet, sample_rows: usize) -> String {
    if result.is_empty() {
        return "(no rows)".to_string();
    }
    let mut out = result
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(" | ");
    for row in result.rows.iter().take(sample_rows) {
        out.push('\n');
        out.push_str(
            &row.cells
                .iter()
                .map(|(_, v)| v.to_string())
                .collect::<Vec<_>>()
                .join(" | "),
        );
    }
    let hidden = result.len().saturating_sub(sample_rows);
    if hidden > 0 {
        out.push_str(&format!("\n... {} more row(s) not shown", hidden));
    }
    out
}

/// Built from the row data alone; never empty.
pub fn fallback_answer(result: &ResultSet) -> String {
    match result.rows.first() {
        None => "Query succeeded but returned no rows.".to_string(),
        Some(first) => {
            let total = result.len();
            format!(
                "Query succeeded; first row: {} ({} row{} total).",
                first.describe(),
                total,
                if total == 1 { "" } else { "s" }
            )
        }
    }
}

pub struct AnswerSynthesizer {
    llm: LlmClient,
    sample_rows: usize,
}

impl AnswerSynthesizer {
    pub fn new(llm: LlmClient, sample_rows: usize) -> Self {
        Self { llm, sample_rows }
    }

    /// Never fails: a failed, timed-out or empty generation yields the fallback summary.
    pub async fn synthesize(
        &self,
        question: &Question,
        query: GeneratedQuery,
        result: Arc<ResultSet>,
    ) -> Answer {
        let messages = build_answer_prompt(&question.text, &query.sql, &result, self.sample_rows);
        let generated = match self.llm.generate(&messages).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                warn!(question_id = %question.id, "Answer synthesis returned empty text; using fallback");
                None
            }
            Err(e) => {
                warn!(question_id = %question.id, "Answer synthesis failed; using fallback: {}", e);
                None
            }
        };

        match generated {
            Some(text) => {
                info!(question_id = %question.id, "Answer synthesized");
                Answer {
                    text,
                    query,
                    result: Some(result),
                }
            }
            None => Answer {
                text: fallback_answer(&result),
                query,
                result: None,
            },
        }
    }
}
