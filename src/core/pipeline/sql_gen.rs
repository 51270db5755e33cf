//! Question → validated `SELECT`.
//!
//! The generated text goes through a strict normalizer: fence body → first statement →
//! leading/trailing comments and whitespace removed → leading keyword must be `SELECT`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::error::PipelineError;
use super::types::{GeneratedQuery, Question};
use crate::core::llm::{ChatMessage, LlmClient};
use crate::core::schema::SchemaCatalog;

const SQL_INSTRUCTIONS: &str = "You write SQL for Amazon Athena (Trino dialect) over IoT sensor data.\n\
Rules:\n\
1. Reply with exactly one read-only SELECT statement and nothing else: no explanation, no markdown.\n\
2. Use only the tables and columns listed in the schema; never invent columns.\n\
3. Never write INSERT, UPDATE, DELETE, DROP, ALTER, CREATE or any other statement that changes data.\n\
4. Quote string literals with single quotes.";

/// Same question and schema always produce the same messages.
pub fn build_sql_prompt(question: &str, catalog: &SchemaCatalog) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SQL_INSTRUCTIONS),
        ChatMessage::user(format!(
            "Schema:\n{}\n\nQuestion: {}",
            catalog.describe(),
            question
        )),
    ]
}

/// Extracts and validates the statement from raw generated text.
pub fn extract_sql(raw: &str) -> Result<String, PipelineError> {
    let body = fence_body(raw);
    let (statement, rest) = first_statement(body);
    if !rest.trim().is_empty() {
        debug!("Discarding text after the first statement: {:?}", rest.trim());
    }

    let keyword: String = statement
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '_')
        .collect();
    if !keyword.eq_ignore_ascii_case("SELECT") {
        let found = if keyword.is_empty() {
            statement.chars().take(24).collect()
        } else {
            keyword
        };
        return Err(PipelineError::InvalidQueryKind { found });
    }
    Ok(statement.to_string())
}

const FENCE_LANGUAGES: &[&str] = &[
    "sql", "postgresql", "postgres", "mysql", "presto", "trino", "athena", "hive", "sqlite",
    "text", "plaintext",
];

/// Body of the first ``` fence (language tag dropped), or the whole text without one.
/// The fence may open and close on the same line.
fn fence_body(raw: &str) -> &str {
    let Some(open) = raw.find("```") else {
        return raw;
    };
    let after_marker = &raw[open + 3..];
    let body = &after_marker[language_tag_len(after_marker)..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

/// Length of the language tag right after an opening fence, 0 when there is none.
/// A word ending the line is a tag; on the same line only known language names are.
/// `SELECT` is always the statement itself.
fn language_tag_len(after_marker: &str) -> usize {
    let word_len = after_marker
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+'))
        .unwrap_or(after_marker.len());
    let word = &after_marker[..word_len];
    if word.is_empty() || word.eq_ignore_ascii_case("select") {
        return 0;
    }
    let rest = &after_marker[word_len..];
    let line_rest = rest.split('\n').next().unwrap_or("");
    if line_rest.trim().is_empty() {
        // Tag followed by the end of the line: skip the newline too.
        return word_len + rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
    }
    if FENCE_LANGUAGES.iter().any(|l| word.eq_ignore_ascii_case(l)) {
        return word_len;
    }
    0
}

#[derive(Clone, Copy, PartialEq)]
enum Lex {
    Code,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment,
}

/// Splits off the first statement, trimmed of surrounding whitespace and comments.
/// Returns `(statement, remainder after the terminating ';')`.
fn first_statement(body: &str) -> (&str, &str) {
    let mut state = Lex::Code;
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut rest_start = body.len();
    let mut chars = body.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next = chars.peek().map(|(_, n)| *n);
        match state {
            Lex::Code => match c {
                ';' => {
                    rest_start = i + 1;
                    break;
                }
                '-' if next == Some('-') => {
                    chars.next();
                    state = Lex::LineComment;
                }
                '/' if next == Some('*') => {
                    chars.next();
                    state = Lex::BlockComment;
                }
                c if c.is_whitespace() => {}
                c => {
                    if c == '\'' {
                        state = Lex::SingleQuoted;
                    } else if c == '"' {
                        state = Lex::DoubleQuoted;
                    }
                    start.get_or_insert(i);
                    end = i + c.len_utf8();
                }
            },
            // `''` closes then immediately reopens, which keeps the escape inside the literal.
            Lex::SingleQuoted => {
                end = i + c.len_utf8();
                if c == '\'' {
                    state = Lex::Code;
                }
            }
            Lex::DoubleQuoted => {
                end = i + c.len_utf8();
                if c == '"' {
                    state = Lex::Code;
                }
            }
            Lex::LineComment => {
                if c == '\n' {
                    state = Lex::Code;
                }
            }
            Lex::BlockComment => {
                if c == '*' && next == Some('/') {
                    chars.next();
                    state = Lex::Code;
                }
            }
        }
    }

    let statement = match start {
        Some(s) => &body[s..end],
        None => "",
    };
    (statement, &body[rest_start..])
}

pub struct SqlGenerator {
    llm: LlmClient,
    catalog: Arc<SchemaCatalog>,
}

impl SqlGenerator {
    pub fn new(llm: LlmClient, catalog: Arc<SchemaCatalog>) -> Self {
        Self { llm, catalog }
    }

    pub async fn generate(&self, question: &Question) -> Result<GeneratedQuery, PipelineError> {
        let messages = build_sql_prompt(&question.text, &self.catalog);
        let raw = self.llm.generate(&messages).await.map_err(|e| {
            warn!(question_id = %question.id, "SQL generation call failed: {}", e);
            PipelineError::Generation(e.to_string())
        })?;
        debug!(question_id = %question.id, "Raw generation: {:?}", raw);

        let sql = extract_sql(&raw).inspect_err(|e| {
            warn!(question_id = %question.id, "Rejected generated text: {}", e);
        })?;
        info!(question_id = %question.id, sql = %sql, "Generated SQL");
        Ok(GeneratedQuery {
            sql,
            question_id: question.id.clone(),
            generated_at: Utc::now(),
        })
    }
}
