use std::sync::Arc;

use super::mocks::*;
use crate::core::pipeline::orchestrator::{ConversationContext, Reply};

#[tokio::test(start_paused = true)]
async fn answers_are_recorded_in_the_conversation() {
    let llm = ScriptedLlm::new(vec![
        text(AVG_SQL_REPLY),
        text("It is 23.5 degrees."),
        text("DROP TABLE devices"),
    ]);
    let engine = Arc::new(MockEngine::single_value("23.5"));
    let orch = orchestrator(llm, engine);
    let mut conversation = ConversationContext::new();

    let first = orch.answer_in(&mut conversation, "avg temp for A?").await;
    let second = orch.answer_in(&mut conversation, "now delete it").await;

    assert!(!first.is_error());
    assert_eq!(second.error_kind, Some("invalid_query_kind"));
    let history = conversation.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].sql, AVG_SQL);
    assert_eq!(history[1].question, "now delete it");
    assert!(!conversation.is_busy());
}

#[test]
fn a_new_question_supersedes_the_inflight_one() {
    let mut conversation = ConversationContext::with_id("c-1");
    let first = conversation.begin();
    let second = conversation.begin();

    assert!(first.is_cancelled());
    assert!(!second.is_cancelled());

    let reply = Reply {
        sql: String::new(),
        answer: "This question was cancelled before it finished.".into(),
        error_kind: Some("cancelled"),
    };
    conversation.record(&first, "old question", &reply);
    assert!(conversation.history().is_empty());
    assert!(conversation.is_busy());

    let done = Reply {
        sql: "SELECT 1".into(),
        answer: "1".into(),
        error_kind: None,
    };
    conversation.record(&second, "new question", &done);
    assert_eq!(conversation.history().len(), 1);
    assert!(!conversation.is_busy());
}

#[test]
fn cancel_stops_the_inflight_question() {
    let mut conversation = ConversationContext::new();
    let token = conversation.begin();
    conversation.cancel();
    assert!(token.is_cancelled());
    assert!(!conversation.is_busy());
}

#[test]
fn history_keeps_only_the_latest_turns() {
    let mut conversation = ConversationContext::with_id("c-2").with_max_turns(3);
    for n in 1..=5 {
        let token = conversation.begin();
        let reply = Reply {
            sql: format!("SELECT {n}"),
            answer: n.to_string(),
            error_kind: None,
        };
        conversation.record(&token, &format!("question {n}"), &reply);
    }

    let sqls: Vec<&str> = conversation.history().iter().map(|t| t.sql.as_str()).collect();
    assert_eq!(sqls, vec!["SELECT 3", "SELECT 4", "SELECT 5"]);
}

#[test]
fn a_cancelled_question_does_not_leave_the_conversation_busy() {
    let mut conversation = ConversationContext::new();
    let token = conversation.begin();
    token.cancel();

    let reply = Reply {
        sql: String::new(),
        answer: "This question was cancelled before it finished.".into(),
        error_kind: Some("cancelled"),
    };
    conversation.record(&token, "slow question", &reply);

    assert!(conversation.history().is_empty());
    assert!(!conversation.is_busy());
}
