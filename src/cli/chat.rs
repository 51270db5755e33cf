use std::sync::Arc;

use anyhow::Result;
use console::style;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use sensorsql::core::pipeline::{ConversationContext, Orchestrator};
use sensorsql::core::terminal;

/// Line-oriented session over one conversation. Ctrl-C cancels the question in flight.
pub(crate) async fn run_chat(orchestrator: Arc<Orchestrator>) -> Result<()> {
    terminal::print_banner();
    terminal::print_info("Ask a question about your sensor data. Type `exit` to leave.");

    let mut conversation = ConversationContext::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout
            .write_all(format!("{} ", style(">").green().bold()).as_bytes())
            .await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "exit" | "quit" => break,
            _ => {}
        }

        let token = conversation.begin();
        let answer = orchestrator.answer_with_cancel(question, token.clone());
        tokio::pin!(answer);
        let reply = tokio::select! {
            reply = &mut answer => reply,
            _ = tokio::signal::ctrl_c() => {
                terminal::print_warn("Cancelling...");
                token.cancel();
                answer.await
            }
        };
        conversation.record(&token, question, &reply);
        terminal::print_reply(&reply.sql, &reply.answer, reply.is_error());
        println!();
    }

    terminal::print_success(&format!(
        "{} question(s) answered in this session.",
        conversation.history().len()
    ));
    terminal::print_goodbye();
    Ok(())
}
