//! `arena ask` and `arena arena`: one chat turn from the command line.
//!
//! Without `--session` a new session is started and its id printed, so the
//! next invocation can continue it.

use anyhow::Result;

use crate::app::App;
use crate::chat::Answer;
use crate::config::Config;
use crate::models::BackendTag;

pub async fn run_ask(
    config: Config,
    message: &str,
    backend: BackendTag,
    session: Option<String>,
    retry: bool,
) -> Result<()> {
    let app = App::open(config).await?;
    let session_id = session.unwrap_or_else(|| app.chat.new_session());

    let result = if retry {
        app.chat.retry(&session_id, backend).await
    } else {
        app.chat.answer(&session_id, backend, message).await
    };
    app.close().await;

    println!("session: {}", session_id);
    print_answer(&result?);
    Ok(())
}

pub async fn run_arena(config: Config, message: &str, session: Option<String>) -> Result<()> {
    let app = App::open(config).await?;
    let session_id = session.unwrap_or_else(|| app.chat.new_session());
    let result = app.chat.answer_arena(&session_id, message).await;
    app.close().await;
    let arena = result?;

    println!("session: {}", arena.session_id);
    for track in &arena.tracks {
        println!();
        println!("=== {} ===", track.backend_tag);
        match (&track.answer, &track.error) {
            (Some(answer), _) => print_answer(answer),
            (None, Some(err)) => println!("error ({}): {}", err.code, err.message),
            (None, None) => {}
        }
    }
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("backend: {}", answer.backend_tag);
    if !answer.context_fragments.is_empty() {
        let ids: Vec<&str> = answer
            .context_fragments
            .iter()
            .map(|f| f.fragment.id.as_str())
            .collect();
        println!("context: {}", ids.join(", "));
    }
    for thought in &answer.reasoning {
        println!("reasoning: {}", thought.replace('\n', " "));
    }
    println!();
    println!("{}", answer.assistant_message.content);
}
