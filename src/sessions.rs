//! `arena sessions`: browse and delete logged conversations.

use anyhow::Result;

use crate::app::App;
use crate::config::Config;

pub async fn run_list(config: Config) -> Result<()> {
    let app = App::open(config).await?;
    let result = app.chat.log().list_sessions().await;
    app.close().await;
    let sessions = result?;

    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    println!("{:<38} {:<20} TRACKS", "SESSION", "UPDATED");
    for s in &sessions {
        let tracks: Vec<String> = s
            .tracks
            .iter()
            .map(|(tag, n)| format!("{}={}", tag, n))
            .collect();
        println!(
            "{:<38} {:<20} {}",
            s.session_id,
            s.updated_at.format("%Y-%m-%d %H:%M:%S"),
            tracks.join(" ")
        );
    }
    Ok(())
}

pub async fn run_show(config: Config, session_id: &str) -> Result<()> {
    let app = App::open(config).await?;
    let result = app.chat.load_session(session_id).await;
    app.close().await;
    let tracks = result?;

    println!("--- Session {} ---", session_id);
    for (tag, messages) in &tracks {
        println!();
        println!("=== {} ({} messages) ===", tag, messages.len());
        for m in messages {
            println!("[{}] {}: {}", m.ordinal, m.role.as_str(), m.content);
        }
    }
    Ok(())
}

pub async fn run_delete(config: Config, session_id: &str) -> Result<()> {
    let app = App::open(config).await?;
    let result = app.chat.delete_session(session_id).await;
    app.close().await;
    let removed = result?;

    println!("delete session {}", session_id);
    println!("  removed: {}", removed);
    println!("ok");
    Ok(())
}
