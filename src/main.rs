use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use gridchat::engine::ChatEngine;
use gridchat::transcript::reducer::SessionState;
use gridchat::transcript::types::{Block, Message, SessionId, ToolCallStatus};
use gridchat::{util, ApiClient, ChatTransport, Database, SessionCache, SessionStore, Settings, TranscriptStore};

#[derive(Parser)]
#[command(name = "gridchat", version, about = "Chat client for a spreadsheet-editing AI agent")]
struct Cli {
    /// Override the data directory (default ~/.gridchat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a prompt and stream the reply
    Send {
        /// Existing session id; omit to start a new session
        #[arg(long)]
        session: Option<String>,
        prompt: String,
        /// Workspace files to upload and attach
        #[arg(long)]
        attach: Vec<PathBuf>,
    },
    /// List known sessions, most recently updated first
    Sessions,
    /// Reattach to a session with an in-flight turn
    Resume { session: String },
    /// Ask the backend to stop a session's in-flight turn
    Cancel { session: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load();
    util::paths::init_data_dir(cli.data_dir.clone().or_else(|| settings.data_dir.clone()));

    // Log to file so stdout stays clean for transcript output.
    fs::create_dir_all(util::paths::logs_dir())?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::paths::log_file_path())?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    let database = Database::open_default().context("failed to open database")?;
    let sessions = SessionStore::new(database.connection());
    let transcripts = TranscriptStore::new(database.connection());
    let cache = Arc::new(SessionCache::new(Arc::new(transcripts)));

    let api = ApiClient::new(settings.backend_url.clone(), settings.api_token.clone())
        .context("failed to build API client")?;
    let transport: Arc<dyn ChatTransport> = Arc::new(api.clone());
    let engine = ChatEngine::new(transport.clone(), cache)
        .with_sessions(sessions.clone())
        .with_frame_interval(settings.frame_interval())
        .with_recovery_delay(settings.recovery_delay());

    match cli.command {
        Command::Send {
            session,
            prompt,
            attach,
        } => {
            if let Some(id) = session {
                engine.load_session(SessionId::new(id)).await;
            }
            let mut attachments = Vec::new();
            for path in attach {
                let uploaded = api
                    .upload_file(&path)
                    .await
                    .with_context(|| format!("failed to upload {}", path.display()))?;
                attachments.push(uploaded.file_path);
            }
            engine.send(prompt, attachments)?;
            drive_turn(&engine).await?;
        }
        Command::Sessions => {
            let rows = sessions.get_all().context("failed to list sessions")?;
            if rows.is_empty() {
                println!("no sessions yet");
            }
            for row in rows {
                let flight = if row.in_flight { " [in flight]" } else { "" };
                println!(
                    "{}  {}  ({} messages, updated {}){}",
                    row.id,
                    row.title,
                    row.message_count,
                    row.updated_at.format("%Y-%m-%d %H:%M"),
                    flight
                );
            }
        }
        Command::Resume { session } => {
            engine.load_session(SessionId::new(session)).await;
            engine.resubscribe()?;
            drive_turn(&engine).await?;
        }
        Command::Cancel { session } => {
            let id = SessionId::new(session);
            transport
                .abort(&id)
                .await
                .context("failed to cancel session")?;
            println!("cancel requested for {id}");
        }
    }

    Ok(())
}

/// Poll the engine until the turn finishes, resolving interactive pauses
/// from stdin along the way, then print the final assistant output.
async fn drive_turn(engine: &ChatEngine) -> Result<()> {
    let mut last_activity: Option<String> = None;
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snap = engine.snapshot();

        if snap.activity != last_activity {
            if let Some(activity) = &snap.activity {
                eprintln!("... {activity}");
            }
            last_activity = snap.activity.clone();
        }

        if let Some(approval) = &snap.pending_approval {
            eprintln!(
                "approval required: {} {}",
                approval.tool_name, approval.args
            );
            let approved = read_line("approve? [y/N] ")?.trim().eq_ignore_ascii_case("y");
            engine.resolve_approval(approved).await?;
            continue;
        }
        if let Some(question) = &snap.pending_question {
            eprintln!("{}", question.question);
            for (i, option) in question.options.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, option);
            }
            let answer = read_line("> ")?.trim().to_string();
            engine.answer_question(vec![answer]).await?;
            continue;
        }
        if !snap.streaming {
            print_final(&snap);
            return Ok(());
        }
    }
}

fn read_line(prompt: &str) -> Result<String> {
    use std::io::Write;
    let mut out = std::io::stderr();
    out.write_all(prompt.as_bytes())?;
    out.flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}

fn print_final(state: &SessionState) {
    let Some(Message::Assistant {
        blocks,
        affected_files,
        ..
    }) = state.messages.iter().rev().find(|m| m.is_assistant())
    else {
        return;
    };
    for block in blocks {
        match block {
            Block::Text { content } => println!("{content}"),
            Block::ToolCall {
                name,
                status,
                error,
                ..
            } => {
                let mark = match status {
                    ToolCallStatus::Success => "ok",
                    ToolCallStatus::Error => "failed",
                    _ => "pending",
                };
                match error {
                    Some(err) => println!("[{name}: {mark} - {err}]"),
                    None => println!("[{name}: {mark}]"),
                }
            }
            Block::TaskList { items } => {
                for item in items {
                    println!("  [{:?}] {}", item.status, item.content);
                }
            }
            Block::TokenStats { stats } => {
                println!("({} tokens, {} iterations)", stats.total_tokens, stats.iterations);
            }
            Block::Error { message } => eprintln!("error: {message}"),
            _ => {}
        }
    }
    if let Some(files) = affected_files {
        println!("files: {}", files.join(", "));
    }
}
