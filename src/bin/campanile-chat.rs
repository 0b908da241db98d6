//! Interactive chat tool for the campus dashboard backend.
//!
//! Streams assistant replies to the terminal as they arrive. Ctrl+C during
//! a reply stops the stream and keeps the partial text.
//!
//! # Usage
//!
//! ```bash
//! # Token from the CAMPANILE_TOKEN environment variable
//! campanile-chat
//!
//! # Point at a specific backend
//! campanile-chat --base-url http://dashboard.example.edu:8000 --token SECRET
//! ```
//!
//! # Commands
//!
//! - `/help` - Show available commands
//! - `/new` - Start a fresh session
//! - `/sessions` - List known sessions
//! - `/switch <id>` - Switch to another session
//! - `/delete [id]` - Delete a session (default: current)
//! - `/history` - Reprint the current session's messages
//! - `/quit` - Exit

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::broadcast::error::RecvError;

use campanile::{
    ChatArgs, ChatEvent, ChatOrchestrator, ClientConfig, HttpTransport, Role, SessionId,
};

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    New,
    Sessions,
    Switch(String),
    Delete(Option<String>),
    History,
    Help,
    Quit,
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `None` if the input should be sent as a chat message.
fn parse_command(input: &str) -> Option<ReplCommand> {
    let input = input.trim();
    if !input.starts_with('/') {
        return None;
    }
    let mut parts = input[1..].splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" => ReplCommand::New,
        "sessions" | "list" => ReplCommand::Sessions,
        "switch" => match argument {
            Some(id) => ReplCommand::Switch(id.to_string()),
            None => ReplCommand::Invalid("/switch requires a session id".to_string()),
        },
        "delete" => ReplCommand::Delete(argument.map(|s| s.to_string())),
        "history" => ReplCommand::History,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        other => ReplCommand::Invalid(format!("Unknown command: /{}", other)),
    };
    Some(result)
}

fn help_text() -> &'static str {
    "/new            Start a fresh session
/sessions       List known sessions
/switch <id>    Switch to another session
/delete [id]    Delete a session (default: current)
/history        Reprint the current session's messages
/help           Show this help
/quit           Exit"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("campanile-chat [OPTIONS]");
    let config = match &args.token {
        Some(token) => ClientConfig::new(token.clone()),
        None => ClientConfig::from_env()?,
    }
    .apply_args(&args);

    let transport = Arc::new(HttpTransport::new(&config)?);
    let mut orchestrator = ChatOrchestrator::new(transport.clone(), transport, &config);
    orchestrator.refresh_sessions().await?;
    let session_id = orchestrator.new_session().await?;

    let mut rl = DefaultEditor::new()?;

    // Flag for interrupt handling during streaming
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    println!("Campus Chat (session: {})", session_id);
    println!("Type /help for commands, /quit to exit\n");
    print_history(&orchestrator).await;

    loop {
        interrupted.store(false, Ordering::Relaxed);

        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ReplCommand::Quit => {
                            orchestrator.cancel_active().await;
                            println!("Goodbye!");
                            break;
                        }
                        ReplCommand::New => match orchestrator.new_session().await {
                            Ok(id) => {
                                println!("Switched to new session {}", id);
                                print_history(&orchestrator).await;
                            }
                            Err(err) => eprintln!("Error: {}", err),
                        },
                        ReplCommand::Sessions => {
                            print_sessions(&orchestrator);
                        }
                        ReplCommand::Switch(id) => {
                            let target = SessionId::new(id);
                            match orchestrator.switch_session(&target).await {
                                Ok(()) => {
                                    println!("Switched to session {}", target);
                                    print_history(&orchestrator).await;
                                }
                                Err(err) => eprintln!("Error: {}", err),
                            }
                        }
                        ReplCommand::Delete(id) => {
                            let target = match id {
                                Some(id) => SessionId::new(id),
                                None => match orchestrator.current_session() {
                                    Some(current) => current.clone(),
                                    None => {
                                        eprintln!("Error: no active session");
                                        continue;
                                    }
                                },
                            };
                            match orchestrator.delete_session(&target).await {
                                Ok(()) => println!("Deleted session {}", target),
                                Err(err) => eprintln!("Error: {}", err),
                            }
                        }
                        ReplCommand::History => {
                            print_history(&orchestrator).await;
                        }
                        ReplCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {}", line);
                            }
                        }
                        ReplCommand::Invalid(message) => {
                            eprintln!("Error: {}", message);
                        }
                    }
                    continue;
                }

                if let Err(err) = stream_reply(&mut orchestrator, line, &interrupted).await {
                    eprintln!("Error: {}", err);
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                orchestrator.cancel_active().await;
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Input error: {}", err);
                break;
            }
        }
    }

    Ok(())
}

/// Submits `text` and prints the reply as it streams, cumulative update by
/// cumulative update. Ctrl+C stops the stream and keeps the partial text.
async fn stream_reply(
    orchestrator: &mut ChatOrchestrator,
    text: &str,
    interrupted: &AtomicBool,
) -> campanile::Result<()> {
    use std::io::Write as _;

    let mut events = orchestrator.subscribe();
    let message_id = orchestrator.submit(text).await?;

    print!("Assistant: ");
    let _ = std::io::stdout().flush();
    let mut printed = 0usize;

    loop {
        if interrupted.load(Ordering::Relaxed) {
            orchestrator.cancel_active().await;
            interrupted.store(false, Ordering::Relaxed);
        }
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::time::sleep(Duration::from_millis(100)) => continue,
        };
        match event {
            Ok(ChatEvent::MessageUpdated(message)) if message.id == message_id => {
                if message.content.len() > printed {
                    print!("{}", &message.content[printed..]);
                    let _ = std::io::stdout().flush();
                    printed = message.content.len();
                }
                if message.state.is_terminal() {
                    println!();
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
    Ok(())
}

fn print_sessions(orchestrator: &ChatOrchestrator) {
    let current = orchestrator.current_session().cloned();
    if orchestrator.sessions().is_empty() {
        println!("    (no sessions)");
        return;
    }
    for session in orchestrator.sessions() {
        let marker = if Some(&session.id) == current.as_ref() {
            "*"
        } else {
            " "
        };
        println!(
            "    {} {}  {} message(s)",
            marker, session.id, session.message_count
        );
    }
}

async fn print_history(orchestrator: &ChatOrchestrator) {
    for message in orchestrator.messages().await {
        let speaker = match message.role {
            Role::User => "You",
            Role::Assistant => "Assistant",
        };
        println!("{}: {}", speaker, message.content);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_commands_parse() {
        assert_eq!(parse_command("/new"), Some(ReplCommand::New));
        assert_eq!(
            parse_command("/switch abc-123"),
            Some(ReplCommand::Switch("abc-123".to_string()))
        );
        assert_eq!(parse_command("/delete"), Some(ReplCommand::Delete(None)));
        assert_eq!(parse_command("hello there"), None);
        assert!(matches!(
            parse_command("/switch"),
            Some(ReplCommand::Invalid(_))
        ));
    }
}
