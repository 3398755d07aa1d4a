//! Line-oriented terminal front end
//!
//! Plain lines are sent as chat. Lines starting with `:` are control
//! commands. Snapshot changes are printed as they arrive.

use anyhow::Result;
use promptcast::client::{Connection, ConnectionStatus, SessionSnapshot};
use promptcast::protocol::OutboundMessage;
use tokio::io::{AsyncBufReadExt, BufReader};

pub enum CommandResult {
    Continue,
    Exit,
}

/// One line of user input
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Empty,
    Chat(String),
    Control { command: String, args: Vec<String> },
}

pub fn parse_line(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    match line.strip_prefix(':') {
        Some(rest) => {
            let mut parts = rest.split_whitespace().map(str::to_string);
            let command = parts.next().unwrap_or_default();
            Input::Control {
                command,
                args: parts.collect(),
            }
        }
        None => Input::Chat(line.to_string()),
    }
}

/// Handle a parsed control command and return whether to continue or exit.
pub async fn handle_control_command(
    command: &str,
    args: Vec<String>,
    connection: &Connection,
) -> Result<CommandResult> {
    match command {
        "ready" => {
            connection
                .send(OutboundMessage::Ready { ready: true })
                .await?;
        }
        "summary" => {
            if args.len() < 2 {
                println!("Usage: :summary <group> <text>");
                return Ok(CommandResult::Continue);
            }
            connection
                .send(OutboundMessage::SubmitSummary {
                    group_name: args[0].clone(),
                    summary: args[1..].join(" "),
                })
                .await?;
        }
        "answer" => {
            if args.len() < 2 {
                println!("Usage: :answer <group> <category>");
                return Ok(CommandResult::Continue);
            }
            connection
                .send(OutboundMessage::SubmitQuizAnswer {
                    group_name: args[0].clone(),
                    answer: args[1..].join(" "),
                })
                .await?;
        }
        "reconnect" => {
            connection.reconnect()?;
        }
        "status" => {
            let snapshot = connection.snapshot();
            println!(
                "[{}] {} (attempt {})",
                connection.role(),
                snapshot.status,
                snapshot.attempt
            );
        }
        "help" => {
            println!("Commands:");
            println!("  :ready                     Answer a ready check");
            println!("  :summary <group> <text>    Submit a group summary");
            println!("  :answer <group> <category> Answer the group quiz");
            println!("  :reconnect                 Reconnect now");
            println!("  :status                    Show connection status");
            println!("  :quit                      Leave the session");
        }
        "quit" | "q" | "exit" => return Ok(CommandResult::Exit),
        other => {
            println!("Unknown command: :{} (try :help)", other);
        }
    }
    Ok(CommandResult::Continue)
}

/// Describe what changed between two snapshots
pub fn describe_changes(prev: &SessionSnapshot, next: &SessionSnapshot) -> Vec<String> {
    let mut lines = Vec::new();

    if prev.status != next.status {
        match (&next.status, &next.failure) {
            (ConnectionStatus::Error, Some(failure)) => lines.push(format!("! {}", failure)),
            (ConnectionStatus::Disconnected, _) if next.attempt > 0 => lines.push(format!(
                "* disconnected, reconnect attempt {}",
                next.attempt
            )),
            (status, _) => lines.push(format!("* {}", status)),
        }
    }

    if prev.prompt != next.prompt {
        if let Some(prompt) = &next.prompt {
            lines.push(format!("> {}", prompt.statement));
            if let Some(topic) = &prompt.assigned_topic {
                lines.push(format!("  topic: {}", topic));
            }
        }
    }

    if prev.group != next.group {
        if let Some(group) = &next.group {
            lines.push(format!(
                "  group {}: {}",
                group.group_name,
                group.members.join(", ")
            ));
        }
    }

    for (name, entry) in &next.responses {
        let before = prev.responses.get(name).and_then(|e| e.response.as_ref());
        if let Some(response) = &entry.response {
            if before != Some(response) {
                lines.push(format!("  {} answered: {}", name, response));
            }
        }
    }

    if prev.timer.active != next.timer.active
        || prev.timer.remaining_seconds != next.timer.remaining_seconds
    {
        if next.timer.active {
            let remaining = next.timer.remaining_seconds;
            lines.push(format!("  timer {:02}:{:02}", remaining / 60, remaining % 60));
        } else if prev.timer.active {
            lines.push("  timer stopped".to_string());
        }
    }

    if prev.summary != next.summary {
        if next.summary.generating {
            lines.push("  summary is being generated".to_string());
        } else if let Some(text) = &next.summary.text {
            lines.push(format!("  summary: {}", text));
        }
    }

    if prev.quiz != next.quiz {
        if let Some(item) = &next.quiz.mystery_item {
            if prev.quiz.mystery_item.as_ref() != Some(item) {
                lines.push(format!(
                    "  quiz: {} ({})",
                    item,
                    next.quiz.categories.join(" / ")
                ));
            }
        }
        if let Some(correct) = next.quiz.was_correct {
            if prev.quiz.was_correct != Some(correct) {
                lines.push(if correct {
                    "  correct!".to_string()
                } else {
                    "  not quite".to_string()
                });
            }
        }
    }

    for line in next.transcript.iter().skip(prev.transcript.len()) {
        let sender = line.sender.as_deref().unwrap_or("server");
        lines.push(format!("{}: {}", sender, line.content));
    }

    for name in next.ready.difference(&prev.ready) {
        lines.push(format!("  {} is ready", name));
    }

    if prev.roomcast.navigation != next.roomcast.navigation {
        if let Some(nav) = &next.roomcast.navigation {
            lines.push(format!("  showing {}/{}", nav.index + 1, nav.total));
            if let Some(current) = &nav.current {
                lines.push(format!("  {}: {}", current.student_name, current.response));
            }
        }
    }

    lines
}

/// Print changes until the connection task ends or ctrl-c
pub async fn follow(connection: &Connection) -> Result<()> {
    let mut state = connection.subscribe();
    let mut shown = SessionSnapshot::new(connection.role());

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let next = state.borrow_and_update().clone();
                for line in describe_changes(&shown, &next) {
                    println!("{}", line);
                }
                shown = next;
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

/// Read stdin lines and print changes until `:quit`, EOF or ctrl-c
pub async fn interact(connection: &Connection) -> Result<()> {
    let mut state = connection.subscribe();
    let mut shown = SessionSnapshot::new(connection.role());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let next = state.borrow_and_update().clone();
                for line in describe_changes(&shown, &next) {
                    println!("{}", line);
                }
                shown = next;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let result = match parse_line(&line) {
                    Input::Empty => continue,
                    Input::Chat(message) => connection
                        .send(OutboundMessage::Chat { message })
                        .await
                        .map(|_| CommandResult::Continue)
                        .map_err(anyhow::Error::from),
                    Input::Control { command, args } => {
                        handle_control_command(&command, args, connection).await
                    }
                };
                match result {
                    Ok(CommandResult::Continue) => {}
                    Ok(CommandResult::Exit) => return Ok(()),
                    Err(e) => println!("! {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
