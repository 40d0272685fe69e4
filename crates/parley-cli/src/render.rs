//! Terminal rendering of [`UiEvent`]s.

use tokio::sync::broadcast;
use tracing::warn;

use parley_client::presenter::{ChatListEntry, RenderedMessage};
use parley_client::{ToastLevel, UiEvent};

/// Text for one event, or `None` for events with nothing to show.
pub fn render(event: &UiEvent) -> Option<String> {
    let text = match event {
        UiEvent::Toast { level, text, .. } => format!("[{}] {text}", level_tag(*level)),
        UiEvent::ToastDismissed { .. } | UiEvent::ComposerChanged(_) => return None,
        UiEvent::Loading(true) => "...".to_string(),
        UiEvent::Loading(false) => return None,
        UiEvent::ConnectionChanged(state) => format!("* connection {state}"),
        UiEvent::ShowLogin => "Please log in with /login <username> <password> (or /help)".into(),
        UiEvent::ShowChatApp { user } => {
            format!("Signed in as {} (@{})", user.full_name, user.username)
        }
        UiEvent::ProfileUpdated(user) => format!("Display name is now {}", user.full_name),
        UiEvent::ChatListRendered(rows) => chat_list(rows),
        UiEvent::ActiveChatChanged(header) => format!(
            "== #{} {} (@{}) ==",
            header.chat_id, header.partner_name, header.partner_username
        ),
        UiEvent::TranscriptRendered(messages) if messages.is_empty() => "(no messages yet)".into(),
        UiEvent::TranscriptRendered(messages) => messages
            .iter()
            .map(message_line)
            .collect::<Vec<_>>()
            .join("\n"),
        UiEvent::MessageAppended(message) => message_line(message),
        UiEvent::MessageUpdated(message) => format!("{} (updated)", message_line(message)),
        UiEvent::TypingIndicator(Some(label)) => format!("  {label}"),
        UiEvent::TypingIndicator(None) => return None,
        UiEvent::FilesRendered(files) if files.is_empty() => "No files shared yet".into(),
        UiEvent::FilesRendered(files) => {
            let mut out = String::from("Files:");
            for f in files {
                out.push_str(&format!(
                    "\n  #{} {} ({}) {}",
                    f.id, f.filename, f.size, f.download_url
                ));
            }
            out
        }
        UiEvent::SearchResults(users) if users.is_empty() => "No users found".into(),
        UiEvent::SearchResults(users) => {
            let mut out = String::from("Users:");
            for u in users {
                out.push_str(&format!("\n  @{} {}", u.username, u.full_name));
            }
            out
        }
    };
    Some(text)
}

fn level_tag(level: ToastLevel) -> &'static str {
    match level {
        ToastLevel::Success => "ok",
        ToastLevel::Error => "error",
        ToastLevel::Warning => "warn",
        ToastLevel::Info => "info",
    }
}

fn chat_list(rows: &[ChatListEntry]) -> String {
    if rows.is_empty() {
        return "No conversations yet, try /start <username>".into();
    }
    let mut out = String::from("Chats:");
    for row in rows {
        let marker = if row.active { '>' } else { ' ' };
        let unread = if row.unread > 0 {
            format!(" [{}]", row.unread)
        } else {
            String::new()
        };
        let time = row.time.as_deref().unwrap_or("");
        out.push_str(&format!(
            "\n {marker} #{} {}{unread}  {}  {time}",
            row.chat_id, row.partner, row.preview
        ));
    }
    out
}

fn message_line(message: &RenderedMessage) -> String {
    let arrow = if message.outgoing { '>' } else { '<' };
    let mark = match message.read {
        Some(true) => " (read)",
        Some(false) => " (sent)",
        None => "",
    };
    format!(
        "{arrow} [{}] #{} {}{mark}",
        message.time, message.id, message.content
    )
}

/// Print every event until the presenter goes away.
pub async fn run(mut events: broadcast::Receiver<UiEvent>, json: bool) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "failed to encode event"),
                    }
                } else if let Some(text) = render(&event) {
                    println!("{text}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "renderer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
