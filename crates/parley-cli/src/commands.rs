//! Slash-command parser for the interactive prompt.
//!
//! A line that does not start with `/` is sent as a message to the active
//! conversation.

use std::path::PathBuf;

use thiserror::Error;

use parley_client::Command;
use parley_shared::types::{ChatId, FileId, MessageId, Registration};

pub const HELP: &str = "\
Commands:
  /login <username> <password>
  /register \"<full name>\" <username> <email> <password>
  /logout
  /chats                      refresh the conversation list
  /open <chat id>
  /start <username>           open or create a conversation
  /search <query>             /close hides the results
  /type <text>                put text in the composer
  /send                       send the composer
  /files                      files of the active conversation
  /upload <path>
  /delete <file id>
  /read <id>[,<id>...]        mark messages as read
  /name <full name>           change your display name
  /unread                     total unread count
  /help
  /quit
Anything else is sent as a message.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command /{0}, try /help")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("not a number: {0}")]
    BadId(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Help,
}

/// Parse one line of user input. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Input>, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let Some(rest) = line.trim_start().strip_prefix('/') else {
        return Ok(Some(Input::Command(Command::Say(line.to_string()))));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "help" | "?" => return Ok(Some(Input::Help)),
        "quit" | "exit" => Command::Quit,
        "logout" => Command::Logout,
        "chats" => Command::RefreshChats,
        "close" => Command::CloseSearch,
        "send" => Command::Send,
        "files" => Command::ListFiles,
        "unread" => Command::UnreadCount,

        "login" => match words(args).as_slice() {
            [username, password] => Command::Login {
                username: username.to_string(),
                password: password.to_string(),
            },
            _ => return Err(ParseError::Usage("/login <username> <password>")),
        },

        "register" => register(args)?,

        "open" => Command::OpenChat(ChatId(single_id(args, "/open <chat id>")?)),
        "delete" => Command::DeleteFile(FileId(single_id(args, "/delete <file id>")?)),

        "read" => {
            let ids = args
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|w| !w.is_empty())
                .map(|w| id(w).map(MessageId))
                .collect::<Result<Vec<_>, _>>()?;
            if ids.is_empty() {
                return Err(ParseError::Usage("/read <id>[,<id>...]"));
            }
            Command::MarkRead(ids)
        }

        "start" => Command::StartChat(required(args, "/start <username>")?),
        "search" => Command::Search(required(args, "/search <query>")?),
        "type" => Command::Input(args.to_string()),
        "upload" => Command::Upload(PathBuf::from(required(args, "/upload <path>")?)),
        "name" => Command::UpdateProfile(required(args, "/name <full name>")?),

        other => return Err(ParseError::Unknown(other.to_string())),
    };

    Ok(Some(Input::Command(command)))
}

const REGISTER_USAGE: &str = "/register \"<full name>\" <username> <email> <password>";

/// The full name comes first and may be quoted to contain spaces.
fn register(args: &str) -> Result<Command, ParseError> {
    let (full_name, rest) = match args.strip_prefix('"') {
        Some(quoted) => quoted
            .split_once('"')
            .ok_or(ParseError::Usage(REGISTER_USAGE))?,
        None => args
            .split_once(char::is_whitespace)
            .unwrap_or((args, "")),
    };

    match words(rest).as_slice() {
        [username, email, password] if !full_name.trim().is_empty() => {
            Ok(Command::Register(Registration {
                full_name: full_name.trim().to_string(),
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            }))
        }
        _ => Err(ParseError::Usage(REGISTER_USAGE)),
    }
}

fn words(args: &str) -> Vec<&str> {
    args.split_whitespace().collect()
}

fn id(word: &str) -> Result<i64, ParseError> {
    word.parse().map_err(|_| ParseError::BadId(word.to_string()))
}

fn single_id(args: &str, usage: &'static str) -> Result<i64, ParseError> {
    match words(args).as_slice() {
        [word] => id(word),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn required(args: &str, usage: &'static str) -> Result<String, ParseError> {
    if args.is_empty() {
        Err(ParseError::Usage(usage))
    } else {
        Ok(args.to_string())
    }
}
