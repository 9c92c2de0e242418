// Command-line parsing.
//
// Turns argv (minus the program name) into a `Command`. Dispatch lives in
// main.rs.

use eventhub_core::protocol::{EventDraft, ProfileUpdate};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: String, password: String },
    Register {
        first_name: String,
        last_name: String,
        email: String,
        password: String,
    },
    Logout,
    WhoAmI,
    EditProfile(ProfileUpdate),
    /// List events, optionally narrowed to a category.
    Events { category: Option<String> },
    Event { id: i64 },
    Join { id: i64 },
    CreateEvent(EventDraft),
    EditEvent { id: i64, draft: EventDraft },
    DeleteEvent { id: i64 },
    Types,
    ResetPassword { email: String },
    Chat,
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("usage: eventhub {0}")]
    WrongArguments(&'static str),
    #[error("invalid event id: {0}")]
    BadId(String),
    #[error("unknown option: {0}")]
    UnknownFlag(String),
}

pub const USAGE: &str = "\
usage: eventhub <command> [args]

commands:
  login <email> <password>                    log in and remember the session
  register <first> <last> <email> <password>  create an account
  logout                                      forget the stored session
  whoami                                      show the logged-in profile
  edit-profile [--first <name>] [--last <name>] [--phone <phone>] [--birth-date <date>]
                                              change profile fields
  events [category]                           list events, optionally by category
  event <id>                                  show one event
  join <id>                                   register for an event
  create-event <title> <description> <date> <location>
                                              publish a new event
  edit-event <id> <title> <description> <date> <location>
                                              replace an event's details
  delete-event <id>                           remove an event
  types                                       list event categories
  reset-password <email>                      email a password reset link
  chat                                        join the lobby chat (/quit to leave)
  help                                        show this message";

pub fn parse_command(args: &[String]) -> Result<Command, UsageError> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();

    match (name.as_str(), rest.as_slice()) {
        ("login", [email, password]) => Ok(Command::Login {
            email: email.to_string(),
            password: password.to_string(),
        }),
        ("login", _) => Err(UsageError::WrongArguments("login <email> <password>")),

        ("register", [first, last, email, password]) => Ok(Command::Register {
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }),
        ("register", _) => Err(UsageError::WrongArguments(
            "register <first> <last> <email> <password>",
        )),

        ("logout", []) => Ok(Command::Logout),
        ("whoami", []) => Ok(Command::WhoAmI),

        ("events", []) => Ok(Command::Events { category: None }),
        ("events", [category]) => Ok(Command::Events {
            category: Some(category.to_string()),
        }),
        ("events", _) => Err(UsageError::WrongArguments("events [category]")),

        ("event", [id]) => Ok(Command::Event { id: parse_id(id)? }),
        ("event", _) => Err(UsageError::WrongArguments("event <id>")),

        ("join", [id]) => Ok(Command::Join { id: parse_id(id)? }),
        ("join", _) => Err(UsageError::WrongArguments("join <id>")),

        ("create-event", [title, description, date, location]) => {
            Ok(Command::CreateEvent(draft(title, description, date, location)))
        }
        ("create-event", _) => Err(UsageError::WrongArguments(
            "create-event <title> <description> <date> <location>",
        )),

        ("edit-event", [id, title, description, date, location]) => Ok(Command::EditEvent {
            id: parse_id(id)?,
            draft: draft(title, description, date, location),
        }),
        ("edit-event", _) => Err(UsageError::WrongArguments(
            "edit-event <id> <title> <description> <date> <location>",
        )),

        ("delete-event", [id]) => Ok(Command::DeleteEvent { id: parse_id(id)? }),
        ("delete-event", _) => Err(UsageError::WrongArguments("delete-event <id>")),

        ("edit-profile", flags) => parse_profile_flags(flags).map(Command::EditProfile),

        ("types", []) => Ok(Command::Types),

        ("reset-password", [email]) => Ok(Command::ResetPassword {
            email: email.to_string(),
        }),
        ("reset-password", _) => Err(UsageError::WrongArguments("reset-password <email>")),

        ("chat", []) => Ok(Command::Chat),
        ("help" | "-h" | "--help", _) => Ok(Command::Help),

        ("logout", _) => Err(UsageError::WrongArguments("logout")),
        ("whoami", _) => Err(UsageError::WrongArguments("whoami")),
        ("types", _) => Err(UsageError::WrongArguments("types")),
        ("chat", _) => Err(UsageError::WrongArguments("chat")),

        (other, _) => Err(UsageError::UnknownCommand(other.to_string())),
    }
}

fn parse_id(raw: &str) -> Result<i64, UsageError> {
    raw.parse()
        .map_err(|_| UsageError::BadId(raw.to_string()))
}

fn draft(title: &str, description: &str, date: &str, location: &str) -> EventDraft {
    EventDraft {
        title: title.to_string(),
        description: description.to_string(),
        date: date.to_string(),
        location: location.to_string(),
    }
}

const EDIT_PROFILE_USAGE: &str =
    "edit-profile [--first <name>] [--last <name>] [--phone <phone>] [--birth-date <date>]";

/// `--flag value` pairs. At least one field must be given.
fn parse_profile_flags(flags: &[&str]) -> Result<ProfileUpdate, UsageError> {
    let mut update = ProfileUpdate::default();
    let mut pairs = flags.iter();
    while let Some(&flag) = pairs.next() {
        let slot = match flag {
            "--first" => &mut update.first_name,
            "--last" => &mut update.last_name,
            "--phone" => &mut update.phone,
            "--birth-date" => &mut update.birth_date,
            other => return Err(UsageError::UnknownFlag(other.to_string())),
        };
        let Some(value) = pairs.next() else {
            return Err(UsageError::WrongArguments(EDIT_PROFILE_USAGE));
        };
        *slot = Some(value.to_string());
    }
    if update == ProfileUpdate::default() {
        return Err(UsageError::WrongArguments(EDIT_PROFILE_USAGE));
    }
    Ok(update)
}

/// What a line typed during `chat` means.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatInput<'a> {
    Quit,
    Say(&'a str),
}

pub fn parse_chat_line(line: &str) -> ChatInput<'_> {
    match line.trim() {
        "/quit" | "/exit" => ChatInput::Quit,
        _ => ChatInput::Say(line),
    }
}
