// eventhub command-line client.
//
// Startup sequence:
// 1. Parse the command (usage errors never touch config or the network)
// 2. Initialize tracing (log to file, stdout is for results)
// 3. Load config
// 4. Open the session store
// 5. Build the HTTP transport, session manager and API client
// 6. Dispatch the command and report errors the way a screen would

mod commands;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use eventhub_core::chat::{
    ChatError, ChatEvent, ChatSession, DisconnectReason, ReconnectPolicy, TungsteniteConnector,
};
use eventhub_core::config::{self, ClientConfig};
use eventhub_core::db::Database;
use eventhub_core::error::Surface;
use eventhub_core::http::ReqwestTransport;
use eventhub_core::protocol::{Event, Profile, Registration};
use eventhub_core::scope::TaskScope;
use eventhub_core::{ApiClient, ClientError, SessionManager};

use commands::{parse_chat_line, parse_command, ChatInput, Command, USAGE};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // 1. Parse the command
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(Command::Help) => {
            println!("{USAGE}");
            return Ok(ExitCode::SUCCESS);
        }
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            return Ok(ExitCode::from(2));
        }
    };

    // 2. Initialize tracing
    init_tracing()?;
    info!("eventhub starting");

    // 3. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!("Config loaded: server={}", config.server.base_url);

    // 4. Open the session store
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = Database::open(&db_path.to_string_lossy()).context("failed to open database")?;
    info!("Database opened at {}", db_path.display());

    // 5. Build the client stack
    let transport =
        ReqwestTransport::new(Duration::from_secs(config.server.request_timeout_secs))
            .context("failed to build HTTP client")?;
    let session = Arc::new(SessionManager::new(
        Arc::new(transport),
        Arc::new(db),
        config.server.base_url.as_str(),
    ));
    let api = ApiClient::new(session);

    // 6. Dispatch
    match dispatch(command, &api, &config).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            warn!("command failed: {e}");
            report(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Initialize tracing to log to a file so command output stays clean.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("eventhub.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("eventhub=info,eventhub_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("failed to read input: {0}")]
    Input(#[from] std::io::Error),
}

fn report(err: &CliError) {
    match err {
        CliError::Client(e) => match e.surface() {
            Surface::Inline(fields) => {
                for f in fields {
                    eprintln!("{}: {}", f.field, f.message);
                }
            }
            Surface::Alert { title, message } => eprintln!("{title}: {message}"),
        },
        other => eprintln!("Error: {other}"),
    }
}

async fn dispatch(command: Command, api: &ApiClient, config: &ClientConfig) -> Result<(), CliError> {
    let session = api.session();
    match command {
        Command::Login { email, password } => {
            session.login(&email, &password).await?;
            println!("Logged in as {email}.");
        }
        Command::Register {
            first_name,
            last_name,
            email,
            password,
        } => {
            let registration = Registration {
                first_name,
                last_name,
                email,
                password,
            };
            match session.register(&registration).await? {
                Some(_) => println!("Registration successful. You are logged in."),
                None => {
                    println!("Registration successful. Check your email to verify your account.")
                }
            }
        }
        Command::Logout => {
            if !session.session()?.is_authenticated() {
                println!("Not logged in.");
                return Ok(());
            }
            session.logout().await?;
            println!("Logged out.");
        }
        Command::WhoAmI => print_profile(&api.profile().await?),
        Command::EditProfile(update) => {
            let profile = api.update_profile(&update).await?;
            println!("Profile updated.");
            print_profile(&profile);
        }
        Command::Events { category } => {
            let events = match category.as_deref() {
                Some(name) => api.events_in_category(name).await?,
                None => api.list_events().await?,
            };
            if events.is_empty() {
                println!("No events found.");
            }
            for event in &events {
                println!("{}", event_line(event));
            }
        }
        Command::Event { id } => {
            let event = api.event(id).await?;
            print_event(&event);
        }
        Command::Join { id } => {
            let message = api.register_for_event(id).await?;
            println!("{message}");
        }
        Command::CreateEvent(draft) => {
            let event = api.create_event(&draft).await?;
            println!("Created event {}.", event.id);
            print_event(&event);
        }
        Command::EditEvent { id, draft } => {
            let event = api.update_event(id, &draft).await?;
            println!("Updated event {id}.");
            print_event(&event);
        }
        Command::DeleteEvent { id } => {
            api.delete_event(id).await?;
            println!("Deleted event {id}.");
        }
        Command::Types => {
            for t in api.event_types().await? {
                println!("{:>4}  {}", t.id, t.name);
            }
        }
        Command::ResetPassword { email } => {
            session.request_password_reset(&email).await?;
            println!("If an account exists for {email}, a reset link is on its way.");
        }
        Command::Chat => run_chat(config).await?,
        Command::Help => println!("{USAGE}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_profile(profile: &Profile) {
    println!("{}", profile.display_name());
    println!("  email: {}", profile.email);
    if let Some(phone) = &profile.phone {
        println!("  phone: {phone}");
    }
    if let Some(birth_date) = &profile.birth_date {
        println!("  born:  {birth_date}");
    }
    if !profile.roles.is_empty() {
        println!("  roles: {}", profile.roles.join(", "));
    }
}

fn event_line(event: &Event) -> String {
    let category = event
        .event_type
        .as_ref()
        .map(|t| t.name.as_str())
        .unwrap_or("-");
    let date = event
        .calendar_date()
        .map(|d| d.format("%a %d %b %Y").to_string())
        .unwrap_or_else(|| event.date.clone());
    format!("{:>4}  {date:<16}  {}  [{category}]", event.id, event.title)
}

fn print_event(event: &Event) {
    println!("{}", event.title);
    if let Some(date) = event.calendar_date() {
        println!("  date:     {}", date.format("%A %d %B %Y"));
    }
    if let (Some(start), Some(end)) = (&event.start_time, &event.end_time) {
        println!("  time:     {start} - {end}");
    }
    println!("  location: {}", event.location);
    if let Some(club) = &event.club {
        println!("  club:     {}", club.name);
    }
    if let Some(spots) = event.spots_left() {
        println!(
            "  spots:    {spots} left ({}/{})",
            event.registered_count, event.max_members
        );
    }
    if !event.description.is_empty() {
        println!();
        println!("{}", event.description);
    }
}

fn print_chat_event(event: &ChatEvent) {
    match event {
        ChatEvent::Connected => println!("* connected"),
        ChatEvent::Message(msg) if !msg.from_self => println!("> {}", msg.text),
        ChatEvent::Message(_) => {}
        ChatEvent::Disconnected { reason } => match reason {
            DisconnectReason::ClosedByClient => println!("* left the chat"),
            DisconnectReason::ClosedByPeer => println!("* server closed the chat"),
            DisconnectReason::Error(e) => println!("* connection lost: {e}"),
            DisconnectReason::ConnectFailed(e) => println!("* could not connect: {e}"),
        },
        ChatEvent::ParseError { .. } => println!("* ignored an unreadable message"),
        ChatEvent::Reconnecting { attempt, delay } => {
            println!("* reconnecting in {}ms (attempt {attempt})", delay.as_millis())
        }
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

async fn run_chat(config: &ClientConfig) -> Result<(), CliError> {
    let url = config.server.chat_url.clone();
    let policy = ReconnectPolicy::from_config(&config.chat.reconnect);
    let (mut chat, mut events) =
        ChatSession::open(Arc::new(TungsteniteConnector), url.as_str(), policy);

    let mut scope = TaskScope::new();
    scope.spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_chat_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "chat output fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("Joining {url} (type /quit to leave)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let outcome = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(CliError::Input(e)),
        };
        match parse_chat_line(&line) {
            ChatInput::Quit => break Ok(()),
            ChatInput::Say(text) => match chat.send(text) {
                Ok(_) => {}
                Err(ChatError::NotConnected(state)) => println!("* not sent, chat is {state}"),
                Err(e) => break Err(CliError::Chat(e)),
            },
        }
    };

    chat.close().await;
    // Let the printer show the final disconnect before returning.
    let _ = tokio::time::timeout(Duration::from_secs(1), scope.join_all()).await;
    outcome
}
