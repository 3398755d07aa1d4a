//! promptcast - realtime session client for live classroom presentations

mod console;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use promptcast::api::ApiClient;
use promptcast::client::{ConnectionManager, Credentials, Role, RoomcastPairing};
use promptcast::config::Config;

#[derive(Parser)]
#[command(name = "promptcast")]
#[command(about = "Realtime session client for live classroom presentations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Session server HTTP address (overrides the config file)
    #[arg(long, env = "PROMPTCAST_BASE_URL")]
    base_url: Option<String>,

    /// Session token
    #[arg(long, env = "PROMPTCAST_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a session as a participant
    Join {
        /// Session id
        session: String,
    },
    /// Follow a session as its instructor
    Teach {
        /// Session id
        session: String,
    },
    /// Run a room display paired with a code
    Display {
        /// Pairing code shown by the instructor
        code: String,
        /// Group to claim; lists the groups when omitted
        #[arg(short, long)]
        group: Option<String>,
    },
    /// Look up a pairing code
    Code {
        code: String,
    },
    /// Manage room displays for a session
    Roomcast {
        #[command(subcommand)]
        action: RoomcastAction,
    },
}

#[derive(Subcommand)]
enum RoomcastAction {
    /// Open a pairing code for the given groups
    Start {
        session: String,
        #[arg(required = true)]
        groups: Vec<String>,
    },
    /// Invalidate the session's pairing code
    Cancel { session: String },
    /// Turn roomcast mode on or off
    Toggle {
        session: String,
        #[arg(long)]
        off: bool,
    },
    /// Show the current pairing state
    Status { session: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(base_url) = cli.base_url {
        config.server.base_url = base_url;
    }
    let token = cli.token;

    match cli.command {
        Commands::Join { session } => join(config, &session, token, Role::Participant).await,
        Commands::Teach { session } => join(config, &session, token, Role::Instructor).await,
        Commands::Display { code, group } => display(config, &code, group, token).await,
        Commands::Code { code } => {
            let pairing = pairing(&config, token.as_deref())?;
            let resolved = pairing.resolve_code(&code).await?;
            if let Some(title) = &resolved.title {
                println!("{}", title);
            }
            print_slots(&resolved);
            Ok(())
        }
        Commands::Roomcast { action } => roomcast(&config, token.as_deref(), action).await,
    }
}

fn pairing(config: &Config, token: Option<&str>) -> Result<RoomcastPairing> {
    let api = ApiClient::new(&config.server.base_url, token)?;
    Ok(RoomcastPairing::new(
        api,
        config.connection.register_timeout(),
    ))
}

fn print_slots(code: &promptcast::api::RoomcastCode) {
    for slot in RoomcastPairing::group_slots(code) {
        let marker = if slot.available { " " } else { "x" };
        println!("  [{}] {}", marker, slot.name);
    }
}

async fn join(config: Config, session: &str, token: Option<String>, role: Role) -> Result<()> {
    let api = ApiClient::new(&config.server.base_url, token.as_deref())?;
    match api.session_info(session).await {
        Ok(info) if !info.title.is_empty() => println!("{}", info.title),
        Ok(_) => {}
        Err(e) => tracing::warn!("Session info unavailable: {}", e),
    }

    let credentials = Credentials { token };
    let mut manager = ConnectionManager::new(config);
    tracing::info!("Joining session {} as {}", session, role);
    let connection = manager.open(session, role, credentials).await?;

    let result = console::interact(&connection).await;
    manager.close().await;
    result
}

async fn display(
    config: Config,
    code: &str,
    group: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let pairing = pairing(&config, token.as_deref())?;
    let resolved = pairing.resolve_code(code).await?;

    let Some(group) = group else {
        println!("Groups for {}:", resolved.code);
        print_slots(&resolved);
        println!("Pick one with --group <name>");
        return Ok(());
    };

    let mut manager = ConnectionManager::new(config.clone());
    let connection = manager
        .open(&resolved.code, Role::Display, Credentials { token })
        .await?;

    connection
        .wait_for(
            config.connection.register_timeout(),
            "display connection",
            |snapshot| snapshot.status.is_open() || snapshot.failure.is_some(),
        )
        .await?;
    if let Some(failure) = connection.snapshot().failure {
        manager.close().await;
        bail!(failure);
    }

    if let Err(e) = pairing.register(&connection, &resolved, &group).await {
        manager.close().await;
        return Err(e).with_context(|| format!("could not claim group {}", group));
    }
    println!("Showing group {}", group);

    let result = console::follow(&connection).await;
    manager.close().await;
    result
}

async fn roomcast(config: &Config, token: Option<&str>, action: RoomcastAction) -> Result<()> {
    let api = ApiClient::new(&config.server.base_url, token)?;
    match action {
        RoomcastAction::Start { session, groups } => {
            let code = api.start_roomcast(&session, &groups).await?;
            println!("Pairing code: {}", code.code);
            if let Some(expiry) = code.expires_at {
                println!("Expires at {}", expiry.to_rfc3339());
            }
        }
        RoomcastAction::Cancel { session } => {
            api.cancel_roomcast(&session).await?;
            println!("Pairing code cancelled");
        }
        RoomcastAction::Toggle { session, off } => {
            let status = api.toggle_roomcast(&session, !off).await?;
            println!("Roomcast {}", if status.enabled { "enabled" } else { "disabled" });
        }
        RoomcastAction::Status { session } => {
            let status = api.roomcast_status(&session).await?;
            println!(
                "Roomcast {}{}",
                if status.enabled { "enabled" } else { "disabled" },
                status
                    .code
                    .map(|c| format!(", code {}", c))
                    .unwrap_or_default()
            );
            for group in &status.expected_groups {
                let marker = if status.connected_groups.contains(group) { "x" } else { " " };
                println!("  [{}] {}", marker, group);
            }
        }
    }
    Ok(())
}
