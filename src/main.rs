use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use junkjet_core::chatbot::ChatbotService;
use junkjet_core::config::{self, Config};
use junkjet_core::service::auth::AuthState;
use junkjet_core::service::gateway;
use junkjet_core::session::{InMemorySessionStore, SystemClock, UserType};

#[derive(Parser)]
#[command(
    name = "junkjet",
    about = "junkjet - chatbot session service for the JunkJet waste marketplace",
    version = junkjet_core::VERSION,
)]
struct Cli {
    /// Path to config file (default: ~/.junkjet/config.json)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and session monitor
    Serve {
        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Listen host (overrides config)
        #[arg(long)]
        host: Option<String>,
    },
    /// Chat with the bot locally against an in-memory store
    Chat {
        /// Message to send (or omit for interactive mode)
        message: Vec<String>,
        /// User ID to chat as
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Mint a bearer token for a user
    Token {
        /// User ID (token subject)
        user_id: String,
        /// household | middle_buyer | organization (or phase1..3)
        #[arg(long)]
        user_type: Option<UserType>,
    },
    /// Print analytics for the configured session store
    Analytics,
    /// Write a default configuration file
    Onboard,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("junkjet=info".parse()?)
                .add_directive("junkjet_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(config_path, port, host).await?,
        Commands::Chat { message, user } => cmd_chat(config_path, message, user).await?,
        Commands::Token { user_id, user_type } => cmd_token(config_path, &user_id, user_type)?,
        Commands::Analytics => cmd_analytics(config_path).await?,
        Commands::Onboard => cmd_onboard(config_path)?,
    }

    Ok(())
}

// ====== Commands ======

#[cfg(feature = "http-api")]
async fn cmd_serve(
    config_path: Option<&std::path::Path>,
    port: Option<u16>,
    host: Option<String>,
) -> Result<()> {
    let mut cfg = config::load_config_from_env(config_path);
    if let Some(port) = port {
        cfg.server.port = port;
    }
    if let Some(host) = host {
        cfg.server.host = host;
    }
    info!(
        "Starting junkjet v{} with {:?} session store",
        junkjet_core::VERSION,
        cfg.store.backend
    );
    gateway::run_server(cfg).await
}

#[cfg(not(feature = "http-api"))]
async fn cmd_serve(
    _config_path: Option<&std::path::Path>,
    _port: Option<u16>,
    _host: Option<String>,
) -> Result<()> {
    anyhow::bail!("junkjet was built without the http-api feature")
}

/// Get or create the local CLI user ID.
fn get_cli_user_id() -> Result<String> {
    let data_dir = config::get_data_dir();
    let id_file = data_dir.join("cli_user_id");
    if id_file.exists() {
        Ok(std::fs::read_to_string(&id_file)?.trim().to_string())
    } else {
        let id = format!("cli:{}", uuid::Uuid::new_v4());
        std::fs::write(&id_file, &id)?;
        info!("Created CLI user id {}", id);
        Ok(id)
    }
}

async fn cmd_chat(
    config_path: Option<&std::path::Path>,
    message: Vec<String>,
    user: Option<String>,
) -> Result<()> {
    let cfg = config::load_config_from_env(config_path);
    cfg.session.validate()?;
    let user_id = match user {
        Some(u) => u,
        None => get_cli_user_id()?,
    };

    let clock = Arc::new(SystemClock);
    let store = Arc::new(InMemorySessionStore::new(cfg.session.ttl(), clock.clone()));
    let chatbot = ChatbotService::new(
        store,
        clock,
        cfg.session.clone(),
        cfg.monitor.expiring_soon_window(),
    );

    if !message.is_empty() {
        let reply = chatbot.send_message(&user_id, None, &message.join(" ")).await?;
        println!("{}", reply.reply);
        return Ok(());
    }

    println!("junkjet chat (Ctrl+C to exit)");
    println!("  User: {}", user_id);
    println!();

    loop {
        use std::io::Write;
        print!("You: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match chatbot.send_message(&user_id, None, input).await {
            Ok(reply) => println!(
                "\nBot: {}\n     ({} messages, expires {})\n",
                reply.reply,
                reply.session_info.message_count,
                reply.session_info.expires_at.format("%H:%M:%S")
            ),
            Err(e) => {
                warn!("Chat message failed: {}", e);
                eprintln!("Error: {}", e);
            }
        }
    }

    Ok(())
}

fn cmd_token(
    config_path: Option<&std::path::Path>,
    user_id: &str,
    user_type: Option<UserType>,
) -> Result<()> {
    let cfg = config::load_config_from_env(config_path);
    if cfg.auth.jwt_secret.is_empty() {
        anyhow::bail!("No JWT secret configured. Set ACCESS_TOKEN_SECRET or auth.jwtSecret");
    }
    let token = AuthState::from_config(&cfg.auth).generate_token(user_id, user_type)?;
    println!("{}", token);
    Ok(())
}

async fn cmd_analytics(config_path: Option<&std::path::Path>) -> Result<()> {
    let cfg = config::load_config_from_env(config_path);
    let components = gateway::build_components(&cfg).await?;
    info!("Computing analytics from {} store", components.store.backend_name());
    let snapshot = components.chatbot.get_session_analytics().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn cmd_onboard(config_path: Option<&std::path::Path>) -> Result<()> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(config::get_config_path);

    if path.exists() {
        println!("Config already exists at {}", path.display());
        println!("Delete it first to re-onboard.");
        return Ok(());
    }

    let cfg = Config::default();
    config::save_config(&cfg, Some(&path))?;
    info!("Wrote default config to {}", path.display());
    println!("Created config at {}", path.display());

    println!("\njunkjet is ready!");
    println!("\nNext steps:");
    println!("  1. Set auth.jwtSecret in {} (or ACCESS_TOKEN_SECRET)", path.display());
    println!("  2. Point store.redisUrl at your Redis (or REDIS_URL), or keep the memory backend");
    println!("  3. Start the server: junkjet serve");
    Ok(())
}
