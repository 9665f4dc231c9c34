use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use termweb_core::auth::{AuthStore, Role};
use termweb_core::config::Config;
use termweb_core::gateway::{self, AppState};

#[derive(Parser)]
#[command(name = "termweb", about = "Terminal sharing gateway")]
struct Cli {
    #[arg(long, env = "TERMWEB_PORT")]
    port: Option<u16>,
    #[arg(long, env = "TERMWEB_BIND")]
    bind: Option<IpAddr>,
    #[arg(long, env = "TERMWEB_DATA_DIR")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (default).
    Serve,
    /// Create a named session and print its permanent token.
    CreateSession {
        id: String,
        #[arg(long, default_value = "Session")]
        name: String,
        #[arg(long, default_value = "editor", value_parser = parse_role)]
        role: Role,
    },
    /// Create a share link and print its token.
    CreateLink {
        #[arg(long, default_value = "viewer", value_parser = parse_role)]
        role: Role,
        #[arg(long)]
        expires_in: Option<u64>,
        #[arg(long)]
        max_uses: Option<u64>,
        #[arg(long)]
        label: Option<String>,
    },
    /// Set the admin password and require authentication.
    SetPassword { password: String },
}

fn parse_role(value: &str) -> Result<Role, String> {
    match value {
        "admin" => Ok(Role::Admin),
        "editor" => Ok(Role::Editor),
        "viewer" => Ok(Role::Viewer),
        other => Err(format!("unknown role {other:?}")),
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::CreateSession { id, name, role } => create_session(config, id, name, role),
        Commands::CreateLink {
            role,
            expires_in,
            max_uses,
            label,
        } => create_link(config, role, expires_in, max_uses, label),
        Commands::SetPassword { password } => set_password(config, password),
    };

    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let auth = AuthStore::load(&config.data_dir).context("loading auth store")?;
    let addr = SocketAddr::new(config.bind, config.port);
    let state = AppState::new(config, auth);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = stop_tx.send(true);
        }
    });

    gateway::serve(state, listener, stop_rx)
        .await
        .context("gateway")?;
    Ok(())
}

fn create_session(config: Config, id: String, name: String, role: Role) -> anyhow::Result<()> {
    let mut auth = AuthStore::load(&config.data_dir)?;
    let session = auth.issue_permanent(&id, &name, role)?;
    println!("{}", session.token.to_hex());
    Ok(())
}

fn create_link(
    config: Config,
    role: Role,
    expires_in: Option<u64>,
    max_uses: Option<u64>,
    label: Option<String>,
) -> anyhow::Result<()> {
    let mut auth = AuthStore::load(&config.data_dir)?;
    let token = auth.create_share_link(role, expires_in, max_uses, label)?;
    println!("{token}");
    Ok(())
}

fn set_password(config: Config, password: String) -> anyhow::Result<()> {
    let mut auth = AuthStore::load(&config.data_dir)?;
    auth.set_admin_password(&password)?;
    println!("admin password set; authentication required");
    Ok(())
}
