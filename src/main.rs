//! homeport - expose local dev servers through one gateway
//!
//! Discovers listening ports, tracks how each one is shared, and proxies
//! `/{port}/...` to `localhost:{port}` behind per-port access control.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use homeport_auth::JwtSessionValidator;
use homeport_gateway::{GatewayConfig, GatewayServer};
use homeport_probe::{default_prober, Scanner};
use homeport_proto::{parse_duration, PortRange};
use homeport_registry::{DbRegistry, MemoryRegistry, PortRegistry};
use rand::RngCore;
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// homeport - expose local dev servers through one gateway
#[derive(Parser, Debug)]
#[command(name = "homeport")]
#[command(about = "homeport - expose local dev servers through one gateway")]
#[command(version)]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION"), "\nCommit: ", env!("HOMEPORT_COMMIT"), "\nBuilt: ", env!("HOMEPORT_BUILT_AT")))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway and the port scanner
    #[command(long_about = r#"
Run the HTTP gateway together with the background port scanner.

Every listening port in the configured range is reachable at /<port>/ once
its sharing mode allows it. New ports start private.

EXAMPLES:
  # Local development, no login required
  homeport serve --dev

  # Behind a TLS-terminating proxy with a persistent registry
  homeport serve --bind 127.0.0.1:8080 \
    --public-url https://dev.example.com \
    --database-url "sqlite://./homeport.db?mode=rwc"

ENVIRONMENT VARIABLES:
  HOMEPORT_BIND             Gateway listen address
  HOMEPORT_COOKIE_SECRET    Secret for password cookies
  HOMEPORT_SESSION_SECRET   Secret for top-level session tokens
  HOMEPORT_DATABASE_URL     Registry database (in-memory when unset)
  HOMEPORT_PROJECTS_ROOT    Directory whose children are projects
    "#)]
    Serve(Box<ServeArgs>),

    /// Probe once and print the listening ports
    Scan {
        /// Ports to probe (START-END)
        #[arg(long, env = "HOMEPORT_PORT_RANGE", default_value = "3000-9999")]
        port_range: PortRange,

        /// Directory whose immediate children are projects
        #[arg(long, env = "HOMEPORT_PROJECTS_ROOT")]
        projects_root: Option<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Mint a top-level session token
    Token {
        /// Subject to put in the token
        #[arg(long, default_value = "owner")]
        subject: String,

        /// Token lifetime (e.g. 12h, 7d)
        #[arg(long, default_value = "24h", value_parser = parse_duration)]
        valid_for: Duration,

        /// Secret the gateway validates sessions with
        #[arg(long, env = "HOMEPORT_SESSION_SECRET")]
        session_secret: String,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Gateway listen address
    #[arg(long, env = "HOMEPORT_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Ports to probe (START-END)
    #[arg(long, env = "HOMEPORT_PORT_RANGE", default_value = "3000-9999")]
    port_range: PortRange,

    /// Time between probes
    #[arg(long, env = "HOMEPORT_SCAN_INTERVAL", default_value = "5s", value_parser = parse_duration)]
    scan_interval: Duration,

    /// Drop ports not seen for this long
    #[arg(long, env = "HOMEPORT_STALE_AFTER", default_value = "30s", value_parser = parse_duration)]
    stale_after: Duration,

    /// Secret for password cookies (random per process when unset)
    #[arg(long, env = "HOMEPORT_COOKIE_SECRET", hide_env_values = true)]
    cookie_secret: Option<String>,

    /// Secret for top-level session tokens (defaults to the cookie secret)
    #[arg(long, env = "HOMEPORT_SESSION_SECRET", hide_env_values = true)]
    session_secret: Option<String>,

    /// Directory whose immediate children are projects (default: ~/projects)
    #[arg(long, env = "HOMEPORT_PROJECTS_ROOT")]
    projects_root: Option<PathBuf>,

    /// Skip session checks for private ports and the API
    #[arg(long, env = "HOMEPORT_DEV")]
    dev: bool,

    /// Registry database, e.g. sqlite://./homeport.db?mode=rwc (in-memory when unset)
    #[arg(long, env = "HOMEPORT_DATABASE_URL")]
    database_url: Option<String>,

    /// Port of the embedded editor; never a fallback target
    #[arg(long, env = "HOMEPORT_EDITOR_PORT")]
    editor_port: Option<u16>,

    /// Other ports the fallback router must never resolve to
    #[arg(long = "reserved-port", env = "HOMEPORT_RESERVED_PORTS", value_delimiter = ',')]
    reserved_ports: Vec<u16>,

    /// Public origin used in share URLs
    #[arg(long, env = "HOMEPORT_PUBLIC_URL")]
    public_url: Option<String>,

    /// Login page for private-port navigations without a session
    #[arg(long, env = "HOMEPORT_LOGIN_PATH", default_value = "/login")]
    login_path: String,

    /// Reverse proxy address whose X-Forwarded-* headers are honoured (repeatable)
    #[arg(long = "trusted-proxy", env = "HOMEPORT_TRUSTED_PROXIES", value_delimiter = ',')]
    trusted_proxies: Vec<IpAddr>,

    /// Answer 404 for ports with no registry record instead of proxying
    #[arg(long, env = "HOMEPORT_NO_FORWARD_UNREGISTERED")]
    no_forward_unregistered: bool,

    /// Failed password attempts allowed per IP per window
    #[arg(long, env = "HOMEPORT_RATE_LIMIT_ATTEMPTS", default_value = "5")]
    rate_limit_attempts: u32,

    /// Rate limit window
    #[arg(long, env = "HOMEPORT_RATE_LIMIT_WINDOW", default_value = "15m", value_parser = parse_duration)]
    rate_limit_window: Duration,

    /// Lifetime of password cookies
    #[arg(long, env = "HOMEPORT_AUTH_COOKIE_TTL", default_value = "24h", value_parser = parse_duration)]
    auth_cookie_ttl: Duration,

    /// Lifetime of the routing-context cookie
    #[arg(long, env = "HOMEPORT_CONTEXT_COOKIE_TTL", default_value = "5m", value_parser = parse_duration)]
    context_cookie_ttl: Duration,

    /// Timeout for dialing a backend
    #[arg(long, env = "HOMEPORT_CONNECT_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    connect_timeout: Duration,
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn projects_root(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("projects")
    })
}

fn random_secret() -> Vec<u8> {
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

async fn open_registry(database_url: Option<&str>) -> Result<Arc<dyn PortRegistry>> {
    match database_url {
        Some(url) => {
            let registry = DbRegistry::open(url)
                .await
                .with_context(|| format!("Failed to open registry database {}", url))?;
            info!("Using database registry");
            Ok(Arc::new(registry))
        }
        None => {
            info!("Using in-memory registry (sharing state is lost on restart)");
            Ok(Arc::new(MemoryRegistry::new()))
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    info!("homeport starting...");

    let cookie_secret = match args.cookie_secret {
        Some(secret) if !secret.is_empty() => secret.into_bytes(),
        _ => {
            warn!("No cookie secret configured; password cookies will not survive a restart");
            random_secret()
        }
    };
    let session_secret = args
        .session_secret
        .filter(|s| !s.is_empty())
        .map(String::into_bytes)
        .unwrap_or_else(|| cookie_secret.clone());

    if args.dev {
        warn!("⚠️  Dev mode: private ports and the API are open without a session");
    }

    let registry = open_registry(args.database_url.as_deref()).await?;
    let projects_root = projects_root(args.projects_root);

    let config = GatewayConfig {
        bind_addr: args.bind,
        cookie_secret,
        auth_cookie_ttl: args.auth_cookie_ttl,
        context_cookie_ttl: args.context_cookie_ttl,
        dev_mode: args.dev,
        login_path: args.login_path,
        public_url: args.public_url,
        editor_port: args.editor_port,
        reserved_ports: args.reserved_ports.into_iter().collect::<BTreeSet<_>>(),
        trusted_proxies: args.trusted_proxies,
        forward_unregistered: !args.no_forward_unregistered,
        rate_limit_attempts: args.rate_limit_attempts,
        rate_limit_window: args.rate_limit_window,
        connect_timeout: args.connect_timeout,
    };

    info!("Port range: {}", args.port_range);
    info!("Projects root: {}", projects_root.display());

    let sessions = Arc::new(JwtSessionValidator::new(&session_secret));
    let server = GatewayServer::new(config, registry.clone(), sessions)
        .context("Failed to configure gateway")?;

    let scanner = Scanner::new(
        Arc::from(default_prober(projects_root)),
        registry,
        args.port_range,
    )
    .with_interval(args.scan_interval)
    .with_stale_after(args.stale_after);
    let scanner_task = tokio::spawn(scanner.run());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down...");
    };

    let result = server.start(shutdown).await;
    scanner_task.abort();

    result.context("Gateway failed")?;
    info!("homeport stopped");
    Ok(())
}

fn scan(port_range: PortRange, projects_root: PathBuf, json: bool) -> Result<()> {
    let prober = default_prober(projects_root);
    let ports = prober.probe(port_range).context("Probe failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        println!("No listening ports in {}", port_range);
        return Ok(());
    }

    println!("{:<7} {:<8} {:<20} PROJECT", "PORT", "PID", "PROCESS");
    for port in &ports {
        println!(
            "{:<7} {:<8} {:<20} {}",
            port.port,
            port.process_id
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            port.process_name.as_deref().unwrap_or("-"),
            port.owner_project_id.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Serve(args) => serve(*args).await,
        Commands::Scan {
            port_range,
            projects_root: root,
            json,
        } => {
            let root = projects_root(root);
            tokio::task::spawn_blocking(move || scan(port_range, root, json))
                .await
                .context("Scan task failed")?
        }
        Commands::Token {
            subject,
            valid_for,
            session_secret,
        } => {
            let validity =
                chrono::Duration::from_std(valid_for).context("Token lifetime is too long")?;
            let token = JwtSessionValidator::new(session_secret.as_bytes())
                .issue(&subject, validity)
                .context("Failed to sign session token")?;
            println!("{}", token);
            Ok(())
        }
    }
}
