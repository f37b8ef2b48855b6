use anyhow::{Result, bail};
use clap::Parser;
use socksgate::{Config, PermitCommand, Socks5Server, StaticCredentials, TcpDialer};
use std::{net::IpAddr, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "A SOCKS5 proxy server", long_about = None)]
struct Args {
    /// Listener address
    #[arg(short, long, default_value = "127.0.0.1:1080")]
    listen: String,

    /// Username for SOCKS5 proxy
    #[arg(short, long)]
    username: Option<String>,

    /// Password for SOCKS5 proxy
    #[arg(short, long)]
    password: Option<String>,

    /// Local IP for BIND listeners and UDP ASSOCIATE sockets
    #[arg(short, long)]
    bind_ip: Option<IpAddr>,

    /// Outbound connect timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// How long BIND waits for an inbound connection, in seconds
    #[arg(long)]
    bind_timeout: Option<u64>,

    /// Refuse CONNECT requests
    #[arg(long)]
    no_connect: bool,

    /// Refuse BIND requests
    #[arg(long)]
    no_bind: bool,

    /// Refuse UDP ASSOCIATE requests
    #[arg(long)]
    no_associate: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber, RUST_LOG wins over --verbose
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::default()
        .with_dialer(TcpDialer {
            connect_timeout: args.connect_timeout.map(Duration::from_secs),
        })
        .with_rules(PermitCommand {
            enable_connect: !args.no_connect,
            enable_bind: !args.no_bind,
            enable_associate: !args.no_associate,
        });

    // Check for auth and grab it if present
    match (args.username, args.password) {
        (Some(u), Some(p)) => {
            info!("Authentication enabled");
            config = config.with_credentials(StaticCredentials::new().with_user(u, p));
        }
        (None, None) => warn!("no authentication configured (free use mode)"),
        _ => bail!("must provide both username and password (or neither)"),
    }

    if let Some(bind_ip) = args.bind_ip {
        config = config.with_bind_ip(bind_ip);
    }

    if let Some(secs) = args.bind_timeout {
        config = config.with_bind_timeout(Duration::from_secs(secs));
    }

    // Instantiate server
    let server = Socks5Server::new(config);
    let listener = TcpListener::bind(&args.listen).await?;

    // Ctrl-C stops accepting and cancels in-flight sessions
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    // Run it
    info!("Starting SOCKS5 proxy: {}", args.listen);
    server.serve_with_shutdown(listener, shutdown).await?;
    Ok(())
}
