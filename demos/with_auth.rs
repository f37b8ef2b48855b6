//! SOCKS5 server with username/password authentication and a rule set
//! that only allows CONNECT

use socksgate::{Config, PermitCommand, Socks5Server, StaticCredentials};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let credentials = StaticCredentials::new().with_user("<user>", "<pass>");
    let rules = PermitCommand {
        enable_connect: true,
        enable_bind: false,
        enable_associate: false,
    };

    let config = Config::default()
        .with_credentials(credentials)
        .with_rules(rules);

    Socks5Server::new(config)
        .listen_and_serve("127.0.0.1:1080")
        .await?;
    Ok(())
}
