//! Basic SOCKS5 server example

use socksgate::{Config, Socks5Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = Socks5Server::new(Config::default());
    println!("Starting SOCKS5 server on 127.0.0.1:1080");

    server.listen_and_serve("127.0.0.1:1080").await?;
    Ok(())
}
