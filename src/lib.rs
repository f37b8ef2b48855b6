//! A SOCKS5 proxy server library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT, BIND and UDP ASSOCIATE
//!     - No Authentication
//!     - Username/Password Authentication against a pluggable credential store
//!     - Pluggable name resolution, address rewriting and request rules
//!     - Async using tokio, one task per client connection
//!     - UDP relays live exactly as long as their control connection
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! # Example
//! ```no_run
//! use socksgate::{Config, Socks5Server, StaticCredentials};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default()
//!         .with_credentials(StaticCredentials::new().with_user("user", "pass"));
//!     let server = Socks5Server::new(config);
//!     server.listen_and_serve("127.0.0.1:1080").await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod auth;
mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod request;
pub mod resolver;
pub mod rewriter;
pub mod ruleset;
pub mod server;
mod session;

// Re-export main types at crate root for convenience
pub use address::AddrSpec;
pub use auth::{AuthContext, Authenticator, NoAuth, UserPassAuthenticator};
pub use config::{Config, DialFn, Dialer, TcpDialer};
pub use credentials::{CredentialStore, StaticCredentials};
pub use error::{Error, Result};
pub use protocol::{AuthMethod, Command, ReplyCode, Version};
pub use request::Request;
pub use resolver::{DnsResolver, NameResolver};
pub use rewriter::{AddressRewriter, NoRewrite};
pub use ruleset::{PermitAll, PermitCommand, RuleSet, Verdict};
pub use server::Socks5Server;
