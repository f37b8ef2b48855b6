use crate::auth::{Authenticator, NoAuth, UserPassAuthenticator};
use crate::credentials::CredentialStore;
use crate::resolver::{DnsResolver, NameResolver};
use crate::rewriter::{AddressRewriter, NoRewrite};
use crate::ruleset::{PermitAll, RuleSet};
use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Dialer opens the outbound TCP connection for CONNECT
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream>;
}

/// TcpDialer is a plain TCP connect with an optional timeout
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer {
    pub connect_timeout: Option<Duration>,
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, TcpStream::connect(addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?,
            None => TcpStream::connect(addr).await,
        }
    }
}

/// DialFn adapts an async closure into a Dialer
pub struct DialFn<F>(pub F);

#[async_trait]
impl<F, Fut> Dialer for DialFn<F>
where
    F: Fn(SocketAddr) -> Fut + Send + Sync,
    Fut: Future<Output = io::Result<TcpStream>> + Send + 'static,
{
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        (self.0)(addr).await
    }
}

/// Config holds everything a server needs. It is read-only once the
/// server has been built from it.
#[derive(Clone)]
pub struct Config {
    /// Explicit authenticators. When empty the server derives them from
    /// `credentials`, falling back to no-auth.
    pub auth_methods: Vec<Arc<dyn Authenticator>>,
    pub credentials: Option<Arc<dyn CredentialStore>>,
    pub resolver: Arc<dyn NameResolver>,
    pub rules: Arc<dyn RuleSet>,
    /// Applied to the destination before the rules are evaluated
    pub rewriter: Arc<dyn AddressRewriter>,
    /// Local IP for BIND listeners and UDP ASSOCIATE sockets
    pub bind_ip: IpAddr,
    pub dialer: Arc<dyn Dialer>,
    /// How long BIND waits for its single inbound connection
    pub bind_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_methods: Vec::new(),
            credentials: None,
            resolver: Arc::new(DnsResolver::default()),
            rules: Arc::new(PermitAll),
            rewriter: Arc::new(NoRewrite),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dialer: Arc::new(TcpDialer::default()),
            bind_timeout: None,
        }
    }
}

impl Config {
    pub fn with_auth_method(mut self, auth: impl Authenticator + 'static) -> Self {
        self.auth_methods.push(Arc::new(auth));
        self
    }

    pub fn with_credentials(mut self, credentials: impl CredentialStore + 'static) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }

    pub fn with_resolver(mut self, resolver: impl NameResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_rules(mut self, rules: impl RuleSet + 'static) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn with_rewriter(mut self, rewriter: impl AddressRewriter + 'static) -> Self {
        self.rewriter = Arc::new(rewriter);
        self
    }

    pub fn with_bind_ip(mut self, bind_ip: IpAddr) -> Self {
        self.bind_ip = bind_ip;
        self
    }

    pub fn with_dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Arc::new(dialer);
        self
    }

    /// dial_fn installs an async closure as the dialer
    pub fn dial_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<TcpStream>> + Send + 'static,
    {
        self.with_dialer(DialFn(f))
    }

    pub fn with_bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = Some(timeout);
        self
    }

    /// effective_auth_methods applies the default selection: explicit
    /// methods, else username/password over the credentials, else no-auth
    pub(crate) fn effective_auth_methods(&self) -> Vec<Arc<dyn Authenticator>> {
        if !self.auth_methods.is_empty() {
            return self.auth_methods.clone();
        }

        match &self.credentials {
            Some(creds) => vec![Arc::new(UserPassAuthenticator::new(Arc::clone(creds)))],
            None => vec![Arc::new(NoAuth)],
        }
    }
}
