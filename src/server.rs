use crate::{
    auth::AuthMethods,
    config::Config,
    error::{Error, Result},
    session::Session,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

/// Shared is the read-only state every session sees
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) auth_methods: AuthMethods,
}

/// Socks5Server accepts client connections and runs one session per
/// connection. Cloning is cheap and shares the configuration.
#[derive(Clone)]
pub struct Socks5Server {
    shared: Arc<Shared>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new builds the server and its auth method table from `config`
    pub fn new(config: Config) -> Self {
        let auth_methods = config
            .effective_auth_methods()
            .into_iter()
            .map(|auth| (auth.code(), auth))
            .collect();

        Self {
            shared: Arc::new(Shared {
                config,
                auth_methods,
            }),
        }
    }

    /// listen_and_serve binds a TCP listener and serves it until an accept
    /// fails
    pub async fn listen_and_serve(&self, addr: impl ToSocketAddrs) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// serve accepts connections from `listener` until an accept fails
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, CancellationToken::new())
            .await
    }

    /// serve_with_shutdown is serve that also returns once `shutdown` is
    /// cancelled. In-flight sessions are cancelled along with it.
    pub async fn serve_with_shutdown(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!("SOCKS5 proxy listening on {}", listener.local_addr()?);

        // Listen for connections to proxy
        loop {
            let (inbound, peer_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = shutdown.cancelled() => {
                    info!("SOCKS5 proxy shutting down");
                    return Ok(());
                }
            };

            let server = self.clone();
            let cancel = shutdown.child_token();

            tokio::spawn(
                async move {
                    info!("new client: {peer_addr}");
                    let _ = server.serve_session(inbound, peer_addr, cancel).await;
                }
                .instrument(info_span!("socks5", peer = %peer_addr)),
            );
        }
    }

    /// serve_connection runs the SOCKS5 protocol on a single, already
    /// accepted connection. The outcome is logged and returned.
    pub async fn serve_connection(&self, stream: TcpStream) -> Result<()> {
        let peer_addr = stream.peer_addr()?;
        self.serve_session(stream, peer_addr, CancellationToken::new())
            .instrument(info_span!("socks5", peer = %peer_addr))
            .await
    }

    async fn serve_session(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<()> {
        let session = Session::new(stream, peer_addr, self.shared.clone(), cancel);
        let outcome = session.run().await;
        match &outcome {
            Ok(()) => debug!("connection closed"),
            Err(e @ (Error::ClientGone | Error::Cancelled)) => debug!("connection ended: {e}"),
            Err(e) => error!("connection error: {e}"),
        }
        outcome
    }
}
