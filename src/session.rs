use crate::address::AddrSpec;
use crate::auth::negotiate_auth;
use crate::commands::{self, guard};
use crate::error::{Error, Result};
use crate::protocol::{Command, Version};
use crate::request::{Request, reject};
use crate::ruleset::Verdict;
use crate::server::Shared;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Session drives one client connection from the version byte to the end
/// of the relay. It is owned by the task serving that connection.
pub(crate) struct Session {
    stream: TcpStream,
    peer_addr: SocketAddr,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    /// Client bytes read while waiting on name resolution
    early: Vec<u8>,
}

impl Session {
    pub(crate) fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        shared: Arc<Shared>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            peer_addr,
            shared,
            cancel,
            early: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) -> Result<()> {
        let config = &self.shared.config;

        // Version
        let mut version = [0u8; 1];
        self.stream.read_exact(&mut version).await?;
        if version[0] != Version::SOCKS5 as u8 {
            return Err(Error::UnsupportedVersion(version[0]));
        }

        // Authentication
        let auth_context = negotiate_auth(&mut self.stream, &self.shared.auth_methods).await?;
        if let Some(user) = auth_context.username() {
            debug!("authenticated as {user}");
        }

        // Request
        let mut request = match Request::read_from(
            &mut self.stream,
            config.bind_ip,
            auth_context,
            AddrSpec::from(self.peer_addr),
        )
        .await
        {
            Ok(request) => request,
            Err(e) => return Err(reject(&mut self.stream, e).await),
        };
        info!("{} request to {}", request.command, request.dest_addr);

        // Authorization: rewrite first, then the rules judge the result
        request.real_dest_addr = config.rewriter.rewrite(&request).await;
        let mut target = match config.rules.allow(&request).await {
            Verdict::Permit(target) => target,
            Verdict::Deny => {
                let err = Error::NotAllowed {
                    command: request.command,
                    dest: request.real_dest_addr.to_string(),
                };
                return Err(reject(&mut self.stream, err).await);
            }
        };

        // Resolution
        if target.needs_resolution() {
            let host = target.fqdn.clone().unwrap_or_default();
            let resolve = config.resolver.resolve(&host);
            let resolved = guard(&mut self.stream, &mut self.early, &self.cancel, resolve).await?;
            match resolved {
                Ok((_, ip)) => target.ip = Some(ip),
                Err(source) => {
                    let err = Error::Resolve { host, source };
                    return Err(reject(&mut self.stream, err).await);
                }
            }
        }

        // Dispatch
        match request.command {
            Command::Connect => {
                commands::handle_connect(self.stream, self.early, target, config, &self.cancel)
                    .await
            }
            Command::Bind => {
                commands::handle_bind(self.stream, self.early, &request, config, &self.cancel)
                    .await
            }
            Command::UdpAssociate => {
                commands::handle_associate(self.stream, &request, config, &self.cancel).await
            }
        }
    }
}
