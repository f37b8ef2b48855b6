use crate::address::AddrSpec;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::ReplyCode;
use crate::relay::{UdpAssociation, relay_tcp};
use crate::request::{Request, reject, send_reply};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

// ================
// CONNECT COMMAND
// ================

/// Most a client may send ahead of the reply to its request
const MAX_EARLY_DATA: usize = 64 * 1024;

/// handle_connect dials the target, reports the outbound connection's
/// local address and relays until either side closes. `early` holds client
/// bytes that arrived before the reply; they reach the target first.
pub(crate) async fn handle_connect(
    mut stream: TcpStream,
    mut early: Vec<u8>,
    target: AddrSpec,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    let Some(addr) = target.socket_addr() else {
        return Err(reject(&mut stream, Error::Resolve {
            host: target.to_string(),
            source: std::io::Error::other("destination was not resolved"),
        })
        .await);
    };

    let dialed = guard(&mut stream, &mut early, cancel, config.dialer.dial(addr)).await?;
    let mut outbound = match dialed {
        Ok(outbound) => outbound,
        Err(source) => {
            let err = Error::Dial {
                dest: target.to_string(),
                source,
            };
            return Err(reject(&mut stream, err).await);
        }
    };

    // BND.ADDR is the proxy's side of the outbound connection
    let local = outbound.local_addr()?;
    send_reply(&mut stream, ReplyCode::Succeeded, &local.into()).await?;
    info!("CONNECT {target} via {local}");

    if !early.is_empty() {
        debug!("forwarding {} early bytes to {target}", early.len());
        outbound.write_all(&early).await?;
    }

    relay_tcp(stream, outbound, cancel).await?;
    Ok(())
}

// =============
// BIND COMMAND
// =============

/// handle_bind listens for exactly one inbound connection and relays it to
/// the client. Two replies are sent: the listening address, then the
/// address of the accepted peer.
pub(crate) async fn handle_bind(
    mut stream: TcpStream,
    mut early: Vec<u8>,
    request: &Request,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    let listen_ip = local_ip(&stream, request.bind_ip)?;

    let listener = match TcpListener::bind((listen_ip, 0)).await {
        Ok(listener) => listener,
        Err(e) => {
            send_reply(&mut stream, ReplyCode::ServerFailure, &AddrSpec::unspecified()).await?;
            return Err(e.into());
        }
    };

    let bound = listener.local_addr()?;
    send_reply(&mut stream, ReplyCode::Succeeded, &bound.into()).await?;
    info!("BIND listening on {bound} for {}", request.dest_addr);

    let accept = async {
        match config.bind_timeout {
            Some(limit) => match tokio::time::timeout(limit, listener.accept()).await {
                Ok(accepted) => accepted.map_err(Error::BindAccept),
                Err(_) => Err(Error::BindTimeout),
            },
            None => listener.accept().await.map_err(Error::BindAccept),
        }
    };

    let accepted = guard(&mut stream, &mut early, cancel, accept).await?;

    // Only one peer per BIND
    drop(listener);

    let (mut inbound, peer) = match accepted {
        Ok(accepted) => accepted,
        Err(e) => return Err(reject(&mut stream, e).await),
    };

    info!("BIND accepted connection from {peer}");
    send_reply(&mut stream, ReplyCode::Succeeded, &peer.into()).await?;

    if !early.is_empty() {
        inbound.write_all(&early).await?;
    }

    relay_tcp(stream, inbound, cancel).await?;
    Ok(())
}

// ===============
// UDP ASSOCIATE
// ===============

/// handle_associate binds a UDP relay socket and keeps it alive for exactly
/// as long as the control connection stays open
pub(crate) async fn handle_associate(
    mut stream: TcpStream,
    request: &Request,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    let listen_ip = local_ip(&stream, request.bind_ip)?;

    let socket = match UdpSocket::bind((listen_ip, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            // If there's an issue, it's with binding the UDP socket server side
            send_reply(&mut stream, ReplyCode::ServerFailure, &AddrSpec::unspecified()).await?;
            return Err(e.into());
        }
    };

    let bound = socket.local_addr()?;
    send_reply(&mut stream, ReplyCode::Succeeded, &bound.into()).await?;

    let client_ip = stream.peer_addr()?.ip();
    let association = UdpAssociation::new(socket, client_ip, config.resolver.clone());

    // The relay task is a child of this session
    let relay_cancel = cancel.child_token();
    let mut relay = tokio::spawn(
        association
            .run(relay_cancel.clone())
            .instrument(info_span!("udp", relay = %bound)),
    );

    tokio::select! {
        _ = drain_until_closed(&mut stream) => {
            debug!("control connection for {bound} closed");
        }
        _ = cancel.cancelled() => {
            debug!("session cancelled, closing UDP relay {bound}");
        }
        finished = &mut relay => {
            // The relay died on its own; the control connection goes with it
            match finished {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("UDP relay {bound} failed: {e}"),
                Err(e) => warn!("UDP relay {bound} task failed: {e}"),
            }
            return Ok(());
        }
    }

    relay_cancel.cancel();
    match relay.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("UDP relay {bound} failed: {e}"),
        Err(e) => warn!("UDP relay {bound} task failed: {e}"),
    }

    Ok(())
}

// =========
// HELPERS
// =========

/// guard runs `fut` unless the client goes away or the session is
/// cancelled first. Anything the client sends meanwhile is appended to
/// `early` so that its closing is still noticed.
pub(crate) async fn guard<F>(
    stream: &mut TcpStream,
    early: &mut Vec<u8>,
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output>
where
    F: Future,
{
    tokio::select! {
        out = fut => Ok(out),
        err = watch_client(stream, early) => Err(err),
        _ = cancel.cancelled() => Err(Error::Cancelled),
    }
}

/// watch_client buffers client bytes until the client closes its end, the
/// read fails or the buffer outgrows MAX_EARLY_DATA
async fn watch_client(stream: &mut TcpStream, early: &mut Vec<u8>) -> Error {
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => return Error::ClientGone,
            Ok(n) => {
                early.extend_from_slice(&buf[..n]);
                if early.len() > MAX_EARLY_DATA {
                    return Error::TooMuchEarlyData(MAX_EARLY_DATA);
                }
            }
            Err(e) => {
                debug!("client read failed: {e}");
                return Error::ClientGone;
            }
        }
    }
}

/// drain_until_closed discards anything the client sends on the control
/// connection and returns once it is closed or fails
async fn drain_until_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 512];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => debug!("ignoring {n} bytes on UDP control connection"),
            Err(e) => {
                debug!("UDP control connection error: {e}");
                return;
            }
        }
    }
}

/// local_ip picks the address BIND and UDP ASSOCIATE sockets use: the
/// configured bind IP, or the IP the client reached us on
fn local_ip(stream: &TcpStream, bind_ip: IpAddr) -> Result<IpAddr> {
    if bind_ip.is_unspecified() {
        let local: SocketAddr = stream.local_addr()?;
        Ok(local.ip())
    } else {
        Ok(bind_ip)
    }
}
