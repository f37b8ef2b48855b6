//! Shared utilities for the SOCKS5 integration tests.

use socksgate::{Config, Socks5Server};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Start a SOCKS5 server on an ephemeral loopback port.
pub async fn start_server(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Socks5Server::new(config);

    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    addr
}

/// Start a SOCKS5 server that stops once the returned token is cancelled.
#[allow(dead_code)]
pub async fn start_server_with_shutdown(config: Config) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Socks5Server::new(config);
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.serve_with_shutdown(listener, token).await;
    });

    (addr, shutdown)
}

/// Start a TCP echo server on loopback. Every accepted peer address is
/// reported on the returned channel.
pub async fn start_echo_server() -> (SocketAddr, mpsc::UnboundedReceiver<SocketAddr>) {
    start_echo_server_on(LOCALHOST).await
}

/// Start a TCP echo server on `ip`.
pub async fn start_echo_server_on(ip: IpAddr) -> (SocketAddr, mpsc::UnboundedReceiver<SocketAddr>) {
    let listener = TcpListener::bind((ip, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, peer)) = listener.accept().await {
            let _ = tx.send(peer);
            tokio::spawn(async move {
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });

    (addr, rx)
}

/// Start a UDP echo server.
#[allow(dead_code)]
pub async fn start_udp_echo_server() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..len], from).await;
        }
    });

    addr
}

/// An address nothing is listening on.
#[allow(dead_code)]
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Greet with the given methods and return the server's choice.
pub async fn greet(stream: &mut TcpStream, methods: &[u8]) -> u8 {
    let mut hello = vec![0x05, methods.len() as u8];
    hello.extend_from_slice(methods);
    stream.write_all(&hello).await.unwrap();

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice[0], 0x05);
    choice[1]
}

/// Run the username/password sub-negotiation and return the status byte.
#[allow(dead_code)]
pub async fn login(stream: &mut TcpStream, username: &str, password: &str) -> u8 {
    let mut req = vec![0x01, username.len() as u8];
    req.extend_from_slice(username.as_bytes());
    req.push(password.len() as u8);
    req.extend_from_slice(password.as_bytes());
    stream.write_all(&req).await.unwrap();

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await.unwrap();
    assert_eq!(status[0], 0x01);
    status[1]
}

/// Connect to the proxy and complete a no-auth greeting.
pub async fn connect_no_auth(proxy: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    assert_eq!(greet(&mut stream, &[0x00]).await, 0x00);
    stream
}

/// Encode a request for an IP destination.
pub fn ip_request(command: u8, dest: SocketAddr) -> Vec<u8> {
    let mut req = vec![0x05, command, 0x00];
    match dest.ip() {
        IpAddr::V4(ip) => {
            req.push(0x01);
            req.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            req.push(0x04);
            req.extend_from_slice(&ip.octets());
        }
    }
    req.extend_from_slice(&dest.port().to_be_bytes());
    req
}

/// Encode a request for a domain destination.
#[allow(dead_code)]
pub fn domain_request(command: u8, host: &str, port: u16) -> Vec<u8> {
    let mut req = vec![0x05, command, 0x00, 0x03, host.len() as u8];
    req.extend_from_slice(host.as_bytes());
    req.extend_from_slice(&port.to_be_bytes());
    req
}

/// Read one reply and return REP and the bound address.
pub async fn read_reply(stream: &mut TcpStream) -> (u8, SocketAddr) {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], 0x05);
    assert_eq!(head[2], 0x00);

    let ip = match head[3] {
        0x01 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await.unwrap();
            IpAddr::from(octets)
        }
        0x04 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await.unwrap();
            IpAddr::from(octets)
        }
        other => panic!("unexpected ATYP in reply: {other}"),
    };

    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await.unwrap();
    (head[1], SocketAddr::new(ip, u16::from_be_bytes(port)))
}

/// Poll `cond` until it holds or five seconds pass.
#[allow(dead_code)]
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}

/// Assert the peer has closed the connection.
pub async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => {}
        Ok(Ok(n)) => panic!("expected close, read {n} bytes: {:?}", &buf[..n]),
        Err(_) => panic!("connection was not closed"),
    }
}
