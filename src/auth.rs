use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::protocol::{AuthMethod, AuthStatus, USERPASS_VERSION, Version};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// AsyncStream is any duplex byte stream an authenticator can talk over
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// AuthContext is what a successful handshake knows about the client.
/// Password auth stores the username under the "Username" key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub method: u8,
    pub payload: HashMap<String, String>,
}

impl AuthContext {
    pub fn new(method: u8) -> Self {
        Self {
            method,
            payload: HashMap::new(),
        }
    }

    /// username returns the authenticated user, if any
    pub fn username(&self) -> Option<&str> {
        self.payload.get("Username").map(String::as_str)
    }
}

/// Authenticator runs the sub-negotiation for a single method code
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// code is the METHOD byte this authenticator answers to
    fn code(&self) -> u8;

    /// authenticate runs after the method selection reply has been sent
    async fn authenticate(&self, stream: &mut dyn AsyncStream) -> Result<AuthContext>;
}

/// AuthMethods maps method codes to the authenticator serving them
pub type AuthMethods = HashMap<u8, Arc<dyn Authenticator>>;

/// NoAuth accepts every client without a sub-negotiation
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    fn code(&self) -> u8 {
        AuthMethod::NoAuth as u8
    }

    async fn authenticate(&self, _stream: &mut dyn AsyncStream) -> Result<AuthContext> {
        Ok(AuthContext::new(self.code()))
    }
}

/// UserPassAuthenticator implements RFC 1929 against a CredentialStore
#[derive(Clone)]
pub struct UserPassAuthenticator {
    credentials: Arc<dyn CredentialStore>,
}

impl UserPassAuthenticator {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Authenticator for UserPassAuthenticator {
    fn code(&self) -> u8 {
        AuthMethod::UserPass as u8
    }

    async fn authenticate(&self, stream: &mut dyn AsyncStream) -> Result<AuthContext> {
        // Client Username/Password Request
        // +----+------+----------+------+----------+
        // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
        // +----+------+----------+------+----------+
        // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
        // +----+------+----------+------+----------+

        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await?;

        if header[0] != USERPASS_VERSION {
            return Err(Error::UnsupportedAuthVersion(header[0]));
        }

        let mut username = vec![0u8; header[1] as usize];
        stream.read_exact(&mut username).await?;

        let mut password_len = [0u8; 1];
        stream.read_exact(&mut password_len).await?;

        let mut password = vec![0u8; password_len[0] as usize];
        stream.read_exact(&mut password).await?;

        // Non UTF-8 credentials can never match a stored pair
        let username = String::from_utf8(username).ok();
        let password = String::from_utf8(password).ok();

        let status = match (&username, &password) {
            (Some(u), Some(p)) if self.credentials.valid(u, p) => AuthStatus::Success,
            _ => AuthStatus::Failure,
        };

        // Username/Password Server response
        // +----+--------+
        // |VER | STATUS |
        // +----+--------+
        // | 1  |   1    |
        // +----+--------+
        stream.write_all(&[USERPASS_VERSION, status as u8]).await?;

        match (status, username) {
            (AuthStatus::Success, Some(username)) => {
                let mut ctx = AuthContext::new(self.code());
                ctx.payload.insert("Username".to_string(), username);
                Ok(ctx)
            }
            _ => Err(Error::AuthFailed),
        }
    }
}

/// negotiate_auth reads the client's offered methods (the version byte has
/// already been consumed), picks one and runs its handshake
pub async fn negotiate_auth<S>(stream: &mut S, methods: &AuthMethods) -> Result<AuthContext>
where
    S: AsyncStream,
{
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+

    let mut n_methods = [0u8; 1];
    stream.read_exact(&mut n_methods).await?;

    let mut offered = vec![0u8; n_methods[0] as usize];
    stream.read_exact(&mut offered).await?;

    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    let Some(authenticator) = select_auth_method(&offered, methods) else {
        stream
            .write_all(&[Version::SOCKS5 as u8, AuthMethod::NoAcceptable as u8])
            .await?;
        return Err(Error::NoAcceptableMethod);
    };

    let code = authenticator.code();
    debug!("selected auth method {code:#04x} from {offered:?}");
    stream.write_all(&[Version::SOCKS5 as u8, code]).await?;

    authenticator.authenticate(stream).await
}

/// select_auth_method returns the first method, in the client's order,
/// that the server supports
fn select_auth_method<'a>(
    client_methods: &[u8],
    methods: &'a AuthMethods,
) -> Option<&'a Arc<dyn Authenticator>> {
    client_methods.iter().find_map(|code| methods.get(code))
}
