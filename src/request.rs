use crate::address::AddrSpec;
use crate::auth::AuthContext;
use crate::error::{Error, Result};
use crate::protocol::{Command, RSV, ReplyCode, Version};
use std::net::IpAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Request is a parsed client request together with what the session
/// knows about the client
#[derive(Debug, Clone)]
pub struct Request {
    pub version: u8,
    pub command: Command,
    /// Destination as sent by the client
    pub dest_addr: AddrSpec,
    /// Destination after address rewriting; what the rules judge
    pub real_dest_addr: AddrSpec,
    /// Local IP used for BIND and UDP ASSOCIATE
    pub bind_ip: IpAddr,
    pub auth_context: AuthContext,
    pub remote_addr: AddrSpec,
}

impl Request {
    /// read_from parses the request line that follows authentication
    pub async fn read_from<R>(
        reader: &mut R,
        bind_ip: IpAddr,
        auth_context: AuthContext,
        remote_addr: AddrSpec,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        // SOCKS5 request format
        // +----+-----+-------+------+----------+----------+
        // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
        // +----+-----+-------+------+----------+----------+
        // | 1  |  1  | X'00' |  1   | Variable |    2     |
        // +----+-----+-------+------+----------+----------+

        let mut header = [0u8; 3];
        reader.read_exact(&mut header).await?;

        let version = header[0];
        let command = header[1];
        // RSV is ignored

        if version != Version::SOCKS5 as u8 {
            return Err(Error::UnsupportedVersion(version));
        }

        // The address is consumed before the command is judged so that the
        // reply for an unknown command follows a fully read request
        let dest_addr = AddrSpec::read_from(reader).await?;

        let command = Command::from_byte(command).ok_or(Error::UnsupportedCommand(command))?;

        Ok(Self {
            version,
            command,
            real_dest_addr: dest_addr.clone(),
            dest_addr,
            bind_ip,
            auth_context,
            remote_addr,
        })
    }
}

/// send_reply writes a single server reply
pub async fn send_reply<W>(
    writer: &mut W,
    reply_code: ReplyCode,
    bound_addr: &AddrSpec,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    let mut reply = vec![Version::SOCKS5 as u8, reply_code as u8, RSV];
    bound_addr.encode(&mut reply);

    writer.write_all(&reply).await?;
    Ok(())
}

/// reject sends the failure reply an error calls for, if any, and hands the
/// error back for the caller to return
pub(crate) async fn reject<W>(writer: &mut W, err: Error) -> Error
where
    W: AsyncWrite + Unpin,
{
    if let Some(code) = err.reply_code() {
        if let Err(e) = send_reply(writer, code, &AddrSpec::unspecified()).await {
            tracing::debug!("failed to send {code:?} reply: {e}");
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn client() -> AddrSpec {
        AddrSpec::from_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), 50000)
    }

    async fn parse(mut wire: &[u8]) -> Result<Request> {
        Request::read_from(
            &mut wire,
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AuthContext::new(0),
            client(),
        )
        .await
    }

    #[tokio::test]
    async fn parses_connect_to_ipv4() {
        let req = parse(&[5, 1, 0, 1, 127, 0, 0, 1, 0x00, 0x50]).await.unwrap();
        assert_eq!(req.command, Command::Connect);
        assert_eq!(req.dest_addr, AddrSpec::from_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), 80));
        assert_eq!(req.remote_addr, client());
    }

    #[tokio::test]
    async fn rejects_wrong_version() {
        let err = parse(&[4, 1, 0, 1, 127, 0, 0, 1, 0, 80]).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(4)));
        assert_eq!(err.reply_code(), None);
    }

    #[tokio::test]
    async fn unknown_command_gets_command_not_supported() {
        let err = parse(&[5, 9, 0, 1, 127, 0, 0, 1, 0, 80]).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedCommand(9)));
        assert_eq!(err.reply_code(), Some(ReplyCode::CommandNotSupported));
    }

    #[tokio::test]
    async fn unknown_address_type_gets_addr_type_unsupported() {
        let err = parse(&[5, 1, 0, 2, 127, 0, 0, 1, 0, 80]).await.unwrap_err();
        assert_eq!(err.reply_code(), Some(ReplyCode::AddrTypeUnsupported));
    }

    #[tokio::test]
    async fn truncated_request_is_io_error() {
        let err = parse(&[5, 1, 0, 1, 127]).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn reply_encodes_bound_address() {
        let mut out = Vec::new();
        let bound = AddrSpec::from_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1080);
        send_reply(&mut out, ReplyCode::Succeeded, &bound).await.unwrap();
        assert_eq!(out, vec![5, 0, 0, 1, 10, 0, 0, 1, 0x04, 0x38]);
    }
}
