use async_trait::async_trait;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

/// NameResolver turns a domain name into an IP address
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// resolve returns the canonical name and one address for `host`
    async fn resolve(&self, host: &str) -> io::Result<(String, IpAddr)>;
}

/// DnsResolver uses the platform resolver through tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver {
    pub timeout: Option<Duration>,
}

impl DnsResolver {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve(&self, host: &str) -> io::Result<(String, IpAddr)> {
        let lookup = tokio::net::lookup_host((host, 0));
        let mut addrs = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, lookup).await.map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, "name resolution timed out")
            })??,
            None => lookup.await?,
        };

        let addr = addrs.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no IP address found for '{host}'"),
            )
        })?;

        Ok((host.to_string(), addr.ip()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn localhost_is_loopback() {
        let (name, ip) = DnsResolver::default().resolve("localhost").await.unwrap();
        assert_eq!(name, "localhost");
        assert!(ip.is_loopback(), "expected loopback, got {ip}");
    }

    #[tokio::test]
    async fn literal_ip_resolves_to_itself() {
        let resolver = DnsResolver::with_timeout(Duration::from_secs(5));
        let (_, ip) = resolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(ip, IpAddr::from([127, 0, 0, 1]));
    }
}
