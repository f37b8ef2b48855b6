use crate::address::AddrSpec;
use crate::request::Request;
use async_trait::async_trait;

/// AddressRewriter substitutes the destination of a request before the
/// rules see it, e.g. for split-horizon redirection
#[async_trait]
pub trait AddressRewriter: Send + Sync {
    async fn rewrite(&self, request: &Request) -> AddrSpec;
}

/// NoRewrite keeps the requested destination
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRewrite;

#[async_trait]
impl AddressRewriter for NoRewrite {
    async fn rewrite(&self, request: &Request) -> AddrSpec {
        request.dest_addr.clone()
    }
}
