use crate::address::AddrSpec;
use crate::protocol::Command;
use crate::request::Request;
use async_trait::async_trait;

/// Verdict is a RuleSet decision. A permit carries the destination the
/// request should proceed with, which lets a rule redirect it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Permit(AddrSpec),
    Deny,
}

/// RuleSet authorizes a parsed request before any network activity
#[async_trait]
pub trait RuleSet: Send + Sync {
    async fn allow(&self, request: &Request) -> Verdict;
}

/// PermitAll lets every request through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PermitAll;

#[async_trait]
impl RuleSet for PermitAll {
    async fn allow(&self, request: &Request) -> Verdict {
        Verdict::Permit(request.real_dest_addr.clone())
    }
}

/// PermitCommand gates requests by command type
#[derive(Debug, Clone, Copy)]
pub struct PermitCommand {
    pub enable_connect: bool,
    pub enable_bind: bool,
    pub enable_associate: bool,
}

impl Default for PermitCommand {
    fn default() -> Self {
        Self {
            enable_connect: true,
            enable_bind: true,
            enable_associate: true,
        }
    }
}

#[async_trait]
impl RuleSet for PermitCommand {
    async fn allow(&self, request: &Request) -> Verdict {
        let enabled = match request.command {
            Command::Connect => self.enable_connect,
            Command::Bind => self.enable_bind,
            Command::UdpAssociate => self.enable_associate,
        };

        if enabled {
            Verdict::Permit(request.real_dest_addr.clone())
        } else {
            Verdict::Deny
        }
    }
}
