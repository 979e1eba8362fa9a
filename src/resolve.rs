//! Domain name resolution.

use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};

use tracing::debug;

/// Resolves a domain name to an IPv4 address.
///
/// Implementations may block; the server runs them on tokio's blocking pool
/// and hands the answer back to the session.
pub trait Resolver: Send + Sync {
    fn resolve(&self, domain: &str) -> Option<Ipv4Addr>;
}

/// The operating system resolver. Takes the first IPv4 answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, domain: &str) -> Option<Ipv4Addr> {
        let answers = match (domain, 0).to_socket_addrs() {
            Ok(answers) => answers,
            Err(e) => {
                debug!("resolving {} failed: {}", domain, e);
                return None;
            }
        };
        answers.into_iter().find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
    }
}
