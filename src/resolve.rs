use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::io;
use std::net::IpAddr;
use tracing::warn;

use crate::envoy::{Host, HostTags};
use crate::types::ServiceEntry;

/// Node metadata key carrying the instance's availability zone.
pub const AZ_META_KEY: &str = "aws_instance_availability-zone";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup_ip(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolves through the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_ip(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

fn host_tags(entry: &ServiceEntry) -> Option<HostTags> {
    entry.node_meta(AZ_META_KEY).map(|az| HostTags {
        az: Some(az.to_string()),
        ..Default::default()
    })
}

/// Turns health entries into hosts.
///
/// Literal IP addresses pass through as is; anything else is resolved and
/// yields one host per address. Entries that fail to resolve are dropped.
pub async fn resolve_entries(resolver: &dyn Resolver, entries: &[ServiceEntry]) -> Vec<Host> {
    let mut hosts = Vec::with_capacity(entries.len());
    for entry in entries {
        let address = entry.address();
        let port = entry.service.port;
        let tags = host_tags(entry);

        if address.parse::<IpAddr>().is_ok() {
            hosts.push(Host {
                ip: address.to_string(),
                port,
                tags,
            });
            continue;
        }

        match resolver.lookup_ip(address).await {
            Ok(ips) => hosts.extend(ips.into_iter().map(|ip| Host {
                ip: ip.to_string(),
                port,
                tags: tags.clone(),
            })),
            Err(e) => {
                warn!(address, error = %e, "dropping unresolvable instance");
            }
        }
    }
    hosts
}
