//! Matching a remote address against where a domain receives its mail.
//!
//! The domain's MX hosts are resolved to their A/AAAA records. A domain
//! without MX records is its own mail host (RFC 5321 section 5.1).

use std::{net::IpAddr, time::Duration};

use hermod_common::delivery;
use hickory_resolver::{
    TokioResolver,
    config::{ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
};
use tokio::runtime::{Builder, Runtime};

use crate::{error::Result, traits::IpDomainVerifier};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts an address when it shares its network with one of the sender
/// domain's mail hosts: the /16 for IPv4, the /48 for IPv6.
///
/// Called from the retry thread, so lookups run to completion on a runtime
/// the verifier owns.
pub struct SubnetVerifier {
    runtime: Runtime,
    resolver: TokioResolver,
}

impl SubnetVerifier {
    /// Resolve through the system's configured name servers.
    ///
    /// # Errors
    ///
    /// [`SpoolError::Dns`](crate::SpoolError::Dns) if the system resolver
    /// configuration can't be read, [`SpoolError::Io`](crate::SpoolError::Io)
    /// if the lookup runtime can't start.
    pub fn new() -> Result<Self> {
        let mut opts = ResolverOpts::default();
        opts.timeout = LOOKUP_TIMEOUT;

        let runtime = Builder::new_current_thread().enable_all().build()?;
        let resolver = {
            let _entered = runtime.enter();
            TokioResolver::builder(TokioConnectionProvider::default())?
                .with_options(opts)
                .build()
        };

        Ok(Self { runtime, resolver })
    }

    /// Resolve through the name servers in `config`.
    ///
    /// # Errors
    ///
    /// [`SpoolError::Io`](crate::SpoolError::Io) if the lookup runtime can't
    /// start.
    pub fn with_resolver_config(config: ResolverConfig, opts: ResolverOpts) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let resolver = {
            let _entered = runtime.enter();
            TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
                .with_options(opts)
                .build()
        };

        Ok(Self { runtime, resolver })
    }

    /// Every address of every mail host of `domain`. Lookup failures leave
    /// the hosts concerned out.
    pub async fn mail_addresses(&self, domain: &str) -> Vec<IpAddr> {
        let mut hosts: Vec<String> = match self.resolver.mx_lookup(domain).await {
            Ok(mx) => mx.iter().map(|mx| mx.exchange().to_utf8()).collect(),
            Err(err) if err.is_no_records_found() => Vec::new(),
            Err(err) => {
                delivery!(level = WARN, "MX lookup for {domain} failed: {err}");
                return Vec::new();
            }
        };

        if hosts.is_empty() {
            delivery!(level = DEBUG, "No MX records for {domain}, using its A/AAAA records");
            hosts.push(domain.to_owned());
        }

        let mut addresses = Vec::new();
        for host in hosts {
            match self.resolver.lookup_ip(host.as_str()).await {
                Ok(ips) => addresses.extend(ips.iter()),
                Err(err) => delivery!(level = DEBUG, "Unable to resolve {host}: {err}"),
            }
        }

        addresses
    }
}

fn same_network(a: IpAddr, b: IpAddr) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => a.octets()[..2] == b.octets()[..2],
        (IpAddr::V6(a), IpAddr::V6(b)) => a.segments()[..3] == b.segments()[..3],
        _ => false,
    }
}

impl IpDomainVerifier for SubnetVerifier {
    fn verify(&self, domain: &str, ip: &str) -> bool {
        let Ok(ip) = ip.trim().parse::<IpAddr>() else {
            return false;
        };

        self.runtime
            .block_on(self.mail_addresses(domain))
            .into_iter()
            .any(|addr| same_network(addr, ip))
    }
}
