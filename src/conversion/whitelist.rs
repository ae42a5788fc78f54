//! Allowed source hosts.

use gifforge_common::{ConversionRequest, Error, Result};
use std::collections::HashSet;

/// Set of hostnames videos may be fetched from.
///
/// Matching ignores case and surrounding whitespace.
#[derive(Debug, Clone, Default)]
pub struct HostnameWhitelist {
    hosts: HashSet<String>,
}

fn normalize(hostname: &str) -> String {
    hostname.trim().to_lowercase()
}

impl HostnameWhitelist {
    /// Build a whitelist from configured hostnames. Blank entries are ignored.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|h| normalize(h.as_ref()))
            .filter(|h| !h.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn is_whitelisted(&self, hostname: &str) -> bool {
        self.hosts.contains(&normalize(hostname))
    }

    /// Ensure the source URL of `request` points at a whitelisted host.
    pub fn check(&self, request: &ConversionRequest) -> Result<()> {
        let host = request.hostname()?;
        if self.is_whitelisted(&host) {
            Ok(())
        } else {
            Err(Error::hostname_not_allowed(host))
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
