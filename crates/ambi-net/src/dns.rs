use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Process-wide hostname → IPv4 cache.
///
/// The contract is: a lookup never blocks the caller. A cached address is
/// served for up to the TTL; once it expires a background refresh is
/// kicked off and the stale address keeps being served until the refresh
/// lands, so a dead DNS server degrades to "slightly old address" instead
/// of stalled playback.
pub struct DnsCache {
    ttl: Duration,
    disabled: bool,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    ip: IpAddr,
    resolved_at: Instant,
    refreshing: Arc<AtomicBool>,
}

impl DnsCache {
    #[must_use]
    pub fn new(ttl: Duration, disabled: bool) -> Self {
        Self {
            ttl,
            disabled,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Non-blocking lookup.
    ///
    /// IP literals pass straight through. For hostnames, returns the cached
    /// address if one exists (stale or not), spawning a refresh when the
    /// TTL has passed. Returns `None` while the very first resolution is
    /// still in flight — callers skip the send and retry next frame.
    ///
    /// Must be called from within a tokio runtime.
    pub fn lookup(self: &Arc<Self>, host: &str) -> Option<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip);
        }
        if self.disabled {
            return None;
        }

        let (cached, needs_refresh, gate) = {
            let entries = self.entries.lock().expect("dns cache poisoned");
            match entries.get(host) {
                Some(entry) => (
                    Some(entry.ip),
                    entry.resolved_at.elapsed() >= self.ttl,
                    entry.refreshing.clone(),
                ),
                None => (None, true, Arc::new(AtomicBool::new(false))),
            }
        };

        if needs_refresh && !gate.swap(true, Ordering::SeqCst) {
            let cache = Arc::clone(self);
            let host = host.to_string();
            tokio::spawn(async move {
                cache.refresh(&host, gate).await;
            });
        }
        cached
    }

    async fn refresh(&self, host: &str, gate: Arc<AtomicBool>) {
        let resolved = tokio::net::lookup_host((host, 0u16)).await;
        match resolved {
            Ok(addrs) => {
                // Prefer IPv4; WLED firmware listens on v4.
                let mut found = None;
                for addr in addrs {
                    if addr.is_ipv4() {
                        found = Some(addr.ip());
                        break;
                    }
                    found.get_or_insert(addr.ip());
                }
                if let Some(ip) = found {
                    tracing::debug!(host, %ip, "resolved");
                    let mut entries = self.entries.lock().expect("dns cache poisoned");
                    entries.insert(
                        host.to_string(),
                        CacheEntry {
                            ip,
                            resolved_at: Instant::now(),
                            refreshing: Arc::new(AtomicBool::new(false)),
                        },
                    );
                    return;
                }
                tracing::warn!(host, "lookup returned no addresses, keeping stale entry");
            }
            Err(e) => {
                tracing::warn!(host, "lookup failed, keeping stale entry: {e}");
            }
        }
        // Failed: leave any stale entry in place and allow another attempt.
        gate.store(false, Ordering::SeqCst);
        let mut entries = self.entries.lock().expect("dns cache poisoned");
        if let Some(entry) = entries.get_mut(host) {
            entry.refreshing = gate;
        }
    }

    #[cfg(test)]
    pub(crate) fn seed(&self, host: &str, ip: IpAddr, age: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            host.to_string(),
            CacheEntry {
                ip,
                resolved_at: Instant::now() - age,
                refreshing: Arc::new(AtomicBool::new(true)),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_literals_bypass_the_cache() {
        let cache = Arc::new(DnsCache::new(Duration::from_secs(3600), false));
        assert_eq!(
            cache.lookup("10.0.0.5"),
            Some("10.0.0.5".parse::<IpAddr>().unwrap())
        );
        let cache = Arc::new(DnsCache::new(Duration::from_secs(3600), true));
        assert_eq!(
            cache.lookup("10.0.0.5"),
            Some("10.0.0.5".parse::<IpAddr>().unwrap())
        );
    }

    #[tokio::test]
    async fn disabled_cache_never_resolves_hostnames() {
        let cache = Arc::new(DnsCache::new(Duration::from_secs(3600), true));
        assert_eq!(cache.lookup("wled.lan"), None);
    }

    #[tokio::test]
    async fn stale_entries_are_served_while_refreshing() {
        let cache = Arc::new(DnsCache::new(Duration::from_secs(10), false));
        let ip: IpAddr = "192.168.1.20".parse().unwrap();
        // Seeded with the refresh gate held so no real lookup is spawned.
        cache.seed("wled.lan", ip, Duration::from_secs(3600));
        assert_eq!(cache.lookup("wled.lan"), Some(ip));
    }

    #[tokio::test]
    async fn unknown_hostname_returns_none_immediately() {
        let cache = Arc::new(DnsCache::new(Duration::from_secs(10), false));
        // First call must not block on the resolver.
        assert_eq!(cache.lookup("definitely-not-cached.lan"), None);
    }
}
