use std::fmt;

/// A WLED UDP target: host (name or IP literal) and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse `host[:port]`, falling back to `default_port`.
    ///
    /// Returns `None` for an empty host or an unparseable port — a broken
    /// mapping entry is skipped, not guessed at.
    #[must_use]
    pub fn parse(raw: &str, default_port: u16) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.rsplit_once(':') {
            Some((host, port)) => {
                let host = host.trim();
                if host.is_empty() {
                    return None;
                }
                let port = port.trim().parse().ok()?;
                Some(Self {
                    host: host.to_string(),
                    port,
                })
            }
            None => Some(Self {
                host: raw.to_string(),
                port: default_port,
            }),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
