use std::collections::HashMap;

use ambi_net::Endpoint;

/// Env var prefix for device → WLED mapping entries:
/// `WLED_TARGET_<IDENT>=host[:port]`.
const TARGET_PREFIX: &str = "WLED_TARGET_";

/// Fold a device attribute or mapping identifier into the comparable
/// form: lowercase, alphanumerics only.
#[must_use]
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// The configured device → endpoint map, matched against a normalized
/// session attribute.
#[derive(Debug, Clone, Default)]
pub struct TargetMap {
    /// (normalized identifier, endpoint), sorted by identifier so lookup
    /// order is deterministic.
    entries: Vec<(String, Endpoint)>,
}

impl TargetMap {
    /// Collect `WLED_TARGET_*` entries from a variable set. Unparseable
    /// entries are logged and dropped rather than aborting startup.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>, default_port: u16) -> Self {
        let mut entries = Vec::new();
        for (key, value) in vars {
            let Some(raw_ident) = key.strip_prefix(TARGET_PREFIX) else {
                continue;
            };
            let ident = normalize(raw_ident);
            if ident.is_empty() {
                tracing::warn!(key, "ignoring target with empty identifier");
                continue;
            }
            match Endpoint::parse(value, default_port) {
                Some(endpoint) => entries.push((ident, endpoint)),
                None => {
                    tracing::warn!(key, value, "ignoring unparseable target endpoint");
                }
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Resolve a session's device attribute to an endpoint.
    ///
    /// Exact normalized match wins; otherwise containment in either
    /// direction ("livingroomtv" matches ident "livingroom", and a short
    /// device value may sit inside a longer ident).
    #[must_use]
    pub fn resolve(&self, device_value: &str) -> Option<&Endpoint> {
        let device = normalize(device_value);
        if device.is_empty() {
            return None;
        }
        if let Some((_, ep)) = self.entries.iter().find(|(ident, _)| *ident == device) {
            return Some(ep);
        }
        self.entries
            .iter()
            .find(|(ident, _)| device.contains(ident.as_str()) || ident.contains(device.as_str()))
            .map(|(_, ep)| ep)
    }

    /// `(identifier, endpoint)` pairs for the startup configuration log.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Endpoint)> {
        self.entries.iter().map(|(i, e)| (i.as_str(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> TargetMap {
        let vars: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (format!("{TARGET_PREFIX}{k}"), (*v).to_string()))
            .collect();
        TargetMap::from_vars(&vars, 19446)
    }

    #[test]
    fn normalization_strips_everything_but_alphanumerics() {
        assert_eq!(normalize("Living Room TV"), "livingroomtv");
        assert_eq!(normalize("living-room"), "livingroom");
        assert_eq!(normalize("  WLED_01! "), "wled01");
        assert_eq!(normalize("---"), "");
    }

    #[test]
    fn device_name_containing_ident_matches() {
        let targets = map(&[("LIVING_ROOM", "10.0.0.5:19446")]);
        let ep = targets.resolve("Living Room TV").unwrap();
        assert_eq!(ep.to_string(), "10.0.0.5:19446");
    }

    #[test]
    fn unmatched_device_resolves_to_nothing() {
        let targets = map(&[("LIVING_ROOM", "10.0.0.5:19446")]);
        assert_eq!(targets.resolve("Kitchen"), None);
        assert_eq!(targets.resolve(""), None);
    }

    #[test]
    fn exact_match_beats_containment() {
        let targets = map(&[("TV", "10.0.0.2"), ("TVBEDROOM", "10.0.0.3")]);
        assert_eq!(targets.resolve("tv").unwrap().host, "10.0.0.2");
        // Containment still works for the longer name.
        assert_eq!(targets.resolve("TV Bedroom").unwrap().host, "10.0.0.3");
    }

    #[test]
    fn ident_containing_device_value_matches_too() {
        let targets = map(&[("LIVINGROOMTV", "10.0.0.7")]);
        assert_eq!(targets.resolve("livingroom").unwrap().host, "10.0.0.7");
    }

    #[test]
    fn ports_default_and_override() {
        let targets = map(&[("A", "10.0.0.1"), ("B", "10.0.0.2:21324")]);
        assert_eq!(targets.resolve("a").unwrap().port, 19446);
        assert_eq!(targets.resolve("b").unwrap().port, 21324);
    }

    #[test]
    fn broken_entries_are_dropped() {
        let targets = map(&[("GOOD", "10.0.0.1"), ("BAD", ":::"), ("", "10.0.0.9")]);
        assert_eq!(targets.len(), 1);
    }
}
