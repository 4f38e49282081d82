use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Extraction lifecycle of one item.
///
/// `Failed` is sticky: it is never retried automatically and needs a human
/// (or a document edit) to go back to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Completed,
    Failed,
}

/// Display category derived from the server's item type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Movie,
    Serie,
    Video,
}

impl ItemKind {
    /// Map the server's `Type` string onto a display kind, the way the
    /// original daemon did: all series-shaped types collapse to `Serie`,
    /// everything unrecognized is a plain `Video`.
    #[must_use]
    pub fn from_server_type(item_type: &str) -> Self {
        match item_type.to_ascii_lowercase().as_str() {
            "movie" => Self::Movie,
            "episode" | "series" | "season" => Self::Serie,
            _ => Self::Video,
        }
    }
}

/// One catalog document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub library_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub kind: ItemKind,
    pub filepath: String,
    #[serde(default)]
    pub jellyfin_date_created: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub extraction_status: ExtractionStatus,
    #[serde(default)]
    pub extraction_error: Option<String>,
    #[serde(default)]
    pub extraction_attempts: u32,
}

impl CatalogItem {
    /// Date used for queue ordering: the server's library add time when
    /// parseable, else when we first saw the item.
    #[must_use]
    pub fn library_date(&self) -> DateTime<Utc> {
        self.jellyfin_date_created
            .as_deref()
            .and_then(parse_server_date)
            .unwrap_or(self.created_at)
    }

    #[must_use]
    pub fn is_movie(&self) -> bool {
        self.kind == ItemKind::Movie
    }
}

/// Metadata refresh payload from a library scan. Everything the scan does
/// not know about (extraction state, first-seen time) is preserved from
/// the existing document.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub id: String,
    pub library_id: String,
    pub name: String,
    pub item_type: String,
    pub filepath: String,
    pub jellyfin_date_created: Option<String>,
}

/// Parse the server's `DateCreated` leniently: RFC 3339 (any precision) or
/// a bare date.
#[must_use]
pub fn parse_server_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// Ordering applied when draining the extraction queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    #[default]
    NewestFirst,
    OldestFirst,
    Alphabetical,
    MoviesNewestFirst,
}

impl FromStr for QueuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest_first" => Ok(Self::NewestFirst),
            "oldest_first" => Ok(Self::OldestFirst),
            "alphabetical" => Ok(Self::Alphabetical),
            "movies_newest_first" => Ok(Self::MoviesNewestFirst),
            other => Err(format!("unknown queue policy '{other}'")),
        }
    }
}

impl QueuePolicy {
    /// Sort a drained queue in place.
    pub fn order(self, items: &mut [CatalogItem]) {
        match self {
            Self::NewestFirst => {
                items.sort_by_key(|b| std::cmp::Reverse(b.library_date()));
            }
            Self::OldestFirst => {
                items.sort_by_key(CatalogItem::library_date);
            }
            Self::Alphabetical => {
                items.sort_by(|a, b| a.name.cmp(&b.name));
            }
            Self::MoviesNewestFirst => {
                // Movies ahead of everything else, newest first within
                // each group.
                items.sort_by(|a, b| {
                    b.is_movie()
                        .cmp(&a.is_movie())
                        .then_with(|| b.library_date().cmp(&a.library_date()))
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_dates_parse_leniently() {
        assert!(parse_server_date("2024-01-05T10:00:00Z").is_some());
        assert!(parse_server_date("2024-01-05T10:00:00.0000000+00:00").is_some());
        assert!(parse_server_date("2024-01-05").is_some());
        assert!(parse_server_date("yesterday").is_none());
    }

    #[test]
    fn kind_collapses_series_types() {
        assert_eq!(ItemKind::from_server_type("Movie"), ItemKind::Movie);
        assert_eq!(ItemKind::from_server_type("Episode"), ItemKind::Serie);
        assert_eq!(ItemKind::from_server_type("Season"), ItemKind::Serie);
        assert_eq!(ItemKind::from_server_type("Video"), ItemKind::Video);
        assert_eq!(ItemKind::from_server_type("MusicVideo"), ItemKind::Video);
    }

    #[test]
    fn policies_parse_from_config_strings() {
        assert_eq!(
            "movies_newest_first".parse::<QueuePolicy>().unwrap(),
            QueuePolicy::MoviesNewestFirst
        );
        assert!("best_first".parse::<QueuePolicy>().is_err());
    }
}
