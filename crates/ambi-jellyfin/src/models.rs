use std::str::FromStr;

use serde::Deserialize;

/// `NowPlayingItem.Type` values that count as video playback.
pub const VIDEO_ITEM_TYPES: [&str; 3] = ["Movie", "Episode", "Video"];

/// Jellyfin reports positions in 100-nanosecond ticks.
const TICKS_PER_SECOND: f64 = 10_000_000.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A library ("view") as returned by `/Users/{id}/Views`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Library {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Envelope used by list endpoints: `{"Items": [...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaSource {
    #[serde(default)]
    pub path: Option<String>,
}

/// A catalogued video as returned by `/Users/{id}/Items`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "Type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub media_sources: Vec<MediaSource>,
    #[serde(default)]
    pub date_created: Option<String>,
}

impl MediaItem {
    /// Source file path: `Path`, falling back to the first media source.
    #[must_use]
    pub fn filepath(&self) -> Option<&str> {
        self.path
            .as_deref()
            .filter(|p| !p.is_empty())
            .or_else(|| self.media_sources.first().and_then(|s| s.path.as_deref()))
            .filter(|p| !p.is_empty() && *p != "Unknown")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NowPlayingItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "Type", default)]
    pub item_type: Option<String>,
}

impl NowPlayingItem {
    #[must_use]
    pub fn is_video(&self) -> bool {
        self.item_type
            .as_deref()
            .is_some_and(|t| VIDEO_ITEM_TYPES.contains(&t))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayState {
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub position_ticks: Option<i64>,
}

/// One entry of `/Sessions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub now_playing_item: Option<NowPlayingItem>,
    #[serde(default)]
    pub play_state: Option<PlayState>,
}

impl Session {
    /// Is a video item playing (or paused) in this session?
    #[must_use]
    pub fn is_video(&self) -> bool {
        self.now_playing_item
            .as_ref()
            .is_some_and(NowPlayingItem::is_video)
    }

    /// Current position in seconds (0 when the server omits it).
    #[must_use]
    pub fn position_seconds(&self) -> f64 {
        let ticks = self
            .play_state
            .as_ref()
            .and_then(|s| s.position_ticks)
            .unwrap_or(0)
            .max(0);
        ticks as f64 / TICKS_PER_SECOND
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.play_state.as_ref().is_some_and(|s| s.is_paused)
    }

    /// The session attribute used to match device → WLED mappings.
    #[must_use]
    pub fn match_value(&self, field: DeviceMatchField) -> Option<&str> {
        let value = match field {
            DeviceMatchField::DeviceName => self.device_name.as_deref(),
            DeviceMatchField::Client => self.client.as_deref(),
            DeviceMatchField::DeviceId => self.device_id.as_deref(),
        };
        // Always fall back to the device name, like the original daemon.
        value.or(self.device_name.as_deref())
    }
}

/// Which session attribute the target map matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceMatchField {
    #[default]
    DeviceName,
    Client,
    DeviceId,
}

impl FromStr for DeviceMatchField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "DeviceName" => Ok(Self::DeviceName),
            "Client" => Ok(Self::Client),
            "DeviceId" => Ok(Self::DeviceId),
            other => Err(format!(
                "unknown device match field '{other}' (expected DeviceName, Client or DeviceId)"
            )),
        }
    }
}
