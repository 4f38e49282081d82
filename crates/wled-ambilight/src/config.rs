use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ambi_catalog::QueuePolicy;
use ambi_codec::LedFormat;
use ambi_extract::{ExtractOptions, FpsMode};
use ambi_jellyfin::DeviceMatchField;
use ambi_playback::{CatchupMode, PlaybackOptions};
use ambi_sampler::{StripGeometry, TintFilter, DEFAULT_BORDER_FRACTION};
use anyhow::{bail, Context, Result};

use crate::scheduler::TimeWindow;
use crate::targets::TargetMap;

/// Default WLED raw-UDP port, distinct from the device's HTTP/TCP port.
const DEFAULT_WLED_PORT: u16 = 19446;

/// Everything the daemon reads from the environment, parsed once at
/// startup. Any invalid value is fatal here; nothing later in the process
/// should have to second-guess its configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub server_token: String,
    pub data_dir: PathBuf,
    pub geometry: StripGeometry,
    pub physical_led_count: u16,
    pub extraction: ExtractionSettings,
    pub scheduler: SchedulerSettings,
    pub playback: PlaybackSettings,
    pub dns_ttl: Duration,
    pub dns_disable: bool,
    pub targets: TargetMap,
}

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub fps: FpsMode,
    pub fps_min: f64,
    pub fps_max: f64,
    pub border_fraction: f64,
    pub tint: Option<TintFilter>,
}

impl ExtractionSettings {
    #[must_use]
    pub fn options(&self, geometry: StripGeometry) -> ExtractOptions {
        ExtractOptions {
            geometry,
            fps: self.fps,
            fps_min: self.fps_min,
            fps_max: self.fps_max,
            border_fraction: self.border_fraction,
            tint: self.tint,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub scan_interval: Duration,
    pub batch_size: usize,
    pub policy: QueuePolicy,
    pub max_age_days: Option<f64>,
    pub window: Option<TimeWindow>,
}

#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub poll_interval: Duration,
    pub device_match_field: DeviceMatchField,
    pub seek_threshold: f64,
    pub seek_debounce: Duration,
    pub options: PlaybackOptions,
}

impl Config {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Missing required variables and unparseable values are configuration
    /// errors and abort startup.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit variable set (tests use this instead of
    /// mutating the process environment).
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let server_url = required(&vars, "MEDIA_SERVER_URL")?;
        let server_token = required(&vars, "MEDIA_SERVER_TOKEN")?;
        let data_dir = resolve_data_dir(&vars)?;

        let geometry = StripGeometry {
            top: parse_or(&vars, "LEDS_TOP", 89u16)?,
            right: parse_or(&vars, "LEDS_RIGHT", 49u16)?,
            bottom: parse_or(&vars, "LEDS_BOTTOM", 89u16)?,
            left: parse_or(&vars, "LEDS_LEFT", 49u16)?,
            offset: parse_or(&vars, "LED_OFFSET", 46u16)?,
            format: parse_or(&vars, "LED_FORMAT", LedFormat::Rgb)?,
        };
        if geometry.led_count() == 0 {
            bail!("LED geometry adds up to zero LEDs");
        }
        let physical_led_count = parse_or(&vars, "PHYSICAL_LED_COUNT", geometry.led_count())?;

        let tint_enabled = parse_bool_or(&vars, "TINT_ENABLED", false)?;
        let extraction = ExtractionSettings {
            fps: parse_or(&vars, "FPS", FpsMode::Auto)?,
            fps_min: parse_or(&vars, "FPS_MIN", 10.0)?,
            fps_max: parse_or(&vars, "FPS_MAX", 60.0)?,
            border_fraction: parse_or(&vars, "BORDER_FRACTION", DEFAULT_BORDER_FRACTION)?,
            tint: tint_enabled.then_some(TintFilter {
                dark_threshold: parse_or(&vars, "TINT_DARK_THRESHOLD", 0.05f32)?,
                saturation_boost: parse_or(&vars, "TINT_SATURATION_BOOST", 1.3f32)?,
            }),
        };
        if extraction.fps_min > extraction.fps_max {
            bail!(
                "FPS_MIN ({}) exceeds FPS_MAX ({})",
                extraction.fps_min,
                extraction.fps_max
            );
        }

        let max_age_days: f64 = parse_or(&vars, "EXTRACTION_MAX_AGE_DAYS", 0.0)?;
        let scheduler = SchedulerSettings {
            scan_interval: seconds(&vars, "SCAN_INTERVAL_SECONDS", 3600.0)?,
            batch_size: parse_or(&vars, "BATCH_SIZE", 5usize)?,
            policy: parse_or(&vars, "QUEUE_POLICY", QueuePolicy::NewestFirst)?,
            max_age_days: (max_age_days > 0.0).then_some(max_age_days),
            window: TimeWindow::parse(
                vars.get("EXTRACTION_WINDOW_START").map_or("", String::as_str),
                vars.get("EXTRACTION_WINDOW_END").map_or("", String::as_str),
            ),
        };

        let playback = PlaybackSettings {
            poll_interval: seconds(&vars, "POLL_INTERVAL_SECONDS", 0.2)?,
            device_match_field: parse_or(&vars, "DEVICE_MATCH_FIELD", DeviceMatchField::DeviceName)?,
            seek_threshold: parse_or(&vars, "SEEK_THRESHOLD_SECONDS", 1.0)?,
            seek_debounce: seconds(&vars, "SEEK_DEBOUNCE_SECONDS", 1.0)?,
            options: PlaybackOptions {
                sync_lead: parse_or(&vars, "SYNC_LEAD_SECONDS", -0.05)?,
                max_catchup_lag: parse_or(&vars, "MAX_CATCHUP_LAG_SECONDS", 0.1)?,
                catchup_mode: parse_or(&vars, "CATCHUP_MODE", CatchupMode::LastOnly)?,
                max_burst_frames: parse_or(&vars, "MAX_BURST_FRAMES", 10usize)?,
            },
        };

        let default_port = parse_or(&vars, "WLED_PORT", DEFAULT_WLED_PORT)?;
        let targets = TargetMap::from_vars(&vars, default_port);

        Ok(Self {
            server_url,
            server_token,
            data_dir,
            geometry,
            physical_led_count,
            extraction,
            scheduler,
            playback,
            dns_ttl: Duration::from_secs(parse_or(&vars, "DNS_TTL_SECONDS", 3600u64)?),
            dns_disable: parse_bool_or(&vars, "DNS_DISABLE", false)?,
            targets,
        })
    }

    /// Bytes of one datagram for the configured physical strip.
    #[must_use]
    pub fn physical_payload_len(&self) -> usize {
        usize::from(self.physical_led_count) * self.geometry.format.bytes_per_led()
    }

    /// Just the data directory, for read-only commands that do not need a
    /// media server connection.
    pub fn data_dir_from_env() -> Result<PathBuf> {
        resolve_data_dir(&std::env::vars().collect())
    }
}

fn resolve_data_dir(vars: &HashMap<String, String>) -> Result<PathBuf> {
    match vars.get("DATA_DIR").filter(|v| !v.trim().is_empty()) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => Ok(dirs::data_local_dir()
            .context("no local data directory on this platform; set DATA_DIR")?
            .join("wled-ambilight")),
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String> {
    match vars.get(key).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => bail!("{key} must be set"),
    }
}

fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(key).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => v
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key} '{v}': {e}")),
        _ => Ok(default),
    }
}

/// Booleans accept the usual env spellings, not just `true`/`false`.
fn parse_bool_or(vars: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match vars.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if !v.is_empty() => match v.as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => bail!("invalid {key} '{other}': expected true or false"),
        },
        _ => Ok(default),
    }
}

/// A non-negative seconds value turned into a [`Duration`].
fn seconds(vars: &HashMap<String, String>, key: &str, default: f64) -> Result<Duration> {
    let value: f64 = parse_or(vars, key, default)?;
    if !value.is_finite() || value < 0.0 {
        bail!("invalid {key} '{value}': must be a non-negative number of seconds");
    }
    Ok(Duration::from_secs_f64(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> Vec<(String, String)> {
        vec![
            ("MEDIA_SERVER_URL".into(), "http://jellyfin.lan:8096".into()),
            ("MEDIA_SERVER_TOKEN".into(), "secret".into()),
            ("DATA_DIR".into(), "/var/lib/ambilight".into()),
        ]
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = Config::from_vars(base_vars()).unwrap();
        assert_eq!(cfg.geometry.led_count(), 276);
        assert_eq!(cfg.geometry.offset, 46);
        assert_eq!(cfg.physical_led_count, 276);
        assert_eq!(cfg.extraction.fps, FpsMode::Auto);
        assert!(cfg.extraction.tint.is_none());
        assert_eq!(cfg.playback.poll_interval, Duration::from_millis(200));
        assert_eq!(cfg.playback.options.sync_lead, -0.05);
        assert_eq!(cfg.playback.options.catchup_mode, CatchupMode::LastOnly);
        assert_eq!(cfg.scheduler.batch_size, 5);
        assert!(cfg.scheduler.window.is_none());
        assert!(cfg.targets.is_empty());
        assert_eq!(cfg.dns_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn missing_server_settings_are_fatal() {
        let err = Config::from_vars(Vec::new()).unwrap_err();
        assert!(err.to_string().contains("MEDIA_SERVER_URL"));

        let vars = vec![("MEDIA_SERVER_URL".to_string(), "http://x".to_string())];
        let err = Config::from_vars(vars).unwrap_err();
        assert!(err.to_string().contains("MEDIA_SERVER_TOKEN"));
    }

    #[test]
    fn invalid_values_are_fatal_not_defaulted() {
        let mut vars = base_vars();
        vars.push(("LEDS_TOP".into(), "many".into()));
        let err = Config::from_vars(vars).unwrap_err();
        assert!(err.to_string().contains("LEDS_TOP"));

        let mut vars = base_vars();
        vars.push(("CATCHUP_MODE".into(), "firehose".into()));
        assert!(Config::from_vars(vars).is_err());

        let mut vars = base_vars();
        vars.push(("FPS_MIN".into(), "50".into()));
        vars.push(("FPS_MAX".into(), "20".into()));
        assert!(Config::from_vars(vars).is_err());
    }

    #[test]
    fn booleans_accept_env_spellings() {
        let mut vars = base_vars();
        vars.push(("TINT_ENABLED".into(), "1".into()));
        vars.push(("DNS_DISABLE".into(), "YES".into()));
        let cfg = Config::from_vars(vars).unwrap();
        assert!(cfg.extraction.tint.is_some());
        assert!(cfg.dns_disable);

        let mut vars = base_vars();
        vars.push(("POLL_INTERVAL_SECONDS".into(), "-1".into()));
        assert!(Config::from_vars(vars).is_err());
    }

    #[test]
    fn tint_settings_only_matter_when_enabled() {
        let mut vars = base_vars();
        vars.push(("TINT_ENABLED".into(), "true".into()));
        vars.push(("TINT_DARK_THRESHOLD".into(), "0.1".into()));
        let cfg = Config::from_vars(vars).unwrap();
        let tint = cfg.extraction.tint.unwrap();
        assert_eq!(tint.dark_threshold, 0.1);
        assert_eq!(tint.saturation_boost, 1.3);
    }

    #[test]
    fn rgbw_changes_payload_length() {
        let mut vars = base_vars();
        vars.push(("LED_FORMAT".into(), "rgbw".into()));
        vars.push(("PHYSICAL_LED_COUNT".into(), "300".into()));
        let cfg = Config::from_vars(vars).unwrap();
        assert_eq!(cfg.physical_payload_len(), 1200);
    }

    #[test]
    fn target_entries_are_collected() {
        let mut vars = base_vars();
        vars.push(("WLED_TARGET_LIVING_ROOM".into(), "10.0.0.5".into()));
        vars.push(("WLED_TARGET_KITCHEN".into(), "10.0.0.6:21324".into()));
        let cfg = Config::from_vars(vars).unwrap();
        assert_eq!(cfg.targets.len(), 2);
        let ep = cfg.targets.resolve("Living Room TV").unwrap();
        assert_eq!(ep.to_string(), "10.0.0.5:19446");
    }

    #[test]
    fn extraction_window_parses_from_env() {
        let mut vars = base_vars();
        vars.push(("EXTRACTION_WINDOW_START".into(), "22:00".into()));
        vars.push(("EXTRACTION_WINDOW_END".into(), "06:00".into()));
        let cfg = Config::from_vars(vars).unwrap();
        assert!(cfg.scheduler.window.is_some());
    }
}
