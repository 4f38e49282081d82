use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

/// Rate assumed when the container reports nothing usable.
const FALLBACK_FPS: f64 = 24.0;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
}

/// Average frame rate of the first video stream, via ffprobe.
///
/// Never fails: anything going wrong (missing ffprobe, unparseable
/// output, a `0/0` rate) falls back to 24 fps with a warning, matching
/// the original extractor's behavior.
pub async fn probe_fps(source: &Path) -> f64 {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0"])
        .args(["-show_entries", "stream=avg_frame_rate,r_frame_rate"])
        .args(["-of", "json"])
        .arg(source)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;

    let output = match output {
        Ok(out) if out.status.success() => out,
        Ok(out) => {
            tracing::warn!(source = %source.display(), status = %out.status, "ffprobe failed, assuming {FALLBACK_FPS} fps");
            return FALLBACK_FPS;
        }
        Err(e) => {
            tracing::warn!(source = %source.display(), "cannot run ffprobe, assuming {FALLBACK_FPS} fps: {e}");
            return FALLBACK_FPS;
        }
    };

    let parsed: ProbeOutput = match serde_json::from_slice(&output.stdout) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(source = %source.display(), "unparseable ffprobe output, assuming {FALLBACK_FPS} fps: {e}");
            return FALLBACK_FPS;
        }
    };

    let fps = parsed.streams.first().and_then(|s| {
        s.avg_frame_rate
            .as_deref()
            .and_then(parse_fps_ratio)
            .or_else(|| s.r_frame_rate.as_deref().and_then(parse_fps_ratio))
    });

    match fps {
        Some(fps) => fps,
        None => {
            tracing::warn!(source = %source.display(), "no usable frame rate, assuming {FALLBACK_FPS} fps");
            FALLBACK_FPS
        }
    }
}

/// Parse ffprobe's `num/den` rational (or a plain number). `0/0` and other
/// degenerate values yield `None`.
pub(crate) fn parse_fps_ratio(ratio: &str) -> Option<f64> {
    let ratio = ratio.trim();
    if ratio.is_empty() {
        return None;
    }
    let value = match ratio.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => ratio.parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}
