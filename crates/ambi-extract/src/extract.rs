use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Instant;

use ambi_codec::{CodecError, FrameWriter, Header};
use ambi_sampler::{BorderSampler, SamplerError, StripGeometry, TintFilter};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::probe::probe_fps;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Sampler(#[from] SamplerError),

    #[error("decoder error: {0}")]
    Decoder(String),
}

/// Target frame rate selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FpsMode {
    /// Probe the source's own rate.
    Auto,
    Fixed(f64),
}

impl FromStr for FpsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        match s.parse::<f64>() {
            Ok(v) if v.is_finite() && v > 0.0 => Ok(Self::Fixed(v)),
            _ => Err(format!("FPS must be a positive number or 'auto', got '{s}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub geometry: StripGeometry,
    pub fps: FpsMode,
    pub fps_min: f64,
    pub fps_max: f64,
    pub border_fraction: f64,
    pub tint: Option<TintFilter>,
}

impl ExtractOptions {
    /// The rate the decoder will be asked for, after probing and clamping.
    async fn choose_fps(&self, source: &Path) -> f64 {
        let raw = match self.fps {
            FpsMode::Fixed(fps) => fps,
            FpsMode::Auto => probe_fps(source).await,
        };
        raw.clamp(self.fps_min, self.fps_max)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractReport {
    pub frames: u64,
    pub fps: f64,
}

/// Extract one video into `output`.
///
/// The binary is written to `<output>.tmp` and renamed into place only on
/// success, so a crash or kill mid-extraction never leaves a plausible
/// looking `.bin` behind.
///
/// # Errors
///
/// Decoder spawn/read failures and a non-zero ffmpeg exit are
/// [`ExtractError::Decoder`]; disk problems surface as i/o or codec
/// errors. The temp file is removed on any failure.
pub async fn extract_item(
    source: &Path,
    output: &Path,
    opts: &ExtractOptions,
) -> Result<ExtractReport, ExtractError> {
    let started = Instant::now();
    let fps = opts.choose_fps(source).await;
    let width = opts.geometry.frame_width();
    let height = opts.geometry.frame_height();

    tracing::info!(
        source = %source.display(),
        fps,
        width,
        height,
        leds = opts.geometry.led_count(),
        "starting extraction"
    );

    let mut child = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(source)
        .args(["-vf", &format!("fps={fps},scale={width}:{height}")])
        .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExtractError::Decoder(format!("cannot spawn ffmpeg: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExtractError::Decoder("ffmpeg stdout not captured".into()))?;

    let sampler = BorderSampler::new(
        opts.geometry,
        width,
        height,
        opts.border_fraction,
        opts.tint,
    );
    let header = Header::new(
        fps as f32,
        opts.geometry.led_count(),
        opts.geometry.format,
        opts.geometry.offset,
    );

    let tmp = output.with_extension("bin.tmp");
    let mut writer = FrameWriter::create(&tmp, header, true)?;

    let result = extract_stream(stdout, &sampler, &mut writer, fps, width, height).await;
    let frames = match result {
        Ok(frames) => frames,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
    };

    let status = child
        .wait()
        .await
        .map_err(|e| ExtractError::Decoder(format!("waiting for ffmpeg: {e}")))?;
    if !status.success() {
        let _ = std::fs::remove_file(&tmp);
        return Err(ExtractError::Decoder(format!("ffmpeg exited with {status}")));
    }

    if let Err(e) = writer.finish() {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    std::fs::rename(&tmp, output)?;

    tracing::info!(
        output = %output.display(),
        frames,
        fps,
        elapsed_s = started.elapsed().as_secs_f64(),
        "extraction complete"
    );
    Ok(ExtractReport { frames, fps })
}

/// Consume a raw RGB24 stream frame by frame, writing one record each.
///
/// Generic over the reader so tests can feed synthetic streams. A partial
/// trailing frame is discarded and ends the stream cleanly; a read error
/// is a decoder error.
async fn extract_stream<R: AsyncRead + Unpin>(
    mut reader: R,
    sampler: &BorderSampler,
    writer: &mut FrameWriter,
    fps: f64,
    width: u32,
    height: u32,
) -> Result<u64, ExtractError> {
    let frame_size = width as usize * height as usize * 3;
    let mut buf = vec![0u8; frame_size];
    let mut frames = 0u64;

    'stream: loop {
        let mut filled = 0;
        while filled < frame_size {
            let n = reader
                .read(&mut buf[filled..])
                .await
                .map_err(|e| ExtractError::Decoder(format!("reading frame {frames}: {e}")))?;
            if n == 0 {
                if filled > 0 {
                    tracing::debug!(frames, filled, "discarding partial trailing frame");
                }
                break 'stream;
            }
            filled += n;
        }

        let ts_us = (frames as f64 * 1_000_000.0 / fps).round() as u64;
        let payload = sampler.sample(&buf)?;
        writer.write_frame(ts_us, &payload)?;

        frames += 1;
        if frames % 200 == 0 {
            tracing::debug!(frames, "extraction progress");
        }
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambi_codec::{FrameReader, LedFormat};

    fn options(format: LedFormat) -> ExtractOptions {
        ExtractOptions {
            geometry: StripGeometry {
                top: 1,
                right: 0,
                bottom: 0,
                left: 0,
                offset: 0,
                format,
            },
            fps: FpsMode::Fixed(20.0),
            fps_min: 10.0,
            fps_max: 60.0,
            border_fraction: 0.05,
            tint: None,
        }
    }

    async fn run_stream(opts: &ExtractOptions, fps: f64, stream: &[u8]) -> (tempfile::TempDir, std::path::PathBuf, u64) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let width = opts.geometry.frame_width();
        let height = opts.geometry.frame_height();
        let sampler = BorderSampler::new(opts.geometry, width, height, opts.border_fraction, opts.tint);
        let header = Header::new(
            fps as f32,
            opts.geometry.led_count(),
            opts.geometry.format,
            opts.geometry.offset,
        );
        let mut writer = FrameWriter::create(&path, header, false).unwrap();
        let frames = extract_stream(stream, &sampler, &mut writer, fps, width, height)
            .await
            .unwrap();
        writer.finish().unwrap();
        (dir, path, frames)
    }

    #[tokio::test]
    async fn synthetic_stream_produces_one_record_per_frame() {
        let opts = options(LedFormat::Rgb);
        // Five 1x1 frames of solid red at 20 fps.
        let stream: Vec<u8> = [255u8, 0, 0].repeat(5);
        let (_dir, path, frames) = run_stream(&opts, 20.0, &stream).await;
        assert_eq!(frames, 5);

        let mut r = FrameReader::open(&path).unwrap();
        assert_eq!(r.len(), 5);
        for i in 0..5 {
            assert_eq!(r.timestamp_us(i), Some(i as u64 * 50_000));
            assert_eq!(r.read_payload(i).unwrap(), vec![255, 0, 0]);
        }
    }

    #[tokio::test]
    async fn fractional_rates_round_timestamps() {
        let opts = options(LedFormat::Rgb);
        let stream: Vec<u8> = [0u8, 0, 0].repeat(3);
        let (_dir, path, _) = run_stream(&opts, 23.976, &stream).await;
        let r = FrameReader::open(&path).unwrap();
        assert_eq!(r.timestamp_us(0), Some(0));
        assert_eq!(r.timestamp_us(1), Some(41_708));
        assert_eq!(r.timestamp_us(2), Some(83_417));
    }

    #[tokio::test]
    async fn partial_trailing_frame_is_discarded() {
        let opts = options(LedFormat::Rgb);
        let mut stream: Vec<u8> = [10u8, 20, 30].repeat(2);
        stream.push(99); // one stray byte
        let (_dir, path, frames) = run_stream(&opts, 20.0, &stream).await;
        assert_eq!(frames, 2);
        let r = FrameReader::open(&path).unwrap();
        assert_eq!(r.len(), 2);
    }

    #[tokio::test]
    async fn rgbw_projection_reaches_the_record() {
        let opts = options(LedFormat::Rgbw);
        let stream = [200u8, 180, 160];
        let (_dir, path, frames) = run_stream(&opts, 20.0, &stream).await;
        assert_eq!(frames, 1);
        let mut r = FrameReader::open(&path).unwrap();
        assert_eq!(r.read_payload(0).unwrap(), vec![40, 20, 0, 160]);
    }

    #[test]
    fn fps_mode_parses_numbers_and_auto() {
        assert_eq!("auto".parse::<FpsMode>().unwrap(), FpsMode::Auto);
        assert_eq!("AUTO".parse::<FpsMode>().unwrap(), FpsMode::Auto);
        assert_eq!("20".parse::<FpsMode>().unwrap(), FpsMode::Fixed(20.0));
        assert!("".parse::<FpsMode>().is_err());
        assert!("-5".parse::<FpsMode>().is_err());
    }

    #[tokio::test]
    async fn fixed_rates_are_clamped() {
        let mut opts = options(LedFormat::Rgb);
        opts.fps = FpsMode::Fixed(500.0);
        assert_eq!(opts.choose_fps(Path::new("/nonexistent")).await, 60.0);
        opts.fps = FpsMode::Fixed(1.0);
        assert_eq!(opts.choose_fps(Path::new("/nonexistent")).await, 10.0);
    }
}
