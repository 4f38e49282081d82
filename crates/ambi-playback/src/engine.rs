use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use ambi_codec::{secs_to_micros, CodecError, FrameReader};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::sink::FrameSink;

/// What to do when the virtual clock has run ahead of the next frame by
/// more than the configured lag threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatchupMode {
    /// Jump to the newest due frame and emit only that one.
    #[default]
    LastOnly,
    /// Keep emitting in order, capped per tick.
    Burst,
}

impl FromStr for CatchupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last_only" => Ok(Self::LastOnly),
            "burst" => Ok(Self::Burst),
            other => Err(format!("unknown catchup mode '{other}' (expected last_only or burst)")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackOptions {
    /// Signed seconds added to every start/sync position; negative leads
    /// the lights ahead of the video.
    pub sync_lead: f64,
    /// Lag beyond which the catch-up strategy kicks in.
    pub max_catchup_lag: f64,
    pub catchup_mode: CatchupMode,
    /// Per-tick emission cap in [`CatchupMode::Burst`].
    pub max_burst_frames: usize,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            sync_lead: 0.0,
            max_catchup_lag: 0.1,
            catchup_mode: CatchupMode::LastOnly,
            max_burst_frames: 10,
        }
    }
}

/// Command surface of one engine. Object-safe so the orchestrator can be
/// exercised against mock engines.
pub trait EngineControl: Send + Sync {
    /// (Re)anchor and start playing from `position_seconds`.
    /// `source_wall_ts` is when that position was sampled; its age is
    /// added so a stale report still lands on the right frame.
    fn start(&self, position_seconds: f64, source_wall_ts: Option<SystemTime>);
    fn pause(&self);
    fn resume(&self);
    /// Hard re-anchor without restarting the run loop.
    fn sync_to(&self, position_seconds: f64, source_wall_ts: Option<SystemTime>);
    fn stop(&self);
    fn is_running(&self) -> bool;
}

/// Counters exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    pub running: bool,
    pub paused: bool,
    pub current_index: usize,
    pub total_frames: usize,
    pub frames_sent: u64,
    pub read_errors: u64,
}

/// Scheduling state, guarded by one mutex with strictly short critical
/// sections (no i/o, no sleeps while held).
struct Timeline {
    /// Video position at `wall_start` (or the frozen position while
    /// paused), in seconds.
    video_base: f64,
    wall_start: Instant,
    current_index: usize,
    paused: bool,
    /// Bumped by every re-anchor; emission planned under an older
    /// generation is discarded instead of sent.
    generation: u64,
}

struct Shared {
    reader: Mutex<FrameReader>,
    /// Immutable copy of the record timestamps for lock-free planning.
    timestamps: Arc<[u64]>,
    fps: f64,
    sink: Box<dyn FrameSink>,
    opts: PlaybackOptions,
    state: Mutex<Timeline>,
    running: AtomicBool,
    frames_sent: AtomicU64,
    read_errors: AtomicU64,
    last_lag_us: AtomicU64,
}

/// One open binary, one target, one run-loop task.
pub struct PlaybackEngine {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackEngine {
    /// Open the binary and prepare an idle engine.
    ///
    /// # Errors
    ///
    /// A malformed binary refuses to start: the codec error is returned
    /// and no task is spawned.
    pub fn open(path: &Path, sink: Box<dyn FrameSink>, opts: PlaybackOptions) -> Result<Self, CodecError> {
        let reader = FrameReader::open(path)?;
        let timestamps: Arc<[u64]> = (0..reader.len())
            .map(|i| reader.timestamp_us(i).unwrap_or(0))
            .collect();
        let fps = f64::from(reader.header().fps);

        Ok(Self {
            shared: Arc::new(Shared {
                reader: Mutex::new(reader),
                timestamps,
                fps,
                sink,
                opts,
                state: Mutex::new(Timeline {
                    video_base: 0.0,
                    wall_start: Instant::now(),
                    current_index: 0,
                    paused: false,
                    generation: 0,
                }),
                running: AtomicBool::new(false),
                frames_sent: AtomicU64::new(0),
                read_errors: AtomicU64::new(0),
                last_lag_us: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let st = self.shared.state.lock().expect("engine state poisoned");
        EngineStatus {
            running: self.shared.running.load(Ordering::Acquire),
            paused: st.paused,
            current_index: st.current_index,
            total_frames: self.shared.timestamps.len(),
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            read_errors: self.shared.read_errors.load(Ordering::Relaxed),
        }
    }

    fn anchor(&self, position_seconds: f64, source_wall_ts: Option<SystemTime>) {
        let age = source_wall_ts
            .and_then(|ts| SystemTime::now().duration_since(ts).ok())
            .map_or(0.0, |d| d.as_secs_f64());
        let base = (position_seconds + age + self.shared.opts.sync_lead).max(0.0);
        let index = nearest(&self.shared.timestamps, secs_to_micros(base));

        let mut st = self.shared.state.lock().expect("engine state poisoned");
        st.video_base = base;
        st.wall_start = Instant::now();
        st.current_index = index;
        st.generation += 1;
    }

    fn spawn_if_needed(&self) {
        let mut task = self.task.lock().expect("engine task slot poisoned");
        let alive = task.as_ref().is_some_and(|t| !t.is_finished());
        if !alive {
            let shared = Arc::clone(&self.shared);
            *task = Some(tokio::spawn(run_loop(shared)));
        }
    }
}

impl EngineControl for PlaybackEngine {
    fn start(&self, position_seconds: f64, source_wall_ts: Option<SystemTime>) {
        self.anchor(position_seconds, source_wall_ts);
        {
            let mut st = self.shared.state.lock().expect("engine state poisoned");
            st.paused = false;
        }
        self.shared.running.store(true, Ordering::Release);
        self.spawn_if_needed();
        tracing::debug!(position_seconds, "playback started");
    }

    fn pause(&self) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        let mut st = self.shared.state.lock().expect("engine state poisoned");
        if st.paused {
            return;
        }
        // Freeze the virtual clock at its current value.
        st.video_base += st.wall_start.elapsed().as_secs_f64();
        st.paused = true;
        tracing::debug!(position = st.video_base, "playback paused");
    }

    fn resume(&self) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        let mut st = self.shared.state.lock().expect("engine state poisoned");
        if !st.paused {
            return;
        }
        st.wall_start = Instant::now();
        st.paused = false;
        tracing::debug!(position = st.video_base, "playback resumed");
    }

    fn sync_to(&self, position_seconds: f64, source_wall_ts: Option<SystemTime>) {
        self.anchor(position_seconds, source_wall_ts);
        tracing::debug!(position_seconds, "playback re-synced");
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        tracing::debug!("playback stopping");
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        // A discarded engine must not leave its run loop spinning.
        self.shared.running.store(false, Ordering::Release);
    }
}

/// The frames one tick decided to emit, tied to the generation the plan
/// was made under.
struct EmissionPlan {
    indices: Vec<usize>,
    generation: u64,
}

fn run_loop(shared: Arc<Shared>) -> impl std::future::Future<Output = ()> {
    async move {
        let tick = Duration::from_secs_f64(1.0 / shared.fps.max(20.0));
        let heartbeat_every = (1.0 / tick.as_secs_f64()).round() as u64;
        let mut ticks = 0u64;

        loop {
            if !shared.running.load(Ordering::Acquire) {
                break;
            }

            let plan = {
                let mut st = shared.state.lock().expect("engine state poisoned");
                if st.paused {
                    None
                } else {
                    let virtual_us = secs_to_micros(
                        st.video_base + st.wall_start.elapsed().as_secs_f64(),
                    );
                    Some(plan_emission(&mut st, virtual_us, &shared))
                }
            };

            if let Some(plan) = plan {
                emit(&shared, &plan);
            }

            ticks += 1;
            if heartbeat_every > 0 && ticks % heartbeat_every == 0 {
                let st = shared.state.lock().expect("engine state poisoned");
                tracing::trace!(
                    index = st.current_index,
                    total = shared.timestamps.len(),
                    paused = st.paused,
                    lag_us = shared.last_lag_us.load(Ordering::Relaxed),
                    "engine heartbeat"
                );
            }

            tokio::time::sleep(tick).await;
        }
        tracing::debug!("engine run loop exited");
    }
}

/// Pick the frames due at `virtual_us` and advance the cursor.
fn plan_emission(st: &mut Timeline, virtual_us: u64, shared: &Shared) -> EmissionPlan {
    let timestamps = &shared.timestamps;
    let opts = &shared.opts;
    let max_lag_us = secs_to_micros(opts.max_catchup_lag);

    let lag_us = timestamps
        .get(st.current_index)
        .map_or(0, |&ts| virtual_us.saturating_sub(ts));
    shared.last_lag_us.store(lag_us, Ordering::Relaxed);

    let mut indices = Vec::new();
    if lag_us > max_lag_us && opts.catchup_mode == CatchupMode::LastOnly {
        // Way behind: drop everything up to the newest due frame and show
        // only that one.
        let target = nearest(timestamps, virtual_us);
        if target >= st.current_index {
            indices.push(target);
            st.current_index = target + 1;
        }
    } else {
        let cap = match opts.catchup_mode {
            CatchupMode::Burst => opts.max_burst_frames,
            CatchupMode::LastOnly => usize::MAX,
        };
        while st.current_index < timestamps.len()
            && timestamps[st.current_index] <= virtual_us
            && indices.len() < cap
        {
            indices.push(st.current_index);
            st.current_index += 1;
        }
    }

    EmissionPlan {
        indices,
        generation: st.generation,
    }
}

/// Read and send the planned frames, outside any lock held across i/o.
/// A re-anchor during emission invalidates the rest of the plan.
fn emit(shared: &Shared, plan: &EmissionPlan) {
    for &index in &plan.indices {
        let payload = {
            let mut reader = shared.reader.lock().expect("engine reader poisoned");
            reader.read_payload(index)
        };
        match payload {
            Ok(payload) => {
                let stale = {
                    let st = shared.state.lock().expect("engine state poisoned");
                    st.generation != plan.generation
                };
                if stale {
                    break;
                }
                shared.sink.send(&payload);
                shared.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                shared.read_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(index, "skipping unreadable frame: {e}");
            }
        }
    }
}

/// Greatest timestamp ≤ `t_us`; 0 when `t_us` precedes everything;
/// duplicate timestamps tie-break to the lowest index. Mirrors the codec
/// reader's rule over the engine's immutable timestamp copy.
fn nearest(timestamps: &[u64], t_us: u64) -> usize {
    let upper = timestamps.partition_point(|&ts| ts <= t_us);
    if upper == 0 {
        return 0;
    }
    let ts = timestamps[upper - 1];
    timestamps.partition_point(|&e| e < ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambi_codec::{FrameWriter, Header, LedFormat};
    use std::sync::Mutex as StdMutex;

    /// Records every payload with the (mock) instant it was sent at.
    struct RecordingSink {
        sent: StdMutex<Vec<(Instant, Vec<u8>)>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn frames(&self) -> Vec<(Instant, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }

        fn indices(&self) -> Vec<usize> {
            self.frames().iter().map(|(_, p)| usize::from(p[0])).collect()
        }
    }

    impl FrameSink for Arc<RecordingSink> {
        fn send(&self, payload: &[u8]) {
            self.sent
                .lock()
                .unwrap()
                .push((Instant::now(), payload.to_vec()));
        }
    }

    /// 20 fps binary with `frames` records; payload byte pattern encodes
    /// the frame index.
    fn build_binary(dir: &Path, frames: usize, leds: u16) -> std::path::PathBuf {
        let path = dir.join("test.bin");
        let header = Header::new(20.0, leds, LedFormat::Rgb, 0);
        let mut w = FrameWriter::create(&path, header, false).unwrap();
        for i in 0..frames {
            let payload = vec![(i % 256) as u8; usize::from(leds) * 3];
            w.write_frame(i as u64 * 50_000, &payload).unwrap();
        }
        w.finish().unwrap();
        path
    }

    fn engine_with(
        dir: &Path,
        frames: usize,
        leds: u16,
        opts: PlaybackOptions,
    ) -> (PlaybackEngine, Arc<RecordingSink>) {
        let path = build_binary(dir, frames, leds);
        let sink = RecordingSink::new();
        let engine = PlaybackEngine::open(&path, Box::new(Arc::clone(&sink)), opts).unwrap();
        (engine, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn one_second_of_playback_emits_about_twenty_frames() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, sink) = engine_with(dir.path(), 200, 276, PlaybackOptions::default());

        engine.start(0.0, None);
        tokio::time::sleep(Duration::from_secs(1)).await;
        engine.stop();

        let frames = sink.frames();
        assert!(
            (19..=21).contains(&frames.len()),
            "got {} datagrams",
            frames.len()
        );
        for (_, payload) in &frames {
            assert_eq!(payload.len(), 276 * 3);
        }
        let indices = sink.indices();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
        // No frame with a timestamp beyond the elapsed second.
        assert!(indices.iter().all(|&i| i <= 21));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_and_resume_does_not_burst() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, sink) = engine_with(dir.path(), 200, 2, PlaybackOptions::default());

        engine.start(0.0, None);
        tokio::time::sleep(Duration::from_millis(500)).await;
        engine.pause();
        let pause_at = Instant::now();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        engine.resume();
        let resume_at = Instant::now();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        engine.stop();

        let frames = sink.frames();
        // 0.5s + 1.0s of virtual playback at 20 fps.
        assert!(
            (28..=32).contains(&frames.len()),
            "got {} datagrams",
            frames.len()
        );
        // Nothing while paused.
        let paused_sends = frames
            .iter()
            .filter(|(at, _)| *at > pause_at && *at < resume_at)
            .count();
        assert_eq!(paused_sends, 0);
        // No make-up burst: the last frame is the one due at ~1.5s of
        // virtual time.
        let indices = sink.indices();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
        let last = *indices.last().unwrap();
        assert!((28..=31).contains(&last), "last index {last}");
    }

    #[tokio::test(start_paused = true)]
    async fn seek_backward_restarts_at_the_nearest_earlier_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, sink) = engine_with(dir.path(), 200, 2, PlaybackOptions::default());

        engine.start(5.0, None);
        tokio::time::sleep(Duration::from_millis(500)).await;
        engine.sync_to(1.0, None);
        tokio::time::sleep(Duration::from_millis(300)).await;
        engine.stop();

        let indices = sink.indices();
        let drop_at = indices
            .windows(2)
            .position(|w| w[1] < w[0])
            .expect("no backward jump recorded");
        let (before, after) = indices.split_at(drop_at + 1);

        // First segment: 5.0s onward.
        assert_eq!(before[0], 100);
        assert!(before.windows(2).all(|w| w[1] == w[0] + 1));
        assert!(*before.last().unwrap() <= 111);
        // Second segment restarts at the frame for 1.0s.
        assert_eq!(after[0], 20);
        assert!(after.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_to_lands_on_greatest_timestamp_not_after_target() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, sink) = engine_with(dir.path(), 200, 2, PlaybackOptions::default());

        engine.start(0.0, None);
        engine.sync_to(1.33, None);
        tokio::time::sleep(Duration::from_millis(60)).await;
        engine.stop();

        // 1.33s falls between frames 26 (1.30s) and 27 (1.35s).
        assert_eq!(sink.indices().first(), Some(&26));
    }

    #[tokio::test(start_paused = true)]
    async fn large_lag_in_last_only_mode_skips_instead_of_flooding() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, sink) = engine_with(dir.path(), 200, 2, PlaybackOptions::default());

        engine.start(0.0, None);
        // Jump the clock 5 s ahead without letting ticks run in between.
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        engine.stop();

        let indices = sink.indices();
        assert!(indices.len() <= 2, "flooded: {indices:?}");
        assert_eq!(indices.last(), Some(&100));
        assert!(!indices.contains(&50));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_mode_caps_emission_per_tick() {
        let dir = tempfile::tempdir().unwrap();
        let opts = PlaybackOptions {
            catchup_mode: CatchupMode::Burst,
            max_burst_frames: 10,
            ..PlaybackOptions::default()
        };
        let (engine, sink) = engine_with(dir.path(), 200, 2, opts);

        engine.start(0.0, None);
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        engine.stop();

        let frames = sink.frames();
        assert!(!frames.is_empty());
        // Group sends by the instant they happened at: no tick may exceed
        // the cap.
        let mut batch = 0usize;
        let mut batch_at = frames[0].0;
        for (at, _) in &frames {
            if *at == batch_at {
                batch += 1;
            } else {
                assert!(batch <= 10, "burst of {batch} frames in one tick");
                batch_at = *at;
                batch = 1;
            }
        }
        assert!(batch <= 10);
        // In-order, no skips.
        let indices = sink.indices();
        assert!(indices.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_observed_within_a_tick() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, sink) = engine_with(dir.path(), 200, 2, PlaybackOptions::default());

        engine.start(0.0, None);
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.stop();
        let at_stop = sink.frames().len();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!engine.is_running());
        let after = sink.frames().len();
        assert!(after <= at_stop + 1, "kept emitting after stop");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_binary_idles_without_emitting() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, sink) = engine_with(dir.path(), 0, 2, PlaybackOptions::default());

        engine.start(0.0, None);
        tokio::time::sleep(Duration::from_secs(1)).await;
        engine.stop();
        assert!(sink.frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _sink) = engine_with(dir.path(), 200, 2, PlaybackOptions::default());

        assert!(!engine.is_running());
        engine.start(0.0, None);
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = engine.status();
        assert!(status.running);
        assert!(!status.paused);
        assert_eq!(status.total_frames, 200);
        assert!(status.frames_sent >= 9);
        engine.stop();
    }

    #[test]
    fn nearest_matches_the_codec_tie_rule() {
        let ts = [0u64, 100, 100, 200];
        assert_eq!(nearest(&ts, 0), 0);
        assert_eq!(nearest(&ts, 99), 0);
        assert_eq!(nearest(&ts, 100), 1);
        assert_eq!(nearest(&ts, 150), 1);
        assert_eq!(nearest(&ts, 500), 3);
        assert_eq!(nearest(&[], 5), 0);
    }

    #[test]
    fn catchup_mode_parses() {
        assert_eq!("last_only".parse::<CatchupMode>().unwrap(), CatchupMode::LastOnly);
        assert_eq!("BURST".parse::<CatchupMode>().unwrap(), CatchupMode::Burst);
        assert!("firehose".parse::<CatchupMode>().is_err());
    }
}
