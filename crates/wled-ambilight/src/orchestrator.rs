use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ambi_catalog::Catalog;
use ambi_jellyfin::{DeviceMatchField, Session, SessionSource};
use ambi_net::{Endpoint, UdpSender};
use ambi_playback::{EngineControl, PlaybackEngine, PlaybackOptions, UdpFrameSink};
use anyhow::Result;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::PlaybackSettings;
use crate::targets::TargetMap;

/// Builds engines for sessions. Production wires a UDP sink to the shared
/// socket; orchestrator tests substitute command-recording mocks.
pub trait EngineFactory: Send + Sync {
    /// # Errors
    ///
    /// Fails when the binary cannot be opened (malformed file, i/o).
    fn create(&self, binary: &Path, endpoint: &Endpoint) -> Result<Box<dyn EngineControl>>;
}

pub struct UdpEngineFactory {
    sender: Arc<UdpSender>,
    physical_len: usize,
    options: PlaybackOptions,
}

impl UdpEngineFactory {
    #[must_use]
    pub fn new(sender: Arc<UdpSender>, physical_len: usize, options: PlaybackOptions) -> Self {
        Self {
            sender,
            physical_len,
            options,
        }
    }
}

impl EngineFactory for UdpEngineFactory {
    fn create(&self, binary: &Path, endpoint: &Endpoint) -> Result<Box<dyn EngineControl>> {
        let sink = UdpFrameSink::new(
            Arc::clone(&self.sender),
            endpoint.clone(),
            self.physical_len,
        );
        let engine = PlaybackEngine::open(binary, Box::new(sink), self.options)?;
        Ok(Box::new(engine))
    }
}

/// What we remember about one server session between polls.
struct SessionTrack {
    item_id: String,
    is_playing: bool,
    last_position: f64,
    last_seek: Option<Instant>,
    engine: Box<dyn EngineControl>,
}

/// Polls the media server and mirrors each video session's play state onto
/// one playback engine.
pub struct Orchestrator {
    source: Arc<dyn SessionSource>,
    factory: Box<dyn EngineFactory>,
    catalog: Catalog,
    targets: TargetMap,
    match_field: DeviceMatchField,
    seek_threshold: f64,
    seek_debounce: Duration,
    sessions: HashMap<String, SessionTrack>,
    /// Device values we already complained about (once each).
    unmapped_logged: HashSet<String>,
    /// Item ids we already reported as lacking a binary.
    missing_binary_logged: HashSet<String>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        source: Arc<dyn SessionSource>,
        factory: Box<dyn EngineFactory>,
        catalog: Catalog,
        targets: TargetMap,
        settings: &PlaybackSettings,
    ) -> Self {
        Self {
            source,
            factory,
            catalog,
            targets,
            match_field: settings.device_match_field,
            seek_threshold: settings.seek_threshold,
            seek_debounce: settings.seek_debounce,
            sessions: HashMap::new(),
            unmapped_logged: HashSet::new(),
            missing_binary_logged: HashSet::new(),
        }
    }

    /// Poll until shutdown, then stop every engine.
    pub async fn run(&mut self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_ms = poll_interval.as_millis(),
            targets = self.targets.len(),
            "session orchestrator started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;
            tokio::select! {
                () = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        self.stop_all();
        tracing::info!("session orchestrator stopped");
    }

    /// One reconciliation pass. Never blocks on an engine and swallows
    /// every per-session error.
    pub async fn tick(&mut self) {
        let sessions = match self.source.video_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!("session poll failed, retrying next tick: {e}");
                return;
            }
        };

        let mut seen: HashSet<String> = HashSet::with_capacity(sessions.len());
        for session in &sessions {
            seen.insert(session.id.clone());
            self.reconcile(session);
        }

        // Sessions that vanished between polls take their engines along.
        let gone: Vec<String> = self
            .sessions
            .keys()
            .filter(|sid| !seen.contains(*sid))
            .cloned()
            .collect();
        for sid in gone {
            tracing::info!(session_id = %sid, "session gone, stopping playback");
            self.remove_session(&sid);
        }
    }

    /// Stop and forget every engine (shutdown, or no sessions remain).
    pub fn stop_all(&mut self) {
        for (sid, track) in self.sessions.drain() {
            tracing::info!(session_id = %sid, "stopping playback");
            track.engine.stop();
        }
    }

    fn remove_session(&mut self, session_id: &str) {
        if let Some(track) = self.sessions.remove(session_id) {
            track.engine.stop();
        }
    }

    fn reconcile(&mut self, session: &Session) {
        // The source only hands us video sessions, but stay defensive
        // about the shape.
        let Some(item) = &session.now_playing_item else {
            self.remove_session(&session.id);
            return;
        };
        let item_id = item.id.clone();
        let item_name = item.name.as_deref().unwrap_or("Unknown");

        // Target mapping first: without one this session never lights
        // anything.
        let device_value = session
            .match_value(self.match_field)
            .unwrap_or_default()
            .to_string();
        let Some(endpoint) = self.targets.resolve(&device_value).cloned() else {
            if self.unmapped_logged.insert(device_value.clone()) {
                tracing::info!("no mapping for '{device_value}'");
            }
            self.remove_session(&session.id);
            return;
        };

        // A session that switched items needs a fresh engine either way.
        if self
            .sessions
            .get(&session.id)
            .is_some_and(|t| t.item_id != item_id)
        {
            tracing::info!(session_id = %session.id, item_id = %item_id, "item changed, discarding engine");
            self.remove_session(&session.id);
        }

        let binary = self.catalog.binary_path(&item_id);
        if !binary.exists() {
            if self.missing_binary_logged.insert(item_id.clone()) {
                tracing::info!("no binary data for: {item_name} ({item_id})");
            }
            return;
        }
        self.missing_binary_logged.remove(&item_id);

        let is_playing = !session.is_paused();
        let position = session.position_seconds();

        match self.sessions.get_mut(&session.id) {
            None => {
                if !is_playing {
                    return;
                }
                let engine = match self.factory.create(&binary, &endpoint) {
                    Ok(engine) => engine,
                    Err(e) => {
                        tracing::error!(item_id = %item_id, "cannot open playback engine: {e:#}");
                        return;
                    }
                };
                engine.start(position, Some(SystemTime::now()));
                tracing::info!(
                    session_id = %session.id,
                    item = item_name,
                    position,
                    endpoint = %endpoint,
                    "playback engine started"
                );
                self.sessions.insert(
                    session.id.clone(),
                    SessionTrack {
                        item_id,
                        is_playing: true,
                        last_position: position,
                        last_seek: None,
                        engine,
                    },
                );
            }
            Some(track) => {
                if is_playing && !track.is_playing {
                    track.engine.resume();
                    tracing::info!(session_id = %session.id, "resumed");
                } else if !is_playing && track.is_playing {
                    track.engine.pause();
                    tracing::info!(session_id = %session.id, "paused");
                }

                if is_playing {
                    let jump = (position - track.last_position).abs();
                    if jump > self.seek_threshold {
                        let now = Instant::now();
                        let debounced = track
                            .last_seek
                            .is_some_and(|at| now.duration_since(at) < self.seek_debounce);
                        if debounced {
                            tracing::debug!(session_id = %session.id, jump, "seek debounced");
                        } else {
                            tracing::info!(session_id = %session.id, jump, position, "seek detected");
                            track.engine.sync_to(position, Some(SystemTime::now()));
                            track.last_seek = Some(now);
                        }
                    }
                }

                track.is_playing = is_playing;
                track.last_position = position;
            }
        }
    }
}
