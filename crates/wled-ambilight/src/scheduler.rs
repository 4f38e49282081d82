use std::time::Duration;

use ambi_catalog::{Catalog, ExtractionStatus, NewItem, QueueFilter};
use ambi_extract::extract_item;
use ambi_jellyfin::JellyfinClient;
use anyhow::{Context, Result};
use chrono::{Local, Timelike};
use tokio::sync::watch;

use crate::config::{ExtractionSettings, SchedulerSettings};
use ambi_sampler::StripGeometry;

/// Longest uninterruptible sleep while waiting for the window to open, so
/// shutdown is observed within seconds.
const GATE_SLEEP_CHUNK: Duration = Duration::from_secs(60);

/// Daily time range during which extraction may run. Minutes since local
/// midnight; `start > end` wraps around midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start_min: u16,
    end_min: u16,
}

impl TimeWindow {
    /// Parse a `HH:MM`–`HH:MM` pair. Returns `None` (no gating) when
    /// either bound is empty or malformed, or when the bounds are equal
    /// (a degenerate window counts as disabled).
    #[must_use]
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        let start_min = parse_hhmm(start)?;
        let end_min = parse_hhmm(end)?;
        if start_min == end_min {
            return None;
        }
        Some(Self { start_min, end_min })
    }

    #[must_use]
    pub fn contains(&self, minute_of_day: u16) -> bool {
        if self.start_min < self.end_min {
            (self.start_min..self.end_min).contains(&minute_of_day)
        } else {
            // Crosses midnight, e.g. 22:00-06:00.
            minute_of_day >= self.start_min || minute_of_day < self.end_min
        }
    }

    /// Minutes until the window next opens (0 when already inside).
    #[must_use]
    pub fn minutes_until_open(&self, minute_of_day: u16) -> u32 {
        if self.contains(minute_of_day) {
            return 0;
        }
        let day = 24 * 60;
        (u32::from(self.start_min) + day - u32::from(minute_of_day)) % day
    }
}

fn parse_hhmm(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    let (h, m) = raw.split_once(':')?;
    let h: u16 = h.trim().parse().ok()?;
    let m: u16 = m.trim().parse().ok()?;
    (h <= 23 && m <= 59).then_some(h * 60 + m)
}

fn minute_of_day_now() -> u16 {
    let now = Local::now();
    (now.hour() * 60 + now.minute()) as u16
}

/// The extraction side of the daemon: periodically refresh the catalog
/// from the media server and drain the queue in batches.
pub struct Scheduler {
    catalog: Catalog,
    client: JellyfinClient,
    geometry: StripGeometry,
    extraction: ExtractionSettings,
    settings: SchedulerSettings,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        catalog: Catalog,
        client: JellyfinClient,
        geometry: StripGeometry,
        extraction: ExtractionSettings,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            catalog,
            client,
            geometry,
            extraction,
            settings,
        }
    }

    /// Outer loop; returns when `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        match &self.settings.window {
            Some(w) => tracing::info!(?w, "extraction window configured"),
            None => tracing::info!("extraction window not configured, no time restrictions"),
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            if !self.wait_for_window(&mut shutdown).await {
                break;
            }

            if let Err(e) = self.refresh_catalog().await {
                tracing::warn!("library refresh failed, continuing with stale catalog: {e:#}");
            }

            let stats = self.catalog.stats();
            tracing::info!(
                extracted = stats.extracted,
                total = stats.total,
                failed = stats.failed,
                pending = stats.pending,
                "extraction status"
            );

            if stats.pending > 0 {
                self.drain_batch(&mut shutdown).await;
            }

            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(self.settings.scan_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("extraction scheduler stopped");
    }

    /// Sleep (in shutdown-aware chunks) until inside the window. Returns
    /// false when shutdown fired while waiting.
    async fn wait_for_window(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let Some(window) = self.settings.window else {
            return true;
        };
        loop {
            if *shutdown.borrow() {
                return false;
            }
            let now_min = minute_of_day_now();
            if window.contains(now_min) {
                return true;
            }
            let wait_min = window.minutes_until_open(now_min).max(1);
            tracing::info!(
                minutes_until_open = wait_min,
                "outside extraction window, waiting"
            );
            let chunk = GATE_SLEEP_CHUNK.min(Duration::from_secs(u64::from(wait_min) * 60));
            tokio::select! {
                () = tokio::time::sleep(chunk) => {}
                _ = shutdown.changed() => return false,
            }
        }
    }

    /// Pull users → views → items from the server and merge into the
    /// catalog.
    async fn refresh_catalog(&self) -> Result<()> {
        let user = self
            .client
            .acting_user()
            .await
            .context("listing users")?
            .context("server has no users")?;

        let libraries = self
            .client
            .views(&user.id)
            .await
            .context("listing libraries")?;

        let mut saved = 0usize;
        for library in &libraries {
            let items = match self.client.library_items(&user.id, &library.id).await {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(
                        library = library.name.as_deref().unwrap_or(&library.id),
                        "skipping library: {e}"
                    );
                    continue;
                }
            };
            for item in items {
                let Some(filepath) = item.filepath() else {
                    continue;
                };
                let incoming = NewItem {
                    id: item.id.clone(),
                    library_id: library.id.clone(),
                    name: item.name.clone().unwrap_or_else(|| "Unknown".to_string()),
                    item_type: item.item_type.clone().unwrap_or_else(|| "Video".to_string()),
                    filepath: filepath.to_string(),
                    jellyfin_date_created: item.date_created.clone(),
                };
                match self.catalog.upsert_item(&incoming) {
                    Ok(_) => saved += 1,
                    Err(e) => {
                        tracing::warn!(item_id = %item.id, "cannot save item: {e}");
                    }
                }
            }
        }
        tracing::debug!(libraries = libraries.len(), items = saved, "library refresh done");
        Ok(())
    }

    /// Extract up to one batch of queued items.
    async fn drain_batch(&self, shutdown: &mut watch::Receiver<bool>) {
        let filter = QueueFilter {
            policy: self.settings.policy,
            limit: Some(self.settings.batch_size),
            max_age_days: self.settings.max_age_days,
        };
        let queue = self.catalog.items_needing_extraction(&filter);
        if queue.is_empty() {
            return;
        }
        tracing::info!(batch = queue.len(), "processing extraction batch");

        for item in queue {
            if *shutdown.borrow() {
                return;
            }

            if self.catalog.binary_up_to_date(&item) {
                tracing::info!(name = %item.name, "binary already current, marking completed");
                if let Err(e) = self.catalog.mark_completed(&item.id) {
                    tracing::warn!(item_id = %item.id, "cannot mark completed: {e}");
                }
                continue;
            }
            if item.extraction_status == ExtractionStatus::Completed {
                // Source is newer than the binary we once produced.
                tracing::info!(name = %item.name, "source changed, re-extracting");
                if let Err(e) = self.catalog.mark_pending(&item.id) {
                    tracing::warn!(item_id = %item.id, "cannot reset status: {e}");
                }
            }

            tracing::info!(kind = ?item.kind, name = %item.name, item_id = %item.id, "extracting");
            let output = self.catalog.binary_path(&item.id);
            let opts = self.extraction.options(self.geometry);
            let source = std::path::Path::new(&item.filepath);

            let outcome = tokio::select! {
                result = extract_item(source, &output, &opts) => result,
                _ = shutdown.changed() => {
                    tracing::info!(name = %item.name, "extraction interrupted by shutdown");
                    if let Err(e) = self.catalog.mark_failed(&item.id, "interrupted by shutdown") {
                        tracing::warn!(item_id = %item.id, "cannot mark failed: {e}");
                    }
                    return;
                }
            };

            match outcome {
                Ok(report) => {
                    tracing::info!(name = %item.name, frames = report.frames, fps = report.fps, "extraction completed");
                    if let Err(e) = self.catalog.mark_completed(&item.id) {
                        tracing::warn!(item_id = %item.id, "cannot mark completed: {e}");
                    }
                }
                Err(e) => {
                    tracing::error!(name = %item.name, "extraction failed: {e}");
                    if let Err(e) = self.catalog.mark_failed(&item.id, &e.to_string()) {
                        tracing::warn!(item_id = %item.id, "cannot mark failed: {e}");
                    }
                }
            }
        }
    }
}
