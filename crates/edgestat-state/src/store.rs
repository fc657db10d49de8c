//! Snapshot store for the single persisted accumulation file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use edgestat_core::MergedServiceRecord;

use crate::error::{StateError, StateResult};

/// The persisted accumulation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub previous_data: Vec<MergedServiceRecord>,
    /// Wall-clock time of the write, epoch seconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub is_background: bool,
}

impl Snapshot {
    pub fn record(&self, service_id: &str) -> Option<&MergedServiceRecord> {
        self.previous_data.iter().find(|r| r.service == service_id)
    }
}

/// Owns the snapshot file at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, applying the daily reset against local time.
    pub async fn load(&self) -> StateResult<Snapshot> {
        self.load_at(&Local::now()).await
    }

    /// Load the snapshot as of `now`.
    ///
    /// An absent or blank file, or one captured before `now`'s midnight,
    /// yields an empty snapshot.
    pub async fn load_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> StateResult<Snapshot> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "no snapshot yet");
                return Ok(Snapshot::default());
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if raw.trim().is_empty() {
            return Ok(Snapshot::default());
        }

        let snapshot: Snapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            // Unparseable content still expires with the day it was written.
            Err(source) if self.modified_before_midnight(now).await => {
                info!(
                    path = ?self.path,
                    error = %source,
                    "corrupt snapshot predates local midnight, starting a new day"
                );
                return Ok(Snapshot::default());
            }
            Err(source) => {
                return Err(StateError::Deserialize {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if captured_before_midnight(snapshot.timestamp, now) {
            info!(
                path = ?self.path,
                captured_at = snapshot.timestamp,
                "snapshot predates local midnight, starting a new day"
            );
            return Ok(Snapshot::default());
        }

        debug!(
            path = ?self.path,
            services = snapshot.previous_data.len(),
            is_background = snapshot.is_background,
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Replace the snapshot file. The new content is written to a sibling
    /// file first and renamed over the target.
    pub async fn save(&self, snapshot: &Snapshot) -> StateResult<()> {
        let body = serde_json::to_vec(snapshot).map_err(StateError::Serialize)?;
        let write_err = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &body).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;

        debug!(
            path = ?self.path,
            services = snapshot.previous_data.len(),
            bytes = body.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Whether the file's mtime falls before `now`'s midnight. Unknown mtimes count as fresh.
    async fn modified_before_midnight<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        let Ok(meta) = tokio::fs::metadata(&self.path).await else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        captured_before_midnight(DateTime::<Utc>::from(modified).timestamp(), now)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Whether `captured_at` (epoch seconds) falls before the start of `now`'s day.
fn captured_before_midnight<Tz: TimeZone>(captured_at: i64, now: &DateTime<Tz>) -> bool {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    // A DST gap can swallow midnight itself; fall back to `now`'s own offset.
    let midnight = now
        .timezone()
        .from_local_datetime(&midnight)
        .earliest()
        .map(|m| m.timestamp())
        .unwrap_or_else(|| midnight.and_utc().timestamp() - now.offset().fix().local_minus_utc() as i64);
    captured_at < midnight
}
