//! Per-request output files and their cleanup.
//!
//! An [`Artifact`] owns one `<uuid>.wav` path and removes it when dropped,
//! unless the caller retained it. Retained files are left to the sweeper.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Artifact {
    path: PathBuf,
    file_name: String,
    retained: bool,
}

impl Artifact {
    /// Allocate a fresh artifact name in `dir`. Nothing is created on disk.
    pub fn new_in(dir: &Path) -> Self {
        let file_name = format!("{}.wav", Uuid::new_v4());
        Self {
            path: dir.join(&file_name),
            file_name,
            retained: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Keep the file on disk after this guard is dropped.
    pub fn retain(mut self) {
        self.retained = true;
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if self.retained {
            debug!("Retaining {}", self.path.display());
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", self.path.display()),
        }
    }
}

/// Whether `name` looks like a file this service created.
fn is_artifact_name(name: &str) -> bool {
    name.strip_suffix(".wav")
        .is_some_and(|stem| Uuid::parse_str(stem).is_ok())
}

/// Remove artifact files in `dir` last modified more than `max_age` ago.
/// Returns the number of files removed.
pub fn sweep_once(dir: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot scan {} for stale artifacts: {e}", dir.display());
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_artifact_name(name) {
            continue;
        }

        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove stale artifact {name}: {e}"),
        }
    }
    removed
}

/// Run [`sweep_once`] every `interval` until the task is aborted.
pub fn start_sweeper(dir: PathBuf, max_age: Duration, interval: Duration) -> JoinHandle<()> {
    info!(
        "Artifact sweeper: every {}s, removing files older than {}s in {}",
        interval.as_secs(),
        max_age.as_secs(),
        dir.display()
    );

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let sweep_dir = dir.clone();
            let removed = tokio::task::spawn_blocking(move || sweep_once(&sweep_dir, max_age))
                .await
                .unwrap_or(0);
            if removed > 0 {
                info!("Swept {removed} stale artifact(s)");
            }
        }
    })
}
