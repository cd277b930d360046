use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::warn;

/// Writes HTML snapshots of failed attempts under `<dir>/<search_id>/`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the written path. Write failures are logged and swallowed: a
    /// missing snapshot must not change the attempt's outcome.
    pub async fn save_html(&self, search_id: i64, at: DateTime<Utc>, html: &str) -> Option<String> {
        let dir = self.dir.join(search_id.to_string());
        let path = dir.join(format!("{}.html", at.format("%Y%m%dT%H%M%S%.3fZ")));

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(search_id, error = %e, "[ARTIFACT] could not create snapshot dir");
            return None;
        }
        match tokio::fs::write(&path, html).await {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!(search_id, error = %e, "[ARTIFACT] could not write snapshot");
                None
            }
        }
    }
}
