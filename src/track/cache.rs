//! On-disk outline cache, one JSON file per track id.
//!
//! ```json
//! { "track_id": 219, "track_name": "Mount Panorama Circuit", "points": [[0.51, 0.05], ...] }
//! ```
//!
//! Anything unreadable is a cache miss: the track is simply captured again.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{OutlinePoint, TrackOutline};
use crate::{Result, TelemetryError};

/// Files with fewer points than this are rejected.
pub const MIN_CACHED_POINTS: usize = 10;

#[derive(Debug, Serialize, Deserialize)]
struct CachedOutline {
    track_id: i32,
    track_name: String,
    points: Vec<[f32; 2]>,
}

/// Directory of persisted outlines.
#[derive(Debug, Clone)]
pub struct OutlineCache {
    dir: PathBuf,
}

impl OutlineCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, track_id: i32) -> PathBuf {
        self.dir.join(format!("track_{track_id}.json"))
    }

    /// Load a cached outline, logging and returning `None` on any problem.
    pub fn load(&self, track_id: i32) -> Option<TrackOutline> {
        let path = self.path_for(track_id);
        if !path.exists() {
            debug!(track_id, path = %path.display(), "No cached outline");
            return None;
        }

        match Self::read(&path, track_id) {
            Ok(outline) => {
                debug!(track_id, points = outline.points.len(), "Loaded cached outline");
                Some(outline)
            }
            Err(e) => {
                warn!(track_id, path = %path.display(), "Ignoring cached outline: {}", e);
                None
            }
        }
    }

    fn read(path: &Path, track_id: i32) -> Result<TrackOutline> {
        let text =
            std::fs::read_to_string(path).map_err(|e| TelemetryError::file_error(path.into(), e))?;
        let cached: CachedOutline = serde_json::from_str(&text)
            .map_err(|e| TelemetryError::cache_error(track_id, format!("malformed JSON: {e}")))?;

        if cached.track_id != track_id {
            return Err(TelemetryError::cache_error(
                track_id,
                format!("file belongs to track {}", cached.track_id),
            ));
        }
        if cached.points.len() < MIN_CACHED_POINTS {
            return Err(TelemetryError::cache_error(
                track_id,
                format!("only {} points", cached.points.len()),
            ));
        }

        Ok(TrackOutline {
            track_id,
            track_name: cached.track_name,
            points: cached.points.into_iter().map(|[x, y]| OutlinePoint { x, y }).collect(),
        })
    }

    /// Persist an outline via temp file and rename.
    pub fn store(&self, outline: &TrackOutline) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| TelemetryError::file_error(self.dir.clone(), e))?;

        let cached = CachedOutline {
            track_id: outline.track_id,
            track_name: outline.track_name.clone(),
            points: outline.points.iter().map(|p| [p.x, p.y]).collect(),
        };
        let json = serde_json::to_string_pretty(&cached)
            .map_err(|e| TelemetryError::cache_error(outline.track_id, e.to_string()))?;

        let path = self.path_for(outline.track_id);
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, json).map_err(|e| TelemetryError::file_error(temp_path.clone(), e))?;
        std::fs::rename(&temp_path, &path).map_err(|e| TelemetryError::file_error(path.clone(), e))?;

        debug!(track_id = outline.track_id, path = %path.display(), "Stored outline");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::resample::fallback_outline;

    fn outline(track_id: i32) -> TrackOutline {
        TrackOutline {
            track_id,
            track_name: "Mount Panorama Circuit".to_string(),
            points: fallback_outline(),
        }
    }

    #[test]
    fn store_then_load_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let cache = OutlineCache::new(dir.path().join("nested"));
        let original = outline(219);

        cache.store(&original).unwrap();
        let loaded = cache.load(219).unwrap();

        assert_eq!(loaded.track_id, 219);
        assert_eq!(loaded.track_name, original.track_name);
        assert_eq!(loaded.points.len(), original.points.len());
        for (a, b) in loaded.points.iter().zip(&original.points) {
            assert!((a.x - b.x).abs() < 1e-6 && (a.y - b.y).abs() < 1e-6);
        }
        assert!(!cache.path_for(219).with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OutlineCache::new(dir.path()).load(1).is_none());
    }

    #[test]
    fn malformed_and_short_files_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = OutlineCache::new(dir.path());

        std::fs::write(cache.path_for(5), "{ not json").unwrap();
        assert!(cache.load(5).is_none());

        std::fs::write(
            cache.path_for(6),
            r#"{"track_id":6,"track_name":"Short","points":[[0.1,0.2],[0.3,0.4]]}"#,
        )
        .unwrap();
        assert!(cache.load(6).is_none());
    }

    #[test]
    fn mismatched_track_id_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = OutlineCache::new(dir.path());
        cache.store(&outline(7)).unwrap();
        std::fs::rename(cache.path_for(7), cache.path_for(8)).unwrap();
        assert!(cache.load(8).is_none());
    }

    #[test]
    fn negative_track_ids_get_their_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = OutlineCache::new(dir.path());
        assert!(cache.path_for(-1).ends_with("track_-1.json"));
        cache.store(&outline(-1)).unwrap();
        assert!(cache.load(-1).is_some());
    }
}
