//! Upload-merge orchestration.
//!
//! [`process_geometry`] is the pure core: merge, simplify, bound, encode.
//! [`TripUploader`] wraps it with the backend calls of an upload batch:
//!
//! 1. Parse every file (failures are skipped, reported per file)
//! 2. Fetch the trip's stored geometry and run [`process_geometry`]
//! 3. Upload raw files (failures are reported per file, never fatal)
//! 4. Write the new geometry and bounds in one update
//!
//! Progress moves through [`UploadPhase`]s and ends in `Complete` or `Error`.
//! Two uploads to the same trip at once race; the later write wins.

use std::sync::Arc;

use geojson::Feature;
use log::{info, warn};
use thiserror::Error;

use crate::{
    compute_bounds, merge, parse_gpx, simplify, to_display_feature, to_ewkt, BackendError,
    BoundingBox, ExistingGeometry, GeometryUpdate, GpxFile, MergeConfig, MultiTrack, ObjectStore,
    ParsedBatch, PriorGeometry, TripStore, UploadRecord,
};

/// Batch-level failure of an upload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UploadError {
    #[error("No track data found in GPX files")]
    NoTrackData,
    #[error("Could not decode existing trip geometry: {0}")]
    GeometryDecode(String),
    #[error("Failed to fetch trip geometry: {0}")]
    Fetch(#[source] BackendError),
    #[error("Failed to save trip geometry: {0}")]
    Save(#[source] BackendError),
}

/// Final state of the merged geometry, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedGeometry {
    /// Simplified tracks, stored tracks first
    pub tracks: MultiTrack,
    pub bounds: Option<BoundingBox>,
    pub ewkt: String,
    pub prior: PriorGeometry,
    /// Coordinate count before simplification
    pub points_before: usize,
}

impl ProcessedGeometry {
    pub fn update(&self) -> GeometryUpdate {
        GeometryUpdate {
            ewkt: self.ewkt.clone(),
            bounds: self.bounds,
        }
    }
}

/// Merge `new` after `existing`, simplify, and derive bounds and EWKT.
///
/// Fails only when stored geometry is undecodable and
/// [`MergeConfig::discard_corrupt_geometry`] is off.
pub fn process_geometry(
    existing: &ExistingGeometry,
    new: &MultiTrack,
    config: &MergeConfig,
) -> Result<ProcessedGeometry, UploadError> {
    let merged = merge(existing, new);
    if let PriorGeometry::Discarded { reason } = &merged.prior {
        if !config.discard_corrupt_geometry {
            return Err(UploadError::GeometryDecode(reason.clone()));
        }
    }

    let points_before = merged.tracks.point_count();
    let tracks = simplify(&merged.tracks, &config.simplify_config());
    let bounds = compute_bounds(&tracks);
    let ewkt = to_ewkt(&tracks);

    info!(
        "[TripGeometry] Processed {} tracks: {} -> {} points",
        tracks.track_count(),
        points_before,
        tracks.point_count()
    );

    Ok(ProcessedGeometry {
        tracks,
        bounds,
        ewkt,
        prior: merged.prior,
        points_before,
    })
}

/// Stage of an upload batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Parsing,
    Uploading,
    Saving,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub phase: UploadPhase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

impl UploadProgress {
    pub fn new(phase: UploadPhase, current: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            phase,
            current,
            total,
            message: message.into(),
        }
    }
}

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(&UploadProgress) + Send + Sync>;

/// One upload batch. The acting user is passed in, never read from ambient state.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub trip_id: String,
    /// Upload rows are only recorded when a user is given
    pub user_id: Option<String>,
    /// In the order the user picked them; this fixes track order
    pub files: Vec<GpxFile>,
}

/// Per-file result of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub filename: String,
    pub track_count: usize,
    pub parse_error: Option<String>,
    pub object_key: Option<String>,
    pub upload_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub geometry: ProcessedGeometry,
    pub files: Vec<FileOutcome>,
    /// Feature for the map component
    pub display: Option<Feature>,
}

impl UploadOutcome {
    pub fn failed_uploads(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.upload_error.is_some())
    }
}

/// Drives one upload batch against a backend.
pub struct TripUploader<'a, S: TripStore, O: ObjectStore> {
    store: &'a S,
    objects: &'a O,
    config: MergeConfig,
    on_progress: Option<ProgressCallback>,
}

impl<'a, S: TripStore, O: ObjectStore> TripUploader<'a, S, O> {
    pub fn new(store: &'a S, objects: &'a O) -> Self {
        Self {
            store,
            objects,
            config: MergeConfig::default(),
            on_progress: None,
        }
    }

    pub fn with_config(mut self, config: MergeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Run the batch. Any error is also reported as an `Error` phase.
    pub fn upload(&self, request: &UploadRequest) -> Result<UploadOutcome, UploadError> {
        match self.run(request) {
            Ok(outcome) => {
                let total = request.files.len();
                self.report(UploadPhase::Complete, total, total, "Upload complete!");
                Ok(outcome)
            }
            Err(e) => {
                warn!("[TripGeometry] Upload to trip {} failed: {}", request.trip_id, e);
                self.report(UploadPhase::Error, 0, 0, e.to_string());
                Err(e)
            }
        }
    }

    fn run(&self, request: &UploadRequest) -> Result<UploadOutcome, UploadError> {
        let files = &request.files;
        let total = files.len();
        info!(
            "[TripGeometry] Upload of {} files to trip {} started",
            total, request.trip_id
        );

        self.report(UploadPhase::Parsing, 0, total, "Parsing GPX files...");
        let mut batch = ParsedBatch::default();
        for (i, file) in files.iter().enumerate() {
            self.report(UploadPhase::Parsing, i + 1, total, format!("Parsing {}...", file.name));
            batch.record(&file.name, parse_gpx(&file.name, &file.content));
        }
        if batch.is_empty() {
            return Err(UploadError::NoTrackData);
        }

        self.report(UploadPhase::Parsing, total, total, "Merging with existing tracks...");
        let existing = self.load_existing(&request.trip_id)?;
        let geometry = process_geometry(&existing, &batch.to_multi_track(), &self.config)?;

        self.report(UploadPhase::Uploading, 0, total, "Uploading files to storage...");
        let mut outcomes = Vec::with_capacity(total);
        for (i, (file, report)) in files.iter().zip(&batch.reports).enumerate() {
            self.report(UploadPhase::Uploading, i + 1, total, format!("Uploading {}...", file.name));
            let (object_key, upload_error) = match self.store_file(request, file) {
                Ok(key) => (Some(key), None),
                Err((key, e)) => {
                    warn!("[TripGeometry] Failed to upload {}: {}", file.name, e);
                    (key, Some(e.to_string()))
                }
            };
            outcomes.push(FileOutcome {
                filename: file.name.clone(),
                track_count: report.track_count,
                parse_error: report.error.clone(),
                object_key,
                upload_error,
            });
        }

        self.report(UploadPhase::Saving, 1, 1, "Saving trip geometry...");
        self.store
            .update_geometry(&request.trip_id, &geometry.update())
            .map_err(UploadError::Save)?;

        Ok(UploadOutcome {
            display: to_display_feature(&geometry.tracks),
            geometry,
            files: outcomes,
        })
    }

    /// Prefer the GeoJSON rendering; fall back to the raw column when the
    /// rendering is missing or fails.
    fn load_existing(&self, trip_id: &str) -> Result<ExistingGeometry, UploadError> {
        let raw = self
            .store
            .fetch_raw_geometry(trip_id)
            .map_err(UploadError::Fetch)?;
        let raw = match ExistingGeometry::from_stored_text(raw) {
            ExistingGeometry::Absent => return Ok(ExistingGeometry::Absent),
            stored => stored,
        };

        match self.store.fetch_geometry_geojson(trip_id) {
            Ok(Some(geojson)) => Ok(ExistingGeometry::GeoJson(geojson)),
            Ok(None) => Ok(raw),
            Err(e) => {
                warn!("[TripGeometry] GeoJSON geometry fetch failed, using raw column: {}", e);
                Ok(raw)
            }
        }
    }

    /// Upload one raw file and record it. On failure returns the object key if
    /// the file itself made it to storage.
    fn store_file(
        &self,
        request: &UploadRequest,
        file: &GpxFile,
    ) -> Result<String, (Option<String>, BackendError)> {
        let stored = self
            .objects
            .put_upload(&request.trip_id, file)
            .map_err(|e| (None, e))?;

        if let Some(user_id) = &request.user_id {
            let record = UploadRecord {
                trip_id: request.trip_id.clone(),
                user_id: user_id.clone(),
                filename: file.name.clone(),
                object_key: stored.key.clone(),
                size_bytes: file.size() as u64,
            };
            self.store
                .record_upload(&record)
                .map_err(|e| (Some(stored.key.clone()), e))?;
        }
        Ok(stored.key)
    }

    fn report(&self, phase: UploadPhase, current: usize, total: usize, message: impl Into<String>) {
        if let Some(cb) = &self.on_progress {
            cb(&UploadProgress::new(phase, current, total, message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Coordinate, InMemoryBackend, Track};
    use std::sync::Mutex;

    fn gpx(lat: f64) -> String {
        format!(
            r#"<gpx version="1.1" creator="test"><trk><trkseg>
              <trkpt lat="{lat}" lon="10.0"/><trkpt lat="{lat}" lon="10.1"/><trkpt lat="{lat}" lon="10.2"/>
            </trkseg></trk></gpx>"#
        )
    }

    fn request(files: Vec<GpxFile>) -> UploadRequest {
        UploadRequest {
            trip_id: "trip-1".to_string(),
            user_id: Some("user-1".to_string()),
            files,
        }
    }

    fn recording() -> (ProgressCallback, Arc<Mutex<Vec<UploadProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |p: &UploadProgress| {
            sink.lock().unwrap().push(p.clone());
        });
        (cb, seen)
    }

    #[test]
    fn test_process_geometry_without_prior() {
        let track = Track::new(vec![Coordinate::new(1.0, 2.0), Coordinate::new(3.0, 4.0)]).unwrap();
        let processed = process_geometry(
            &ExistingGeometry::Absent,
            &MultiTrack::new(vec![track]),
            &MergeConfig::default(),
        )
        .unwrap();

        assert_eq!(processed.ewkt, "SRID=4326;MULTILINESTRING((1 2, 3 4))");
        assert_eq!(processed.prior, PriorGeometry::Absent);
        assert_eq!(processed.points_before, 2);
        let bounds = processed.bounds.unwrap();
        assert_eq!((bounds.min_lng, bounds.min_lat, bounds.max_lng, bounds.max_lat), (1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_strict_mode_rejects_corrupt_geometry() {
        let track = Track::new(vec![Coordinate::new(1.0, 2.0), Coordinate::new(3.0, 4.0)]).unwrap();
        let config = MergeConfig {
            discard_corrupt_geometry: false,
            ..MergeConfig::default()
        };
        let result = process_geometry(
            &ExistingGeometry::Ewkt("not wkt".to_string()),
            &MultiTrack::new(vec![track]),
            &config,
        );
        assert!(matches!(result, Err(UploadError::GeometryDecode(_))));
    }

    #[test]
    fn test_upload_appends_after_stored_geometry() {
        let backend = InMemoryBackend::new();
        backend
            .insert_trip("trip-1", Some("SRID=4326;MULTILINESTRING((10 1, 10.1 1))".to_string()))
            .unwrap();

        let outcome = TripUploader::new(&backend, &backend)
            .upload(&request(vec![
                GpxFile::new("a.gpx", gpx(2.0)),
                GpxFile::new("b.gpx", gpx(3.0)),
            ]))
            .unwrap();

        let lats: Vec<f64> = outcome
            .geometry
            .tracks
            .tracks()
            .iter()
            .map(|t| t.first().latitude)
            .collect();
        assert_eq!(lats, vec![1.0, 2.0, 3.0]);

        let trip = backend.trip("trip-1").unwrap();
        assert_eq!(trip.geometry.as_deref(), Some(outcome.geometry.ewkt.as_str()));
        assert_eq!(trip.bounds, outcome.geometry.bounds);
        assert_eq!(backend.uploads().len(), 2);
        assert!(outcome.display.is_some());
    }

    #[test]
    fn test_progress_phases() {
        let backend = InMemoryBackend::new();
        backend.insert_trip("trip-1", None).unwrap();
        let (cb, seen) = recording();

        TripUploader::new(&backend, &backend)
            .with_progress(cb)
            .upload(&request(vec![GpxFile::new("a.gpx", gpx(2.0))]))
            .unwrap();

        let phases: Vec<UploadPhase> = seen.lock().unwrap().iter().map(|p| p.phase).collect();
        assert_eq!(phases.first(), Some(&UploadPhase::Parsing));
        assert!(phases.contains(&UploadPhase::Uploading));
        assert!(phases.contains(&UploadPhase::Saving));
        assert_eq!(phases.last(), Some(&UploadPhase::Complete));
    }

    #[test]
    fn test_no_track_data_fails_batch() {
        let backend = InMemoryBackend::new();
        backend.insert_trip("trip-1", None).unwrap();
        let (cb, seen) = recording();

        let err = TripUploader::new(&backend, &backend)
            .with_progress(cb)
            .upload(&request(vec![GpxFile::new("bad.gpx", "<gpx")]))
            .unwrap_err();

        assert_eq!(err, UploadError::NoTrackData);
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.phase, UploadPhase::Error);
        assert_eq!(last.message, "No track data found in GPX files");
        assert_eq!(backend.trip("trip-1").unwrap().geometry, None);
        assert!(backend.object_keys().is_empty());
    }

    #[test]
    fn test_unparseable_file_still_uploaded() {
        let backend = InMemoryBackend::new();
        backend.insert_trip("trip-1", None).unwrap();

        let outcome = TripUploader::new(&backend, &backend)
            .upload(&request(vec![
                GpxFile::new("good.gpx", gpx(2.0)),
                GpxFile::new("bad.gpx", "<gpx"),
            ]))
            .unwrap();

        assert_eq!(outcome.geometry.tracks.track_count(), 1);
        assert!(outcome.files[1].parse_error.is_some());
        assert!(outcome.files[1].object_key.is_some());
        assert_eq!(backend.object_keys().len(), 2);
    }

    #[test]
    fn test_no_upload_record_without_user() {
        let backend = InMemoryBackend::new();
        backend.insert_trip("trip-1", None).unwrap();
        let mut req = request(vec![GpxFile::new("a.gpx", gpx(2.0))]);
        req.user_id = None;

        TripUploader::new(&backend, &backend).upload(&req).unwrap();
        assert!(backend.uploads().is_empty());
        assert_eq!(backend.object_keys().len(), 1);
    }

    #[test]
    fn test_unknown_trip_fails_fetch() {
        let backend = InMemoryBackend::new();
        let err = TripUploader::new(&backend, &backend)
            .upload(&request(vec![GpxFile::new("a.gpx", gpx(2.0))]))
            .unwrap_err();
        assert!(matches!(err, UploadError::Fetch(_)));
    }
}
