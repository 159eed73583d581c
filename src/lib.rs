//! # Trip Geometry
//!
//! GPS track ingestion and merging for trip summary geometry.
//!
//! This library provides:
//! - GPX parsing into per-segment tracks
//! - Merging new tracks after a trip's previously stored geometry
//! - Douglas-Peucker simplification and bounding box calculation
//! - EWKT output for spatial database columns and GeoJSON output for map display
//!
//! ## Features
//!
//! - **`http`** - Enable the REST client for the trip backend
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trip_geometry::{parse_gpx, process_geometry, ExistingGeometry, MergeConfig, MultiTrack};
//!
//! let gpx = r#"<?xml version="1.0"?>
//! <gpx version="1.1" creator="example">
//!   <trk><trkseg>
//!     <trkpt lat="51.5074" lon="-0.1278"/>
//!     <trkpt lat="51.5080" lon="-0.1290"/>
//!     <trkpt lat="51.5090" lon="-0.1300"/>
//!   </trkseg></trk>
//! </gpx>"#;
//!
//! let tracks = MultiTrack::new(parse_gpx("morning.gpx", gpx.as_bytes()).unwrap());
//! let processed = process_geometry(&ExistingGeometry::Absent, &tracks, &MergeConfig::default()).unwrap();
//!
//! assert!(processed.ewkt.starts_with("SRID=4326;MULTILINESTRING((-0.1278 51.5074"));
//! assert!(processed.bounds.is_some());
//! ```

use geo::{Coord, LineString, MultiLineString};
use thiserror::Error;

pub mod backend;
pub mod bounds;
pub mod display;
pub mod merge;
pub mod parser;
pub mod pipeline;
pub mod simplify;
pub mod wkt;

// HTTP module for the trip backend
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{BackendConfig, BlockingBackend, RestClient};

pub use backend::{
    BackendError, GeometryUpdate, InMemoryBackend, ObjectStore, StoredObject, StoredTrip,
    TripStore, UploadRecord,
};
pub use bounds::compute_bounds;
pub use display::{
    decode_geojson, to_display_feature, to_geojson_geometry, RawGeometry, TripMapView,
};
pub use merge::{
    merge, merge_segments, merge_tracks, ExistingGeometry, MergeResult, PriorGeometry,
    SegmentMergeError,
};
pub use parser::{parse_files, parse_gpx, FileReport, GpxFile, ParseError, ParsedBatch};
pub use pipeline::{
    process_geometry, FileOutcome, ProcessedGeometry, ProgressCallback, TripUploader,
    UploadError, UploadOutcome, UploadPhase, UploadProgress, UploadRequest,
};
pub use simplify::{simplify, simplify_track, SimplifyConfig};
pub use wkt::{parse_ewkt, to_ewkt, WGS84_SRID};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("TripGeometryRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate, longitude first.
///
/// # Example
/// ```
/// use trip_geometry::Coordinate;
/// let point = Coordinate::new(-0.1278, 51.5074); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinate {
    /// Create a new coordinate from (longitude, latitude).
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

impl From<Coord<f64>> for Coordinate {
    fn from(coord: Coord<f64>) -> Self {
        Self::new(coord.x, coord.y)
    }
}

impl From<Coordinate> for Coord<f64> {
    fn from(coordinate: Coordinate) -> Self {
        Coord { x: coordinate.longitude, y: coordinate.latitude }
    }
}

/// One continuous recorded path (a GPX track segment).
///
/// A track always holds at least two valid coordinates; it cannot be changed
/// after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    coords: Vec<Coordinate>,
}

impl Track {
    /// Build a track, dropping invalid coordinates.
    ///
    /// Returns `None` if fewer than 2 valid coordinates remain.
    ///
    /// # Example
    /// ```
    /// use trip_geometry::{Coordinate, Track};
    ///
    /// assert!(Track::new(vec![Coordinate::new(0.0, 0.0)]).is_none());
    /// let track = Track::new(vec![Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 1.0)]).unwrap();
    /// assert_eq!(track.point_count(), 2);
    /// ```
    pub fn new(coords: Vec<Coordinate>) -> Option<Self> {
        let coords: Vec<Coordinate> = coords.into_iter().filter(|c| c.is_valid()).collect();
        if coords.len() < 2 {
            return None;
        }
        Some(Self { coords })
    }

    pub fn coords(&self) -> &[Coordinate] {
        &self.coords
    }

    pub fn point_count(&self) -> usize {
        self.coords.len()
    }

    pub fn first(&self) -> Coordinate {
        self.coords[0]
    }

    pub fn last(&self) -> Coordinate {
        self.coords[self.coords.len() - 1]
    }

    pub fn to_line_string(&self) -> LineString<f64> {
        self.coords.iter().map(|c| Coord::from(*c)).collect()
    }

    pub fn from_line_string(line: &LineString<f64>) -> Option<Self> {
        Self::new(line.coords().map(|c| Coordinate::from(*c)).collect())
    }
}

/// An ordered collection of tracks in chronological recording order.
///
/// Every pipeline stage returns a new `MultiTrack`; none mutate their input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiTrack {
    tracks: Vec<Track>,
}

impl MultiTrack {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Total number of coordinates across all tracks.
    pub fn point_count(&self) -> usize {
        self.tracks.iter().map(Track::point_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Iterate every coordinate, track by track.
    pub fn coords(&self) -> impl Iterator<Item = &Coordinate> {
        self.tracks.iter().flat_map(|t| t.coords.iter())
    }

    /// A new collection holding this collection's tracks followed by `other`'s.
    pub fn concat(&self, other: &MultiTrack) -> MultiTrack {
        self.tracks.iter().chain(other.tracks.iter()).cloned().collect()
    }

    pub fn to_multi_line_string(&self) -> MultiLineString<f64> {
        MultiLineString::new(self.tracks.iter().map(Track::to_line_string).collect())
    }

    /// Convert from geo types, dropping lines with fewer than 2 valid points.
    pub fn from_multi_line_string(lines: &MultiLineString<f64>) -> Self {
        lines.iter().filter_map(Track::from_line_string).collect()
    }
}

impl FromIterator<Track> for MultiTrack {
    fn from_iter<I: IntoIterator<Item = Track>>(iter: I) -> Self {
        Self { tracks: iter.into_iter().collect() }
    }
}

/// Axis-aligned bounding box of a geometry, used for map camera framing.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Rebuild bounds from the four stored columns.
    ///
    /// Returns `None` unless all four are present, finite and ordered.
    pub fn from_columns(
        min_lat: Option<f64>,
        min_lng: Option<f64>,
        max_lat: Option<f64>,
        max_lng: Option<f64>,
    ) -> Option<Self> {
        let bounds = Self {
            min_lat: min_lat?,
            min_lng: min_lng?,
            max_lat: max_lat?,
            max_lng: max_lng?,
        };
        let finite = [bounds.min_lat, bounds.min_lng, bounds.max_lat, bounds.max_lng]
            .iter()
            .all(|v| v.is_finite());
        if !finite || bounds.min_lat > bounds.max_lat || bounds.min_lng > bounds.max_lng {
            return None;
        }
        Some(bounds)
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lng + self.max_lng) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    /// Inclusive containment check.
    pub fn contains(&self, coord: &Coordinate) -> bool {
        coord.latitude >= self.min_lat
            && coord.latitude <= self.max_lat
            && coord.longitude >= self.min_lng
            && coord.longitude <= self.max_lng
    }

    /// GeoJSON `bbox` order: `[min_lng, min_lat, max_lng, max_lat]`.
    pub fn to_bbox(&self) -> [f64; 4] {
        [self.min_lng, self.min_lat, self.max_lng, self.max_lat]
    }
}

/// Failure to decode a stored geometry string.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("invalid GeoJSON: {0}")]
    Json(String),
    #[error("invalid WKT: {0}")]
    Wkt(String),
    #[error("unsupported geometry: {0}")]
    Unsupported(String),
}

/// Configuration for the merge pipeline.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct MergeConfig {
    /// Tolerance for Douglas-Peucker simplification (in degrees).
    /// Smaller values preserve more detail. Default: 0.0001 (~11 meters)
    pub simplification_tolerance: f64,

    /// Skip the radial-distance pre-pass before Douglas-Peucker.
    /// Default: true
    pub high_quality: bool,

    /// Replace undecodable stored geometry with the new tracks instead of failing.
    /// Default: true
    pub discard_corrupt_geometry: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            simplification_tolerance: simplify::DEFAULT_TOLERANCE,
            high_quality: true,
            discard_corrupt_geometry: true,
        }
    }
}

impl MergeConfig {
    pub fn simplify_config(&self) -> SimplifyConfig {
        SimplifyConfig {
            tolerance: self.simplification_tolerance,
            high_quality: self.high_quality,
        }
    }
}

// ============================================================================
// FFI Exports (only when feature enabled)
// ============================================================================

#[cfg(feature = "ffi")]
mod ffi {
    use super::*;
    use log::{info, warn};

    /// A GPX file handed over from the mobile picker.
    #[derive(Debug, Clone, uniffi::Record)]
    pub struct FfiGpxFile {
        pub name: String,
        pub content: Vec<u8>,
    }

    /// Result of processing an upload batch on device.
    #[derive(Debug, Clone, uniffi::Record)]
    pub struct FfiProcessedGeometry {
        /// Simplified tracks, existing tracks first
        pub tracks: Vec<Vec<Coordinate>>,
        /// `SRID=4326;MULTILINESTRING(...)`, empty on error
        pub ewkt: String,
        pub bounds: Option<BoundingBox>,
        /// Display Feature as GeoJSON text
        pub geojson: Option<String>,
        /// One message per file that could not be parsed
        pub file_errors: Vec<String>,
        /// True when stored geometry existed but could not be decoded
        pub prior_discarded: bool,
        pub error: Option<String>,
    }

    impl FfiProcessedGeometry {
        fn failed(file_errors: Vec<String>, error: String) -> Self {
            Self {
                tracks: vec![],
                ewkt: String::new(),
                bounds: None,
                geojson: None,
                file_errors,
                prior_discarded: false,
                error: Some(error),
            }
        }
    }

    /// Parse, merge and simplify a batch of GPX files against stored GeoJSON.
    #[uniffi::export]
    pub fn process_gpx_upload(
        existing_geojson: Option<String>,
        files: Vec<FfiGpxFile>,
        config: MergeConfig,
    ) -> FfiProcessedGeometry {
        init_logging();
        info!("[TripGeometryRust] process_gpx_upload called with {} files", files.len());

        let files: Vec<GpxFile> = files
            .into_iter()
            .map(|f| GpxFile::new(f.name, f.content))
            .collect();
        let batch = parse_files(&files);
        let file_errors: Vec<String> = batch
            .reports
            .iter()
            .filter_map(|r| r.error.clone())
            .collect();

        if batch.is_empty() {
            return FfiProcessedGeometry::failed(file_errors, UploadError::NoTrackData.to_string());
        }

        let existing = ExistingGeometry::from_stored_text(existing_geojson);

        match process_geometry(&existing, &batch.to_multi_track(), &config) {
            Ok(processed) => FfiProcessedGeometry {
                tracks: processed
                    .tracks
                    .tracks()
                    .iter()
                    .map(|t| t.coords().to_vec())
                    .collect(),
                geojson: to_display_feature(&processed.tracks).map(|f| f.to_string()),
                ewkt: processed.ewkt,
                bounds: processed.bounds,
                file_errors,
                prior_discarded: matches!(processed.prior, PriorGeometry::Discarded { .. }),
                error: None,
            },
            Err(e) => {
                warn!("[TripGeometryRust] process_gpx_upload failed: {}", e);
                FfiProcessedGeometry::failed(file_errors, e.to_string())
            }
        }
    }

    /// Normalize stored GeoJSON (bare geometry or Feature) into a display Feature.
    #[uniffi::export]
    pub fn normalize_display_geometry(text: String) -> Option<String> {
        init_logging();
        RawGeometry::parse(&text).normalize().map(|f| f.to_string())
    }

    /// Get default merge configuration.
    #[uniffi::export]
    pub fn default_merge_config() -> MergeConfig {
        init_logging();
        MergeConfig::default()
    }
}

// ============================================================================
// Tests
// ============================================================================
