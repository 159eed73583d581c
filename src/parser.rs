//! GPX track parsing.
//!
//! Every `<trkseg>` with at least two valid trackpoints becomes one [`Track`].
//! Waypoints and routes are ignored. Files in a batch are parsed independently
//! and a failing file never aborts the batch.

use std::io::Cursor;

use gpx::Gpx;
use log::{debug, warn};
use thiserror::Error;

use crate::{Coordinate, MultiTrack, Track};

const DEFAULT_MIME_TYPE: &str = "application/gpx+xml";

/// Raw content of one uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub struct GpxFile {
    /// Original filename, used for error messages and storage keys
    pub name: String,
    pub content: Vec<u8>,
    pub mime_type: Option<String>,
}

impl GpxFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// MIME type to upload with, defaulting to `application/gpx+xml`.
    pub fn content_type(&self) -> &str {
        self.mime_type
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MIME_TYPE)
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Per-file parse failure.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not valid GPX as read by the `gpx` crate. This is
    /// stricter than a plain XML walk: a `<gpx>` without a `version`
    /// attribute or a `<time>` that is not ISO 8601 rejects the whole file,
    /// even though neither affects the coordinates.
    #[error("Failed to parse {filename}: {source}")]
    Malformed {
        filename: String,
        #[source]
        source: gpx::errors::GpxError,
    },
    #[error("No track data found in {filename}")]
    NoTrackData { filename: String },
}

impl ParseError {
    pub fn filename(&self) -> &str {
        match self {
            ParseError::Malformed { filename, .. } => filename,
            ParseError::NoTrackData { filename } => filename,
        }
    }
}

/// Parse one GPX document into its track segments, in document order.
///
/// # Example
/// ```
/// use trip_geometry::parse_gpx;
///
/// let gpx = r#"<gpx version="1.1" creator="example">
///   <wpt lat="1.0" lon="1.0"/>
///   <trk><trkseg>
///     <trkpt lat="51.5074" lon="-0.1278"/>
///     <trkpt lat="51.5080" lon="-0.1290"/>
///   </trkseg></trk>
/// </gpx>"#;
///
/// let tracks = parse_gpx("ride.gpx", gpx.as_bytes()).unwrap();
/// assert_eq!(tracks.len(), 1);
/// assert_eq!(tracks[0].first().longitude, -0.1278);
/// ```
pub fn parse_gpx(filename: &str, content: &[u8]) -> Result<Vec<Track>, ParseError> {
    let gpx: Gpx = gpx::read(Cursor::new(content)).map_err(|source| ParseError::Malformed {
        filename: filename.to_string(),
        source,
    })?;

    let tracks = tracks_from_gpx(&gpx);
    if tracks.is_empty() {
        return Err(ParseError::NoTrackData {
            filename: filename.to_string(),
        });
    }

    debug!(
        "[TripGeometry] Parsed {}: {} tracks, {} points",
        filename,
        tracks.len(),
        tracks.iter().map(Track::point_count).sum::<usize>()
    );
    Ok(tracks)
}

fn tracks_from_gpx(gpx: &Gpx) -> Vec<Track> {
    gpx.tracks
        .iter()
        .flat_map(|track| track.segments.iter())
        .filter_map(|segment| {
            let coords = segment
                .points
                .iter()
                .map(|waypoint| {
                    let point = waypoint.point();
                    Coordinate::new(point.x(), point.y())
                })
                .collect();
            Track::new(coords)
        })
        .collect()
}

/// Parse outcome for one file of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub filename: String,
    pub track_count: usize,
    pub point_count: usize,
    /// Parse failure message, if the file was skipped
    pub error: Option<String>,
}

/// Tracks from every parsed file, in file order, plus per-file reports.
#[derive(Debug, Clone, Default)]
pub struct ParsedBatch {
    tracks: Vec<Track>,
    pub reports: Vec<FileReport>,
}

impl ParsedBatch {
    /// Record one file's parse result, appending its tracks after earlier files'.
    pub fn record(&mut self, filename: &str, result: Result<Vec<Track>, ParseError>) {
        match result {
            Ok(tracks) => {
                self.reports.push(FileReport {
                    filename: filename.to_string(),
                    track_count: tracks.len(),
                    point_count: tracks.iter().map(Track::point_count).sum(),
                    error: None,
                });
                self.tracks.extend(tracks);
            }
            Err(e) => {
                warn!("[TripGeometry] Skipping {}: {}", filename, e);
                self.reports.push(FileReport {
                    filename: filename.to_string(),
                    track_count: 0,
                    point_count: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn failed_files(&self) -> impl Iterator<Item = &FileReport> {
        self.reports.iter().filter(|r| r.error.is_some())
    }

    pub fn to_multi_track(&self) -> MultiTrack {
        MultiTrack::new(self.tracks.clone())
    }

    pub fn into_multi_track(self) -> MultiTrack {
        MultiTrack::new(self.tracks)
    }
}

/// Parse files in the order supplied, skipping files that fail.
pub fn parse_files(files: &[GpxFile]) -> ParsedBatch {
    let mut batch = ParsedBatch::default();
    for file in files {
        batch.record(&file.name, parse_gpx(&file.name, &file.content));
    }
    batch
}
