//! Merging new tracks after a trip's stored geometry.
//!
//! Stored geometry may be a LineString or a MultiLineString, encoded as GeoJSON
//! (from the geometry RPC) or EWKT (from the raw row). Both are normalized to a
//! [`MultiTrack`] before combining. Stored tracks always come first.

use log::{debug, warn};
use thiserror::Error;

use crate::{decode_geojson, parse_ewkt, DecodeError, MultiTrack};

/// A trip's previously persisted geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum ExistingGeometry {
    /// The trip has no stored geometry yet
    Absent,
    GeoJson(String),
    Ewkt(String),
}

impl ExistingGeometry {
    /// Classify stored text by its first character: `{` is GeoJSON, anything
    /// else is treated as EWKT. Blank text is absent.
    pub fn from_stored_text(text: Option<String>) -> Self {
        match text {
            Some(text) if text.trim_start().starts_with('{') => ExistingGeometry::GeoJson(text),
            Some(text) if !text.trim().is_empty() => ExistingGeometry::Ewkt(text),
            _ => ExistingGeometry::Absent,
        }
    }

    pub fn decode(&self) -> Result<MultiTrack, DecodeError> {
        match self {
            ExistingGeometry::Absent => Ok(MultiTrack::empty()),
            ExistingGeometry::GeoJson(text) => decode_geojson(text),
            ExistingGeometry::Ewkt(text) => parse_ewkt(text),
        }
    }
}

/// What became of the stored geometry during a merge.
#[derive(Debug, Clone, PartialEq)]
pub enum PriorGeometry {
    Absent,
    Decoded { track_count: usize },
    /// Stored geometry could not be decoded and was replaced
    Discarded { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub tracks: MultiTrack,
    pub prior: PriorGeometry,
}

/// Stored tracks in their persisted order, followed by `new` in parser order.
pub fn merge_tracks(existing: &MultiTrack, new: &MultiTrack) -> MultiTrack {
    existing.concat(new)
}

/// Merge `new` after the decoded stored geometry.
///
/// Undecodable stored geometry never fails the merge: the result holds only
/// the new tracks and `prior` is [`PriorGeometry::Discarded`].
///
/// # Example
/// ```
/// use trip_geometry::{merge, Coordinate, ExistingGeometry, MultiTrack, PriorGeometry, Track};
///
/// let new = MultiTrack::new(vec![
///     Track::new(vec![Coordinate::new(3.0, 3.0), Coordinate::new(4.0, 4.0)]).unwrap(),
/// ]);
/// let existing = ExistingGeometry::Ewkt("SRID=4326;LINESTRING(1 1, 2 2)".to_string());
///
/// let result = merge(&existing, &new);
/// assert_eq!(result.tracks.track_count(), 2);
/// assert_eq!(result.tracks.tracks()[0].first(), Coordinate::new(1.0, 1.0));
/// assert_eq!(result.prior, PriorGeometry::Decoded { track_count: 1 });
/// ```
pub fn merge(existing: &ExistingGeometry, new: &MultiTrack) -> MergeResult {
    if *existing == ExistingGeometry::Absent {
        return MergeResult {
            tracks: new.clone(),
            prior: PriorGeometry::Absent,
        };
    }

    match existing.decode() {
        Ok(stored) => {
            debug!(
                "[TripGeometry] Merging {} stored tracks with {} new tracks",
                stored.track_count(),
                new.track_count()
            );
            MergeResult {
                tracks: merge_tracks(&stored, new),
                prior: PriorGeometry::Decoded {
                    track_count: stored.track_count(),
                },
            }
        }
        Err(e) => {
            warn!("[TripGeometry] Could not decode existing geometry, replacing with new tracks: {}", e);
            MergeResult {
                tracks: new.clone(),
                prior: PriorGeometry::Discarded {
                    reason: e.to_string(),
                },
            }
        }
    }
}

/// Failure to combine stored segment geometries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentMergeError {
    #[error("No geometry data found in selected segments")]
    NoGeometry,
}

/// Combine the stored geometries of several trip segments into one.
///
/// Segments are ordered by their sort key (ties keep their given order) and
/// their tracks concatenated. Segments without geometry or with geometry that
/// does not decode are skipped; if nothing remains the merge fails.
///
/// # Example
/// ```
/// use trip_geometry::{merge_segments, to_ewkt, ExistingGeometry};
///
/// let segments = vec![
///     (2, ExistingGeometry::Ewkt("SRID=4326;LINESTRING(3 3, 4 4)".to_string())),
///     (1, ExistingGeometry::Ewkt("SRID=4326;LINESTRING(1 1, 2 2)".to_string())),
/// ];
/// let merged = merge_segments(&segments).unwrap();
/// assert_eq!(to_ewkt(&merged), "SRID=4326;MULTILINESTRING((1 1, 2 2), (3 3, 4 4))");
/// ```
pub fn merge_segments(segments: &[(i32, ExistingGeometry)]) -> Result<MultiTrack, SegmentMergeError> {
    let mut ordered: Vec<&(i32, ExistingGeometry)> = segments.iter().collect();
    ordered.sort_by_key(|(sort_order, _)| *sort_order);

    let mut merged = MultiTrack::empty();
    for (sort_order, geometry) in ordered {
        match geometry.decode() {
            Ok(tracks) => merged = merged.concat(&tracks),
            Err(e) => warn!("[TripGeometry] Skipping segment {} with undecodable geometry: {}", sort_order, e),
        }
    }

    if merged.is_empty() {
        return Err(SegmentMergeError::NoGeometry);
    }
    debug!(
        "[TripGeometry] Merged {} segments into {} tracks",
        segments.len(),
        merged.track_count()
    );
    Ok(merged)
}
