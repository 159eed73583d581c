//! Per-track line simplification.
//!
//! Each track is simplified on its own with Ramer-Douglas-Peucker; tracks are
//! never joined, since consecutive tracks can be far apart. In fast mode a
//! radial-distance pass first drops points closer than the tolerance to the
//! previously kept point.

use geo::{algorithm::simplify::Simplify, Coord, LineString};

use crate::{Coordinate, MultiTrack, Track};

/// Default tolerance in degrees (~11 meters at mid latitudes).
pub const DEFAULT_TOLERANCE: f64 = 0.0001;

/// Configuration for simplification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplifyConfig {
    /// Maximum deviation in degrees. Default: 0.0001
    pub tolerance: f64,
    /// Skip the radial-distance pre-pass. Default: true
    pub high_quality: bool,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            high_quality: true,
        }
    }
}

/// Simplify every track in `tracks`.
///
/// Point count never grows, both endpoints of each track are kept, and the
/// result is deterministic. A tolerance that is not a positive finite number
/// leaves the input unchanged.
///
/// # Example
/// ```
/// use trip_geometry::{simplify, Coordinate, MultiTrack, SimplifyConfig, Track};
///
/// // A straight line: the midpoints add nothing
/// let track = Track::new((0..10).map(|i| Coordinate::new(i as f64 * 0.001, 0.0)).collect()).unwrap();
/// let simplified = simplify(&MultiTrack::new(vec![track]), &SimplifyConfig::default());
///
/// assert_eq!(simplified.point_count(), 2);
/// ```
pub fn simplify(tracks: &MultiTrack, config: &SimplifyConfig) -> MultiTrack {
    if !(config.tolerance.is_finite() && config.tolerance > 0.0) {
        return tracks.clone();
    }
    tracks
        .tracks()
        .iter()
        .map(|track| simplify_track(track, config))
        .collect()
}

pub fn simplify_track(track: &Track, config: &SimplifyConfig) -> Track {
    if !(config.tolerance.is_finite() && config.tolerance > 0.0) {
        return track.clone();
    }

    let line: LineString<f64> = if config.high_quality {
        track.to_line_string()
    } else {
        radial_distance(track.coords(), config.tolerance)
            .into_iter()
            .map(Coord::<f64>::from)
            .collect()
    };

    let simplified = line.simplify(&config.tolerance);
    Track::from_line_string(&simplified).unwrap_or_else(|| track.clone())
}

/// Keep points farther than `tolerance` from the last kept point, plus the last point.
fn radial_distance(coords: &[Coordinate], tolerance: f64) -> Vec<Coordinate> {
    let Some((&first, rest)) = coords.split_first() else {
        return Vec::new();
    };
    let sq_tolerance = tolerance * tolerance;

    let mut kept = vec![first];
    let mut prev = first;
    for &coord in rest {
        let dx = coord.longitude - prev.longitude;
        let dy = coord.latitude - prev.latitude;
        if dx * dx + dy * dy > sq_tolerance {
            kept.push(coord);
            prev = coord;
        }
    }

    if let Some(&last) = rest.last() {
        if prev != last || kept.len() < 2 {
            kept.push(last);
        }
    }
    kept
}
