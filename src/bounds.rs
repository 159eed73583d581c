//! Bounding box calculation for map camera framing.

use geo::BoundingRect;

use crate::{BoundingBox, MultiTrack};

/// Compute the bounding box of every coordinate in `tracks`.
///
/// Returns `None` for an empty collection. This is distinct from a
/// zero-area box around a single location: callers skip persisting bounds
/// rather than writing a degenerate box.
///
/// # Example
/// ```rust
/// use trip_geometry::{compute_bounds, Coordinate, MultiTrack, Track};
///
/// let track = Track::new(vec![
///     Coordinate::new(-0.1278, 51.5074),
///     Coordinate::new(-0.1300, 51.5090),
/// ]).unwrap();
///
/// let bounds = compute_bounds(&MultiTrack::new(vec![track])).unwrap();
/// assert_eq!(bounds.min_lng, -0.1300);
/// assert_eq!(bounds.max_lat, 51.5090);
///
/// assert!(compute_bounds(&MultiTrack::empty()).is_none());
/// ```
pub fn compute_bounds(tracks: &MultiTrack) -> Option<BoundingBox> {
    let rect = tracks.to_multi_line_string().bounding_rect()?;
    Some(BoundingBox {
        min_lat: rect.min().y,
        min_lng: rect.min().x,
        max_lat: rect.max().y,
        max_lng: rect.max().x,
    })
}
