//! GeoJSON conversion for map display.
//!
//! The backend returns stored geometry either as a bare GeoJSON geometry or
//! already wrapped in a Feature. [`RawGeometry`] captures both shapes (plus text
//! that is not GeoJSON at all) so callers normalize in exactly one place.

use geojson::{Feature, GeoJson, Geometry, JsonObject, Value};
use log::debug;

use crate::{compute_bounds, BoundingBox, Coordinate, DecodeError, MultiTrack, Track};

/// Stored geometry as received from the backend.
#[derive(Debug, Clone)]
pub enum RawGeometry {
    Geometry(Geometry),
    Feature(Feature),
    Unparseable(String),
}

impl RawGeometry {
    pub fn parse(text: &str) -> Self {
        match text.parse::<GeoJson>() {
            Ok(GeoJson::Geometry(geometry)) => RawGeometry::Geometry(geometry),
            Ok(GeoJson::Feature(feature)) => RawGeometry::Feature(feature),
            Ok(GeoJson::FeatureCollection(_)) => {
                RawGeometry::Unparseable("expected a geometry or Feature, got FeatureCollection".to_string())
            }
            Err(e) => {
                debug!("[TripGeometry] Stored geometry is not GeoJSON: {}", e);
                RawGeometry::Unparseable(e.to_string())
            }
        }
    }

    /// A Feature wrapping a LineString or MultiLineString, or `None` if there
    /// is nothing displayable.
    ///
    /// # Example
    /// ```
    /// use trip_geometry::RawGeometry;
    ///
    /// let bare = r#"{"type":"LineString","coordinates":[[1.0,2.0],[3.0,4.0]]}"#;
    /// let wrapped = r#"{"type":"Feature","properties":{},"geometry":{"type":"LineString","coordinates":[[1.0,2.0],[3.0,4.0]]}}"#;
    ///
    /// assert!(RawGeometry::parse(bare).normalize().is_some());
    /// assert!(RawGeometry::parse(wrapped).normalize().is_some());
    /// assert!(RawGeometry::parse("not json").normalize().is_none());
    /// ```
    pub fn normalize(self) -> Option<Feature> {
        match self {
            RawGeometry::Geometry(geometry) if is_line_geometry(&geometry) => {
                Some(wrap_geometry(geometry))
            }
            RawGeometry::Feature(feature) => match &feature.geometry {
                Some(geometry) if is_line_geometry(geometry) => Some(feature),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn into_multi_track(self) -> Result<MultiTrack, DecodeError> {
        let geometry = match self {
            RawGeometry::Geometry(geometry) => geometry,
            RawGeometry::Feature(feature) => feature
                .geometry
                .ok_or_else(|| DecodeError::Unsupported("Feature without geometry".to_string()))?,
            RawGeometry::Unparseable(reason) => return Err(DecodeError::Json(reason)),
        };

        match geometry.value {
            Value::LineString(line) => Ok(track_from_positions(&line).into_iter().collect()),
            Value::MultiLineString(lines) => Ok(lines
                .iter()
                .filter_map(|line| track_from_positions(line))
                .collect()),
            other => Err(DecodeError::Unsupported(geometry_type(&other).to_string())),
        }
    }
}

fn geometry_type(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn is_line_geometry(geometry: &Geometry) -> bool {
    matches!(geometry.value, Value::LineString(_) | Value::MultiLineString(_))
}

fn wrap_geometry(geometry: Geometry) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(JsonObject::new()),
        foreign_members: None,
    }
}

fn track_from_positions(positions: &[Vec<f64>]) -> Option<Track> {
    let coords = positions
        .iter()
        .filter(|position| position.len() >= 2)
        .map(|position| Coordinate::new(position[0], position[1]))
        .collect();
    Track::new(coords)
}

/// Decode GeoJSON text (geometry or Feature) into tracks.
pub fn decode_geojson(text: &str) -> Result<MultiTrack, DecodeError> {
    RawGeometry::parse(text).into_multi_track()
}

/// MultiLineString geometry for the given tracks, `[lng, lat]` positions.
pub fn to_geojson_geometry(tracks: &MultiTrack) -> Geometry {
    let lines = tracks
        .tracks()
        .iter()
        .map(|track| {
            track
                .coords()
                .iter()
                .map(|c| vec![c.longitude, c.latitude])
                .collect()
        })
        .collect();
    Geometry::new(Value::MultiLineString(lines))
}

/// Display Feature with a `bbox`, or `None` when there are no tracks.
pub fn to_display_feature(tracks: &MultiTrack) -> Option<Feature> {
    let bounds = compute_bounds(tracks)?;
    let mut feature = wrap_geometry(to_geojson_geometry(tracks));
    feature.bbox = Some(bounds.to_bbox().to_vec());
    Some(feature)
}

/// What the map component needs to draw a trip.
#[derive(Debug, Clone)]
pub struct TripMapView {
    pub feature: Feature,
    pub bounds: Option<BoundingBox>,
}

impl TripMapView {
    /// Build the view from stored GeoJSON and stored bound columns.
    ///
    /// Stored bounds win; otherwise they are computed from the geometry.
    /// Returns `None` when the stored text holds no displayable geometry.
    pub fn from_stored(geojson: &str, stored_bounds: Option<BoundingBox>) -> Option<Self> {
        let feature = RawGeometry::parse(geojson).normalize()?;
        let bounds = stored_bounds.or_else(|| {
            feature
                .geometry
                .clone()
                .and_then(|g| RawGeometry::Geometry(g).into_multi_track().ok())
                .and_then(|tracks| compute_bounds(&tracks))
        });
        Some(Self { feature, bounds })
    }

    /// Where to point the map camera: the middle of the bounds.
    pub fn center(&self) -> Option<Coordinate> {
        self.bounds.map(|bounds| bounds.center())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARE_MULTI: &str =
        r#"{"type":"MultiLineString","coordinates":[[[1.0,2.0],[3.0,4.0]],[[5.0,6.0],[7.0,8.0],[9.0,10.0]]]}"#;

    #[test]
    fn test_bare_geometry_is_wrapped() {
        let feature = RawGeometry::parse(BARE_MULTI).normalize().unwrap();
        assert!(feature.properties.is_some());
        let geometry = feature.geometry.unwrap();
        assert!(matches!(geometry.value, Value::MultiLineString(_)));
    }

    #[test]
    fn test_feature_passes_through() {
        let text = r#"{"type":"Feature","properties":{"name":"x"},"geometry":{"type":"LineString","coordinates":[[1.0,2.0],[3.0,4.0]]}}"#;
        let feature = RawGeometry::parse(text).normalize().unwrap();
        assert_eq!(
            feature.properties.unwrap().get("name").and_then(|v| v.as_str()),
            Some("x")
        );
    }

    #[test]
    fn test_unusable_shapes_are_no_geometry() {
        assert!(RawGeometry::parse("").normalize().is_none());
        assert!(RawGeometry::parse("{not json").normalize().is_none());
        assert!(RawGeometry::parse(r#"{"type":"Point","coordinates":[1.0,2.0]}"#)
            .normalize()
            .is_none());
        assert!(RawGeometry::parse(r#"{"type":"FeatureCollection","features":[]}"#)
            .normalize()
            .is_none());
        assert!(RawGeometry::parse(r#"{"type":"Feature","properties":{},"geometry":null}"#)
            .normalize()
            .is_none());
    }

    #[test]
    fn test_decode_keeps_lon_lat_order() {
        let tracks = decode_geojson(BARE_MULTI).unwrap();
        assert_eq!(tracks.track_count(), 2);
        assert_eq!(tracks.tracks()[0].first(), Coordinate::new(1.0, 2.0));
        assert_eq!(tracks.tracks()[1].last(), Coordinate::new(9.0, 10.0));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode_geojson("garbage"), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode_geojson(r#"{"type":"Point","coordinates":[1.0,2.0]}"#),
            Err(DecodeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_ewkt_and_geojson_agree() {
        let tracks = decode_geojson(BARE_MULTI).unwrap();
        let via_wkt = crate::parse_ewkt(&crate::to_ewkt(&tracks)).unwrap();
        let via_geojson = decode_geojson(&to_geojson_geometry(&via_wkt).to_string()).unwrap();
        assert_eq!(via_geojson, tracks);
    }

    #[test]
    fn test_display_feature_has_bbox() {
        let tracks = decode_geojson(BARE_MULTI).unwrap();
        let feature = to_display_feature(&tracks).unwrap();
        assert_eq!(feature.bbox, Some(vec![1.0, 2.0, 9.0, 10.0]));
        assert!(to_display_feature(&MultiTrack::empty()).is_none());
    }

    #[test]
    fn test_map_view_bounds_fallback() {
        let view = TripMapView::from_stored(BARE_MULTI, None).unwrap();
        let bounds = view.bounds.unwrap();
        assert_eq!(bounds.min_lng, 1.0);
        assert_eq!(bounds.max_lat, 10.0);

        let stored = BoundingBox::from_columns(Some(0.0), Some(0.0), Some(1.0), Some(1.0));
        let view = TripMapView::from_stored(BARE_MULTI, stored).unwrap();
        assert_eq!(view.bounds, stored);

        assert!(TripMapView::from_stored("null", stored).is_none());
    }

    #[test]
    fn test_map_view_center() {
        let view = TripMapView::from_stored(BARE_MULTI, None).unwrap();
        assert_eq!(view.center(), Some(Coordinate::new(5.0, 6.0)));

        let stored = BoundingBox::from_columns(Some(0.0), Some(0.0), Some(1.0), Some(1.0));
        let view = TripMapView::from_stored(BARE_MULTI, stored).unwrap();
        assert_eq!(view.center(), Some(Coordinate::new(0.5, 0.5)));
    }
}
