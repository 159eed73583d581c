//! End-to-end tests for the upload-merge pipeline.

use std::fmt::Write;

use trip_geometry::{
    compute_bounds, decode_geojson, parse_ewkt, parse_gpx, process_geometry, BackendError,
    Coordinate, ExistingGeometry, GeometryUpdate, GpxFile, InMemoryBackend, MergeConfig,
    MultiTrack, ObjectStore, PriorGeometry, StoredObject, TripStore, TripUploader, UploadError,
    UploadRecord, UploadRequest,
};

/// GPX with one segment of `n` points forming a closed loop around (lng, lat).
fn loop_gpx(n: usize, lng: f64, lat: f64) -> String {
    let mut doc = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<gpx version=\"1.1\" creator=\"loop\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n<trk><name>Loop</name><trkseg>\n",
    );
    for i in 0..n {
        let angle = i as f64 / (n - 1) as f64 * std::f64::consts::TAU;
        let wobble = 0.0005 * (angle * 7.0).sin();
        writeln!(
            doc,
            "<trkpt lat=\"{:.7}\" lon=\"{:.7}\"/>",
            lat + (0.01 + wobble) * angle.sin(),
            lng + (0.01 + wobble) * angle.cos()
        )
        .unwrap();
    }
    doc.push_str("</trkseg></trk>\n</gpx>\n");
    doc
}

fn line_gpx(lat: f64) -> String {
    format!(
        "<gpx version=\"1.1\" creator=\"line\"><trk><trkseg>\
         <trkpt lat=\"{lat}\" lon=\"8.0\"/><trkpt lat=\"{lat}\" lon=\"8.5\"/><trkpt lat=\"{lat}\" lon=\"9.0\"/>\
         </trkseg></trk></gpx>"
    )
}

fn request(trip_id: &str, files: Vec<GpxFile>) -> UploadRequest {
    UploadRequest {
        trip_id: trip_id.to_string(),
        user_id: Some("user-1".to_string()),
        files,
    }
}

#[test]
fn single_loop_without_prior_geometry() {
    let doc = loop_gpx(500, -105.27, 40.01);
    let tracks = parse_gpx("loop.gpx", doc.as_bytes()).unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].point_count(), 500);
    let original = tracks[0].clone();

    let processed = process_geometry(
        &ExistingGeometry::Absent,
        &MultiTrack::new(tracks),
        &MergeConfig::default(),
    )
    .unwrap();

    assert_eq!(processed.points_before, 500);
    assert_eq!(processed.tracks.track_count(), 1);
    let simplified = &processed.tracks.tracks()[0];
    assert!(simplified.point_count() <= 500);
    assert_eq!(simplified.first(), original.first());
    assert_eq!(simplified.last(), original.last());

    let bounds = processed.bounds.unwrap();
    assert!(simplified.coords().iter().all(|c| bounds.contains(c)));
    // box frames the loop, radius ~0.01 degrees
    assert!(bounds.max_lat - bounds.min_lat > 0.015);
    assert!(bounds.max_lng - bounds.min_lng > 0.015);
    let (center_lat, center_lng) = (
        (bounds.min_lat + bounds.max_lat) / 2.0,
        (bounds.min_lng + bounds.max_lng) / 2.0,
    );
    assert!((center_lat - 40.01).abs() < 0.002);
    assert!((center_lng + 105.27).abs() < 0.002);

    assert!(processed.ewkt.starts_with("SRID=4326;MULTILINESTRING(("));
    let pairs = processed.ewkt.matches(',').count() + 1;
    assert_eq!(pairs, simplified.point_count());
    // longitude first
    let first_pair = processed.ewkt["SRID=4326;MULTILINESTRING((".len()..]
        .split(',')
        .next()
        .unwrap();
    let lng: f64 = first_pair.split_whitespace().next().unwrap().parse().unwrap();
    assert!((lng - original.first().longitude).abs() < 1e-9);
}

#[test]
fn file_order_and_existing_before_new() {
    let backend = InMemoryBackend::new();
    backend
        .insert_trip(
            "trip-1",
            Some("SRID=4326;MULTILINESTRING((8 1, 9 1), (8 2, 9 2))".to_string()),
        )
        .unwrap();

    let outcome = TripUploader::new(&backend, &backend)
        .upload(&request(
            "trip-1",
            vec![
                GpxFile::new("f1.gpx", line_gpx(3.0)),
                GpxFile::new("f2.gpx", line_gpx(4.0)),
            ],
        ))
        .unwrap();

    let lats: Vec<f64> = outcome
        .geometry
        .tracks
        .tracks()
        .iter()
        .map(|t| t.first().latitude)
        .collect();
    assert_eq!(lats, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(outcome.geometry.prior, PriorGeometry::Decoded { track_count: 2 });

    // a second batch lands after the first
    TripUploader::new(&backend, &backend)
        .upload(&request("trip-1", vec![GpxFile::new("f3.gpx", line_gpx(5.0))]))
        .unwrap();
    let stored = parse_ewkt(&backend.trip("trip-1").unwrap().geometry.unwrap()).unwrap();
    let lats: Vec<f64> = stored.tracks().iter().map(|t| t.first().latitude).collect();
    assert_eq!(lats, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn corrupt_existing_geometry_is_replaced() {
    let backend = InMemoryBackend::new();
    backend
        .insert_trip("trip-1", Some("MULTILINESTRING((8 1, 9".to_string()))
        .unwrap();

    let outcome = TripUploader::new(&backend, &backend)
        .upload(&request("trip-1", vec![GpxFile::new("f1.gpx", line_gpx(3.0))]))
        .unwrap();

    assert_eq!(outcome.geometry.tracks.track_count(), 1);
    assert!(matches!(outcome.geometry.prior, PriorGeometry::Discarded { .. }));

    let expected = MultiTrack::new(parse_gpx("f1.gpx", line_gpx(3.0).as_bytes()).unwrap());
    let simplified = trip_geometry::simplify(&expected, &MergeConfig::default().simplify_config());
    assert_eq!(outcome.geometry.tracks, simplified);
}

#[test]
fn ewkt_round_trips_through_geojson() {
    let doc = loop_gpx(120, 11.57, 48.13);
    let tracks = MultiTrack::new(parse_gpx("loop.gpx", doc.as_bytes()).unwrap());
    let processed =
        process_geometry(&ExistingGeometry::Absent, &tracks, &MergeConfig::default()).unwrap();

    let backend = InMemoryBackend::new();
    backend.insert_trip("trip-1", Some(processed.ewkt.clone())).unwrap();
    let geojson = backend.fetch_geometry_geojson("trip-1").unwrap().unwrap();
    let decoded = decode_geojson(&geojson).unwrap();

    assert_eq!(decoded.track_count(), processed.tracks.track_count());
    for (a, b) in decoded.coords().zip(processed.tracks.coords()) {
        assert!((a.longitude - b.longitude).abs() < 1e-9);
        assert!((a.latitude - b.latitude).abs() < 1e-9);
    }
    assert_eq!(compute_bounds(&decoded), processed.bounds);
}

struct FailingWrites {
    inner: InMemoryBackend,
}

impl TripStore for FailingWrites {
    fn fetch_raw_geometry(&self, trip_id: &str) -> Result<Option<String>, BackendError> {
        self.inner.fetch_raw_geometry(trip_id)
    }

    fn fetch_geometry_geojson(&self, _trip_id: &str) -> Result<Option<String>, BackendError> {
        Err(BackendError::Network("rpc unavailable".to_string()))
    }

    fn update_geometry(&self, _trip_id: &str, _update: &GeometryUpdate) -> Result<(), BackendError> {
        Err(BackendError::Status {
            status: 500,
            message: "write failed".to_string(),
        })
    }

    fn record_upload(&self, record: &UploadRecord) -> Result<(), BackendError> {
        self.inner.record_upload(record)
    }
}

struct RejectingStorage;

impl ObjectStore for RejectingStorage {
    fn put_upload(&self, _trip_id: &str, file: &GpxFile) -> Result<StoredObject, BackendError> {
        Err(BackendError::Storage(format!("no signed URL for {}", file.name)))
    }
}

#[test]
fn save_failure_is_reported() {
    let store = FailingWrites {
        inner: InMemoryBackend::new(),
    };
    store
        .inner
        .insert_trip("trip-1", Some("SRID=4326;LINESTRING(8 1, 9 1)".to_string()))
        .unwrap();

    let err = TripUploader::new(&store, &store.inner)
        .upload(&request("trip-1", vec![GpxFile::new("f1.gpx", line_gpx(3.0))]))
        .unwrap_err();

    assert!(matches!(err, UploadError::Save(_)));
    assert!(err.to_string().starts_with("Failed to save trip geometry"));
    // stored row untouched
    assert_eq!(
        store.inner.trip("trip-1").unwrap().geometry.as_deref(),
        Some("SRID=4326;LINESTRING(8 1, 9 1)")
    );
}

#[test]
fn upload_failures_do_not_block_geometry_write() {
    let backend = InMemoryBackend::new();
    backend.insert_trip("trip-1", None).unwrap();

    let outcome = TripUploader::new(&backend, &RejectingStorage)
        .upload(&request(
            "trip-1",
            vec![
                GpxFile::new("f1.gpx", line_gpx(3.0)),
                GpxFile::new("f2.gpx", line_gpx(4.0)),
            ],
        ))
        .unwrap();

    assert_eq!(outcome.failed_uploads().count(), 2);
    assert!(backend.uploads().is_empty());
    let stored = parse_ewkt(&backend.trip("trip-1").unwrap().geometry.unwrap()).unwrap();
    assert_eq!(stored.track_count(), 2);
    assert_eq!(stored.tracks()[0].first(), Coordinate::new(8.0, 3.0));
}
