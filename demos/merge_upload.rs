//! Upload two GPX files to a trip that already has geometry.
//!
//! Run with: cargo run --example merge_upload

use std::sync::Arc;

use trip_geometry::{
    GpxFile, InMemoryBackend, TripStore, TripUploader, UploadProgress, UploadRequest,
};

fn segment(name: &str, start_lat: f64, start_lon: f64, points: usize) -> String {
    let mut body = String::new();
    for i in 0..points {
        let t = i as f64;
        body.push_str(&format!(
            "      <trkpt lat=\"{:.6}\" lon=\"{:.6}\"/>\n",
            start_lat + t * 0.0004 + (t * 0.7).sin() * 0.00002,
            start_lon + t * 0.0006
        ));
    }
    format!(
        "<?xml version=\"1.0\"?>\n<gpx version=\"1.1\" creator=\"demo\">\n  <trk><name>{}</name><trkseg>\n{}  </trkseg></trk>\n</gpx>\n",
        name, body
    )
}

fn main() {
    let backend = InMemoryBackend::new();
    backend
        .insert_trip(
            "alps-2024",
            Some("SRID=4326;MULTILINESTRING((7.7491 46.0207, 7.7560 46.0251, 7.7612 46.0301))".to_string()),
        )
        .expect("insert trip");

    let request = UploadRequest {
        trip_id: "alps-2024".to_string(),
        user_id: Some("demo-user".to_string()),
        files: vec![
            GpxFile::new("day2.gpx", segment("Day 2", 46.031, 7.762, 200)),
            GpxFile::new("day3.gpx", segment("Day 3", 46.112, 7.882, 150)),
            GpxFile::new("broken.gpx", "<gpx><trk>"),
        ],
    };

    println!("Trip Geometry Merge\n");

    let uploader = TripUploader::new(&backend, &backend).with_progress(Arc::new(
        |p: &UploadProgress| println!("   [{:?} {}/{}] {}", p.phase, p.current, p.total, p.message),
    ));

    match uploader.upload(&request) {
        Ok(outcome) => {
            println!("\nFiles:");
            for file in &outcome.files {
                println!(
                    "   {} - {} tracks, key {:?}{}",
                    file.filename,
                    file.track_count,
                    file.object_key,
                    file.parse_error
                        .as_ref()
                        .map(|e| format!(" (skipped: {})", e))
                        .unwrap_or_default()
                );
            }

            let geometry = &outcome.geometry;
            println!("\nPrior geometry: {:?}", geometry.prior);
            println!(
                "Tracks: {}, points {} -> {}",
                geometry.tracks.track_count(),
                geometry.points_before,
                geometry.tracks.point_count()
            );
            if let Some(bounds) = geometry.bounds {
                println!(
                    "Bounds: lat {:.4}..{:.4}, lng {:.4}..{:.4}",
                    bounds.min_lat, bounds.max_lat, bounds.min_lng, bounds.max_lng
                );
            }

            let stored = backend
                .fetch_raw_geometry("alps-2024")
                .ok()
                .flatten()
                .unwrap_or_default();
            println!("\nStored EWKT ({} bytes): {:.80}...", stored.len(), stored);
        }
        Err(e) => println!("\nUpload failed: {}", e),
    }
}
