//! Upload GPX files to a trip on a live backend.
//!
//! Run with:
//!   TRIP_GEOMETRY_API_URL=... TRIP_GEOMETRY_API_KEY=... \
//!   cargo run --example backend_upload --features http -- <trip-id> <file.gpx>...

use std::path::Path;
use std::sync::Arc;

use trip_geometry::{
    BackendConfig, BlockingBackend, GpxFile, TripUploader, UploadProgress, UploadRequest,
};

fn main() {
    let mut args = std::env::args().skip(1);
    let Some(trip_id) = args.next() else {
        eprintln!("usage: backend_upload <trip-id> <file.gpx>...");
        std::process::exit(2);
    };

    let mut files = Vec::new();
    for path in args {
        match std::fs::read(&path) {
            Ok(content) => {
                let name = Path::new(&path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.clone());
                files.push(GpxFile::new(name, content));
            }
            Err(e) => eprintln!("Skipping {}: {}", path, e),
        }
    }
    if files.is_empty() {
        eprintln!("No readable files given");
        std::process::exit(2);
    }

    let config = match BackendConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let backend = match BlockingBackend::new(config) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let request = UploadRequest {
        trip_id,
        user_id: std::env::var("TRIP_GEOMETRY_USER_ID").ok(),
        files,
    };

    let uploader = TripUploader::new(&backend, &backend).with_progress(Arc::new(
        |p: &UploadProgress| println!("[{:?} {}/{}] {}", p.phase, p.current, p.total, p.message),
    ));

    match uploader.upload(&request) {
        Ok(outcome) => {
            for file in outcome.failed_uploads() {
                println!("upload failed for {}: {:?}", file.filename, file.upload_error);
            }
            println!(
                "Saved {} tracks ({} points), bounds {:?}",
                outcome.geometry.tracks.track_count(),
                outcome.geometry.tracks.point_count(),
                outcome.geometry.bounds.map(|b| b.to_bbox())
            );
        }
        Err(e) => {
            eprintln!("Upload failed: {}", e);
            std::process::exit(1);
        }
    }
}
