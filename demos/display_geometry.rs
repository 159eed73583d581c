//! Normalize the shapes a geometry RPC can return into a map feature.
//!
//! Run with: cargo run --example display_geometry

use trip_geometry::{RawGeometry, TripMapView};

fn main() {
    let responses = [
        (
            "bare geometry",
            r#"{"type":"MultiLineString","coordinates":[[[2.35,48.85],[2.36,48.86]],[[2.29,48.86],[2.30,48.87]]]}"#,
        ),
        (
            "feature",
            r#"{"type":"Feature","properties":{"name":"Paris"},"geometry":{"type":"LineString","coordinates":[[2.35,48.85],[2.36,48.86]]}}"#,
        ),
        ("point", r#"{"type":"Point","coordinates":[2.35,48.85]}"#),
        ("truncated", r#"{"type":"LineStr"#),
    ];

    println!("Display Geometry Normalization\n");

    for (label, text) in responses {
        let raw = RawGeometry::parse(text);
        let kind = match &raw {
            RawGeometry::Geometry(_) => "Geometry",
            RawGeometry::Feature(_) => "Feature",
            RawGeometry::Unparseable(_) => "Unparseable",
        };
        println!("{} -> {}", label, kind);

        match TripMapView::from_stored(text, None) {
            Some(view) => {
                let bounds = view.bounds.map(|b| b.to_bbox());
                println!("   renderable, bbox {:?}", bounds);
                if let Some(center) = view.center() {
                    println!("   camera at {:.4}, {:.4}\n", center.latitude, center.longitude);
                }
            }
            None => println!("   not renderable\n"),
        }
    }
}
