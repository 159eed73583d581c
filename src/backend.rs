//! Interfaces to the trip backend.
//!
//! The pipeline never talks to the database or object storage directly; it
//! goes through [`TripStore`] and [`ObjectStore`]. [`InMemoryBackend`] backs
//! both with process memory for demos and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use log::debug;
use thiserror::Error;

use crate::{parse_ewkt, to_geojson_geometry, BoundingBox, GpxFile};

/// Failure talking to the backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// New geometry for a trip row, written in a single update.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryUpdate {
    /// `SRID=4326;MULTILINESTRING(...)`
    pub ewkt: String,
    /// Left unwritten when `None`
    pub bounds: Option<BoundingBox>,
}

/// Metadata row for a raw file placed in object storage.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    pub trip_id: String,
    pub user_id: String,
    pub filename: String,
    pub object_key: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
}

/// Row access for trips.
pub trait TripStore {
    /// Stored geometry column as returned by a row select, if any.
    fn fetch_raw_geometry(&self, trip_id: &str) -> Result<Option<String>, BackendError>;

    /// Stored geometry rendered as GeoJSON text, if any.
    fn fetch_geometry_geojson(&self, trip_id: &str) -> Result<Option<String>, BackendError>;

    fn update_geometry(&self, trip_id: &str, update: &GeometryUpdate) -> Result<(), BackendError>;

    fn record_upload(&self, record: &UploadRecord) -> Result<(), BackendError>;
}

/// Storage for raw uploaded files.
pub trait ObjectStore {
    fn put_upload(&self, trip_id: &str, file: &GpxFile) -> Result<StoredObject, BackendError>;
}

/// A trip row held by [`InMemoryBackend`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredTrip {
    /// EWKT, as written by [`TripStore::update_geometry`]
    pub geometry: Option<String>,
    pub bounds: Option<BoundingBox>,
}

/// In-process backend implementing both stores.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    trips: Mutex<HashMap<String, StoredTrip>>,
    objects: Mutex<Vec<(String, Vec<u8>)>>,
    uploads: Mutex<Vec<UploadRecord>>,
}

fn poisoned<T>(_: T) -> BackendError {
    BackendError::Storage("backend lock poisoned".to_string())
}

fn trip_not_found(trip_id: &str) -> BackendError {
    BackendError::Status {
        status: 404,
        message: format!("trip {} not found", trip_id),
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a trip row with the given stored geometry.
    pub fn insert_trip(&self, trip_id: &str, geometry: Option<String>) -> Result<(), BackendError> {
        let mut trips = self.trips.lock().map_err(poisoned)?;
        trips.insert(
            trip_id.to_string(),
            StoredTrip {
                geometry,
                bounds: None,
            },
        );
        Ok(())
    }

    pub fn trip(&self, trip_id: &str) -> Option<StoredTrip> {
        self.trips.lock().ok()?.get(trip_id).cloned()
    }

    pub fn object_keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.iter().map(|(key, _)| key.clone()).collect())
            .unwrap_or_default()
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.uploads.lock().map(|uploads| uploads.to_vec()).unwrap_or_default()
    }
}

impl TripStore for InMemoryBackend {
    fn fetch_raw_geometry(&self, trip_id: &str) -> Result<Option<String>, BackendError> {
        let trips = self.trips.lock().map_err(poisoned)?;
        let trip = trips.get(trip_id).ok_or_else(|| trip_not_found(trip_id))?;
        Ok(trip.geometry.clone())
    }

    /// Renders stored EWKT as a GeoJSON geometry; stored text that does not
    /// decode yields `None`.
    fn fetch_geometry_geojson(&self, trip_id: &str) -> Result<Option<String>, BackendError> {
        let Some(raw) = self.fetch_raw_geometry(trip_id)? else {
            return Ok(None);
        };
        match parse_ewkt(&raw) {
            Ok(tracks) => Ok(Some(to_geojson_geometry(&tracks).to_string())),
            Err(e) => {
                debug!("[TripGeometry] Stored geometry for {} is not EWKT: {}", trip_id, e);
                Ok(None)
            }
        }
    }

    fn update_geometry(&self, trip_id: &str, update: &GeometryUpdate) -> Result<(), BackendError> {
        let mut trips = self.trips.lock().map_err(poisoned)?;
        let trip = trips.get_mut(trip_id).ok_or_else(|| trip_not_found(trip_id))?;
        trip.geometry = Some(update.ewkt.clone());
        if update.bounds.is_some() {
            trip.bounds = update.bounds;
        }
        Ok(())
    }

    fn record_upload(&self, record: &UploadRecord) -> Result<(), BackendError> {
        self.uploads.lock().map_err(poisoned)?.push(record.clone());
        Ok(())
    }
}

impl ObjectStore for InMemoryBackend {
    fn put_upload(&self, trip_id: &str, file: &GpxFile) -> Result<StoredObject, BackendError> {
        let mut objects = self.objects.lock().map_err(poisoned)?;
        let key = format!("trips/{}/gpx/{}-{}", trip_id, objects.len(), file.name);
        objects.push((key.clone(), file.content.clone()));
        Ok(StoredObject { key })
    }
}
