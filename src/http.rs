//! REST client for the trip backend.
//!
//! This module talks to a PostgREST-style API with:
//! - Row select and update on `trips`
//! - The `get_trip_geometry_geojson` RPC
//! - Presigned upload URLs from the `upload-gpx` function
//! - Automatic retry with exponential backoff on 429 and transport errors
//!
//! [`BlockingBackend`] runs the async client on its own tokio runtime and
//! implements [`TripStore`] and [`ObjectStore`] for [`TripUploader`](crate::TripUploader).

use std::time::Duration;

use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    BackendError, GeometryUpdate, GpxFile, ObjectStore, StoredObject, TripStore, UploadRecord,
};

const MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Which failures a request may be resent after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Repeating the request has no extra effect: retry 429s and transport errors
    Idempotent,
    /// Inserts: a dropped connection may still have committed, so only 429s are retried
    RateLimitOnly,
}

/// Connection settings for the backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`
    pub base_url: String,
    /// Public API key sent as the `apikey` header
    pub api_key: String,
    /// Signed-in user's JWT; the API key is used as bearer when absent
    pub access_token: Option<String>,
    /// Per-request timeout. Default: 30 seconds
    pub timeout_secs: u64,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Read `TRIP_GEOMETRY_API_URL`, `TRIP_GEOMETRY_API_KEY` and optionally
    /// `TRIP_GEOMETRY_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self, BackendError> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| BackendError::Config(format!("{} is not set", name)))
        };
        let mut config = Self::new(var("TRIP_GEOMETRY_API_URL")?, var("TRIP_GEOMETRY_API_KEY")?);
        config.access_token = std::env::var("TRIP_GEOMETRY_ACCESS_TOKEN").ok();
        Ok(config)
    }

    fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }
}

#[derive(Debug, Deserialize)]
struct TripGeometryRow {
    summary_geometry: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlRequest<'a> {
    filename: &'a str,
    file_type: &'a str,
    trip_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: Option<String>,
    key: Option<String>,
}

/// Geometry values come back as a string (EWKT/EWKB hex or GeoJSON text) or
/// as an inline GeoJSON object depending on the server.
fn geometry_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn update_body(update: &GeometryUpdate) -> Value {
    let mut body = Map::new();
    body.insert("summary_geometry".into(), Value::String(update.ewkt.clone()));
    if let Some(bounds) = update.bounds {
        body.insert("bounds_min_lat".into(), bounds.min_lat.into());
        body.insert("bounds_min_lng".into(), bounds.min_lng.into());
        body.insert("bounds_max_lat".into(), bounds.max_lat.into());
        body.insert("bounds_max_lng".into(), bounds.max_lng.into());
    }
    Value::Object(body)
}

fn backoff(retries: u32) -> Duration {
    // 400ms, 800ms, 1.6s
    Duration::from_millis(200 * (1 << retries.min(4)))
}

/// Async client for the trip backend.
pub struct RestClient {
    client: Client,
    config: BackendConfig,
}

impl RestClient {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.config.bearer())
    }

    /// Send a request, retrying 429s and (for [`Retry::Idempotent`]) transport
    /// errors. Non-success statuses are returned as [`BackendError::Status`].
    async fn send<F>(&self, label: &str, retry: Retry, build: F) -> Result<Response, BackendError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        loop {
            match build().send().await {
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(BackendError::Status {
                            status: 429,
                            message: "Max retries exceeded (429)".to_string(),
                        });
                    }
                    let wait = backoff(retries);
                    warn!("[TripGeometry] {} got 429, retry {} after {:?}", label, retries, wait);
                    tokio::time::sleep(wait).await;
                }
                Ok(resp) if !resp.status().is_success() => {
                    let status = resp.status().as_u16();
                    let message = resp.text().await.unwrap_or_default();
                    return Err(BackendError::Status { status, message });
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    retries += 1;
                    if retry == Retry::RateLimitOnly || retries > MAX_RETRIES {
                        return Err(BackendError::Network(format!("{}: {}", label, e)));
                    }
                    let wait = backoff(retries);
                    warn!("[TripGeometry] {} error: {}, retry {} after {:?}", label, e, retries, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    pub async fn fetch_raw_geometry(&self, trip_id: &str) -> Result<Option<String>, BackendError> {
        let resp = self
            .send("select trip geometry", Retry::Idempotent, || {
                self.authorized(self.client.get(self.rest_url("trips")))
                    .query(&[("id", format!("eq.{}", trip_id)), ("select", "summary_geometry".to_string())])
            })
            .await?;
        let rows: Vec<TripGeometryRow> = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        let row = rows.into_iter().next().ok_or_else(|| BackendError::Status {
            status: 404,
            message: format!("trip {} not found", trip_id),
        })?;
        Ok(geometry_text(row.summary_geometry))
    }

    pub async fn fetch_geometry_geojson(&self, trip_id: &str) -> Result<Option<String>, BackendError> {
        let resp = self
            .send("geometry rpc", Retry::Idempotent, || {
                self.authorized(self.client.post(self.rest_url("rpc/get_trip_geometry_geojson")))
                    .json(&serde_json::json!({ "trip_id": trip_id }))
            })
            .await?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(geometry_text(Some(value)))
    }

    pub async fn update_geometry(&self, trip_id: &str, update: &GeometryUpdate) -> Result<(), BackendError> {
        let body = update_body(update);
        self.send("update trip geometry", Retry::Idempotent, || {
            self.authorized(self.client.patch(self.rest_url("trips")))
                .query(&[("id", format!("eq.{}", trip_id))])
                .header("Prefer", "return=minimal")
                .json(&body)
        })
        .await?;
        info!("[TripGeometry] Saved geometry for trip {}", trip_id);
        Ok(())
    }

    pub async fn record_upload(&self, record: &UploadRecord) -> Result<(), BackendError> {
        let body = serde_json::json!({
            "trip_id": record.trip_id,
            "user_id": record.user_id,
            "filename": record.filename,
            "r2_key": record.object_key,
            "file_size_bytes": record.size_bytes,
        });
        self.send("record upload", Retry::RateLimitOnly, || {
            self.authorized(self.client.post(self.rest_url("trip_uploads")))
                .header("Prefer", "return=minimal")
                .json(&body)
        })
        .await?;
        Ok(())
    }

    /// Request a presigned URL, then PUT the file body to it.
    pub async fn put_upload(&self, trip_id: &str, file: &GpxFile) -> Result<StoredObject, BackendError> {
        let request = UploadUrlRequest {
            filename: &file.name,
            file_type: file.content_type(),
            trip_id,
        };
        let resp = self
            .send("upload url", Retry::RateLimitOnly, || {
                self.authorized(
                    self.client
                        .post(format!("{}/functions/v1/upload-gpx", self.config.base_url)),
                )
                .json(&request)
            })
            .await?;
        let signed: UploadUrlResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        let (Some(upload_url), Some(key)) = (signed.upload_url, signed.key) else {
            return Err(BackendError::Storage(format!(
                "no upload URL returned for {}",
                file.name
            )));
        };

        self.send("object put", Retry::Idempotent, || {
            self.client
                .put(&upload_url)
                .header(reqwest::header::CONTENT_TYPE, file.content_type())
                .body(file.content.clone())
        })
        .await
        .map_err(|e| BackendError::Storage(format!("Failed to upload {}: {}", file.name, e)))?;

        debug!("[TripGeometry] Stored {} ({} bytes) at {}", file.name, file.size(), key);
        Ok(StoredObject { key })
    }
}

/// Synchronous backend - runs the async client on a private tokio runtime.
pub struct BlockingBackend {
    runtime: tokio::runtime::Runtime,
    client: RestClient,
}

impl BlockingBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to create tokio runtime: {}", e)))?;
        let client = RestClient::new(config)?;
        Ok(Self { runtime, client })
    }
}

impl TripStore for BlockingBackend {
    fn fetch_raw_geometry(&self, trip_id: &str) -> Result<Option<String>, BackendError> {
        self.runtime.block_on(self.client.fetch_raw_geometry(trip_id))
    }

    fn fetch_geometry_geojson(&self, trip_id: &str) -> Result<Option<String>, BackendError> {
        self.runtime.block_on(self.client.fetch_geometry_geojson(trip_id))
    }

    fn update_geometry(&self, trip_id: &str, update: &GeometryUpdate) -> Result<(), BackendError> {
        self.runtime.block_on(self.client.update_geometry(trip_id, update))
    }

    fn record_upload(&self, record: &UploadRecord) -> Result<(), BackendError> {
        self.runtime.block_on(self.client.record_upload(record))
    }
}

impl ObjectStore for BlockingBackend {
    fn put_upload(&self, trip_id: &str, file: &GpxFile) -> Result<StoredObject, BackendError> {
        self.runtime.block_on(self.client.put_upload(trip_id, file))
    }
}
