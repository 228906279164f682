//! Local stand-in for the inference backend and the capture peripheral.
//!
//! Serves canned predictions on every endpoint the client knows about, with
//! optional latency and forced status codes, and counts what it receives.
//! Used by the test suite over real HTTP and by `anemodx stub` for manual runs.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::pipeline::preparation::encode_jpeg;
use crate::pipeline::transport::FEATURE_LENGTH;

/// What the stub answers with.
#[derive(Debug, Clone)]
pub struct StubBehavior {
    pub hb_pred: f64,
    pub is_anemic: bool,
    pub confidence: Option<f64>,
    /// Latency added to every prediction.
    pub delay: Duration,
    pub health_status: u16,
    pub predict_status: u16,
    /// Sent verbatim with status 200 instead of the JSON prediction.
    pub raw_body: Option<String>,
    /// Bearer token `/capture` expects.
    pub device_token: String,
    pub device_name: Option<String>,
    pub capture_image: Vec<u8>,
}

impl Default for StubBehavior {
    fn default() -> Self {
        let frame = image::RgbImage::from_pixel(64, 48, image::Rgb([214, 160, 150]));
        Self {
            hb_pred: 13.2,
            is_anemic: false,
            confidence: None,
            delay: Duration::ZERO,
            health_status: 200,
            predict_status: 200,
            raw_body: None,
            device_token: crate::config::DEFAULT_DEVICE_TOKEN.to_string(),
            device_name: None,
            capture_image: encode_jpeg(&frame, 90).unwrap_or_default(),
        }
    }
}

/// Request counters, readable while the stub runs.
#[derive(Debug, Default)]
pub struct StubStats {
    health_requests: AtomicUsize,
    predict_requests: AtomicUsize,
    feature_requests: AtomicUsize,
    image_parts: AtomicUsize,
    capture_requests: AtomicUsize,
}

impl StubStats {
    pub fn health_requests(&self) -> usize {
        self.health_requests.load(Ordering::SeqCst)
    }

    /// Multipart prediction requests (all image endpoints).
    pub fn predict_requests(&self) -> usize {
        self.predict_requests.load(Ordering::SeqCst)
    }

    pub fn feature_requests(&self) -> usize {
        self.feature_requests.load(Ordering::SeqCst)
    }

    /// Image parts received across all multipart requests.
    pub fn image_parts(&self) -> usize {
        self.image_parts.load(Ordering::SeqCst)
    }

    pub fn capture_requests(&self) -> usize {
        self.capture_requests.load(Ordering::SeqCst)
    }
}

struct StubState {
    behavior: StubBehavior,
    stats: Arc<StubStats>,
}

/// A running stub server. Dropping it without `shutdown` leaves the task running
/// until the runtime stops.
pub struct StubBackend {
    addr: SocketAddr,
    stats: Arc<StubStats>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl StubBackend {
    /// Start on an ephemeral loopback port.
    pub async fn start(behavior: StubBehavior) -> std::io::Result<Self> {
        Self::bind(SocketAddr::from(([127, 0, 0, 1], 0)), behavior).await
    }

    pub async fn bind(addr: SocketAddr, behavior: StubBehavior) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        let stats = Arc::new(StubStats::default());
        let state = Arc::new(StubState {
            behavior,
            stats: stats.clone(),
        });

        let app = Router::new()
            .route("/health", get(handle_health))
            .route("/analyze", post(handle_images))
            .route("/predict-images", post(handle_images))
            .route("/predict-single-image", post(handle_images))
            .route("/predict", post(handle_features))
            .route("/capture", get(handle_capture))
            .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let shutdown_signal = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal)
                .await
            {
                tracing::error!("Stub server error: {e}");
            }
        });

        tracing::info!(addr = %addr, "Stub backend started");

        Ok(Self {
            addr,
            stats,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn stats(&self) -> Arc<StubStats> {
        self.stats.clone()
    }

    /// Stop accepting connections; requests still sleeping are abandoned after 1 s.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(Duration::from_secs(1), &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
        tracing::info!(addr = %self.addr, "Stub backend stopped");
    }
}

// ---------------------------------------------------------------------------
// Axum handlers
// ---------------------------------------------------------------------------

fn status_or_500(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn handle_health(State(state): State<Arc<StubState>>) -> Response {
    state.stats.health_requests.fetch_add(1, Ordering::SeqCst);
    let status = status_or_500(state.behavior.health_status);
    if !status.is_success() {
        return (status, "unhealthy").into_response();
    }

    let mut body = json!({ "status": "ok", "mode": "stub_testing" });
    if let Some(device) = &state.behavior.device_name {
        body["device"] = json!(device);
    }
    (status, Json(body)).into_response()
}

async fn handle_images(State(state): State<Arc<StubState>>, mut multipart: Multipart) -> Response {
    state.stats.predict_requests.fetch_add(1, Ordering::SeqCst);

    let mut parts = 0usize;
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.bytes().await {
            Ok(bytes) if !bytes.is_empty() => parts += 1,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Stub failed to read part: {e}");
                return (StatusCode::BAD_REQUEST, "unreadable part").into_response();
            }
        }
    }
    state.stats.image_parts.fetch_add(parts, Ordering::SeqCst);

    prediction_response(&state, parts).await
}

async fn handle_features(
    State(state): State<Arc<StubState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    state.stats.feature_requests.fetch_add(1, Ordering::SeqCst);

    let length = body
        .get("features")
        .and_then(|f| f.as_array())
        .map(|a| a.len());
    if length != Some(FEATURE_LENGTH) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("expected {FEATURE_LENGTH} features"),
        )
            .into_response();
    }

    prediction_response(&state, 0).await
}

async fn prediction_response(state: &StubState, num_images: usize) -> Response {
    let behavior = &state.behavior;
    if !behavior.delay.is_zero() {
        tokio::time::sleep(behavior.delay).await;
    }

    let status = status_or_500(behavior.predict_status);
    if !status.is_success() {
        return (status, "stub failure").into_response();
    }
    if let Some(raw) = &behavior.raw_body {
        return (StatusCode::OK, raw.clone()).into_response();
    }

    let mut body = json!({
        "ok": true,
        "num_images": num_images,
        "hb_pred": behavior.hb_pred,
        "is_anemic": i32::from(behavior.is_anemic),
    });
    if let Some(confidence) = behavior.confidence {
        body["confidence"] = json!(confidence);
    }
    Json(body).into_response()
}

async fn handle_capture(State(state): State<Arc<StubState>>, headers: HeaderMap) -> Response {
    state.stats.capture_requests.fetch_add(1, Ordering::SeqCst);

    let expected = format!("Bearer {}", state.behavior.device_token);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/jpeg")],
        state.behavior.capture_image.clone(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_binds_ephemeral_port() {
        let stub = StubBackend::start(StubBehavior::default()).await.unwrap();
        assert_ne!(stub.addr().port(), 0);
        assert!(stub.base_url().starts_with("http://127.0.0.1:"));
        stub.shutdown().await;
    }

    #[tokio::test]
    async fn health_reports_stub_mode() {
        let stub = StubBackend::start(StubBehavior::default()).await.unwrap();
        let body: serde_json::Value = reqwest::get(format!("{}/health", stub.base_url()))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["mode"], "stub_testing");
        assert_eq!(stub.stats().health_requests(), 1);
        stub.shutdown().await;
    }

    #[tokio::test]
    async fn anemic_flag_sent_as_integer() {
        let stub = StubBackend::start(StubBehavior {
            hb_pred: 9.4,
            is_anemic: true,
            ..StubBehavior::default()
        })
        .await
        .unwrap();
        let body: serde_json::Value = reqwest::Client::new()
            .post(format!("{}/predict", stub.base_url()))
            .json(&json!({ "features": vec![0.0f32; FEATURE_LENGTH] }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["is_anemic"], 1);
        assert_eq!(body["hb_pred"], 9.4);
        stub.shutdown().await;
    }

    #[tokio::test]
    async fn short_feature_vector_rejected() {
        let stub = StubBackend::start(StubBehavior::default()).await.unwrap();
        let status = reqwest::Client::new()
            .post(format!("{}/predict", stub.base_url()))
            .json(&json!({ "features": [1.0, 2.0] }))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status.as_u16(), 422);
        stub.shutdown().await;
    }

    #[test]
    fn default_capture_image_is_jpeg() {
        let behavior = StubBehavior::default();
        assert_eq!(&behavior.capture_image[..2], &[0xFF, 0xD8]);
    }
}
