use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use tracing::{debug, warn};

use super::types::{BackendContract, FeatureVector, PredictionResponse};
use super::TransportError;
use crate::config::BackendConfig;
use crate::pipeline::preparation::PreparedPayload;

/// Longest slice of a non-JSON body quoted back in an error.
const BODY_SNIPPET_CHARS: usize = 200;

/// Client for the remote hemoglobin inference service.
///
/// Every call owns its own deadline; nothing is retried and no state is kept
/// between calls, so a retry is simply another call. Dropping a returned
/// future aborts the request and its timer.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Contract the client was configured for; dictates the payload count.
    fn contract(&self) -> BackendContract;

    /// `GET /health`. False on any non-2xx status or transport failure.
    async fn check_availability(&self) -> bool;

    /// Multipart image prediction on the configured endpoint.
    async fn predict(
        &self,
        payloads: &[PreparedPayload],
    ) -> Result<PredictionResponse, TransportError>;

    /// JSON `POST /predict` with a pre-computed feature vector.
    async fn predict_features(
        &self,
        features: &FeatureVector,
    ) -> Result<PredictionResponse, TransportError>;
}

/// reqwest-backed inference client.
pub struct HttpInferenceClient {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpInferenceClient {
    pub fn new(config: BackendConfig) -> Result<Self, TransportError> {
        let client = build_http_client(config.connect_timeout)?;
        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn build_form(&self, payloads: &[PreparedPayload]) -> Result<Form, TransportError> {
        let contract = self.config.contract;
        let mut form = Form::new();
        for (i, payload) in payloads.iter().enumerate() {
            let part = Part::bytes(payload.bytes.clone())
                .file_name(payload.filename.clone())
                .mime_str(payload.content_type)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            form = form.part(contract.field_name(i), part);
        }
        Ok(form)
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    fn contract(&self) -> BackendContract {
        self.config.contract
    }

    async fn check_availability(&self) -> bool {
        let url = format!("{}/health", self.config.base_url);
        let request = self.client.get(&url);
        match send_with_deadline(request, self.config.health_timeout, &self.config.base_url).await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(status = response.status().as_u16(), "Health check returned non-success");
                false
            }
            Err(e) => {
                debug!(error = %e, "Health check failed");
                false
            }
        }
    }

    async fn predict(
        &self,
        payloads: &[PreparedPayload],
    ) -> Result<PredictionResponse, TransportError> {
        let contract = self.config.contract;
        if !contract.accepts(payloads.len()) {
            return Err(TransportError::InvalidRequest(format!(
                "{contract} does not accept {} image(s)",
                payloads.len()
            )));
        }

        let url = format!("{}{}", self.config.base_url, contract.path());
        let deadline = self.config.predict_timeout(payloads.len());
        let form = self.build_form(payloads)?;

        debug!(
            endpoint = contract.path(),
            parts = payloads.len(),
            upload_bytes = payloads.iter().map(|p| p.bytes.len()).sum::<usize>(),
            deadline_ms = deadline.as_millis() as u64,
            "Sending prediction request"
        );

        let request = self.client.post(&url).multipart(form);
        fetch_prediction(request, deadline, &self.config.base_url).await
    }

    async fn predict_features(
        &self,
        features: &FeatureVector,
    ) -> Result<PredictionResponse, TransportError> {
        let url = format!("{}/predict", self.config.base_url);
        let request = self.client.post(&url).json(features);
        fetch_prediction(request, self.config.single_image_timeout, &self.config.base_url).await
    }
}

// ═══════════════════════════════════════════════════════════
// Shared HTTP plumbing
// ═══════════════════════════════════════════════════════════

pub(crate) fn build_http_client(connect_timeout: Duration) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| TransportError::InvalidRequest(format!("HTTP client setup failed: {e}")))
}

/// Send a request and read its whole body within one deadline.
///
/// The deadline starts now, independent of any earlier attempt.
pub(crate) async fn send_with_deadline(
    request: RequestBuilder,
    deadline: Duration,
    base_url: &str,
) -> Result<reqwest::Response, TransportError> {
    match tokio::time::timeout(deadline, request.send()).await {
        Ok(result) => result.map_err(|e| map_reqwest_error(e, deadline, base_url)),
        Err(_) => Err(timeout_error(deadline)),
    }
}

/// Send, check status, read and parse the prediction body under one deadline.
async fn fetch_prediction(
    request: RequestBuilder,
    deadline: Duration,
    base_url: &str,
) -> Result<PredictionResponse, TransportError> {
    let started = std::time::Instant::now();

    let outcome = tokio::time::timeout(deadline, async {
        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, deadline, base_url))?;
        let response = check_status(response).await?;
        response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, deadline, base_url))
    })
    .await;

    let body = match outcome {
        Ok(result) => result?,
        Err(_) => return Err(timeout_error(deadline)),
    };

    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        body_bytes = body.len(),
        "Prediction response received"
    );

    parse_prediction(&body)
}

/// Map non-success statuses onto the taxonomy: 401 is `Unauthorized`,
/// everything else non-2xx is `Server` with the body text.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(TransportError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), "Backend returned non-success status");
    Err(TransportError::Server {
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn map_reqwest_error(e: reqwest::Error, deadline: Duration, base_url: &str) -> TransportError {
    if e.is_connect() {
        TransportError::Unreachable(base_url.to_string())
    } else if e.is_timeout() {
        timeout_error(deadline)
    } else if e.is_decode() || e.is_body() {
        TransportError::MalformedResponse(e.to_string())
    } else {
        TransportError::Unreachable(format!("{base_url}: {e}"))
    }
}

fn timeout_error(deadline: Duration) -> TransportError {
    TransportError::Timeout {
        after_ms: deadline.as_millis() as u64,
    }
}

/// Parse a 2xx body. Unparseable JSON is a contract violation, not a user error.
pub fn parse_prediction(body: &[u8]) -> Result<PredictionResponse, TransportError> {
    serde_json::from_slice(body).map_err(|e| {
        let snippet: String = String::from_utf8_lossy(body)
            .chars()
            .take(BODY_SNIPPET_CHARS)
            .collect();
        TransportError::MalformedResponse(format!("{e}: {snippet}"))
    })
}

// ═══════════════════════════════════════════════════════════
// MockInferenceClient
// ═══════════════════════════════════════════════════════════

/// Scripted client for exercising callers without a network.
///
/// Outcomes are returned in order; once the script is exhausted the last
/// outcome repeats.
pub struct MockInferenceClient {
    contract: BackendContract,
    available: bool,
    outcomes: Vec<Result<PredictionResponse, TransportError>>,
    delay: Option<Duration>,
    health_calls: AtomicUsize,
    predict_calls: AtomicUsize,
    last_payload_count: Mutex<Option<usize>>,
}

impl MockInferenceClient {
    pub fn new(response: PredictionResponse) -> Self {
        Self {
            contract: BackendContract::Analyze,
            available: true,
            outcomes: vec![Ok(response)],
            delay: None,
            health_calls: AtomicUsize::new(0),
            predict_calls: AtomicUsize::new(0),
            last_payload_count: Mutex::new(None),
        }
    }

    pub fn failing(error: TransportError) -> Self {
        let mut mock = Self::new(PredictionResponse::default());
        mock.outcomes = vec![Err(error)];
        mock
    }

    /// Replace the script with a sequence of outcomes.
    pub fn with_outcomes(mut self, outcomes: Vec<Result<PredictionResponse, TransportError>>) -> Self {
        self.outcomes = outcomes;
        self
    }

    pub fn with_contract(mut self, contract: BackendContract) -> Self {
        self.contract = contract;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Delay every prediction, for cancellation tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn predict_calls(&self) -> usize {
        self.predict_calls.load(Ordering::SeqCst)
    }

    pub fn last_payload_count(&self) -> Option<usize> {
        self.last_payload_count.lock().ok().and_then(|guard| *guard)
    }

    async fn next_outcome(&self) -> Result<PredictionResponse, TransportError> {
        let call = self.predict_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.outcomes.get(call).or_else(|| self.outcomes.last()) {
            Some(outcome) => outcome.clone(),
            None => Err(TransportError::MalformedResponse("no scripted response".into())),
        }
    }
}

#[async_trait]
impl InferenceClient for MockInferenceClient {
    fn contract(&self) -> BackendContract {
        self.contract
    }

    async fn check_availability(&self) -> bool {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.available
    }

    async fn predict(
        &self,
        payloads: &[PreparedPayload],
    ) -> Result<PredictionResponse, TransportError> {
        if let Ok(mut guard) = self.last_payload_count.lock() {
            *guard = Some(payloads.len());
        }
        self.next_outcome().await
    }

    async fn predict_features(
        &self,
        _features: &FeatureVector,
    ) -> Result<PredictionResponse, TransportError> {
        self.next_outcome().await
    }
}
