//! Scan orchestrator: prepare -> health check -> predict -> normalize.
//!
//! Steps run strictly in sequence; image preparation is CPU-bound and runs
//! on the blocking pool. The current state is published on a `watch`
//! channel so a UI can follow along. An attempt in flight can be cancelled,
//! either with `cancel()` or by dropping the `run()`/`retry()` future. A
//! cancelled attempt never reaches `Success` or `Failed`, and its pending
//! request and timer are dropped with it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::failure::{FailureKind, ScanFailure};
use super::normalizer::{normalize, AnalysisResult, RiskPolicy};
use super::persistence::ScanSink;
use super::preparation::{CapturedImage, ImagePreparer, PreparationError};
use super::transport::InferenceClient;
use crate::db::DatabaseError;
use crate::models::ScanRecord;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("No successful result to save")]
    NothingToSave,

    #[error("No captured image to retry with")]
    NothingToRetry,

    #[error("A scan is already in progress")]
    Busy,

    #[error("Failed to save scan: {0}")]
    Store(#[from] DatabaseError),
}

/// Where the current scan attempt stands.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Idle,
    Preparing,
    CheckingAvailability,
    Predicting,
    Normalizing,
    Success(AnalysisResult),
    Failed(ScanFailure),
}

impl ScanState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::CheckingAvailability => "checking_availability",
            Self::Predicting => "predicting",
            Self::Normalizing => "normalizing",
            Self::Success(_) => "success",
            Self::Failed(_) => "failed",
        }
    }

    /// True while an attempt is running.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Preparing | Self::CheckingAvailability | Self::Predicting | Self::Normalizing
        )
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(AnalysisResult),
    Failed(ScanFailure),
    Cancelled,
}

pub struct ScanOrchestrator {
    preparer: Arc<dyn ImagePreparer>,
    client: Arc<dyn InferenceClient>,
    policy: RiskPolicy,
    skip_health_check: bool,
    state_tx: watch::Sender<ScanState>,
    captured: Mutex<Option<CapturedImage>>,
    cancel_token: Mutex<CancellationToken>,
    in_flight: AtomicBool,
    attempts: AtomicU32,
}

impl ScanOrchestrator {
    pub fn new(
        preparer: Arc<dyn ImagePreparer>,
        client: Arc<dyn InferenceClient>,
        policy: RiskPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(ScanState::Idle);
        Self {
            preparer,
            client,
            policy,
            skip_health_check: false,
            state_tx,
            captured: Mutex::new(None),
            cancel_token: Mutex::new(CancellationToken::new()),
            in_flight: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        }
    }

    /// Go straight to `predict` and rely on its error reporting.
    pub fn with_skip_health_check(mut self, skip: bool) -> Self {
        self.skip_health_check = skip;
        self
    }

    pub fn state(&self) -> ScanState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state_tx.subscribe()
    }

    /// Image the last attempt ran on, kept for `retry()` and for saving.
    pub fn captured_image(&self) -> Option<CapturedImage> {
        self.captured.lock().ok().and_then(|guard| guard.clone())
    }

    /// Analyze a newly captured image.
    pub async fn run(&self, captured: CapturedImage) -> Result<AttemptOutcome, OrchestratorError> {
        let (guard, token) = self.begin()?;
        if let Ok(mut slot) = self.captured.lock() {
            *slot = Some(captured.clone());
        }
        Ok(self.attempt(captured, guard, token).await)
    }

    /// Re-run the pipeline on the image from the previous attempt. Each
    /// retry gets fresh transport deadlines.
    pub async fn retry(&self) -> Result<AttemptOutcome, OrchestratorError> {
        let captured = self.captured_image().ok_or(OrchestratorError::NothingToRetry)?;
        let (guard, token) = self.begin()?;
        Ok(self.attempt(captured, guard, token).await)
    }

    /// Abandon the attempt in flight, if any. The captured image is kept.
    pub fn cancel(&self) {
        if let Ok(token) = self.cancel_token.lock() {
            token.cancel();
        }
    }

    /// Persist the successful result on explicit user confirmation.
    pub fn confirm_save(
        &self,
        sink: &dyn ScanSink,
        profile_id: Uuid,
    ) -> Result<ScanRecord, OrchestratorError> {
        let result = match self.state() {
            ScanState::Success(result) => result,
            _ => return Err(OrchestratorError::NothingToSave),
        };

        let image_reference = self.captured_image().map(|c| c.reference());
        let record = ScanRecord::from_result(&result, profile_id, image_reference);
        sink.append_scan(&record)?;

        self.clear_capture();
        self.transition(ScanState::Idle);
        Ok(record)
    }

    /// Drop the current result or failure and the captured image (retake).
    pub fn discard(&self) {
        if self.in_flight.load(Ordering::SeqCst) {
            self.cancel();
        }
        self.clear_capture();
        self.transition(ScanState::Idle);
    }

    /// Claim the in-flight slot and install the attempt's cancellation token.
    /// Both happen under the token lock, so a concurrent `cancel()` either
    /// precedes the attempt or reaches its token.
    fn begin(&self) -> Result<(InFlightGuard<'_>, CancellationToken), OrchestratorError> {
        let mut slot = self
            .cancel_token
            .lock()
            .map_err(|_| OrchestratorError::Busy)?;
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrchestratorError::Busy);
        }
        let token = CancellationToken::new();
        *slot = token.clone();
        Ok((InFlightGuard { orchestrator: self }, token))
    }

    fn clear_capture(&self) {
        if let Ok(mut guard) = self.captured.lock() {
            *guard = None;
        }
    }

    fn transition(&self, next: ScanState) {
        info!(state = next.name(), "Scan state");
        self.state_tx.send_replace(next);
    }

    async fn attempt(
        &self,
        captured: CapturedImage,
        _guard: InFlightGuard<'_>,
        token: CancellationToken,
    ) -> AttemptOutcome {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let contract = self.client.contract();
        let span = info_span!("scan_attempt", attempt, contract = contract.as_str());

        let outcome = async {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = self.execute(&captured) => Some(result),
            }
        }
        .instrument(span)
        .await;

        let outcome = match outcome {
            None => {
                info!(attempt, "Scan attempt cancelled");
                self.transition(ScanState::Idle);
                AttemptOutcome::Cancelled
            }
            Some(Ok(result)) => {
                info!(
                    attempt,
                    risk = result.risk_level().as_str(),
                    "Scan attempt succeeded"
                );
                self.transition(ScanState::Success(result.clone()));
                AttemptOutcome::Success(result)
            }
            Some(Err(failure)) => {
                warn!(attempt, kind = %failure.kind, message = %failure.message, "Scan attempt failed");
                self.transition(ScanState::Failed(failure.clone()));
                AttemptOutcome::Failed(failure)
            }
        };

        outcome
    }

    async fn execute(&self, captured: &CapturedImage) -> Result<AnalysisResult, ScanFailure> {
        let contract = self.client.contract();

        self.transition(ScanState::Preparing);
        let preparer = Arc::clone(&self.preparer);
        let image = captured.clone();
        let target_count = contract.image_count();
        let payloads = tokio::task::spawn_blocking(move || preparer.prepare(&image, target_count))
            .await
            .map_err(|e| PreparationError::Task(e.to_string()))??;

        if !self.skip_health_check {
            self.transition(ScanState::CheckingAvailability);
            if !self.client.check_availability().await {
                return Err(ScanFailure::new(
                    FailureKind::Unreachable,
                    "Analysis server did not pass its health check",
                ));
            }
        }

        self.transition(ScanState::Predicting);
        let response = self.client.predict(&payloads).await?;

        self.transition(ScanState::Normalizing);
        Ok(normalize(&response, self.policy)?)
    }
}

/// Releases the in-flight slot when an attempt ends, including when the
/// attempt future is dropped part way. A dropped attempt leaves the
/// orchestrator `Idle` with the captured image kept.
struct InFlightGuard<'a> {
    orchestrator: &'a ScanOrchestrator,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let orchestrator = self.orchestrator;
        let unfinished = orchestrator.state_tx.borrow().is_busy();
        if unfinished {
            info!("Scan attempt dropped before finishing");
            orchestrator.transition(ScanState::Idle);
        }
        orchestrator.in_flight.store(false, Ordering::SeqCst);
    }
}
