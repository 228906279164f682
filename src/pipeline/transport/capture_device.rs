use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::client::{build_http_client, check_status, map_reqwest_error, send_with_deadline};
use super::TransportError;
use crate::config::CaptureDeviceConfig;
use crate::pipeline::preparation::CapturedImage;

/// Name reported when the peripheral's health body does not carry one.
pub const DEFAULT_DEVICE_NAME: &str = "ESP32-CAM";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to save captured image to {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Identity of a reachable capture peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device: String,
    pub base_url: String,
}

#[derive(Deserialize)]
struct DeviceHealth {
    device: Option<String>,
}

/// Client for a networked camera that hands out JPEG frames behind a bearer token.
pub struct CaptureDeviceClient {
    client: reqwest::Client,
    config: CaptureDeviceConfig,
}

impl CaptureDeviceClient {
    pub fn new(config: CaptureDeviceConfig) -> Result<Self, TransportError> {
        let client = build_http_client(config.health_timeout)?;
        Ok(Self { client, config })
    }

    /// `GET /health` within the short health deadline.
    pub async fn check_availability(&self) -> bool {
        let url = format!("{}/health", self.config.base_url);
        match send_with_deadline(self.client.get(&url), self.config.health_timeout, &self.config.base_url)
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Capture device health check failed");
                false
            }
        }
    }

    /// Read the device name from its health endpoint.
    pub async fn device_info(&self) -> Result<DeviceInfo, CaptureError> {
        let url = format!("{}/health", self.config.base_url);
        let deadline = self.config.health_timeout;
        let response =
            send_with_deadline(self.client.get(&url), deadline, &self.config.base_url).await?;
        let response = check_status(response).await?;

        // A health body that is not JSON still means the device is up.
        let device = match response.bytes().await {
            Ok(body) => serde_json::from_slice::<DeviceHealth>(&body)
                .ok()
                .and_then(|h| h.device),
            Err(e) => return Err(map_reqwest_error(e, deadline, &self.config.base_url).into()),
        };

        Ok(DeviceInfo {
            device: device.unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
            base_url: self.config.base_url.clone(),
        })
    }

    /// Grab one frame and store it as `esp32_<millis>.jpg` in `dest_dir`.
    pub async fn capture(&self, dest_dir: &Path) -> Result<CapturedImage, CaptureError> {
        let url = format!("{}/capture", self.config.base_url);
        let deadline = self.config.capture_timeout;
        let request = self
            .client
            .get(&url)
            .bearer_auth(&self.config.bearer_token);

        let bytes = tokio::time::timeout(deadline, async {
            let response = request
                .send()
                .await
                .map_err(|e| map_reqwest_error(e, deadline, &self.config.base_url))?;
            let response = check_status(response).await?;
            response
                .bytes()
                .await
                .map_err(|e| map_reqwest_error(e, deadline, &self.config.base_url))
        })
        .await
        .map_err(|_| TransportError::Timeout {
            after_ms: deadline.as_millis() as u64,
        })??;

        if bytes.is_empty() {
            return Err(TransportError::MalformedResponse("device returned an empty image".into()).into());
        }

        let path = dest_dir.join(format!("esp32_{}.jpg", chrono::Utc::now().timestamp_millis()));
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|source| CaptureError::Save {
                path: path.clone(),
                source,
            })?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| CaptureError::Save {
                path: path.clone(),
                source,
            })?;

        tracing::info!(bytes = bytes.len(), path = %path.display(), "Captured image from device");
        Ok(CapturedImage::new(path))
    }
}
