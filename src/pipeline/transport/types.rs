use serde::{Deserialize, Serialize};

use super::TransportError;
pub use crate::models::ColorAnalysis;

/// Length of the feature vector accepted by `POST /predict`.
pub const FEATURE_LENGTH: usize = 512;

// ═══════════════════════════════════════════════════════════
// Backend contracts
// ═══════════════════════════════════════════════════════════

/// Which image endpoint the backend exposes, and how it wants its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendContract {
    /// `POST /analyze`, 1-3 parts under a repeated `files` field.
    Analyze,
    /// `POST /predict-images`, exactly three parts `n1`, `n2`, `n3`.
    PredictImages,
    /// `POST /predict-single-image`, one part `n1`.
    PredictSingleImage,
}

impl BackendContract {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::PredictImages => "predict-images",
            Self::PredictSingleImage => "predict-single-image",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::Analyze => "/analyze",
            Self::PredictImages => "/predict-images",
            Self::PredictSingleImage => "/predict-single-image",
        }
    }

    /// Number of payloads the preparer should produce for this contract.
    pub fn image_count(&self) -> usize {
        match self {
            Self::Analyze | Self::PredictSingleImage => 1,
            Self::PredictImages => 3,
        }
    }

    /// Whether a request with `count` parts is valid for this contract.
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Self::Analyze => (1..=3).contains(&count),
            Self::PredictImages => count == 3,
            Self::PredictSingleImage => count == 1,
        }
    }

    /// Multipart field name of the part at `index`.
    pub fn field_name(&self, index: usize) -> String {
        match self {
            Self::Analyze => "files".to_string(),
            Self::PredictImages | Self::PredictSingleImage => format!("n{}", index + 1),
        }
    }
}

impl std::fmt::Display for BackendContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendContract {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze" => Ok(Self::Analyze),
            "predict-images" => Ok(Self::PredictImages),
            "predict-single-image" => Ok(Self::PredictSingleImage),
            other => Err(format!("unknown backend contract: {other}")),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Wire response
// ═══════════════════════════════════════════════════════════

/// Anemia flag as sent by the backend: `0`/`1` or `true`/`false`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireFlag {
    Bool(bool),
    Int(i64),
}

impl WireFlag {
    /// `None` for integers other than 0 and 1.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            Self::Int(_) => None,
        }
    }
}

/// Raw prediction body, identical across all endpoints.
///
/// Every field is optional here; deciding what is required happens in the
/// normalizer, the only place that branches on field presence.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PredictionResponse {
    /// Estimated hemoglobin, g/dL.
    #[serde(default, alias = "hemoglobin", alias = "hemoglobin_estimate")]
    pub hb_pred: Option<f64>,
    #[serde(default)]
    pub is_anemic: Option<WireFlag>,
    #[serde(default)]
    pub num_images: Option<u32>,
    /// Model confidence on a 0-100 scale, when the backend reports one.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub color_analysis: Option<ColorAnalysis>,
}

impl PredictionResponse {
    /// Convenience constructor for the common two-field shape.
    pub fn new(hb_pred: f64, is_anemic: bool) -> Self {
        Self {
            hb_pred: Some(hb_pred),
            is_anemic: Some(WireFlag::Bool(is_anemic)),
            ..Self::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

// ═══════════════════════════════════════════════════════════
// Feature-vector path
// ═══════════════════════════════════════════════════════════

/// Fixed-length embedding sent to `POST /predict` instead of raw images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    features: Vec<f32>,
}

impl FeatureVector {
    pub fn new(features: Vec<f32>) -> Result<Self, TransportError> {
        if features.len() != FEATURE_LENGTH {
            return Err(TransportError::InvalidRequest(format!(
                "feature vector must have {FEATURE_LENGTH} values, got {}",
                features.len()
            )));
        }
        if features.iter().any(|v| !v.is_finite()) {
            return Err(TransportError::InvalidRequest(
                "feature vector contains non-finite values".into(),
            ));
        }
        Ok(Self { features })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_paths_and_fields() {
        assert_eq!(BackendContract::Analyze.path(), "/analyze");
        assert_eq!(BackendContract::Analyze.field_name(2), "files");
        assert_eq!(BackendContract::PredictImages.field_name(0), "n1");
        assert_eq!(BackendContract::PredictImages.field_name(2), "n3");
        assert_eq!(BackendContract::PredictSingleImage.field_name(0), "n1");
    }

    #[test]
    fn contract_part_counts() {
        assert_eq!(BackendContract::PredictImages.image_count(), 3);
        assert!(BackendContract::Analyze.accepts(2));
        assert!(!BackendContract::Analyze.accepts(4));
        assert!(!BackendContract::PredictImages.accepts(1));
        assert!(!BackendContract::PredictSingleImage.accepts(3));
    }

    #[test]
    fn contract_parses_from_its_name() {
        for contract in [
            BackendContract::Analyze,
            BackendContract::PredictImages,
            BackendContract::PredictSingleImage,
        ] {
            assert_eq!(contract.as_str().parse::<BackendContract>().unwrap(), contract);
        }
        assert!("upload".parse::<BackendContract>().is_err());
    }

    #[test]
    fn response_with_integer_flag() {
        let resp: PredictionResponse =
            serde_json::from_str(r#"{"ok": true, "num_images": 3, "hb_pred": 13.2, "is_anemic": 0}"#)
                .unwrap();
        assert_eq!(resp.hb_pred, Some(13.2));
        assert_eq!(resp.is_anemic.and_then(|f| f.as_bool()), Some(false));
        assert_eq!(resp.num_images, Some(3));
        assert!(resp.confidence.is_none());
    }

    #[test]
    fn response_with_boolean_flag_and_extras() {
        let resp: PredictionResponse = serde_json::from_str(
            r#"{"hb_pred": 9.1, "is_anemic": true, "confidence": 91.5,
                "color_analysis": {"average_red": 190.0, "average_green": 150.0,
                                   "average_blue": 140.0, "paleness": 0.6}}"#,
        )
        .unwrap();
        assert_eq!(resp.is_anemic.and_then(|f| f.as_bool()), Some(true));
        assert_eq!(resp.confidence, Some(91.5));
        assert_eq!(resp.color_analysis.map(|c| c.paleness), Some(0.6));
    }

    #[test]
    fn response_missing_fields_still_parses() {
        let resp: PredictionResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.hb_pred.is_none());
        assert!(resp.is_anemic.is_none());
    }

    #[test]
    fn unexpected_integer_flag_is_not_a_boolean() {
        assert_eq!(WireFlag::Int(2).as_bool(), None);
    }

    #[test]
    fn feature_vector_length_enforced() {
        assert!(FeatureVector::new(vec![0.0; FEATURE_LENGTH]).is_ok());
        let err = FeatureVector::new(vec![0.0; 128]).unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }

    #[test]
    fn feature_vector_rejects_nan() {
        let mut values = vec![0.5; FEATURE_LENGTH];
        values[10] = f32::NAN;
        assert!(FeatureVector::new(values).is_err());
    }

    #[test]
    fn feature_vector_serializes_as_features_key() {
        let vector = FeatureVector::new(vec![0.25; FEATURE_LENGTH]).unwrap();
        let json = serde_json::to_value(&vector).unwrap();
        assert_eq!(json["features"].as_array().unwrap().len(), FEATURE_LENGTH);
    }
}
