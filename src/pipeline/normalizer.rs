//! Response normalization: backend prediction -> domain result.
//!
//! The only place that decides which wire fields are required. Pure: the
//! same response and policy always produce the same result.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::models::{ColorAnalysis, RiskLevel};
use crate::pipeline::transport::{PredictionResponse, WireFlag};

/// Below this (g/dL), an anemic reading gets the urgent recommendation set.
pub const URGENT_HEMOGLOBIN: f64 = 8.0;
/// Below this (g/dL), an anemic reading is high risk.
pub const HIGH_RISK_HEMOGLOBIN: f64 = 10.0;
/// Threshold-only policy: below this (g/dL) is medium risk.
pub const MEDIUM_RISK_HEMOGLOBIN: f64 = 12.5;
/// Readings above this are treated as a broken backend, not a person.
pub const MAX_PLAUSIBLE_HEMOGLOBIN: f64 = 30.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("Response has no hemoglobin estimate")]
    MissingHemoglobin,

    #[error("Hemoglobin estimate out of range: {0}")]
    InvalidHemoglobin(f64),

    #[error("Response has no anemia flag")]
    MissingAnemiaFlag,

    #[error("Anemia flag is not 0/1: {0}")]
    InvalidAnemiaFlag(i64),
}

/// How a hemoglobin estimate becomes a risk tier.
///
/// The two policies disagree near the boundaries (an anemic 11.0 g/dL is
/// Medium under both, but a non-anemic 11.0 g/dL is Low when gated and
/// Medium under thresholds), so exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskPolicy {
    /// Anemia flag decides Low vs. elevated; hemoglobin grades the elevated tier.
    #[default]
    AnemiaFlagGated,
    /// Hemoglobin alone: <10 High, <12.5 Medium, else Low.
    ThresholdOnly,
}

impl std::str::FromStr for RiskPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anemia-flag-gated" => Ok(Self::AnemiaFlagGated),
            "threshold-only" => Ok(Self::ThresholdOnly),
            other => Err(format!("unknown risk policy: {other}")),
        }
    }
}

/// Static recommendation sets, selected by tier only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationTier {
    Urgent,
    High,
    Medium,
    Low,
}

impl RecommendationTier {
    pub fn recommendations(&self) -> &'static [&'static str] {
        match self {
            Self::Urgent => &[
                "Seek immediate medical attention for a confirmatory blood test",
                "Consult with a healthcare professional immediately",
                "Get a complete blood count (CBC) test",
                "Avoid strenuous activity until you have been evaluated",
            ],
            Self::High => &[
                "Consult with a healthcare professional immediately",
                "Consider iron-rich foods in your diet",
                "Get a complete blood count (CBC) test",
                "Avoid activities that may worsen fatigue",
            ],
            Self::Medium => &[
                "Schedule a check-up with your doctor",
                "Monitor your energy levels and symptoms",
                "Include iron-rich foods like spinach, red meat, and legumes",
                "Consider taking vitamin C to improve iron absorption",
            ],
            Self::Low => &[
                "Maintain a balanced diet rich in iron",
                "Regular health check-ups are recommended",
                "Stay hydrated and get adequate sleep",
                "Continue monitoring your health",
            ],
        }
    }
}

/// Domain result of one successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    risk_level: RiskLevel,
    hemoglobin_level: f64,
    confidence: Option<f64>,
    recommendations: Vec<String>,
    color_analysis: Option<ColorAnalysis>,
}

impl AnalysisResult {
    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    /// Estimate rounded to 0.1 g/dL for display. The tier is computed from the
    /// unrounded value.
    pub fn hemoglobin_level(&self) -> f64 {
        self.hemoglobin_level
    }

    /// `None` when the backend reported no usable confidence.
    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    pub fn color_analysis(&self) -> Option<&ColorAnalysis> {
        self.color_analysis.as_ref()
    }
}

/// Map a raw prediction to a domain result under `policy`.
pub fn normalize(
    response: &PredictionResponse,
    policy: RiskPolicy,
) -> Result<AnalysisResult, NormalizeError> {
    let raw = response.hb_pred.ok_or(NormalizeError::MissingHemoglobin)?;
    if !raw.is_finite() || raw <= 0.0 || raw > MAX_PLAUSIBLE_HEMOGLOBIN {
        return Err(NormalizeError::InvalidHemoglobin(raw));
    }
    let hemoglobin_level = round_tenth(raw);

    let tier = match policy {
        RiskPolicy::AnemiaFlagGated => {
            let anemic = anemia_flag(response.is_anemic)?;
            gated_tier(anemic, raw)
        }
        RiskPolicy::ThresholdOnly => threshold_tier(raw),
    };

    let risk_level = match tier {
        RecommendationTier::Urgent | RecommendationTier::High => RiskLevel::High,
        RecommendationTier::Medium => RiskLevel::Medium,
        RecommendationTier::Low => RiskLevel::Low,
    };

    Ok(AnalysisResult {
        risk_level,
        hemoglobin_level,
        confidence: usable_confidence(response.confidence),
        recommendations: tier
            .recommendations()
            .iter()
            .map(|s| s.to_string())
            .collect(),
        color_analysis: response.color_analysis,
    })
}

fn anemia_flag(flag: Option<WireFlag>) -> Result<bool, NormalizeError> {
    match flag {
        None => Err(NormalizeError::MissingAnemiaFlag),
        Some(WireFlag::Bool(b)) => Ok(b),
        Some(f @ WireFlag::Int(n)) => f.as_bool().ok_or(NormalizeError::InvalidAnemiaFlag(n)),
    }
}

fn gated_tier(anemic: bool, hemoglobin: f64) -> RecommendationTier {
    if !anemic {
        RecommendationTier::Low
    } else if hemoglobin < URGENT_HEMOGLOBIN {
        RecommendationTier::Urgent
    } else if hemoglobin < HIGH_RISK_HEMOGLOBIN {
        RecommendationTier::High
    } else {
        RecommendationTier::Medium
    }
}

fn threshold_tier(hemoglobin: f64) -> RecommendationTier {
    if hemoglobin < HIGH_RISK_HEMOGLOBIN {
        RecommendationTier::High
    } else if hemoglobin < MEDIUM_RISK_HEMOGLOBIN {
        RecommendationTier::Medium
    } else {
        RecommendationTier::Low
    }
}

fn usable_confidence(raw: Option<f64>) -> Option<f64> {
    match raw {
        Some(c) if c.is_finite() && (0.0..=100.0).contains(&c) => Some(c),
        Some(c) => {
            warn!(confidence = c, "Ignoring out-of-range confidence from backend");
            None
        }
        None => None,
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gated(hb: f64, anemic: bool) -> AnalysisResult {
        normalize(&PredictionResponse::new(hb, anemic), RiskPolicy::AnemiaFlagGated).unwrap()
    }

    fn threshold(hb: f64) -> AnalysisResult {
        normalize(&PredictionResponse::new(hb, false), RiskPolicy::ThresholdOnly).unwrap()
    }

    #[test]
    fn severe_anemia_is_high_with_urgent_advice() {
        let result = gated(7.2, true);
        assert_eq!(result.risk_level(), RiskLevel::High);
        assert_eq!(result.hemoglobin_level(), 7.2);
        assert!(result
            .recommendations()
            .iter()
            .any(|r| r.contains("immediate medical attention")));
    }

    #[test]
    fn non_anemic_is_low_with_maintenance_advice() {
        let result = gated(13.0, false);
        assert_eq!(result.risk_level(), RiskLevel::Low);
        assert_eq!(
            result.recommendations(),
            RecommendationTier::Low.recommendations()
        );
    }

    #[test]
    fn every_anemic_reading_below_eight_is_high() {
        for tenths in 1..80 {
            let hb = tenths as f64 / 10.0;
            assert_eq!(gated(hb, true).risk_level(), RiskLevel::High, "hb={hb}");
        }
    }

    #[test]
    fn non_anemic_is_low_regardless_of_hemoglobin() {
        for hb in [2.0, 7.9, 9.5, 11.0, 12.4, 16.8, 29.9] {
            assert_eq!(gated(hb, false).risk_level(), RiskLevel::Low, "hb={hb}");
        }
    }

    #[test]
    fn gated_boundaries() {
        assert_eq!(gated(8.0, true).risk_level(), RiskLevel::High);
        assert_eq!(
            gated(8.0, true).recommendations(),
            RecommendationTier::High.recommendations()
        );
        assert_eq!(gated(9.9, true).risk_level(), RiskLevel::High);
        assert_eq!(gated(10.0, true).risk_level(), RiskLevel::Medium);
        assert_eq!(gated(11.0, true).risk_level(), RiskLevel::Medium);
    }

    #[test]
    fn threshold_policy_ignores_flag() {
        assert_eq!(threshold(9.9).risk_level(), RiskLevel::High);
        assert_eq!(threshold(10.0).risk_level(), RiskLevel::Medium);
        assert_eq!(threshold(12.4).risk_level(), RiskLevel::Medium);
        assert_eq!(threshold(12.5).risk_level(), RiskLevel::Low);

        let anemic_high_hb =
            normalize(&PredictionResponse::new(13.0, true), RiskPolicy::ThresholdOnly).unwrap();
        assert_eq!(anemic_high_hb.risk_level(), RiskLevel::Low);
    }

    #[test]
    fn policies_disagree_at_eleven_without_flag() {
        assert_eq!(gated(11.0, false).risk_level(), RiskLevel::Low);
        assert_eq!(threshold(11.0).risk_level(), RiskLevel::Medium);
    }

    #[test]
    fn threshold_policy_never_uses_urgent_set() {
        assert_eq!(
            threshold(6.0).recommendations(),
            RecommendationTier::High.recommendations()
        );
    }

    #[test]
    fn classification_uses_raw_estimate_not_display_value() {
        // 7.96 displays as 8.0 but is still below the urgent line
        let result = gated(7.96, true);
        assert_eq!(result.hemoglobin_level(), 8.0);
        assert_eq!(result.risk_level(), RiskLevel::High);
        assert_eq!(
            result.recommendations(),
            RecommendationTier::Urgent.recommendations()
        );

        let result = gated(9.96, true);
        assert_eq!(result.hemoglobin_level(), 10.0);
        assert_eq!(result.risk_level(), RiskLevel::High);

        let result = threshold(12.46);
        assert_eq!(result.hemoglobin_level(), 12.5);
        assert_eq!(result.risk_level(), RiskLevel::Medium);
    }

    #[test]
    fn normalize_is_deterministic() {
        let response = PredictionResponse::new(9.3, true).with_confidence(72.5);
        let a = normalize(&response, RiskPolicy::AnemiaFlagGated).unwrap();
        let b = normalize(&response, RiskPolicy::AnemiaFlagGated).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_confidence_is_absent_not_invented() {
        assert_eq!(gated(12.0, false).confidence(), None);
    }

    #[test]
    fn reported_confidence_passes_through() {
        let response = PredictionResponse::new(12.0, false).with_confidence(88.0);
        let result = normalize(&response, RiskPolicy::AnemiaFlagGated).unwrap();
        assert_eq!(result.confidence(), Some(88.0));
    }

    #[test]
    fn out_of_range_confidence_dropped() {
        let response = PredictionResponse::new(12.0, false).with_confidence(140.0);
        let result = normalize(&response, RiskPolicy::AnemiaFlagGated).unwrap();
        assert_eq!(result.confidence(), None);
    }

    #[test]
    fn missing_hemoglobin_is_malformed() {
        let response = PredictionResponse {
            is_anemic: Some(WireFlag::Int(1)),
            ..PredictionResponse::default()
        };
        assert_eq!(
            normalize(&response, RiskPolicy::AnemiaFlagGated).unwrap_err(),
            NormalizeError::MissingHemoglobin
        );
    }

    #[test]
    fn non_finite_or_implausible_hemoglobin_rejected() {
        for hb in [f64::NAN, f64::INFINITY, -1.0, 0.0, 45.0] {
            let err = normalize(&PredictionResponse::new(hb, true), RiskPolicy::AnemiaFlagGated)
                .unwrap_err();
            assert!(matches!(err, NormalizeError::InvalidHemoglobin(_)), "hb={hb}");
        }
    }

    #[test]
    fn gated_policy_requires_flag() {
        let response = PredictionResponse {
            hb_pred: Some(11.0),
            ..PredictionResponse::default()
        };
        assert_eq!(
            normalize(&response, RiskPolicy::AnemiaFlagGated).unwrap_err(),
            NormalizeError::MissingAnemiaFlag
        );
        // Threshold policy does not need it
        assert!(normalize(&response, RiskPolicy::ThresholdOnly).is_ok());
    }

    #[test]
    fn integer_flag_other_than_zero_or_one_rejected() {
        let response = PredictionResponse {
            hb_pred: Some(11.0),
            is_anemic: Some(WireFlag::Int(7)),
            ..PredictionResponse::default()
        };
        assert_eq!(
            normalize(&response, RiskPolicy::AnemiaFlagGated).unwrap_err(),
            NormalizeError::InvalidAnemiaFlag(7)
        );
    }

    #[test]
    fn color_analysis_only_when_supplied() {
        assert!(gated(12.0, false).color_analysis().is_none());

        let mut response = PredictionResponse::new(12.0, false);
        response.color_analysis = Some(ColorAnalysis {
            average_red: 200.0,
            average_green: 150.0,
            average_blue: 140.0,
            paleness: 0.3,
        });
        let result = normalize(&response, RiskPolicy::AnemiaFlagGated).unwrap();
        assert_eq!(result.color_analysis().map(|c| c.paleness), Some(0.3));
    }

    #[test]
    fn risk_policy_parses() {
        assert_eq!("threshold-only".parse::<RiskPolicy>().unwrap(), RiskPolicy::ThresholdOnly);
        assert_eq!(RiskPolicy::default(), RiskPolicy::AnemiaFlagGated);
        assert!("both".parse::<RiskPolicy>().is_err());
    }
}
