use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::RiskLevel;

/// Nail colour statistics, only present when the backend actually measured them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorAnalysis {
    pub average_red: f64,
    pub average_green: f64,
    pub average_blue: f64,
    pub paleness: f64,
}

/// One saved screening result. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub hemoglobin_level: f64,
    pub confidence: Option<f64>,
    pub recommendations: Vec<String>,
    pub color_analysis: Option<ColorAnalysis>,
    pub image_reference: Option<String>,
}

/// Aggregate view over one profile's scan history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub profile_id: Uuid,
    pub scan_count: usize,
    pub latest_risk: Option<RiskLevel>,
    /// Mean over scans that carry a confidence; `None` when none do.
    pub mean_confidence: Option<f64>,
    /// Hemoglobin readings, oldest first.
    pub hemoglobin_trend: Vec<(DateTime<Utc>, f64)>,
}
