use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, get_profile, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

const SCAN_COLUMNS: &str = "id, profile_id, created_at, risk_level, hemoglobin_level, confidence,
     recommendations, color_analysis, image_reference";

type ScanRow = (
    String,
    String,
    String,
    String,
    f64,
    Option<f64>,
    String,
    Option<String>,
    Option<String>,
);

fn read_scan_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScanRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn scan_from_row(row: ScanRow) -> Result<ScanRecord, DatabaseError> {
    let (
        id,
        profile_id,
        created_at,
        risk_level,
        hemoglobin_level,
        confidence,
        recommendations,
        color_analysis,
        image_reference,
    ) = row;

    let recommendations: Vec<String> =
        serde_json::from_str(&recommendations).map_err(|e| DatabaseError::CorruptColumn {
            column: "scans.recommendations".into(),
            reason: e.to_string(),
        })?;
    let color_analysis = color_analysis
        .map(|raw| serde_json::from_str::<ColorAnalysis>(&raw))
        .transpose()
        .map_err(|e| DatabaseError::CorruptColumn {
            column: "scans.color_analysis".into(),
            reason: e.to_string(),
        })?;

    Ok(ScanRecord {
        id: parse_uuid("scans.id", &id)?,
        profile_id: parse_uuid("scans.profile_id", &profile_id)?,
        created_at: parse_timestamp("scans.created_at", &created_at)?,
        risk_level: RiskLevel::from_str(&risk_level)?,
        hemoglobin_level,
        confidence,
        recommendations,
        color_analysis,
        image_reference,
    })
}

/// Append a scan to its profile's history.
pub fn insert_scan(conn: &Connection, scan: &ScanRecord) -> Result<(), DatabaseError> {
    if get_profile(conn, &scan.profile_id)?.is_none() {
        return Err(DatabaseError::NotFound {
            entity_type: "Profile".into(),
            id: scan.profile_id.to_string(),
        });
    }

    let recommendations = serde_json::to_string(&scan.recommendations).map_err(|e| {
        DatabaseError::CorruptColumn {
            column: "scans.recommendations".into(),
            reason: e.to_string(),
        }
    })?;
    let color_analysis = scan
        .color_analysis
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::CorruptColumn {
            column: "scans.color_analysis".into(),
            reason: e.to_string(),
        })?;

    conn.execute(
        "INSERT INTO scans (id, profile_id, created_at, risk_level, hemoglobin_level, confidence,
         recommendations, color_analysis, image_reference)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            scan.id.to_string(),
            scan.profile_id.to_string(),
            format_timestamp(&scan.created_at),
            scan.risk_level.as_str(),
            scan.hemoglobin_level,
            scan.confidence,
            recommendations,
            color_analysis,
            scan.image_reference,
        ],
    )?;
    Ok(())
}

pub fn get_scan(conn: &Connection, id: &Uuid) -> Result<Option<ScanRecord>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = ?1"),
            params![id.to_string()],
            read_scan_row,
        )
        .optional()?;
    row.map(scan_from_row).transpose()
}

/// A profile's scans, newest first.
pub fn list_scans_for_profile(
    conn: &Connection,
    profile_id: &Uuid,
) -> Result<Vec<ScanRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SCAN_COLUMNS} FROM scans WHERE profile_id = ?1
         ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt.query_map(params![profile_id.to_string()], read_scan_row)?;

    let mut scans = Vec::new();
    for row in rows {
        scans.push(scan_from_row(row?)?);
    }
    Ok(scans)
}

pub fn count_scans(conn: &Connection, profile_id: &Uuid) -> Result<usize, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM scans WHERE profile_id = ?1",
        params![profile_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Scan count, latest tier, mean known confidence and hemoglobin trend for one profile.
pub fn profile_summary(conn: &Connection, profile_id: &Uuid) -> Result<ProfileSummary, DatabaseError> {
    if get_profile(conn, profile_id)?.is_none() {
        return Err(DatabaseError::NotFound {
            entity_type: "Profile".into(),
            id: profile_id.to_string(),
        });
    }

    let scans = list_scans_for_profile(conn, profile_id)?;
    let latest_risk = scans.first().map(|s| s.risk_level);

    let known: Vec<f64> = scans.iter().filter_map(|s| s.confidence).collect();
    let mean_confidence = if known.is_empty() {
        None
    } else {
        Some(known.iter().sum::<f64>() / known.len() as f64)
    };

    let hemoglobin_trend = scans
        .iter()
        .rev()
        .map(|s| (s.created_at, s.hemoglobin_level))
        .collect();

    Ok(ProfileSummary {
        profile_id: *profile_id,
        scan_count: scans.len(),
        latest_risk,
        mean_confidence,
        hemoglobin_trend,
    })
}
