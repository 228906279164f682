use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name given to the profile created on first launch.
pub const DEFAULT_PROFILE_NAME: &str = "You";
/// Colour of the profile created on first launch.
pub const DEFAULT_PROFILE_COLOR: &str = "#20B2AA";

/// Colours handed out to new profiles, in rotation.
pub const PROFILE_PALETTE: [&str; 7] = [
    "#2196F3", "#9C27B0", "#FF5722", "#607D8B", "#795548", "#4CAF50", "#FF9800",
];

/// A person whose scans are tracked separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when adding a profile. Colour is assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewProfile {
    pub name: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
}

impl NewProfile {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Palette colour for the profile added after `existing_count` others.
pub fn palette_color(existing_count: usize) -> &'static str {
    PROFILE_PALETTE[existing_count % PROFILE_PALETTE.len()]
}
