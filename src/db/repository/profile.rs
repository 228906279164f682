use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

type ProfileRow = (String, String, Option<u32>, Option<String>, String, String);

fn profile_from_row(row: ProfileRow) -> Result<Profile, DatabaseError> {
    let (id, name, age, gender, color, created_at) = row;
    Ok(Profile {
        id: parse_uuid("profiles.id", &id)?,
        name,
        age,
        gender,
        color,
        created_at: parse_timestamp("profiles.created_at", &created_at)?,
    })
}

fn read_profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

pub fn insert_profile(conn: &Connection, profile: &Profile) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO profiles (id, name, age, gender, color, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            profile.id.to_string(),
            profile.name,
            profile.age,
            profile.gender,
            profile.color,
            format_timestamp(&profile.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_profile(conn: &Connection, id: &Uuid) -> Result<Option<Profile>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, name, age, gender, color, created_at FROM profiles WHERE id = ?1",
            params![id.to_string()],
            read_profile_row,
        )
        .optional()?;
    row.map(profile_from_row).transpose()
}

/// All profiles in the order they were added.
pub fn list_profiles(conn: &Connection) -> Result<Vec<Profile>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, age, gender, color, created_at
         FROM profiles ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map([], read_profile_row)?;

    let mut profiles = Vec::new();
    for row in rows {
        profiles.push(profile_from_row(row?)?);
    }
    Ok(profiles)
}

pub fn count_profiles(conn: &Connection) -> Result<usize, DatabaseError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// Return the first profile, creating the default "You" profile on an empty store.
pub fn ensure_default_profile(conn: &Connection) -> Result<Profile, DatabaseError> {
    if let Some(existing) = list_profiles(conn)?.into_iter().next() {
        return Ok(existing);
    }

    let profile = Profile {
        id: Uuid::new_v4(),
        name: DEFAULT_PROFILE_NAME.to_string(),
        age: None,
        gender: None,
        color: DEFAULT_PROFILE_COLOR.to_string(),
        created_at: Utc::now(),
    };
    insert_profile(conn, &profile)?;
    tracing::info!(profile_id = %profile.id, "Created default profile");
    Ok(profile)
}

/// Add a profile. The name is trimmed and must not be empty; the colour
/// comes from the palette based on how many profiles already exist.
pub fn create_profile(conn: &Connection, new: &NewProfile) -> Result<Profile, DatabaseError> {
    let name = normalized_name(&new.name)?;
    let existing = count_profiles(conn)?;

    let profile = Profile {
        id: Uuid::new_v4(),
        name,
        age: new.age,
        gender: new.gender.clone(),
        color: palette_color(existing).to_string(),
        created_at: Utc::now(),
    };
    insert_profile(conn, &profile)?;
    tracing::info!(profile_id = %profile.id, "Created profile");
    Ok(profile)
}

pub fn rename_profile(conn: &Connection, id: &Uuid, name: &str) -> Result<(), DatabaseError> {
    let name = normalized_name(name)?;
    let updated = conn.execute(
        "UPDATE profiles SET name = ?1 WHERE id = ?2",
        params![name, id.to_string()],
    )?;
    if updated == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

/// Delete a profile and, through the foreign key cascade, all of its scans.
/// The last remaining profile cannot be deleted.
pub fn delete_profile(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    if get_profile(conn, id)?.is_none() {
        return Err(not_found(id));
    }
    if count_profiles(conn)? <= 1 {
        return Err(DatabaseError::ConstraintViolation(
            "cannot delete the last profile".into(),
        ));
    }
    conn.execute("DELETE FROM profiles WHERE id = ?1", params![id.to_string()])?;
    tracing::info!(profile_id = %id, "Deleted profile");
    Ok(())
}

fn normalized_name(raw: &str) -> Result<String, DatabaseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DatabaseError::ConstraintViolation(
            "profile name must not be empty".into(),
        ));
    }
    Ok(trimmed.to_string())
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "Profile".into(),
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn default_profile_created_once() {
        let conn = open_memory_database().unwrap();
        let first = ensure_default_profile(&conn).unwrap();
        assert_eq!(first.name, "You");
        assert_eq!(first.color, "#20B2AA");

        let again = ensure_default_profile(&conn).unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(count_profiles(&conn).unwrap(), 1);
    }

    #[test]
    fn create_trims_name_and_rotates_palette() {
        let conn = open_memory_database().unwrap();
        ensure_default_profile(&conn).unwrap();

        let mom = create_profile(&conn, &NewProfile::named("  Mom ")).unwrap();
        assert_eq!(mom.name, "Mom");
        assert_eq!(mom.color, PROFILE_PALETTE[1]);

        let dad = create_profile(
            &conn,
            &NewProfile {
                name: "Dad".into(),
                age: Some(61),
                gender: Some("male".into()),
            },
        )
        .unwrap();
        assert_eq!(dad.color, PROFILE_PALETTE[2]);

        let fetched = get_profile(&conn, &dad.id).unwrap().unwrap();
        assert_eq!(fetched.age, Some(61));
        assert_eq!(fetched.gender.as_deref(), Some("male"));
    }

    #[test]
    fn blank_name_rejected() {
        let conn = open_memory_database().unwrap();
        let err = create_profile(&conn, &NewProfile::named("   ")).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
    }

    #[test]
    fn list_preserves_insertion_order() {
        let conn = open_memory_database().unwrap();
        ensure_default_profile(&conn).unwrap();
        create_profile(&conn, &NewProfile::named("A")).unwrap();
        create_profile(&conn, &NewProfile::named("B")).unwrap();

        let names: Vec<String> = list_profiles(&conn)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["You", "A", "B"]);
    }

    #[test]
    fn rename_updates_name() {
        let conn = open_memory_database().unwrap();
        let profile = ensure_default_profile(&conn).unwrap();
        rename_profile(&conn, &profile.id, " Ada ").unwrap();
        assert_eq!(get_profile(&conn, &profile.id).unwrap().unwrap().name, "Ada");
    }

    #[test]
    fn rename_unknown_profile_is_not_found() {
        let conn = open_memory_database().unwrap();
        let err = rename_profile(&conn, &Uuid::new_v4(), "Ghost").unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn last_profile_cannot_be_deleted() {
        let conn = open_memory_database().unwrap();
        let only = ensure_default_profile(&conn).unwrap();
        let err = delete_profile(&conn, &only.id).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
        assert_eq!(count_profiles(&conn).unwrap(), 1);
    }

    #[test]
    fn delete_removes_profile() {
        let conn = open_memory_database().unwrap();
        ensure_default_profile(&conn).unwrap();
        let extra = create_profile(&conn, &NewProfile::named("Temp")).unwrap();
        delete_profile(&conn, &extra.id).unwrap();
        assert!(get_profile(&conn, &extra.id).unwrap().is_none());
    }
}
