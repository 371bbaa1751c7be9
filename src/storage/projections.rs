//! Projection storage: versioned key/value snapshots.
//!
//! One row per named projection. Rows carry the projection's schema
//! version; a row whose version doesn't match the current code is
//! discarded on load rather than misread.

use tracing::info;

use crate::model::{ProjectionName, ProjectionSnapshot, ProjectionValue};

use super::{Result, Storage, StorageError};

impl Storage {
    /// Persists a projection snapshot, replacing any previous row.
    pub fn save_projection(&self, snapshot: &ProjectionSnapshot) -> Result<()> {
        let name = snapshot.value.name();
        let json = serde_json::to_string(&snapshot.value)?;
        let last_event = snapshot.last_event.and_then(|seq| i64::try_from(seq).ok());

        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO projections (name, version, value, last_event)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![name.as_str(), name.version(), &json, last_event],
            )?;
            Ok(())
        })
    }

    /// Loads the persisted snapshot for a projection.
    ///
    /// Returns `None` when no row exists or when the stored version
    /// doesn't match the current one — in the latter case the stale row
    /// is deleted so it can't be misread again.
    pub fn load_projection(&self, name: ProjectionName) -> Result<Option<ProjectionSnapshot>> {
        let row = self.with_retry(|conn| {
            conn.query_row(
                "SELECT version, value, last_event FROM projections WHERE name = ?1",
                rusqlite::params![name.as_str()],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
        })?;

        let Some((version, json, last_event)) = row else {
            return Ok(None);
        };

        if version != name.version() {
            info!(
                projection = name.as_str(),
                stored = version,
                current = name.version(),
                "discarding projection with stale version"
            );
            self.delete_projection(name)?;
            return Ok(None);
        }

        let value: ProjectionValue = serde_json::from_str(&json)?;
        if value.name() != name {
            return Err(StorageError::Corrupt(format!(
                "projection row {} holds a {} value",
                name.as_str(),
                value.name().as_str()
            )));
        }

        Ok(Some(ProjectionSnapshot {
            value,
            last_event: last_event.and_then(|seq| u64::try_from(seq).ok()),
        }))
    }

    /// Deletes all persisted projections.
    pub fn clear_projections(&self) -> Result<()> {
        self.with_retry(|conn| {
            conn.execute("DELETE FROM projections", [])?;
            Ok(())
        })
    }

    fn delete_projection(&self, name: ProjectionName) -> Result<()> {
        self.with_retry(|conn| {
            conn.execute(
                "DELETE FROM projections WHERE name = ?1",
                rusqlite::params![name.as_str()],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::model::{CurrentStatus, ShipStatus};

    fn test_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("state.sqlite")).unwrap();
        (dir, storage)
    }

    fn sample_snapshot() -> ProjectionSnapshot {
        ProjectionSnapshot {
            value: ProjectionValue::CurrentStatus(CurrentStatus {
                status: ShipStatus::InStation,
                docked: true,
                landed: false,
                shields_up: true,
            }),
            last_event: Some(42),
        }
    }

    #[test]
    fn save_and_load_round_trips() {
        let (_dir, storage) = test_storage();
        let snapshot = sample_snapshot();

        storage.save_projection(&snapshot).unwrap();
        let loaded = storage
            .load_projection(ProjectionName::CurrentStatus)
            .unwrap()
            .unwrap();

        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn load_missing_projection_is_none() {
        let (_dir, storage) = test_storage();
        assert!(storage.load_projection(ProjectionName::Cargo).unwrap().is_none());
    }

    #[test]
    fn save_replaces_previous_row() {
        let (_dir, storage) = test_storage();
        storage.save_projection(&sample_snapshot()).unwrap();

        let updated = ProjectionSnapshot {
            value: ProjectionValue::CurrentStatus(CurrentStatus::default()),
            last_event: Some(99),
        };
        storage.save_projection(&updated).unwrap();

        let loaded = storage
            .load_projection(ProjectionName::CurrentStatus)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.last_event, Some(99));
    }

    #[test]
    fn stale_version_is_discarded_on_load() {
        let (_dir, storage) = test_storage();
        storage.save_projection(&sample_snapshot()).unwrap();

        // Simulate a row written by an older build.
        let conn = rusqlite::Connection::open(storage.path()).unwrap();
        conn.execute(
            "UPDATE projections SET version = 0 WHERE name = 'CurrentStatus'",
            [],
        )
        .unwrap();

        assert!(storage
            .load_projection(ProjectionName::CurrentStatus)
            .unwrap()
            .is_none());

        // The stale row is gone, not just skipped.
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM projections", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn clear_projections_removes_all_rows() {
        let (_dir, storage) = test_storage();
        storage.save_projection(&sample_snapshot()).unwrap();

        storage.clear_projections().unwrap();
        assert!(storage
            .load_projection(ProjectionName::CurrentStatus)
            .unwrap()
            .is_none());
    }
}
