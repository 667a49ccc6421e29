use crate::models::ActivityLogEntry;
use chrono::Utc;
use redb::{CommitError, Database, ReadableTable, StorageError, TableDefinition, TableError, TransactionError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ActivityDbError {
    #[error("Redb storage error: {0}")]
    RedbStorage(#[from] StorageError),
    #[error("Redb transaction error: {0}")]
    RedbTransaction(#[from] TransactionError),
    #[error("Redb table error: {0}")]
    RedbTable(#[from] TableError),
    #[error("Redb commit error: {0}")]
    RedbCommit(#[from] CommitError),
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

pub const ACTIVITY_LOG: TableDefinition<&[u8; 16], &str> = TableDefinition::new("activity_log");
// Keyed by negated millisecond timestamp so forward iteration is newest first.
pub const ACTIVITY_CHRONO_INDEX: TableDefinition<(i64, &[u8; 16]), ()> =
    TableDefinition::new("activity_chronological_index");

pub struct NewActivity<'a> {
    pub actor_id: Option<i64>,
    pub actor_username: &'a str,
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: Option<String>,
    pub description: String,
}

pub fn record_activity(db: &Database, new: NewActivity<'_>) -> Result<ActivityLogEntry, ActivityDbError> {
    let entry_uuid = Uuid::new_v4();
    let entry = ActivityLogEntry {
        id: entry_uuid.to_string(),
        actor_id: new.actor_id,
        actor_username: new.actor_username.to_string(),
        action: new.action.to_string(),
        entity_type: new.entity_type.to_string(),
        entity_id: new.entity_id,
        description: new.description,
        created_at: Utc::now(),
    };
    let entry_json = serde_json::to_string(&entry)?;

    let write_txn = db.begin_write()?;
    {
        let mut log_table = write_txn.open_table(ACTIVITY_LOG)?;
        let mut chrono_index = write_txn.open_table(ACTIVITY_CHRONO_INDEX)?;

        let entry_id_bytes = entry_uuid.into_bytes();
        log_table.insert(&entry_id_bytes, entry_json.as_str())?;
        chrono_index.insert((-entry.created_at.timestamp_millis(), &entry_id_bytes), ())?;
    }
    write_txn.commit()?;
    Ok(entry)
}

/// Newest first. `entity_type` narrows to one kind of entity.
pub fn read_latest_activities(
    db: &Database,
    entity_type: Option<&str>,
    limit: u32,
    offset: u32,
) -> Result<Vec<ActivityLogEntry>, ActivityDbError> {
    let read_txn = db.begin_read()?;
    let chrono_index = read_txn.open_table(ACTIVITY_CHRONO_INDEX)?;
    let log_table = read_txn.open_table(ACTIVITY_LOG)?;

    let entries = chrono_index
        .iter()?
        .filter_map(|item_result| {
            item_result.ok().and_then(|(key, _value)| {
                let entry_id_bytes = key.value().1;
                log_table
                    .get(entry_id_bytes)
                    .ok()
                    .flatten()
                    .and_then(|entry_json| serde_json::from_str::<ActivityLogEntry>(entry_json.value()).ok())
            })
        })
        .filter(|entry| entity_type.map_or(true, |wanted| entry.entity_type == wanted))
        .skip(offset as usize)
        .take(limit as usize)
        .collect();
    Ok(entries)
}

pub fn count_activities(db: &Database) -> Result<u64, ActivityDbError> {
    let read_txn = db.begin_read()?;
    let log_table = read_txn.open_table(ACTIVITY_LOG)?;
    Ok(log_table.len()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_activity_db as open_db;

    fn entry<'a>(action: &'a str, entity_type: &'a str) -> NewActivity<'a> {
        NewActivity {
            actor_id: Some(1),
            actor_username: "kades",
            action,
            entity_type,
            entity_id: Some("10".to_string()),
            description: format!("{} {}", action, entity_type),
        }
    }

    #[test]
    fn lists_newest_first() {
        let (_dir, db) = open_db();
        record_activity(&db, entry("create", "news")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(3));
        record_activity(&db, entry("delete", "gallery")).unwrap();

        let latest = read_latest_activities(&db, None, 10, 0).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].action, "delete");
        assert_eq!(latest[1].action, "create");
        assert_eq!(count_activities(&db).unwrap(), 2);
    }

    #[test]
    fn filters_by_entity_type_and_paginates() {
        let (_dir, db) = open_db();
        for _ in 0..3 {
            record_activity(&db, entry("update", "news")).unwrap();
        }
        record_activity(&db, entry("create", "user")).unwrap();

        assert_eq!(read_latest_activities(&db, Some("news"), 10, 0).unwrap().len(), 3);
        assert_eq!(read_latest_activities(&db, Some("news"), 2, 2).unwrap().len(), 1);
        assert_eq!(read_latest_activities(&db, Some("user"), 10, 0).unwrap().len(), 1);
    }
}
