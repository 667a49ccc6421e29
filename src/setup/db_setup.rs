use crate::models::db_operations::activity_db_operations::{ACTIVITY_CHRONO_INDEX, ACTIVITY_LOG};
use redb::{CommitError, Database, StorageError, TableError, TransactionError};
use rusqlite::{Connection, Result as RusqliteResult, Transaction};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("Redb storage error: {0}")]
    RedbStorage(#[from] StorageError),
    #[error("Redb transaction error: {0}")]
    RedbTransaction(#[from] TransactionError),
    #[error("Redb table error: {0}")]
    RedbTable(#[from] TableError),
    #[error("Redb commit error: {0}")]
    RedbCommit(#[from] CommitError),
}

const CONTENT_SCHEMA: &[(&str, &str)] = &[
    (
        "users",
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('admin', 'super_admin')),
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            last_login_time TEXT
        )",
    ),
    (
        "settings",
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
    ),
    (
        "news",
        "CREATE TABLE IF NOT EXISTS news (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            excerpt TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'umum',
            thumbnail_path TEXT,
            status TEXT NOT NULL CHECK(status IN ('draft', 'published')),
            author_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            published_at TEXT,
            reviewed_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
            reviewed_at TEXT,
            rejected_reason TEXT,
            view_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
    ),
    (
        "gallery",
        "CREATE TABLE IF NOT EXISTS gallery (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            photo_path TEXT,
            status TEXT NOT NULL CHECK(status IN ('draft', 'published')),
            author_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            published_at TEXT,
            reviewed_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
            reviewed_at TEXT,
            view_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
    ),
    (
        "letter_templates",
        "CREATE TABLE IF NOT EXISTS letter_templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            file_path TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            download_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
    ),
    (
        "population_stats",
        "CREATE TABLE IF NOT EXISTS population_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            label TEXT NOT NULL,
            male INTEGER NOT NULL DEFAULT 0,
            female INTEGER NOT NULL DEFAULT 0,
            year INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(category, label, year)
        )",
    ),
    (
        "profile_sections",
        "CREATE TABLE IF NOT EXISTS profile_sections (
            key TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    ),
    (
        "contact_messages",
        "CREATE TABLE IF NOT EXISTS contact_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT,
            subject TEXT NOT NULL DEFAULT '',
            message TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
    ),
];

pub fn setup_content_db(conn: &mut Connection) -> Result<(), SetupError> {
    let tx = conn.transaction()?;
    for (name, ddl) in CONTENT_SCHEMA {
        println!("- Creating '{}' table...", name);
        tx.execute(ddl, [])?;
    }
    tx.execute("CREATE INDEX IF NOT EXISTS idx_news_status_published ON news (status, published_at)", [])?;
    tx.execute("CREATE INDEX IF NOT EXISTS idx_gallery_status_published ON gallery (status, published_at)", [])?;

    seed_initial_settings(&tx)?;

    tx.commit()?;
    Ok(())
}

fn seed_initial_settings(tx: &Transaction) -> RusqliteResult<()> {
    println!("- Seeding initial settings...");
    let defaults = [
        ("village_name", "Desa"),
        ("max_file_upload_size_mb", "5"),
        ("allowed_mime_types", "image/jpeg,image/png,image/webp,application/pdf"),
    ];
    for (key, value) in defaults {
        tx.execute("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)", [key, value])?;
        println!("  > Default {} set to: {}", key, value);
    }
    Ok(())
}

pub fn setup_activity_db(db: &Database) -> Result<(), SetupError> {
    let write_txn = db.begin_write()?;
    {
        println!("- Creating 'activity_log' table in Redb...");
        write_txn.open_table(ACTIVITY_LOG)?;

        println!("- Creating 'activity_chronological_index' table in Redb...");
        write_txn.open_table(ACTIVITY_CHRONO_INDEX)?;
    }
    write_txn.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_setup_is_idempotent_and_seeds_settings() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut conn = Connection::open(dir.path().join("desa.db")).unwrap();
        setup_content_db(&mut conn).unwrap();
        setup_content_db(&mut conn).unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn news_slug_is_unique_at_the_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut conn = Connection::open(dir.path().join("desa.db")).unwrap();
        setup_content_db(&mut conn).unwrap();
        let insert = "INSERT INTO news (title, slug, content, status, created_at) VALUES ('a', 'same', 'c', 'draft', '2024-01-01')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
