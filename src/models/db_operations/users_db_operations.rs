use crate::models::{Actor, Role};
use bcrypt::{hash, verify, BcryptError};
use chrono::Utc;
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension, Row};

fn bcrypt_to_rusqlite_error(e: BcryptError) -> RusqliteError {
    RusqliteError::ToSqlConversionFailure(Box::new(e))
}

const ACTOR_COLUMNS: &str = "id, username, role, is_active, last_login_time";

fn actor_from_row(row: &Row<'_>) -> rusqlite::Result<Actor> {
    Ok(Actor {
        id: row.get(0)?,
        username: row.get(1)?,
        role: row.get(2)?,
        is_active: row.get(3)?,
        last_login_time: row.get(4)?,
    })
}

pub fn create_user(conn: &Connection, username: &str, password: &str, role: Role) -> Result<i64, RusqliteError> {
    let hashed_password = hash(password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    conn.execute(
        "INSERT INTO users (username, password_hash, role, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![username, hashed_password, role, Utc::now()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn read_all_users(conn: &Connection) -> Result<Vec<Actor>, RusqliteError> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY id", ACTOR_COLUMNS))?;
    let users = stmt.query_map([], actor_from_row)?.collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn read_user_by_id(conn: &Connection, user_id: i64) -> Result<Option<Actor>, RusqliteError> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", ACTOR_COLUMNS),
        [user_id],
        actor_from_row,
    )
    .optional()
}

pub fn read_user_by_username(conn: &Connection, username: &str) -> Result<Option<Actor>, RusqliteError> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE username = ?1", ACTOR_COLUMNS),
        [username],
        actor_from_row,
    )
    .optional()
}

pub struct UserUpdate<'a> {
    pub username: &'a str,
    pub new_password: Option<&'a str>,
    pub role: Role,
    pub is_active: bool,
}

pub fn update_user(conn: &Connection, user_id: i64, update: &UserUpdate<'_>) -> Result<usize, RusqliteError> {
    if let Some(password) = update.new_password.filter(|p| !p.is_empty()) {
        let hashed_password = hash(password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
        return conn.execute(
            "UPDATE users SET username = ?1, password_hash = ?2, role = ?3, is_active = ?4 WHERE id = ?5",
            params![update.username, hashed_password, update.role, update.is_active, user_id],
        );
    }

    conn.execute(
        "UPDATE users SET username = ?1, role = ?2, is_active = ?3 WHERE id = ?4",
        params![update.username, update.role, update.is_active, user_id],
    )
}

pub fn update_password(conn: &Connection, username: &str, new_password: &str) -> Result<usize, RusqliteError> {
    let hashed_password = hash(new_password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE username = ?2",
        params![hashed_password, username],
    )
}

pub fn delete_user(conn: &Connection, user_id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM users WHERE id = ?1", [user_id])
}

pub fn count_active_with_role(conn: &Connection, role: Role) -> Result<i64, RusqliteError> {
    conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = ?1 AND is_active = 1",
        params![role],
        |row| row.get(0),
    )
}

/// Returns the account only when it is active and the password matches.
pub fn verify_credentials(conn: &Connection, username: &str, password: &str) -> Option<Actor> {
    let res: rusqlite::Result<(String, bool)> = conn.query_row(
        "SELECT password_hash, is_active FROM users WHERE username = ?1",
        [username],
        |row| Ok((row.get(0)?, row.get(1)?)),
    );

    if let Ok((hash, is_active)) = res {
        if is_active && verify(password, &hash).unwrap_or(false) {
            return read_user_by_username(conn, username).ok().flatten();
        }
    }
    None
}

pub fn update_last_login_time(conn: &Connection, user_id: i64) -> Result<(), RusqliteError> {
    conn.execute("UPDATE users SET last_login_time = ?1 WHERE id = ?2", params![Utc::now(), user_id])?;
    Ok(())
}

pub fn read_setting(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
        .optional()
        .unwrap_or(None)
}

pub fn update_setting(conn: &Connection, key: &str, value: &str) -> Result<(), RusqliteError> {
    conn.execute("INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)", [key, value])?;
    Ok(())
}
