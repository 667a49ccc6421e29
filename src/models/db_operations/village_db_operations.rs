use crate::models::{ContactMessage, LetterTemplate, PopulationStat, PopulationSummary, ProfileSection};
use chrono::Utc;
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension, Row};

// --- Letter templates ---

fn letter_template_from_row(row: &Row<'_>) -> rusqlite::Result<LetterTemplate> {
    Ok(LetterTemplate {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        file_path: row.get(3)?,
        original_filename: row.get(4)?,
        download_count: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const LETTER_TEMPLATE_COLUMNS: &str = "id, title, description, file_path, original_filename, download_count, created_at";

pub fn insert_letter_template(
    conn: &Connection,
    title: &str,
    description: &str,
    file_path: &str,
    original_filename: &str,
) -> Result<i64, RusqliteError> {
    conn.execute(
        "INSERT INTO letter_templates (title, description, file_path, original_filename, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![title, description, file_path, original_filename, Utc::now()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn read_all_letter_templates(conn: &Connection) -> Result<Vec<LetterTemplate>, RusqliteError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM letter_templates ORDER BY title COLLATE NOCASE",
        LETTER_TEMPLATE_COLUMNS
    ))?;
    let templates = stmt.query_map([], letter_template_from_row)?.collect::<Result<Vec<_>, _>>()?;
    Ok(templates)
}

pub fn read_letter_template(conn: &Connection, id: i64) -> Result<Option<LetterTemplate>, RusqliteError> {
    conn.query_row(
        &format!("SELECT {} FROM letter_templates WHERE id = ?1", LETTER_TEMPLATE_COLUMNS),
        [id],
        letter_template_from_row,
    )
    .optional()
}

pub fn increment_download_count(conn: &Connection, id: i64) -> Result<usize, RusqliteError> {
    conn.execute("UPDATE letter_templates SET download_count = download_count + 1 WHERE id = ?1", [id])
}

pub fn delete_letter_template(conn: &Connection, id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM letter_templates WHERE id = ?1", [id])
}

pub fn count_letter_templates(conn: &Connection) -> Result<i64, RusqliteError> {
    conn.query_row("SELECT COUNT(*) FROM letter_templates", [], |row| row.get(0))
}

// --- Population statistics ---

fn population_stat_from_row(row: &Row<'_>) -> rusqlite::Result<PopulationStat> {
    Ok(PopulationStat {
        id: row.get(0)?,
        category: row.get(1)?,
        label: row.get(2)?,
        male: row.get(3)?,
        female: row.get(4)?,
        year: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Inserts or replaces the counts for `(category, label, year)`.
pub fn upsert_population_stat(
    conn: &Connection,
    category: &str,
    label: &str,
    male: i64,
    female: i64,
    year: i32,
) -> Result<i64, RusqliteError> {
    conn.execute(
        "INSERT INTO population_stats (category, label, male, female, year, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(category, label, year) DO UPDATE SET male = excluded.male, female = excluded.female, updated_at = excluded.updated_at",
        params![category, label, male, female, year, Utc::now()],
    )?;
    conn.query_row(
        "SELECT id FROM population_stats WHERE category = ?1 AND label = ?2 AND year = ?3",
        params![category, label, year],
        |row| row.get(0),
    )
}

pub fn read_population_stats(
    conn: &Connection,
    category: Option<&str>,
    year: Option<i32>,
) -> Result<Vec<PopulationStat>, RusqliteError> {
    let mut stmt = conn.prepare(
        "SELECT id, category, label, male, female, year, updated_at FROM population_stats
         WHERE (?1 IS NULL OR category = ?1) AND (?2 IS NULL OR year = ?2)
         ORDER BY year DESC, category, id",
    )?;
    let stats = stmt
        .query_map(params![category, year], population_stat_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(stats)
}

pub fn latest_population_year(conn: &Connection) -> Result<Option<i32>, RusqliteError> {
    conn.query_row("SELECT MAX(year) FROM population_stats", [], |row| row.get(0))
}

/// Totals for one year, taken from the `category` breakdown (every resident
/// appears in exactly one of its labels).
pub fn population_summary(conn: &Connection, category: &str, year: i32) -> Result<PopulationSummary, RusqliteError> {
    let (male, female): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(male), 0), COALESCE(SUM(female), 0) FROM population_stats WHERE category = ?1 AND year = ?2",
        params![category, year],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(PopulationSummary { year, male, female, total: male + female })
}

pub fn delete_population_stat(conn: &Connection, id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM population_stats WHERE id = ?1", [id])
}

// --- Regional profile ---

fn profile_section_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileSection> {
    Ok(ProfileSection {
        key: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

pub fn upsert_profile_section(conn: &Connection, key: &str, title: &str, content: &str) -> Result<(), RusqliteError> {
    conn.execute(
        "INSERT INTO profile_sections (key, title, content, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET title = excluded.title, content = excluded.content, updated_at = excluded.updated_at",
        params![key, title, content, Utc::now()],
    )?;
    Ok(())
}

pub fn read_profile_sections(conn: &Connection) -> Result<Vec<ProfileSection>, RusqliteError> {
    let mut stmt = conn.prepare("SELECT key, title, content, updated_at FROM profile_sections ORDER BY key")?;
    let sections = stmt.query_map([], profile_section_from_row)?.collect::<Result<Vec<_>, _>>()?;
    Ok(sections)
}

pub fn read_profile_section(conn: &Connection, key: &str) -> Result<Option<ProfileSection>, RusqliteError> {
    conn.query_row(
        "SELECT key, title, content, updated_at FROM profile_sections WHERE key = ?1",
        [key],
        profile_section_from_row,
    )
    .optional()
}

// --- Contact messages ---

fn contact_message_from_row(row: &Row<'_>) -> rusqlite::Result<ContactMessage> {
    Ok(ContactMessage {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        subject: row.get(4)?,
        message: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub struct NewContactMessage<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub subject: &'a str,
    pub message: &'a str,
}

pub fn insert_contact_message(conn: &Connection, msg: &NewContactMessage<'_>) -> Result<i64, RusqliteError> {
    conn.execute(
        "INSERT INTO contact_messages (name, email, phone, subject, message, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![msg.name, msg.email, msg.phone, msg.subject, msg.message, Utc::now()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn read_contact_messages(
    conn: &Connection,
    unread_only: bool,
    limit: u32,
    offset: u32,
) -> Result<Vec<ContactMessage>, RusqliteError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, phone, subject, message, is_read, created_at FROM contact_messages
         WHERE (?1 = 0 OR is_read = 0) ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
    )?;
    let messages = stmt
        .query_map(params![unread_only, limit, offset], contact_message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

pub fn count_unread_messages(conn: &Connection) -> Result<i64, RusqliteError> {
    conn.query_row("SELECT COUNT(*) FROM contact_messages WHERE is_read = 0", [], |row| row.get(0))
}

pub fn mark_message_read(conn: &Connection, id: i64, is_read: bool) -> Result<usize, RusqliteError> {
    conn.execute("UPDATE contact_messages SET is_read = ?1 WHERE id = ?2", params![is_read, id])
}

pub fn delete_contact_message(conn: &Connection, id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM contact_messages WHERE id = ?1", [id])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_conn;

    #[test]
    fn population_upsert_replaces_counts() {
        let (_dir, conn) = open_conn();
        let first = upsert_population_stat(&conn, "age_group", "0-14", 120, 115, 2024).unwrap();
        let second = upsert_population_stat(&conn, "age_group", "0-14", 130, 118, 2024).unwrap();
        assert_eq!(first, second);
        upsert_population_stat(&conn, "age_group", "15-64", 400, 410, 2024).unwrap();
        upsert_population_stat(&conn, "religion", "Islam", 500, 500, 2024).unwrap();

        let summary = population_summary(&conn, "age_group", 2024).unwrap();
        assert_eq!(summary.male, 530);
        assert_eq!(summary.female, 528);
        assert_eq!(summary.total, 1058);

        assert_eq!(read_population_stats(&conn, Some("age_group"), Some(2024)).unwrap().len(), 2);
        assert_eq!(read_population_stats(&conn, None, None).unwrap().len(), 3);
        assert_eq!(latest_population_year(&conn).unwrap(), Some(2024));
    }

    #[test]
    fn unread_filter_and_mark_read() {
        let (_dir, conn) = open_conn();
        let msg = NewContactMessage {
            name: "Budi",
            email: "budi@example.com",
            phone: None,
            subject: "Jalan rusak",
            message: "Mohon perbaikan jalan di RT 03.",
        };
        let id = insert_contact_message(&conn, &msg).unwrap();
        insert_contact_message(&conn, &msg).unwrap();
        assert_eq!(count_unread_messages(&conn).unwrap(), 2);

        mark_message_read(&conn, id, true).unwrap();
        assert_eq!(count_unread_messages(&conn).unwrap(), 1);
        assert_eq!(read_contact_messages(&conn, true, 10, 0).unwrap().len(), 1);
        assert_eq!(read_contact_messages(&conn, false, 10, 0).unwrap().len(), 2);
    }

    #[test]
    fn profile_sections_upsert_by_key() {
        let (_dir, conn) = open_conn();
        upsert_profile_section(&conn, "vision", "Visi", "Desa mandiri").unwrap();
        upsert_profile_section(&conn, "vision", "Visi", "Desa mandiri dan sejahtera").unwrap();
        let section = read_profile_section(&conn, "vision").unwrap().unwrap();
        assert_eq!(section.content, "Desa mandiri dan sejahtera");
        assert_eq!(read_profile_sections(&conn).unwrap().len(), 1);
    }

    #[test]
    fn download_counter_increments() {
        let (_dir, conn) = open_conn();
        let id = insert_letter_template(&conn, "Surat Domisili", "", "/media/letters/a.pdf", "domisili.pdf").unwrap();
        increment_download_count(&conn, id).unwrap();
        increment_download_count(&conn, id).unwrap();
        assert_eq!(read_letter_template(&conn, id).unwrap().unwrap().download_count, 2);
    }
}
