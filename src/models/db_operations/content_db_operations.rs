use crate::helper::publication::Publication;
use crate::helper::slug_helpers::InsertOutcome;
use crate::models::{ContentKind, ContentStatus, GalleryItem, NewsArticle};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Error as RusqliteError, ErrorCode, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentSort {
    #[default]
    Newest,
    Oldest,
    Popular,
}

impl ContentSort {
    pub fn parse(value: Option<&str>) -> ContentSort {
        match value.map(str::trim) {
            Some("oldest") => ContentSort::Oldest,
            Some("popular") => ContentSort::Popular,
            _ => ContentSort::Newest,
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            ContentSort::Newest => "COALESCE(published_at, created_at) DESC, id DESC",
            ContentSort::Oldest => "COALESCE(published_at, created_at) ASC, id ASC",
            ContentSort::Popular => "view_count DESC, id DESC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    pub status: Option<ContentStatus>,
    /// News only; ignored for gallery queries.
    pub category: Option<String>,
    pub search: Option<String>,
    pub sort: ContentSort,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}

/// True when the error is the UNIQUE constraint on a `slug` column.
pub fn is_slug_conflict(err: &RusqliteError) -> bool {
    match err {
        RusqliteError::SqliteFailure(e, Some(message)) => {
            e.code == ErrorCode::ConstraintViolation && message.contains(".slug")
        }
        _ => false,
    }
}

/// Turns a slug uniqueness violation into `SlugTaken` so callers can retry.
pub fn slug_outcome<T>(result: rusqlite::Result<T>) -> rusqlite::Result<InsertOutcome<T>> {
    match result {
        Ok(value) => Ok(InsertOutcome::Inserted(value)),
        Err(e) if is_slug_conflict(&e) => Ok(InsertOutcome::SlugTaken),
        Err(e) => Err(e),
    }
}

fn as_insert_outcome(result: rusqlite::Result<usize>, conn: &Connection) -> rusqlite::Result<InsertOutcome<i64>> {
    slug_outcome(result.map(|_| conn.last_insert_rowid()))
}

pub fn slug_exists(conn: &Connection, kind: ContentKind, slug: &str, exclude_id: Option<i64>) -> Result<bool, RusqliteError> {
    conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE slug = ?1 AND id != ?2)", kind.table()),
        params![slug, exclude_id.unwrap_or(-1)],
        |row| row.get(0),
    )
}

/// Escapes LIKE wildcards so user input matches literally under `ESCAPE '\'`.
fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn filter_clause(kind: ContentKind, filter: &ContentFilter) -> (String, Vec<Value>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(status) = filter.status {
        values.push(Value::Text(status.as_str().to_string()));
        conditions.push(format!("status = ?{}", values.len()));
    }
    if kind == ContentKind::News {
        if let Some(category) = filter.category.as_deref().filter(|c| !c.trim().is_empty()) {
            values.push(Value::Text(category.trim().to_lowercase()));
            conditions.push(format!("category = ?{}", values.len()));
        }
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        values.push(Value::Text(like_pattern(search.trim())));
        let body_column = match kind {
            ContentKind::News => "content",
            ContentKind::Gallery => "description",
        };
        conditions.push(format!("(title LIKE ?{n} ESCAPE '\\' OR {col} LIKE ?{n} ESCAPE '\\')", n = values.len(), col = body_column));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (clause, values)
}

fn count_filtered(conn: &Connection, kind: ContentKind, clause: &str, values: &[Value]) -> Result<i64, RusqliteError> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {} {}", kind.table(), clause),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )
}

pub fn increment_view_count(conn: &Connection, kind: ContentKind, id: i64) -> Result<usize, RusqliteError> {
    conn.execute(&format!("UPDATE {} SET view_count = view_count + 1 WHERE id = ?1", kind.table()), [id])
}

pub fn delete_content(conn: &Connection, kind: ContentKind, id: i64) -> Result<usize, RusqliteError> {
    conn.execute(&format!("DELETE FROM {} WHERE id = ?1", kind.table()), [id])
}

pub fn count_by_status(conn: &Connection, kind: ContentKind, status: ContentStatus) -> Result<i64, RusqliteError> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE status = ?1", kind.table()),
        params![status],
        |row| row.get(0),
    )
}

pub fn update_asset_path(conn: &Connection, kind: ContentKind, id: i64, path: Option<&str>) -> Result<usize, RusqliteError> {
    conn.execute(
        &format!("UPDATE {} SET {} = ?1, updated_at = ?2 WHERE id = ?3", kind.table(), kind.asset_column()),
        params![path, Utc::now(), id],
    )
}

// ====================================================================
// ============================ NEWS ==================================
// ====================================================================

const NEWS_COLUMNS: &str = "id, title, slug, excerpt, content, category, thumbnail_path, status, author_id, \
    published_at, reviewed_by, reviewed_at, rejected_reason, view_count, created_at, updated_at";

fn news_from_row(row: &Row<'_>) -> rusqlite::Result<NewsArticle> {
    Ok(NewsArticle {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        excerpt: row.get(3)?,
        content: row.get(4)?,
        category: row.get(5)?,
        thumbnail_path: row.get(6)?,
        status: row.get(7)?,
        author_id: row.get(8)?,
        published_at: row.get(9)?,
        reviewed_by: row.get(10)?,
        reviewed_at: row.get(11)?,
        rejected_reason: row.get(12)?,
        view_count: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

pub struct NewNews<'a> {
    pub title: &'a str,
    pub excerpt: &'a str,
    pub content: &'a str,
    pub category: &'a str,
    pub thumbnail_path: Option<&'a str>,
    pub author_id: Option<i64>,
    pub publication: &'a Publication,
}

pub fn insert_news(conn: &Connection, news: &NewNews<'_>, slug: &str) -> Result<InsertOutcome<i64>, RusqliteError> {
    let p = news.publication;
    let result = conn.execute(
        "INSERT INTO news (title, slug, excerpt, content, category, thumbnail_path, status, author_id, \
         published_at, reviewed_by, reviewed_at, rejected_reason, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            news.title,
            slug,
            news.excerpt,
            news.content,
            news.category,
            news.thumbnail_path,
            p.status,
            news.author_id,
            p.published_at,
            p.reviewed_by,
            p.reviewed_at,
            p.rejected_reason,
            Utc::now(),
        ],
    );
    as_insert_outcome(result, conn)
}

pub fn read_news_by_id(conn: &Connection, id: i64) -> Result<Option<NewsArticle>, RusqliteError> {
    conn.query_row(&format!("SELECT {} FROM news WHERE id = ?1", NEWS_COLUMNS), [id], news_from_row)
        .optional()
}

pub fn read_news_by_slug(conn: &Connection, slug: &str, published_only: bool) -> Result<Option<NewsArticle>, RusqliteError> {
    let sql = if published_only {
        format!("SELECT {} FROM news WHERE slug = ?1 AND status = 'published'", NEWS_COLUMNS)
    } else {
        format!("SELECT {} FROM news WHERE slug = ?1", NEWS_COLUMNS)
    };
    conn.query_row(&sql, [slug], news_from_row).optional()
}

pub fn list_news(conn: &Connection, filter: &ContentFilter) -> Result<Page<NewsArticle>, RusqliteError> {
    let (clause, mut values) = filter_clause(ContentKind::News, filter);
    let total = count_filtered(conn, ContentKind::News, &clause, &values)?;

    values.push(Value::Integer(i64::from(filter.limit)));
    values.push(Value::Integer(i64::from(filter.offset)));
    let sql = format!(
        "SELECT {} FROM news {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
        NEWS_COLUMNS,
        clause,
        filter.sort.order_by(),
        values.len() - 1,
        values.len()
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(values.iter()), news_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page { items, total, limit: filter.limit, offset: filter.offset })
}

pub struct NewsFields<'a> {
    pub title: &'a str,
    pub slug: &'a str,
    pub excerpt: &'a str,
    pub content: &'a str,
    pub category: &'a str,
}

pub fn update_news_fields(conn: &Connection, id: i64, fields: &NewsFields<'_>) -> Result<usize, RusqliteError> {
    conn.execute(
        "UPDATE news SET title = ?1, slug = ?2, excerpt = ?3, content = ?4, category = ?5, updated_at = ?6 WHERE id = ?7",
        params![fields.title, fields.slug, fields.excerpt, fields.content, fields.category, Utc::now(), id],
    )
}

pub fn update_news_publication(conn: &Connection, id: i64, p: &Publication) -> Result<usize, RusqliteError> {
    conn.execute(
        "UPDATE news SET status = ?1, published_at = ?2, reviewed_by = ?3, reviewed_at = ?4, \
         rejected_reason = ?5, updated_at = ?6 WHERE id = ?7",
        params![p.status, p.published_at, p.reviewed_by, p.reviewed_at, p.rejected_reason, Utc::now(), id],
    )
}

pub fn news_categories(conn: &Connection) -> Result<Vec<String>, RusqliteError> {
    let mut stmt = conn.prepare("SELECT DISTINCT category FROM news WHERE status = 'published' ORDER BY category")?;
    let categories = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;
    Ok(categories)
}

// ====================================================================
// =========================== GALLERY ================================
// ====================================================================

const GALLERY_COLUMNS: &str = "id, title, slug, description, photo_path, status, author_id, \
    published_at, reviewed_by, reviewed_at, view_count, created_at, updated_at";

fn gallery_from_row(row: &Row<'_>) -> rusqlite::Result<GalleryItem> {
    Ok(GalleryItem {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        photo_path: row.get(4)?,
        status: row.get(5)?,
        author_id: row.get(6)?,
        published_at: row.get(7)?,
        reviewed_by: row.get(8)?,
        reviewed_at: row.get(9)?,
        view_count: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

pub struct NewGalleryItem<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub photo_path: Option<&'a str>,
    pub author_id: Option<i64>,
    pub publication: &'a Publication,
}

pub fn insert_gallery_item(conn: &Connection, item: &NewGalleryItem<'_>, slug: &str) -> Result<InsertOutcome<i64>, RusqliteError> {
    let p = item.publication;
    let result = conn.execute(
        "INSERT INTO gallery (title, slug, description, photo_path, status, author_id, \
         published_at, reviewed_by, reviewed_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            item.title,
            slug,
            item.description,
            item.photo_path,
            p.status,
            item.author_id,
            p.published_at,
            p.reviewed_by,
            p.reviewed_at,
            Utc::now(),
        ],
    );
    as_insert_outcome(result, conn)
}

pub fn read_gallery_by_id(conn: &Connection, id: i64) -> Result<Option<GalleryItem>, RusqliteError> {
    conn.query_row(&format!("SELECT {} FROM gallery WHERE id = ?1", GALLERY_COLUMNS), [id], gallery_from_row)
        .optional()
}

pub fn read_gallery_by_slug(conn: &Connection, slug: &str, published_only: bool) -> Result<Option<GalleryItem>, RusqliteError> {
    let sql = if published_only {
        format!("SELECT {} FROM gallery WHERE slug = ?1 AND status = 'published'", GALLERY_COLUMNS)
    } else {
        format!("SELECT {} FROM gallery WHERE slug = ?1", GALLERY_COLUMNS)
    };
    conn.query_row(&sql, [slug], gallery_from_row).optional()
}

pub fn list_gallery(conn: &Connection, filter: &ContentFilter) -> Result<Page<GalleryItem>, RusqliteError> {
    let (clause, mut values) = filter_clause(ContentKind::Gallery, filter);
    let total = count_filtered(conn, ContentKind::Gallery, &clause, &values)?;

    values.push(Value::Integer(i64::from(filter.limit)));
    values.push(Value::Integer(i64::from(filter.offset)));
    let sql = format!(
        "SELECT {} FROM gallery {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
        GALLERY_COLUMNS,
        clause,
        filter.sort.order_by(),
        values.len() - 1,
        values.len()
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(values.iter()), gallery_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page { items, total, limit: filter.limit, offset: filter.offset })
}

pub struct GalleryFields<'a> {
    pub title: &'a str,
    pub slug: &'a str,
    pub description: &'a str,
}

pub fn update_gallery_fields(conn: &Connection, id: i64, fields: &GalleryFields<'_>) -> Result<usize, RusqliteError> {
    conn.execute(
        "UPDATE gallery SET title = ?1, slug = ?2, description = ?3, updated_at = ?4 WHERE id = ?5",
        params![fields.title, fields.slug, fields.description, Utc::now(), id],
    )
}

/// Gallery rows have no rejection note; `rejected_reason` is ignored.
pub fn update_gallery_publication(conn: &Connection, id: i64, p: &Publication) -> Result<usize, RusqliteError> {
    conn.execute(
        "UPDATE gallery SET status = ?1, published_at = ?2, reviewed_by = ?3, reviewed_at = ?4, updated_at = ?5 WHERE id = ?6",
        params![p.status, p.published_at, p.reviewed_by, p.reviewed_at, Utc::now(), id],
    )
}
