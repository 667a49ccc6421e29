use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error)]
#[error("Unknown {kind} value: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Operator role. Every account carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Admin, Role::SuperAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Returns `None` for any role string outside the known set.
    pub fn parse(value: &str) -> Option<Role> {
        match value.trim() {
            "admin" => Some(Role::Admin),
            "super_admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    Published,
}

impl ContentStatus {
    pub const ALL: [ContentStatus; 2] = [ContentStatus::Draft, ContentStatus::Published];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Option<ContentStatus> {
        match value.trim() {
            "draft" => Some(ContentStatus::Draft),
            "published" => Some(ContentStatus::Published),
            _ => None,
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Both enums persist as their snake_case names in TEXT columns.
impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        Role::parse(raw).ok_or_else(|| {
            FromSqlError::Other(Box::new(UnknownVariant { kind: "role", value: raw.to_string() }))
        })
    }
}

impl ToSql for ContentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ContentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        ContentStatus::parse(raw).ok_or_else(|| {
            FromSqlError::Other(Box::new(UnknownVariant { kind: "status", value: raw.to_string() }))
        })
    }
}

/// The two publishable entity types. Each has its own table and slug namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    News,
    Gallery,
}

impl ContentKind {
    pub fn table(&self) -> &'static str {
        match self {
            ContentKind::News => "news",
            ContentKind::Gallery => "gallery",
        }
    }

    /// Used in place of an empty normalized title.
    pub fn slug_prefix(&self) -> &'static str {
        match self {
            ContentKind::News => "berita",
            ContentKind::Gallery => "galeri",
        }
    }

    pub fn asset_bucket(&self) -> &'static str {
        match self {
            ContentKind::News => "news",
            ContentKind::Gallery => "gallery",
        }
    }

    pub fn asset_column(&self) -> &'static str {
        match self {
            ContentKind::News => "thumbnail_path",
            ContentKind::Gallery => "photo_path",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewsArticle {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub content: String,
    pub category: String,
    pub thumbnail_path: Option<String>,
    pub status: ContentStatus,
    pub author_id: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejected_reason: Option<String>,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GalleryItem {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub photo_path: Option<String>,
    pub status: ContentStatus,
    pub author_id: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LetterTemplate {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub file_path: String,
    pub original_filename: String,
    pub download_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationStat {
    pub id: i64,
    pub category: String,
    pub label: String,
    pub male: i64,
    pub female: i64,
    pub year: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PopulationSummary {
    pub year: i32,
    pub male: i64,
    pub female: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileSection {
    pub key: String,
    pub title: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactMessage {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: String,
    pub actor_id: Option<i64>,
    pub actor_username: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

pub mod db_operations;
