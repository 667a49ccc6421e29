//! Create/update/publish/delete flows for news articles and gallery items.
//!
//! Every function takes the acting [`Actor`] explicitly; nothing is read
//! from ambient request state. Admin mutations are recorded in the activity
//! log on success.

use crate::helper::admin_helpers::log_activity;
use crate::helper::asset_store::{AssetError, AssetStore, StoredAsset, UploadedFile};
use crate::helper::permissions::{self, Action};
use crate::helper::publication::{Publication, TransitionError};
use crate::helper::sanitization_helpers;
use crate::helper::slug_helpers::{self, SlugError};
use crate::models::db_operations::content_db_operations::{
    self, ContentFilter, GalleryFields, NewGalleryItem, NewNews, NewsFields, Page,
};
use crate::models::{Actor, ContentKind, ContentStatus, GalleryItem, NewsArticle};
use crate::DbPool;
use chrono::{DateTime, Utc};
use redb::Database;
use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("You do not have permission to perform this action.")]
    Forbidden,
    #[error("Content not found.")]
    NotFound,
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("R2D2 Pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),
}

impl From<TransitionError> for ContentError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Forbidden => ContentError::Forbidden,
            TransitionError::InvalidStatus(_) => ContentError::InvalidState(e.to_string()),
        }
    }
}

impl From<SlugError<rusqlite::Error>> for ContentError {
    fn from(e: SlugError<rusqlite::Error>) -> Self {
        match e {
            SlugError::Exhausted(_) => ContentError::Conflict(e.to_string()),
            SlugError::Store(inner) => ContentError::Database(inner),
        }
    }
}

const MAX_TITLE_CHARS: usize = 200;
const MAX_EXCERPT_CHARS: usize = 500;
const DERIVED_EXCERPT_CHARS: usize = 200;
const DEFAULT_CATEGORY: &str = "umum";

fn ensure(allowed: bool) -> Result<(), ContentError> {
    if allowed {
        Ok(())
    } else {
        Err(ContentError::Forbidden)
    }
}

fn clean_title(raw: &str) -> Result<String, ContentError> {
    let title = sanitization_helpers::strip_all_html(raw.trim()).trim().to_string();
    if title.is_empty() {
        return Err(ContentError::Validation("Title is required.".to_string()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ContentError::Validation(format!("Title cannot exceed {} characters.", MAX_TITLE_CHARS)));
    }
    Ok(title)
}

/// Removes an asset, logging instead of failing.
fn remove_asset_best_effort(assets: &dyn AssetStore, path: &str) {
    if let Err(e) = assets.remove(path) {
        log::error!("Failed to remove asset '{}': {}", path, e);
    }
}

fn upload_optional(assets: &dyn AssetStore, kind: ContentKind, file: Option<&UploadedFile>) -> Result<Option<StoredAsset>, ContentError> {
    match file {
        Some(f) => Ok(Some(assets.upload(kind.asset_bucket(), &f.bytes, f.ext)?)),
        None => Ok(None),
    }
}

/// Runs `store` and removes the freshly uploaded asset when it fails.
fn with_uploaded<T>(
    assets: &dyn AssetStore,
    uploaded: Option<&StoredAsset>,
    store: impl FnOnce() -> Result<T, ContentError>,
) -> Result<T, ContentError> {
    let result = store();
    if result.is_err() {
        if let Some(asset) = uploaded {
            remove_asset_best_effort(assets, &asset.path);
        }
    }
    result
}

/// Slug base for a caller-supplied slug source, or `None` to keep the slug.
fn requested_slug_base(kind: ContentKind, slug_source: Option<&str>, current: &str) -> Option<String> {
    let source = slug_source.map(str::trim).filter(|s| !s.is_empty())?;
    let base = slug_helpers::base_slug(kind, source);
    (base != current).then_some(base)
}

/// Removes the associated asset (best effort), then deletes the row.
fn delete_with_asset(
    conn: &Connection,
    assets: &dyn AssetStore,
    kind: ContentKind,
    id: i64,
    asset_path: Option<&str>,
) -> Result<(), ContentError> {
    if let Some(path) = asset_path {
        remove_asset_best_effort(assets, path);
    }
    content_db_operations::delete_content(conn, kind, id)?;
    Ok(())
}

/// Drops the previous asset once a replacement has been committed.
fn discard_replaced(assets: &dyn AssetStore, uploaded: Option<&StoredAsset>, old_path: Option<&str>) {
    if let (Some(_), Some(old)) = (uploaded, old_path) {
        remove_asset_best_effort(assets, old);
    }
}

// ====================================================================
// ============================ NEWS ==================================
// ====================================================================

#[derive(Debug, Clone, Default)]
pub struct NewsInput {
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub category: String,
    /// Only read on create; updates go through `change_news_status`.
    pub status: Option<String>,
    /// A new source for the slug. Without it the slug never changes on update.
    pub slug_source: Option<String>,
}

struct CleanNews {
    title: String,
    excerpt: String,
    content: String,
    category: String,
}

impl CleanNews {
    fn from_input(input: &NewsInput) -> Result<CleanNews, ContentError> {
        let title = clean_title(&input.title)?;
        let content = sanitization_helpers::sanitize_markdown_content(input.content.trim());
        if content.trim().is_empty() {
            return Err(ContentError::Validation("Content is required.".to_string()));
        }
        let mut excerpt = sanitization_helpers::strip_all_html(input.excerpt.trim());
        if excerpt.is_empty() {
            excerpt = sanitization_helpers::derive_excerpt(&content, DERIVED_EXCERPT_CHARS);
        }
        if excerpt.chars().count() > MAX_EXCERPT_CHARS {
            return Err(ContentError::Validation(format!("Excerpt cannot exceed {} characters.", MAX_EXCERPT_CHARS)));
        }
        let category = sanitization_helpers::strip_all_html(input.category.trim()).to_lowercase();
        let category = if category.is_empty() { DEFAULT_CATEGORY.to_string() } else { category };
        if category.chars().count() > 50 {
            return Err(ContentError::Validation("Category cannot exceed 50 characters.".to_string()));
        }
        Ok(CleanNews { title, excerpt, content, category })
    }
}

fn news_publication(article: &NewsArticle) -> Publication {
    Publication {
        status: article.status,
        published_at: article.published_at,
        reviewed_by: article.reviewed_by,
        reviewed_at: article.reviewed_at,
        rejected_reason: article.rejected_reason.clone(),
    }
}

fn load_news(conn: &Connection, id: i64) -> Result<NewsArticle, ContentError> {
    content_db_operations::read_news_by_id(conn, id)?.ok_or(ContentError::NotFound)
}

pub fn list_news_admin(pool: &DbPool, filter: &ContentFilter) -> Result<Page<NewsArticle>, ContentError> {
    let conn = pool.get()?;
    Ok(content_db_operations::list_news(&conn, filter)?)
}

pub fn get_news_admin(pool: &DbPool, id: i64) -> Result<NewsArticle, ContentError> {
    let conn = pool.get()?;
    load_news(&conn, id)
}

pub fn create_news(
    pool: &DbPool,
    activity: &Database,
    assets: &dyn AssetStore,
    actor: &Actor,
    input: &NewsInput,
    thumbnail: Option<&UploadedFile>,
) -> Result<NewsArticle, ContentError> {
    ensure(permissions::can_edit_content(Some(actor.role), actor.id, Some(actor.id)))?;
    let clean = CleanNews::from_input(input)?;
    let conn = pool.get()?;

    let stored = upload_optional(assets, ContentKind::News, thumbnail)?;
    let article = with_uploaded(assets, stored.as_ref(), || {
        let publication = Publication::on_create(input.status.as_deref(), Utc::now());
        let new_news = NewNews {
            title: &clean.title,
            excerpt: &clean.excerpt,
            content: &clean.content,
            category: &clean.category,
            thumbnail_path: stored.as_ref().map(|s| s.path.as_str()),
            author_id: Some(actor.id),
            publication: &publication,
        };
        let source = input.slug_source.as_deref().filter(|s| !s.trim().is_empty()).unwrap_or(clean.title.as_str());
        let base = slug_helpers::base_slug(ContentKind::News, source);
        let (_slug, id) = slug_helpers::insert_with_unique_slug(
            &base,
            |candidate| content_db_operations::slug_exists(&conn, ContentKind::News, candidate, None),
            |candidate| content_db_operations::insert_news(&conn, &new_news, candidate),
        )?;
        load_news(&conn, id)
    })?;

    log_activity(
        activity,
        actor,
        "create",
        "news",
        Some(article.id.to_string()),
        format!("Created news '{}' ({})", article.title, article.status),
    );
    Ok(article)
}

pub fn update_news(
    pool: &DbPool,
    activity: &Database,
    assets: &dyn AssetStore,
    actor: &Actor,
    id: i64,
    input: &NewsInput,
    thumbnail: Option<&UploadedFile>,
) -> Result<NewsArticle, ContentError> {
    let conn = pool.get()?;
    let existing = load_news(&conn, id)?;
    ensure(permissions::can_edit_content(Some(actor.role), actor.id, existing.author_id))?;
    let clean = CleanNews::from_input(input)?;

    let stored = upload_optional(assets, ContentKind::News, thumbnail)?;
    with_uploaded(assets, stored.as_ref(), || {
        let tx = conn.unchecked_transaction()?;
        let write_fields = |slug: &str| {
            let fields = NewsFields {
                title: &clean.title,
                slug,
                excerpt: &clean.excerpt,
                content: &clean.content,
                category: &clean.category,
            };
            content_db_operations::update_news_fields(&tx, id, &fields)
        };
        match requested_slug_base(ContentKind::News, input.slug_source.as_deref(), &existing.slug) {
            Some(base) => {
                slug_helpers::insert_with_unique_slug(
                    &base,
                    |candidate| content_db_operations::slug_exists(&tx, ContentKind::News, candidate, Some(id)),
                    |candidate| content_db_operations::slug_outcome(write_fields(candidate)),
                )?;
            }
            None => {
                write_fields(&existing.slug)?;
            }
        }
        if let Some(asset) = &stored {
            content_db_operations::update_asset_path(&tx, ContentKind::News, id, Some(&asset.path))?;
        }
        tx.commit()?;
        Ok(())
    })?;
    discard_replaced(assets, stored.as_ref(), existing.thumbnail_path.as_deref());
    let updated = load_news(&conn, id)?;

    log_activity(activity, actor, "update", "news", Some(id.to_string()), format!("Updated news '{}'", updated.title));
    Ok(updated)
}

pub fn change_news_status(
    pool: &DbPool,
    activity: &Database,
    actor: &Actor,
    id: i64,
    requested: &str,
    explicit_published_at: Option<DateTime<Utc>>,
) -> Result<NewsArticle, ContentError> {
    let conn = pool.get()?;
    let existing = load_news(&conn, id)?;
    let next = news_publication(&existing).change_status(
        Some(actor.role),
        actor.id,
        existing.author_id,
        requested,
        explicit_published_at,
        Utc::now(),
    )?;
    content_db_operations::update_news_publication(&conn, id, &next)?;
    let updated = load_news(&conn, id)?;

    log_activity(
        activity,
        actor,
        "change_status",
        "news",
        Some(id.to_string()),
        format!("News '{}' {} -> {}", updated.title, existing.status, updated.status),
    );
    Ok(updated)
}

pub fn delete_news(pool: &DbPool, activity: &Database, assets: &dyn AssetStore, actor: &Actor, id: i64) -> Result<(), ContentError> {
    let conn = pool.get()?;
    let existing = load_news(&conn, id)?;
    ensure(permissions::can_delete_content(Some(actor.role), actor.id, existing.author_id))?;

    delete_with_asset(&conn, assets, ContentKind::News, id, existing.thumbnail_path.as_deref())?;

    log_activity(activity, actor, "delete", "news", Some(id.to_string()), format!("Deleted news '{}'", existing.title));
    Ok(())
}

/// Published listing for the public site.
pub fn list_published_news(pool: &DbPool, filter: ContentFilter) -> Result<Page<NewsArticle>, ContentError> {
    let conn = pool.get()?;
    let filter = ContentFilter { status: Some(ContentStatus::Published), ..filter };
    Ok(content_db_operations::list_news(&conn, &filter)?)
}

/// Published article by slug. Counts the read; a failed count is only logged.
pub fn read_published_news(pool: &DbPool, slug: &str) -> Result<NewsArticle, ContentError> {
    let conn = pool.get()?;
    let mut article = content_db_operations::read_news_by_slug(&conn, slug, true)?.ok_or(ContentError::NotFound)?;
    match content_db_operations::increment_view_count(&conn, ContentKind::News, article.id) {
        Ok(_) => article.view_count += 1,
        Err(e) => log::warn!("Failed to count view of news {}: {}", article.id, e),
    }
    Ok(article)
}

pub fn news_categories(pool: &DbPool) -> Result<Vec<String>, ContentError> {
    let conn = pool.get()?;
    Ok(content_db_operations::news_categories(&conn)?)
}

// ====================================================================
// =========================== GALLERY ================================
// ====================================================================

#[derive(Debug, Clone, Default)]
pub struct GalleryInput {
    pub title: String,
    pub description: String,
    /// Only read on create.
    pub status: Option<String>,
    pub slug_source: Option<String>,
}

fn clean_description(raw: &str) -> Result<String, ContentError> {
    let description = sanitization_helpers::strip_all_html(raw.trim());
    if description.chars().count() > 2000 {
        return Err(ContentError::Validation("Description cannot exceed 2000 characters.".to_string()));
    }
    Ok(description)
}

fn gallery_publication(item: &GalleryItem) -> Publication {
    Publication {
        status: item.status,
        published_at: item.published_at,
        reviewed_by: item.reviewed_by,
        reviewed_at: item.reviewed_at,
        rejected_reason: None,
    }
}

fn load_gallery(conn: &Connection, id: i64) -> Result<GalleryItem, ContentError> {
    content_db_operations::read_gallery_by_id(conn, id)?.ok_or(ContentError::NotFound)
}

pub fn list_gallery_admin(pool: &DbPool, filter: &ContentFilter) -> Result<Page<GalleryItem>, ContentError> {
    let conn = pool.get()?;
    Ok(content_db_operations::list_gallery(&conn, filter)?)
}

pub fn get_gallery_admin(pool: &DbPool, id: i64) -> Result<GalleryItem, ContentError> {
    let conn = pool.get()?;
    load_gallery(&conn, id)
}

pub fn create_gallery_item(
    pool: &DbPool,
    activity: &Database,
    assets: &dyn AssetStore,
    actor: &Actor,
    input: &GalleryInput,
    photo: Option<&UploadedFile>,
) -> Result<GalleryItem, ContentError> {
    ensure(permissions::can_edit_content(Some(actor.role), actor.id, Some(actor.id)))?;
    let title = clean_title(&input.title)?;
    let description = clean_description(&input.description)?;
    let photo = photo.ok_or_else(|| ContentError::Validation("A photo is required.".to_string()))?;
    let conn = pool.get()?;

    let stored = upload_optional(assets, ContentKind::Gallery, Some(photo))?;
    let item = with_uploaded(assets, stored.as_ref(), || {
        let publication = Publication::on_create(input.status.as_deref(), Utc::now());
        let new_item = NewGalleryItem {
            title: &title,
            description: &description,
            photo_path: stored.as_ref().map(|s| s.path.as_str()),
            author_id: Some(actor.id),
            publication: &publication,
        };
        let source = input.slug_source.as_deref().filter(|s| !s.trim().is_empty()).unwrap_or(title.as_str());
        let base = slug_helpers::base_slug(ContentKind::Gallery, source);
        let (_slug, id) = slug_helpers::insert_with_unique_slug(
            &base,
            |candidate| content_db_operations::slug_exists(&conn, ContentKind::Gallery, candidate, None),
            |candidate| content_db_operations::insert_gallery_item(&conn, &new_item, candidate),
        )?;
        load_gallery(&conn, id)
    })?;

    log_activity(
        activity,
        actor,
        "create",
        "gallery",
        Some(item.id.to_string()),
        format!("Created gallery item '{}' ({})", item.title, item.status),
    );
    Ok(item)
}

pub fn update_gallery_item(
    pool: &DbPool,
    activity: &Database,
    assets: &dyn AssetStore,
    actor: &Actor,
    id: i64,
    input: &GalleryInput,
    photo: Option<&UploadedFile>,
) -> Result<GalleryItem, ContentError> {
    let conn = pool.get()?;
    let existing = load_gallery(&conn, id)?;
    ensure(permissions::can_edit_content(Some(actor.role), actor.id, existing.author_id))?;
    let title = clean_title(&input.title)?;
    let description = clean_description(&input.description)?;

    let stored = upload_optional(assets, ContentKind::Gallery, photo)?;
    with_uploaded(assets, stored.as_ref(), || {
        let tx = conn.unchecked_transaction()?;
        let write_fields = |slug: &str| {
            let fields = GalleryFields { title: &title, slug, description: &description };
            content_db_operations::update_gallery_fields(&tx, id, &fields)
        };
        match requested_slug_base(ContentKind::Gallery, input.slug_source.as_deref(), &existing.slug) {
            Some(base) => {
                slug_helpers::insert_with_unique_slug(
                    &base,
                    |candidate| content_db_operations::slug_exists(&tx, ContentKind::Gallery, candidate, Some(id)),
                    |candidate| content_db_operations::slug_outcome(write_fields(candidate)),
                )?;
            }
            None => {
                write_fields(&existing.slug)?;
            }
        }
        if let Some(asset) = &stored {
            content_db_operations::update_asset_path(&tx, ContentKind::Gallery, id, Some(&asset.path))?;
        }
        tx.commit()?;
        Ok(())
    })?;
    discard_replaced(assets, stored.as_ref(), existing.photo_path.as_deref());
    let updated = load_gallery(&conn, id)?;

    log_activity(activity, actor, "update", "gallery", Some(id.to_string()), format!("Updated gallery item '{}'", updated.title));
    Ok(updated)
}

pub fn change_gallery_status(
    pool: &DbPool,
    activity: &Database,
    actor: &Actor,
    id: i64,
    requested: &str,
    explicit_published_at: Option<DateTime<Utc>>,
) -> Result<GalleryItem, ContentError> {
    let conn = pool.get()?;
    let existing = load_gallery(&conn, id)?;
    let next = gallery_publication(&existing).change_status(
        Some(actor.role),
        actor.id,
        existing.author_id,
        requested,
        explicit_published_at,
        Utc::now(),
    )?;
    content_db_operations::update_gallery_publication(&conn, id, &next)?;
    let updated = load_gallery(&conn, id)?;

    log_activity(
        activity,
        actor,
        "change_status",
        "gallery",
        Some(id.to_string()),
        format!("Gallery item '{}' {} -> {}", updated.title, existing.status, updated.status),
    );
    Ok(updated)
}

pub fn delete_gallery_item(
    pool: &DbPool,
    activity: &Database,
    assets: &dyn AssetStore,
    actor: &Actor,
    id: i64,
) -> Result<(), ContentError> {
    let conn = pool.get()?;
    let existing = load_gallery(&conn, id)?;
    ensure(permissions::can_delete_content(Some(actor.role), actor.id, existing.author_id))?;

    delete_with_asset(&conn, assets, ContentKind::Gallery, id, existing.photo_path.as_deref())?;

    log_activity(activity, actor, "delete", "gallery", Some(id.to_string()), format!("Deleted gallery item '{}'", existing.title));
    Ok(())
}

pub fn list_published_gallery(pool: &DbPool, filter: ContentFilter) -> Result<Page<GalleryItem>, ContentError> {
    let conn = pool.get()?;
    let filter = ContentFilter { status: Some(ContentStatus::Published), category: None, ..filter };
    Ok(content_db_operations::list_gallery(&conn, &filter)?)
}

pub fn read_published_gallery(pool: &DbPool, slug: &str) -> Result<GalleryItem, ContentError> {
    let conn = pool.get()?;
    let mut item = content_db_operations::read_gallery_by_slug(&conn, slug, true)?.ok_or(ContentError::NotFound)?;
    match content_db_operations::increment_view_count(&conn, ContentKind::Gallery, item.id) {
        Ok(_) => item.view_count += 1,
        Err(e) => log::warn!("Failed to count view of gallery item {}: {}", item.id, e),
    }
    Ok(item)
}

/// Content-level permission for village data (letters, population, profile, messages).
pub fn require_action(actor: &Actor, action: Action) -> Result<(), ContentError> {
    ensure(permissions::is_permitted(Some(actor.role), action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_operations::users_db_operations;
    use crate::models::Role;
    use crate::test_support::{open_activity_db, open_pool, RecordingAssetStore};

    struct Fixture {
        _dirs: (tempfile::TempDir, tempfile::TempDir),
        pool: DbPool,
        activity: Database,
        actor: Actor,
    }

    fn fixture(role: Role) -> Fixture {
        let (d1, pool) = open_pool();
        let (d2, activity) = open_activity_db();
        let actor = {
            let conn = pool.get().unwrap();
            let id = users_db_operations::create_user(&conn, "sekdes", "password123", role).unwrap();
            users_db_operations::read_user_by_id(&conn, id).unwrap().unwrap()
        };
        Fixture { _dirs: (d1, d2), pool, activity, actor }
    }

    fn news(title: &str, status: Option<&str>) -> NewsInput {
        NewsInput {
            title: title.to_string(),
            content: "Warga bergotong royong membersihkan saluran air.\n\nKegiatan dimulai pukul tujuh.".to_string(),
            category: "Kegiatan".to_string(),
            status: status.map(str::to_string),
            ..Default::default()
        }
    }

    fn jpeg() -> UploadedFile {
        UploadedFile {
            bytes: vec![0xFF, 0xD8, 0xFF],
            ext: "jpg",
            content_type: "image/jpeg".to_string(),
            original_filename: "foto.jpg".to_string(),
        }
    }

    #[test]
    fn same_title_gets_suffixed_slugs() {
        let f = fixture(Role::Admin);
        let store = RecordingAssetStore::default();
        let slugs: Vec<String> = (0..3)
            .map(|_| create_news(&f.pool, &f.activity, &store, &f.actor, &news("Kerja Bakti", None), None).unwrap().slug)
            .collect();
        assert_eq!(slugs, vec!["kerja-bakti", "kerja-bakti-1", "kerja-bakti-2"]);
    }

    #[test]
    fn create_defaults_to_draft_and_derives_excerpt() {
        let f = fixture(Role::Admin);
        let store = RecordingAssetStore::default();
        let draft = create_news(&f.pool, &f.activity, &store, &f.actor, &news("Rapat", Some("archived")), None).unwrap();
        assert_eq!(draft.status, ContentStatus::Draft);
        assert!(draft.published_at.is_none());
        assert_eq!(draft.excerpt, "Warga bergotong royong membersihkan saluran air.");
        assert_eq!(draft.category, "kegiatan");
        assert_eq!(draft.author_id, Some(f.actor.id));

        let live = create_news(&f.pool, &f.activity, &store, &f.actor, &news("Panen", Some("published")), None).unwrap();
        assert_eq!(live.status, ContentStatus::Published);
        assert!(live.published_at.is_some());
    }

    #[test]
    fn publishing_records_reviewer_and_unknown_status_is_invalid() {
        let f = fixture(Role::Admin);
        let store = RecordingAssetStore::default();
        let draft = create_news(&f.pool, &f.activity, &store, &f.actor, &news("Posyandu", None), None).unwrap();

        let published = change_news_status(&f.pool, &f.activity, &f.actor, draft.id, "published", None).unwrap();
        assert_eq!(published.status, ContentStatus::Published);
        assert_eq!(published.reviewed_by, Some(f.actor.id));
        assert!(published.published_at.is_some());

        let err = change_news_status(&f.pool, &f.activity, &f.actor, draft.id, "rejected", None).unwrap_err();
        assert!(matches!(err, ContentError::InvalidState(_)));

        let back = change_news_status(&f.pool, &f.activity, &f.actor, draft.id, "draft", None).unwrap();
        assert_eq!(back.status, ContentStatus::Draft);
    }

    #[test]
    fn update_keeps_slug_unless_a_new_source_is_given() {
        let f = fixture(Role::SuperAdmin);
        let store = RecordingAssetStore::default();
        let first = create_news(&f.pool, &f.activity, &store, &f.actor, &news("Musyawarah Desa", None), None).unwrap();
        create_news(&f.pool, &f.activity, &store, &f.actor, &news("Bantuan Sosial", None), None).unwrap();

        let renamed = update_news(&f.pool, &f.activity, &store, &f.actor, first.id, &news("Judul Baru", None), None).unwrap();
        assert_eq!(renamed.slug, "musyawarah-desa");
        assert_eq!(renamed.title, "Judul Baru");

        let mut input = news("Judul Baru", None);
        input.slug_source = Some("Bantuan Sosial".to_string());
        let reslugged = update_news(&f.pool, &f.activity, &store, &f.actor, first.id, &input, None).unwrap();
        assert_eq!(reslugged.slug, "bantuan-sosial-1");

        // Re-submitting the same source keeps the current suffix.
        let again = update_news(&f.pool, &f.activity, &store, &f.actor, first.id, &input, None).unwrap();
        assert_eq!(again.slug, "bantuan-sosial-1");
    }

    #[test]
    fn replacing_thumbnail_removes_the_old_asset() {
        let f = fixture(Role::Admin);
        let store = RecordingAssetStore::default();
        let article = create_news(&f.pool, &f.activity, &store, &f.actor, &news("Foto", None), Some(&jpeg())).unwrap();
        let old_path = article.thumbnail_path.clone().unwrap();

        let updated = update_news(&f.pool, &f.activity, &store, &f.actor, article.id, &news("Foto", None), Some(&jpeg())).unwrap();
        assert_ne!(updated.thumbnail_path.as_deref(), Some(old_path.as_str()));
        assert_eq!(*store.removals.lock().unwrap(), vec![old_path]);
    }

    #[test]
    fn failed_thumbnail_upload_leaves_the_article_untouched() {
        let f = fixture(Role::Admin);
        let store = RecordingAssetStore::default();
        let article = create_news(&f.pool, &f.activity, &store, &f.actor, &news("Lama", None), None).unwrap();

        let failing = RecordingAssetStore { fail_upload: true, ..Default::default() };
        let mut input = news("Baru", None);
        input.slug_source = Some("Baru".to_string());
        let err = update_news(&f.pool, &f.activity, &failing, &f.actor, article.id, &input, Some(&jpeg())).unwrap_err();
        assert!(matches!(err, ContentError::Asset(_)));

        let stored = get_news_admin(&f.pool, article.id).unwrap();
        assert_eq!(stored.title, "Lama");
        assert_eq!(stored.slug, "lama");
        assert!(stored.thumbnail_path.is_none());
    }

    #[test]
    fn failed_gallery_write_rolls_back_and_removes_the_fresh_photo() {
        let f = fixture(Role::Admin);
        let store = RecordingAssetStore::default();
        let input = GalleryInput { title: "Sawah".to_string(), ..Default::default() };
        let item = create_gallery_item(&f.pool, &f.activity, &store, &f.actor, &input, Some(&jpeg())).unwrap();
        f.pool
            .get()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER freeze_photo BEFORE UPDATE OF photo_path ON gallery
                 BEGIN SELECT RAISE(ABORT, 'photo frozen'); END;",
            )
            .unwrap();

        let renamed = GalleryInput { title: "Sawah Hijau".to_string(), ..Default::default() };
        let err = update_gallery_item(&f.pool, &f.activity, &store, &f.actor, item.id, &renamed, Some(&jpeg())).unwrap_err();
        assert!(matches!(err, ContentError::Database(_)));

        let fresh = store.uploads.lock().unwrap()[1].clone();
        assert_eq!(*store.removals.lock().unwrap(), vec![fresh]);
        let stored = get_gallery_admin(&f.pool, item.id).unwrap();
        assert_eq!(stored.title, "Sawah");
        assert_eq!(stored.photo_path, item.photo_path);
    }

    #[test]
    fn delete_removes_row_even_when_asset_removal_fails() {
        let f = fixture(Role::Admin);
        let store = RecordingAssetStore { fail_removal: true, ..Default::default() };
        let article = create_news(&f.pool, &f.activity, &store, &f.actor, &news("Hapus", None), Some(&jpeg())).unwrap();

        delete_news(&f.pool, &f.activity, &store, &f.actor, article.id).unwrap();
        assert_eq!(store.removals.lock().unwrap().len(), 1);
        assert!(matches!(get_news_admin(&f.pool, article.id), Err(ContentError::NotFound)));
        assert!(matches!(delete_news(&f.pool, &f.activity, &store, &f.actor, article.id), Err(ContentError::NotFound)));
    }

    #[test]
    fn public_read_counts_views_and_hides_drafts() {
        let f = fixture(Role::Admin);
        let store = RecordingAssetStore::default();
        let live = create_news(&f.pool, &f.activity, &store, &f.actor, &news("Lomba", Some("published")), None).unwrap();
        create_news(&f.pool, &f.activity, &store, &f.actor, &news("Rahasia", None), None).unwrap();

        assert_eq!(read_published_news(&f.pool, &live.slug).unwrap().view_count, 1);
        assert_eq!(read_published_news(&f.pool, &live.slug).unwrap().view_count, 2);
        assert!(matches!(read_published_news(&f.pool, "rahasia"), Err(ContentError::NotFound)));

        let page = list_published_news(&f.pool, ContentFilter { limit: 10, ..Default::default() }).unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn gallery_requires_photo_and_cleans_up_on_delete() {
        let f = fixture(Role::Admin);
        let store = RecordingAssetStore::default();
        let input = GalleryInput { title: "Pasar Desa".to_string(), ..Default::default() };

        let err = create_gallery_item(&f.pool, &f.activity, &store, &f.actor, &input, None).unwrap_err();
        assert!(matches!(err, ContentError::Validation(_)));

        let item = create_gallery_item(&f.pool, &f.activity, &store, &f.actor, &input, Some(&jpeg())).unwrap();
        assert_eq!(item.slug, "pasar-desa");
        let published = change_gallery_status(&f.pool, &f.activity, &f.actor, item.id, "published", None).unwrap();
        assert_eq!(published.reviewed_by, Some(f.actor.id));

        delete_gallery_item(&f.pool, &f.activity, &store, &f.actor, item.id).unwrap();
        assert_eq!(*store.removals.lock().unwrap(), vec![item.photo_path.unwrap()]);
    }

    #[test]
    fn mutations_are_logged() {
        let f = fixture(Role::Admin);
        let store = RecordingAssetStore::default();
        let article = create_news(&f.pool, &f.activity, &store, &f.actor, &news("Log", None), None).unwrap();
        delete_news(&f.pool, &f.activity, &store, &f.actor, article.id).unwrap();

        let entries = crate::models::db_operations::activity_db_operations::read_latest_activities(&f.activity, Some("news"), 10, 0).unwrap();
        let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
        assert!(actions.contains(&"create") && actions.contains(&"delete"));
    }
}
