use crate::helper::asset_store::mime_to_safe_extension;
use crate::helper::permissions::{self, Action};
use crate::models::db_operations::activity_db_operations::{self, ActivityDbError, NewActivity};
use crate::models::db_operations::{content_db_operations, users_db_operations, village_db_operations};
use crate::models::{ActivityLogEntry, Actor, ContentKind, ContentStatus, Role};
use crate::DbPool;
use redb::Database;
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdminHelperError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Redb Database error: {0}")]
    RedbDatabase(#[from] ActivityDbError),
    #[error("R2D2 Pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("You do not have permission to manage accounts or settings.")]
    Forbidden,
    #[error("User not found")]
    NotFound,
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Settings {
    pub village_name: String,
    pub max_file_upload_size_mb: String,
    pub allowed_mime_types: String,
}

fn get_conn(pool: &DbPool) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>, AdminHelperError> {
    pool.get().map_err(AdminHelperError::Pool)
}

/// Appends to the activity log. Failures are logged and swallowed.
pub fn log_activity(
    activity: &Database,
    actor: &Actor,
    action: &str,
    entity_type: &str,
    entity_id: Option<String>,
    description: String,
) {
    let entry = NewActivity {
        actor_id: Some(actor.id),
        actor_username: &actor.username,
        action,
        entity_type,
        entity_id,
        description,
    };
    if let Err(e) = activity_db_operations::record_activity(activity, entry) {
        log::error!("Failed to record '{}' activity on {} by '{}': {}", action, entity_type, actor.username, e);
    }
}

// --- Account management ---

fn require_manager(manager: &Actor, target_role: Option<Role>) -> Result<(), AdminHelperError> {
    if permissions::can_manage_user(Some(manager.role), target_role) {
        Ok(())
    } else {
        Err(AdminHelperError::Forbidden)
    }
}

fn validate_username(username: &str) -> Result<(), AdminHelperError> {
    let valid_chars = username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if username.len() < 3 || username.len() > 50 || !valid_chars {
        return Err(AdminHelperError::Validation(
            "Username must be 3-50 characters: letters, numbers, '.', '_' or '-'.".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AdminHelperError> {
    if password.chars().count() < 8 {
        return Err(AdminHelperError::Validation("Password must be at least 8 characters.".to_string()));
    }
    Ok(())
}

fn parse_role(role: &str) -> Result<Role, AdminHelperError> {
    Role::parse(role).ok_or_else(|| AdminHelperError::Validation(format!("'{}' is not a valid role.", role.trim())))
}

fn username_conflict(err: rusqlite::Error, username: &str) -> AdminHelperError {
    match &err {
        rusqlite::Error::SqliteFailure(e, Some(message))
            if e.code == ErrorCode::ConstraintViolation && message.contains("users.username") =>
        {
            AdminHelperError::Conflict(format!("Username '{}' already exists.", username))
        }
        _ => AdminHelperError::Database(err),
    }
}

/// Refuses to let the last active super admin lose that status. Callers run
/// this and their write inside one `IMMEDIATE` transaction so concurrent
/// removals are serialised.
fn ensure_not_last_super_admin(conn: &Connection, target: &Actor, stays_active_super_admin: bool) -> Result<(), AdminHelperError> {
    if target.role != Role::SuperAdmin || !target.is_active || stays_active_super_admin {
        return Ok(());
    }
    if users_db_operations::count_active_with_role(conn, Role::SuperAdmin)? <= 1 {
        return Err(AdminHelperError::InvalidState(
            "The last active super admin cannot be removed, demoted, or deactivated.".to_string(),
        ));
    }
    Ok(())
}

pub fn fetch_all_accounts(pool: &DbPool, manager: &Actor) -> Result<Vec<Actor>, AdminHelperError> {
    require_manager(manager, None)?;
    let conn = get_conn(pool)?;
    Ok(users_db_operations::read_all_users(&conn)?)
}

pub fn create_account(
    pool: &DbPool,
    activity: &Database,
    manager: &Actor,
    username: &str,
    password: &str,
    role: &str,
) -> Result<Actor, AdminHelperError> {
    let role = parse_role(role)?;
    require_manager(manager, Some(role))?;
    let username = username.trim();
    validate_username(username)?;
    validate_password(password)?;

    let conn = get_conn(pool)?;
    let user_id = users_db_operations::create_user(&conn, username, password, role)
        .map_err(|e| username_conflict(e, username))?;
    let created = users_db_operations::read_user_by_id(&conn, user_id)?.ok_or(AdminHelperError::NotFound)?;

    log_activity(
        activity,
        manager,
        "create",
        "user",
        Some(user_id.to_string()),
        format!("Created {} account '{}'", permissions::role_display_name(Some(role)), username),
    );
    Ok(created)
}

pub struct AccountUpdate<'a> {
    pub username: &'a str,
    pub new_password: Option<&'a str>,
    pub role: &'a str,
    pub is_active: bool,
}

pub fn update_account(
    pool: &DbPool,
    activity: &Database,
    manager: &Actor,
    user_id: i64,
    update: &AccountUpdate<'_>,
) -> Result<Actor, AdminHelperError> {
    let role = parse_role(update.role)?;
    let username = update.username.trim();
    validate_username(username)?;
    let new_password = update.new_password.filter(|p| !p.is_empty());
    if let Some(password) = new_password {
        validate_password(password)?;
    }

    let mut conn = get_conn(pool)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let target = users_db_operations::read_user_by_id(&tx, user_id)?.ok_or(AdminHelperError::NotFound)?;
    require_manager(manager, Some(target.role))?;
    ensure_not_last_super_admin(&tx, &target, role == Role::SuperAdmin && update.is_active)?;

    let db_update = users_db_operations::UserUpdate { username, new_password, role, is_active: update.is_active };
    users_db_operations::update_user(&tx, user_id, &db_update).map_err(|e| username_conflict(e, username))?;
    let updated = users_db_operations::read_user_by_id(&tx, user_id)?.ok_or(AdminHelperError::NotFound)?;
    tx.commit()?;

    log_activity(activity, manager, "update", "user", Some(user_id.to_string()), format!("Updated account '{}'", username));
    Ok(updated)
}

pub fn delete_account(pool: &DbPool, activity: &Database, manager: &Actor, user_id: i64) -> Result<(), AdminHelperError> {
    let mut conn = get_conn(pool)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let target = users_db_operations::read_user_by_id(&tx, user_id)?.ok_or(AdminHelperError::NotFound)?;
    require_manager(manager, Some(target.role))?;
    ensure_not_last_super_admin(&tx, &target, false)?;

    users_db_operations::delete_user(&tx, user_id)?;
    tx.commit()?;
    log_activity(
        activity,
        manager,
        "delete",
        "user",
        Some(user_id.to_string()),
        format!("Deleted account '{}'", target.username),
    );
    Ok(())
}

// --- Settings ---

pub fn get_settings(conn: &Connection) -> Settings {
    let village_name = users_db_operations::read_setting(conn, "village_name").unwrap_or_else(|| "Desa".to_string());

    let max_size = users_db_operations::read_setting(conn, "max_file_upload_size_mb")
        .unwrap_or_else(|| "5".to_string());

    let mime_types = users_db_operations::read_setting(conn, "allowed_mime_types").unwrap_or_default();

    Settings { village_name, max_file_upload_size_mb: max_size, allowed_mime_types: mime_types }
}

/// Site settings share the account-management permission.
pub fn update_settings(pool: &DbPool, activity: &Database, actor: &Actor, new: &Settings) -> Result<Settings, AdminHelperError> {
    if !permissions::is_permitted(Some(actor.role), Action::ManageUsers) {
        return Err(AdminHelperError::Forbidden);
    }

    let village_name = new.village_name.trim();
    if village_name.is_empty() || village_name.chars().count() > 100 {
        return Err(AdminHelperError::Validation("Village name must be 1-100 characters.".to_string()));
    }
    let max_size = new.max_file_upload_size_mb.trim();
    match max_size.parse::<u64>() {
        Ok(mb) if (1..=100).contains(&mb) => {}
        _ => {
            return Err(AdminHelperError::Validation(
                "Invalid max file size. It must be a whole number between 1 and 100.".to_string(),
            ))
        }
    }
    let mime_types: Vec<&str> = new.allowed_mime_types.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    if let Some(unknown) = mime_types.iter().find(|m| mime_to_safe_extension(m).is_none()) {
        return Err(AdminHelperError::Validation(format!("MIME type '{}' cannot be allowed.", unknown)));
    }
    let mime_types = mime_types.join(",");

    let conn = get_conn(pool)?;
    users_db_operations::update_setting(&conn, "village_name", village_name)?;
    users_db_operations::update_setting(&conn, "max_file_upload_size_mb", max_size)?;
    users_db_operations::update_setting(&conn, "allowed_mime_types", &mime_types)?;

    log_activity(activity, actor, "update", "settings", None, "Updated site settings".to_string());
    Ok(get_settings(&conn))
}

// --- Dashboard ---

#[derive(Serialize, Debug)]
pub struct DashboardSummary {
    pub news_draft: i64,
    pub news_published: i64,
    pub gallery_draft: i64,
    pub gallery_published: i64,
    pub unread_messages: i64,
    pub letter_templates: i64,
    pub latest_activities: Vec<ActivityLogEntry>,
}

pub fn dashboard_summary(pool: &DbPool, activity: &Database) -> Result<DashboardSummary, AdminHelperError> {
    let conn = get_conn(pool)?;
    Ok(DashboardSummary {
        news_draft: content_db_operations::count_by_status(&conn, ContentKind::News, ContentStatus::Draft)?,
        news_published: content_db_operations::count_by_status(&conn, ContentKind::News, ContentStatus::Published)?,
        gallery_draft: content_db_operations::count_by_status(&conn, ContentKind::Gallery, ContentStatus::Draft)?,
        gallery_published: content_db_operations::count_by_status(&conn, ContentKind::Gallery, ContentStatus::Published)?,
        unread_messages: village_db_operations::count_unread_messages(&conn)?,
        letter_templates: village_db_operations::count_letter_templates(&conn)?,
        latest_activities: activity_db_operations::read_latest_activities(activity, None, 10, 0)?,
    })
}

pub fn fetch_activities(
    activity: &Database,
    entity_type: Option<&str>,
    limit: u32,
    offset: u32,
) -> Result<Vec<ActivityLogEntry>, AdminHelperError> {
    let entity_type = entity_type.map(str::trim).filter(|s| !s.is_empty());
    Ok(activity_db_operations::read_latest_activities(activity, entity_type, limit, offset)?)
}
