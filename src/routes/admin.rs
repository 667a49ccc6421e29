use crate::config::Config;
use crate::helper::admin_helpers::{self, AccountUpdate, AdminHelperError, Settings};
use crate::helper::asset_store::{self, FileKind, UploadForm, UploadLimits};
use crate::helper::content_helpers::{self, GalleryInput, NewsInput};
use crate::helper::permissions::{self, Action};
use crate::helper::village_helpers::{self, PopulationInput};
use crate::helper::{form_helpers, public_helpers};
use crate::middleware::{admin_guard, AuthenticatedActor, SESSION_ROLE, SESSION_USERNAME, SESSION_USER_ID};
use crate::models::db_operations::users_db_operations;
use crate::models::Actor;
use crate::routes::public::{ContentQuery, PopulationQuery};
use crate::routes::{asset_error_response, content_error_response, internal_error, ok_data, unblock};
use crate::{AppState, DbPool};
use actix_csrf::extractor::{Csrf, CsrfGuarded, CsrfToken};
use actix_multipart::Multipart;
use actix_session::Session;
use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use redb::Database;
use serde::Deserialize;
use serde_json::json;
use tera::{Context, Tera};

#[derive(Deserialize)]
struct LoginForm {
    csrf_token: CsrfToken,
    username: String,
    password: String,
}

impl CsrfGuarded for LoginForm {
    fn csrf_token(&self) -> &CsrfToken {
        &self.csrf_token
    }
}

#[derive(Deserialize)]
struct StatusPayload {
    status: String,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ProfilePayload {
    title: String,
    content: String,
}

#[derive(Deserialize)]
struct ReadPayload {
    is_read: Option<bool>,
}

#[derive(Deserialize)]
struct MessageQuery {
    unread_only: Option<bool>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct ActivityQuery {
    entity_type: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

pub fn config_login(cfg: &mut web::ServiceConfig) {
    cfg.route("/login", web::get().to(show_login_form))
        .route("/login", web::post().to(handle_login))
        .route("/logout", web::post().to(handle_logout));
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/dashboard", web::get().to(get_dashboard))
            .route("/users", web::get().to(list_users))
            .route("/users", web::post().to(create_user_action))
            .route("/users/{id}/update", web::post().to(update_user_action))
            .route("/users/{id}/delete", web::post().to(delete_user_action))
            .route("/settings", web::get().to(get_settings))
            .route("/settings", web::post().to(update_settings_action))
            .route("/news", web::get().to(list_news))
            .route("/news", web::post().to(create_news_action))
            .route("/news/{id}", web::get().to(get_news))
            .route("/news/{id}/update", web::post().to(update_news_action))
            .route("/news/{id}/status", web::post().to(change_news_status_action))
            .route("/news/{id}/delete", web::post().to(delete_news_action))
            .route("/gallery", web::get().to(list_gallery))
            .route("/gallery", web::post().to(create_gallery_action))
            .route("/gallery/{id}", web::get().to(get_gallery))
            .route("/gallery/{id}/update", web::post().to(update_gallery_action))
            .route("/gallery/{id}/status", web::post().to(change_gallery_status_action))
            .route("/gallery/{id}/delete", web::post().to(delete_gallery_action))
            .route("/letters", web::get().to(list_letters))
            .route("/letters", web::post().to(upload_letter_action))
            .route("/letters/{id}/delete", web::post().to(delete_letter_action))
            .route("/population", web::get().to(list_population))
            .route("/population", web::post().to(upsert_population_action))
            .route("/population/{id}/delete", web::post().to(delete_population_action))
            .route("/profile/{key}", web::post().to(upsert_profile_action))
            .route("/messages", web::get().to(list_messages))
            .route("/messages/unread_count", web::get().to(unread_message_count))
            .route("/messages/{id}/read", web::post().to(mark_message_action))
            .route("/messages/{id}/delete", web::post().to(delete_message_action))
            .route("/activities", web::get().to(list_activities)),
    );
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found().append_header(("location", location)).finish()
}

fn admin_error_response(e: AdminHelperError) -> HttpResponse {
    let body = json!({ "success": false, "error": e.to_string() });
    match &e {
        AdminHelperError::Forbidden => HttpResponse::Forbidden().json(body),
        AdminHelperError::NotFound => HttpResponse::NotFound().json(body),
        AdminHelperError::InvalidState(_) | AdminHelperError::Conflict(_) => HttpResponse::Conflict().json(body),
        AdminHelperError::Validation(_) => HttpResponse::BadRequest().json(body),
        AdminHelperError::Database(_) | AdminHelperError::RedbDatabase(_) | AdminHelperError::Pool(_) => {
            log::error!("Account or settings operation failed: {}", e);
            internal_error()
        }
    }
}

/// Reloads the session's account from the store. A deleted or deactivated
/// account loses its session here.
fn current_actor(auth: &AuthenticatedActor, session: &Session, pool: &DbPool) -> Result<Actor, HttpResponse> {
    let conn = pool.get().map_err(|e| {
        log::error!("Database pool error while loading session account: {}", e);
        internal_error()
    })?;
    match users_db_operations::read_user_by_id(&conn, auth.user_id) {
        Ok(Some(actor)) if actor.is_active => Ok(actor),
        Ok(_) => {
            log::warn!("Session for '{}' refers to a missing or inactive account.", auth.username);
            session.purge();
            Err(HttpResponse::Unauthorized()
                .json(json!({ "success": false, "error": "Your account is no longer active. Please log in again." })))
        }
        Err(e) => {
            log::error!("Failed to load session account {}: {}", auth.user_id, e);
            Err(internal_error())
        }
    }
}

fn write_session(session: &Session, actor: &Actor) -> Result<(), actix_session::SessionInsertError> {
    session.insert(SESSION_USER_ID, actor.id)?;
    session.insert(SESSION_USERNAME, &actor.username)?;
    session.insert(SESSION_ROLE, actor.role.as_str())
}

/// Reads the upload limits from settings, then the whole multipart body.
async fn read_form(pool: &DbPool, payload: Multipart, file_field: &str, kind: FileKind) -> Result<UploadForm, HttpResponse> {
    let limits = {
        let conn = pool.get().map_err(|e| {
            log::error!("Database pool error while reading upload limits: {}", e);
            internal_error()
        })?;
        UploadLimits::from_settings(&conn)
    };
    asset_store::read_upload_form(payload, file_field, kind, &limits)
        .await
        .map_err(|e| asset_error_response(&e))
}

fn form_text(form: &UploadForm, name: &str) -> String {
    form.text(name).unwrap_or_default().to_string()
}

fn bad_status(value: String) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "success": false, "error": format!("Unknown status filter '{}'.", value) }))
}

// --- Login ---

async fn show_login_form(
    session: Session,
    tera: web::Data<Tera>,
    token: CsrfToken,
    config: web::Data<Config>,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let admin_url_prefix = &config.admin_url_prefix;
    if admin_guard(&session) {
        return redirect(&format!("/management/{}/api/dashboard", admin_url_prefix));
    }

    let village_name = app_state
        .village_name
        .read()
        .unwrap_or_else(|poisoned| {
            log::error!("RwLock for village_name was poisoned on login page! Recovering lock.");
            poisoned.into_inner()
        })
        .clone();

    let mut ctx = Context::new();
    ctx.insert("admin_url_prefix", admin_url_prefix);
    ctx.insert("csrf_token", token.get());
    ctx.insert("village_name", &village_name);

    if let Ok(Some(error)) = session.get::<String>("error") {
        ctx.insert("error", &error);
        session.remove("error");
    }

    match tera.render("admin/login.html", &ctx) {
        Ok(rendered) => HttpResponse::Ok().content_type("text/html; charset=utf-8").body(rendered),
        Err(err) => {
            log::error!("Template rendering error: {}", err);
            HttpResponse::InternalServerError().body("Template error")
        }
    }
}

async fn handle_login(
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    form: Csrf<web::Form<LoginForm>>,
    config: web::Data<Config>,
) -> impl Responder {
    let admin_url_prefix = &config.admin_url_prefix;
    let login_url = format!("/management/{}/login", admin_url_prefix);
    let dashboard_url = format!("/management/{}/api/dashboard", admin_url_prefix);

    let login_data = form.into_inner();
    let username = login_data.username.trim();

    let Some(actor) = public_helpers::verify_actor_credentials(&pool, username, &login_data.password) else {
        log::warn!("Failed login attempt for '{}'.", username);
        if let Err(e) = session.insert("error", "Invalid credentials or account suspended.") {
            log::error!("Failed to store login error in session: {}", e);
        }
        return redirect(&login_url);
    };

    session.renew();
    if let Err(e) = write_session(&session, &actor) {
        log::error!("Failed to write session for '{}': {}", actor.username, e);
        return HttpResponse::InternalServerError().body("Could not start a session.");
    }
    session.remove("error");

    match pool.get() {
        Ok(conn) => {
            if let Err(e) = users_db_operations::update_last_login_time(&conn, actor.id) {
                log::warn!("Failed to record last login for '{}': {}", actor.username, e);
            }
        }
        Err(e) => log::warn!("Database pool error while recording last login: {}", e),
    }
    admin_helpers::log_activity(
        &activity,
        &actor,
        "login",
        "user",
        Some(actor.id.to_string()),
        format!("'{}' logged in", actor.username),
    );
    redirect(&dashboard_url)
}

async fn handle_logout(session: Session, config: web::Data<Config>) -> impl Responder {
    session.purge();
    redirect(&format!("/management/{}/login", config.admin_url_prefix))
}

// --- Dashboard ---

async fn get_dashboard(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match admin_helpers::dashboard_summary(&pool, &activity) {
        Ok(summary) => ok_data(json!({ "user": actor, "summary": summary })),
        Err(e) => admin_error_response(e),
    }
}

// --- Accounts ---

async fn list_users(auth: AuthenticatedActor, session: Session, pool: web::Data<DbPool>) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match admin_helpers::fetch_all_accounts(&pool, &actor) {
        Ok(users) => ok_data(users),
        Err(e) => admin_error_response(e),
    }
}

async fn create_user_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    form: web::Bytes,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let parsed = match form_helpers::parse_form(&form) {
        Ok(p) => p,
        Err(response) => return response,
    };

    let username = parsed.get("username").map_or("", |s| s.trim());
    let password = parsed.get("password").map_or("", |s| s.as_str());
    let role = parsed.get("role").map_or("", |s| s.trim());

    match admin_helpers::create_account(&pool, &activity, &actor, username, password, role) {
        Ok(created) => HttpResponse::Created().json(json!({
            "success": true,
            "message": format!("User '{}' created successfully.", created.username),
            "data": created
        })),
        Err(e) => admin_error_response(e),
    }
}

async fn update_user_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    path: web::Path<i64>,
    form: web::Bytes,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let parsed = match form_helpers::parse_form(&form) {
        Ok(p) => p,
        Err(response) => return response,
    };

    let update = AccountUpdate {
        username: parsed.get("username").map_or("", |s| s.trim()),
        new_password: parsed.get("password").map(|s| s.as_str()).filter(|s| !s.is_empty()),
        role: parsed.get("role").map_or("", |s| s.trim()),
        is_active: form_helpers::form_flag(&parsed, "is_active"),
    };

    match admin_helpers::update_account(&pool, &activity, &actor, path.into_inner(), &update) {
        Ok(updated) => {
            // Editing your own account refreshes or ends this session.
            if updated.id == actor.id {
                if !updated.is_active {
                    session.purge();
                } else if let Err(e) = write_session(&session, &updated) {
                    log::error!("Failed to refresh session for '{}': {}", updated.username, e);
                }
            }
            ok_data(updated)
        }
        Err(e) => admin_error_response(e),
    }
}

async fn delete_user_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    path: web::Path<i64>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let user_id = path.into_inner();

    match admin_helpers::delete_account(&pool, &activity, &actor, user_id) {
        Ok(()) => {
            let logged_out = user_id == actor.id;
            if logged_out {
                session.purge();
            }
            HttpResponse::Ok().json(json!({
                "success": true,
                "message": "User deleted successfully.",
                "logged_out": logged_out
            }))
        }
        Err(e) => admin_error_response(e),
    }
}

// --- Settings ---

async fn get_settings(auth: AuthenticatedActor, session: Session, pool: web::Data<DbPool>) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if !permissions::is_permitted(Some(actor.role), Action::ManageUsers) {
        return admin_error_response(AdminHelperError::Forbidden);
    }
    match pool.get() {
        Ok(conn) => ok_data(admin_helpers::get_settings(&conn)),
        Err(e) => admin_error_response(AdminHelperError::Pool(e)),
    }
}

async fn update_settings_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    form: web::Bytes,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let parsed = match form_helpers::parse_form(&form) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let current = match pool.get() {
        Ok(conn) => admin_helpers::get_settings(&conn),
        Err(e) => return admin_error_response(AdminHelperError::Pool(e)),
    };

    // Fields left out of the form keep their stored values.
    let field = |key: &str, stored: &str| parsed.get(key).map_or_else(|| stored.to_string(), |v| v.trim().to_string());
    let requested = Settings {
        village_name: field("village_name", &current.village_name),
        max_file_upload_size_mb: field("max_file_upload_size_mb", &current.max_file_upload_size_mb),
        allowed_mime_types: field("allowed_mime_types", &current.allowed_mime_types),
    };

    match admin_helpers::update_settings(&pool, &activity, &actor, &requested) {
        Ok(saved) => {
            let mut state_name = app_state.village_name.write().unwrap_or_else(|poisoned| {
                log::error!("RwLock for village_name was poisoned during settings update! Recovering lock.");
                poisoned.into_inner()
            });
            *state_name = saved.village_name.clone();
            drop(state_name);
            ok_data(saved)
        }
        Err(e) => admin_error_response(e),
    }
}

// --- News ---

fn news_input(form: &UploadForm) -> NewsInput {
    NewsInput {
        title: form_text(form, "title"),
        excerpt: form_text(form, "excerpt"),
        content: form_text(form, "content"),
        category: form_text(form, "category"),
        status: form.text("status").map(str::to_string),
        slug_source: form.text("slug").map(str::to_string),
    }
}

async fn list_news(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    query: web::Query<ContentQuery>,
) -> impl Responder {
    if let Err(resp) = current_actor(&auth, &session, &pool) {
        return resp;
    }
    let mut filter = query.filter();
    filter.status = match query.status() {
        Ok(status) => status,
        Err(bad) => return bad_status(bad),
    };
    match content_helpers::list_news_admin(&pool, &filter) {
        Ok(page) => ok_data(page),
        Err(e) => content_error_response(e),
    }
}

async fn get_news(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    path: web::Path<i64>,
) -> impl Responder {
    if let Err(resp) = current_actor(&auth, &session, &pool) {
        return resp;
    }
    match content_helpers::get_news_admin(&pool, path.into_inner()) {
        Ok(article) => ok_data(article),
        Err(e) => content_error_response(e),
    }
}

async fn create_news_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    app_state: web::Data<AppState>,
    payload: Multipart,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let form = match read_form(&pool, payload, "thumbnail", FileKind::Image).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let input = news_input(&form);
    let assets = app_state.assets.clone();

    let result = web::block(move || {
        content_helpers::create_news(&pool, &activity, assets.as_ref(), &actor, &input, form.file.as_ref())
    })
    .await;
    match unblock(result) {
        Ok(article) => HttpResponse::Created().json(json!({ "success": true, "data": article })),
        Err(resp) => resp,
    }
}

async fn update_news_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    app_state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: Multipart,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let form = match read_form(&pool, payload, "thumbnail", FileKind::Image).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let input = news_input(&form);
    let assets = app_state.assets.clone();
    let id = path.into_inner();

    let result = web::block(move || {
        content_helpers::update_news(&pool, &activity, assets.as_ref(), &actor, id, &input, form.file.as_ref())
    })
    .await;
    match unblock(result) {
        Ok(article) => ok_data(article),
        Err(resp) => resp,
    }
}

async fn change_news_status_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    path: web::Path<i64>,
    payload: web::Json<StatusPayload>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match content_helpers::change_news_status(
        &pool,
        &activity,
        &actor,
        path.into_inner(),
        &payload.status,
        payload.published_at,
    ) {
        Ok(article) => ok_data(article),
        Err(e) => content_error_response(e),
    }
}

async fn delete_news_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    app_state: web::Data<AppState>,
    path: web::Path<i64>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let assets = app_state.assets.clone();
    let id = path.into_inner();

    let result = web::block(move || content_helpers::delete_news(&pool, &activity, assets.as_ref(), &actor, id)).await;
    match unblock(result) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "message": "News deleted successfully." })),
        Err(resp) => resp,
    }
}

// --- Gallery ---

fn gallery_input(form: &UploadForm) -> GalleryInput {
    GalleryInput {
        title: form_text(form, "title"),
        description: form_text(form, "description"),
        status: form.text("status").map(str::to_string),
        slug_source: form.text("slug").map(str::to_string),
    }
}

async fn list_gallery(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    query: web::Query<ContentQuery>,
) -> impl Responder {
    if let Err(resp) = current_actor(&auth, &session, &pool) {
        return resp;
    }
    let mut filter = query.filter();
    filter.status = match query.status() {
        Ok(status) => status,
        Err(bad) => return bad_status(bad),
    };
    match content_helpers::list_gallery_admin(&pool, &filter) {
        Ok(page) => ok_data(page),
        Err(e) => content_error_response(e),
    }
}

async fn get_gallery(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    path: web::Path<i64>,
) -> impl Responder {
    if let Err(resp) = current_actor(&auth, &session, &pool) {
        return resp;
    }
    match content_helpers::get_gallery_admin(&pool, path.into_inner()) {
        Ok(item) => ok_data(item),
        Err(e) => content_error_response(e),
    }
}

async fn create_gallery_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    app_state: web::Data<AppState>,
    payload: Multipart,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let form = match read_form(&pool, payload, "photo", FileKind::Image).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let input = gallery_input(&form);
    let assets = app_state.assets.clone();

    let result = web::block(move || {
        content_helpers::create_gallery_item(&pool, &activity, assets.as_ref(), &actor, &input, form.file.as_ref())
    })
    .await;
    match unblock(result) {
        Ok(item) => HttpResponse::Created().json(json!({ "success": true, "data": item })),
        Err(resp) => resp,
    }
}

async fn update_gallery_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    app_state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: Multipart,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let form = match read_form(&pool, payload, "photo", FileKind::Image).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let input = gallery_input(&form);
    let assets = app_state.assets.clone();
    let id = path.into_inner();

    let result = web::block(move || {
        content_helpers::update_gallery_item(&pool, &activity, assets.as_ref(), &actor, id, &input, form.file.as_ref())
    })
    .await;
    match unblock(result) {
        Ok(item) => ok_data(item),
        Err(resp) => resp,
    }
}

async fn change_gallery_status_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    path: web::Path<i64>,
    payload: web::Json<StatusPayload>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match content_helpers::change_gallery_status(
        &pool,
        &activity,
        &actor,
        path.into_inner(),
        &payload.status,
        payload.published_at,
    ) {
        Ok(item) => ok_data(item),
        Err(e) => content_error_response(e),
    }
}

async fn delete_gallery_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    app_state: web::Data<AppState>,
    path: web::Path<i64>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let assets = app_state.assets.clone();
    let id = path.into_inner();

    let result =
        web::block(move || content_helpers::delete_gallery_item(&pool, &activity, assets.as_ref(), &actor, id)).await;
    match unblock(result) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "message": "Gallery item deleted successfully." })),
        Err(resp) => resp,
    }
}

// --- Letter templates ---

async fn list_letters(auth: AuthenticatedActor, session: Session, pool: web::Data<DbPool>) -> impl Responder {
    if let Err(resp) = current_actor(&auth, &session, &pool) {
        return resp;
    }
    match village_helpers::list_letter_templates(&pool) {
        Ok(templates) => ok_data(templates),
        Err(e) => content_error_response(e),
    }
}

async fn upload_letter_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    app_state: web::Data<AppState>,
    payload: Multipart,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let form = match read_form(&pool, payload, "file", FileKind::Document).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let title = form_text(&form, "title");
    let description = form_text(&form, "description");
    let Some(file) = form.file else {
        return HttpResponse::BadRequest().json(json!({ "success": false, "error": "A template file is required." }));
    };
    let assets = app_state.assets.clone();

    let result = web::block(move || {
        village_helpers::upload_letter_template(&pool, &activity, assets.as_ref(), &actor, &title, &description, &file)
    })
    .await;
    match unblock(result) {
        Ok(template) => HttpResponse::Created().json(json!({ "success": true, "data": template })),
        Err(resp) => resp,
    }
}

async fn delete_letter_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    app_state: web::Data<AppState>,
    path: web::Path<i64>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let assets = app_state.assets.clone();
    let id = path.into_inner();

    let result =
        web::block(move || village_helpers::delete_letter_template(&pool, &activity, assets.as_ref(), &actor, id)).await;
    match unblock(result) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "message": "Letter template deleted successfully." })),
        Err(resp) => resp,
    }
}

// --- Population ---

async fn list_population(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    query: web::Query<PopulationQuery>,
) -> impl Responder {
    if let Err(resp) = current_actor(&auth, &session, &pool) {
        return resp;
    }
    match village_helpers::list_population_stats(&pool, query.category.as_deref(), query.year) {
        Ok(stats) => ok_data(stats),
        Err(e) => content_error_response(e),
    }
}

async fn upsert_population_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    payload: web::Json<PopulationInput>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match village_helpers::upsert_population_stat(&pool, &activity, &actor, &payload) {
        Ok(stat) => ok_data(stat),
        Err(e) => content_error_response(e),
    }
}

async fn delete_population_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    path: web::Path<i64>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match village_helpers::delete_population_stat(&pool, &activity, &actor, path.into_inner()) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "message": "Population entry deleted." })),
        Err(e) => content_error_response(e),
    }
}

// --- Village profile ---

async fn upsert_profile_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    path: web::Path<String>,
    payload: web::Json<ProfilePayload>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match village_helpers::upsert_profile_section(&pool, &activity, &actor, &path, &payload.title, &payload.content) {
        Ok(section) => ok_data(section),
        Err(e) => content_error_response(e),
    }
}

// --- Contact messages ---

async fn list_messages(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    query: web::Query<MessageQuery>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let (limit, offset) = form_helpers::page_window(query.page, query.limit);
    match village_helpers::list_contact_messages(&pool, &actor, query.unread_only.unwrap_or(false), limit, offset) {
        Ok(messages) => ok_data(messages),
        Err(e) => content_error_response(e),
    }
}

async fn unread_message_count(auth: AuthenticatedActor, session: Session, pool: web::Data<DbPool>) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match village_helpers::unread_message_count(&pool, &actor) {
        Ok(count) => ok_data(json!({ "unread": count })),
        Err(e) => content_error_response(e),
    }
}

async fn mark_message_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    path: web::Path<i64>,
    payload: web::Json<ReadPayload>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let is_read = payload.is_read.unwrap_or(true);
    match village_helpers::mark_contact_message(&pool, &activity, &actor, path.into_inner(), is_read) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "is_read": is_read })),
        Err(e) => content_error_response(e),
    }
}

async fn delete_message_action(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    path: web::Path<i64>,
) -> impl Responder {
    let actor = match current_actor(&auth, &session, &pool) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match village_helpers::delete_contact_message(&pool, &activity, &actor, path.into_inner()) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "message": "Message deleted." })),
        Err(e) => content_error_response(e),
    }
}

// --- Activity log ---

async fn list_activities(
    auth: AuthenticatedActor,
    session: Session,
    pool: web::Data<DbPool>,
    activity: web::Data<Database>,
    query: web::Query<ActivityQuery>,
) -> impl Responder {
    if let Err(resp) = current_actor(&auth, &session, &pool) {
        return resp;
    }
    let (limit, offset) = form_helpers::page_window(query.page, query.limit);
    match admin_helpers::fetch_activities(&activity, query.entity_type.as_deref(), limit, offset) {
        Ok(entries) => ok_data(entries),
        Err(e) => admin_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::test_support::{open_activity_db, open_pool, RecordingAssetStore};
    use actix_session::storage::CookieSessionStore;
    use actix_session::SessionMiddleware;
    use actix_web::cookie::{Cookie, Key};
    use actix_web::{http::StatusCode, test, App};
    use std::sync::{Arc, RwLock};

    /// Stands in for the login form, which needs a CSRF round trip.
    async fn test_login(session: Session, pool: web::Data<DbPool>, path: web::Path<i64>) -> HttpResponse {
        let conn = pool.get().unwrap();
        let actor = users_db_operations::read_user_by_id(&conn, path.into_inner()).unwrap().unwrap();
        write_session(&session, &actor).unwrap();
        HttpResponse::Ok().finish()
    }

    struct Fixture {
        _dirs: (tempfile::TempDir, tempfile::TempDir),
        pool: DbPool,
        activity: web::Data<Database>,
        assets: Arc<RecordingAssetStore>,
        state: web::Data<AppState>,
    }

    fn fixture() -> Fixture {
        let (dir, pool) = open_pool();
        let (adir, activity) = open_activity_db();
        let assets = Arc::new(RecordingAssetStore::default());
        let state = web::Data::new(AppState {
            village_name: Arc::new(RwLock::new("Desa".to_string())),
            assets: assets.clone(),
        });
        Fixture { _dirs: (dir, adir), pool, activity: web::Data::new(activity), assets, state }
    }

    fn make_user(pool: &DbPool, username: &str, role: Role) -> Actor {
        let conn = pool.get().unwrap();
        let id = users_db_operations::create_user(&conn, username, "password123", role).unwrap();
        users_db_operations::read_user_by_id(&conn, id).unwrap().unwrap()
    }

    macro_rules! init_app {
        ($fx:expr) => {
            test::init_service(
                App::new()
                    .wrap(SessionMiddleware::builder(CookieSessionStore::default(), Key::generate()).cookie_secure(false).build())
                    .app_data(web::Data::new($fx.pool.clone()))
                    .app_data($fx.activity.clone())
                    .app_data($fx.state.clone())
                    .route("/test-login/{id}", web::post().to(test_login))
                    .configure(config_api),
            )
            .await
        };
    }

    macro_rules! login {
        ($app:expr, $actor:expr) => {{
            let req = test::TestRequest::post().uri(&format!("/test-login/{}", $actor.id)).to_request();
            let resp = test::call_service(&$app, req).await;
            let cookie: Cookie<'static> = resp.response().cookies().next().unwrap().into_owned();
            cookie
        }};
    }

    #[actix_web::test]
    async fn requests_without_a_session_are_rejected() {
        let fx = fixture();
        let app = init_app!(fx);
        let req = test::TestRequest::get().uri("/api/dashboard").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn deactivated_accounts_lose_access() {
        let fx = fixture();
        let admin = make_user(&fx.pool, "operator", Role::Admin);
        let app = init_app!(fx);
        let cookie = login!(app, admin);

        let req = test::TestRequest::get().uri("/api/dashboard").cookie(cookie.clone()).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        {
            let conn = fx.pool.get().unwrap();
            conn.execute("UPDATE users SET is_active = 0 WHERE id = ?1", [admin.id]).unwrap();
        }
        let req = test::TestRequest::get().uri("/api/dashboard").cookie(cookie).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn status_changes_map_to_http_codes() {
        let fx = fixture();
        let admin = make_user(&fx.pool, "operator", Role::Admin);
        let input = NewsInput { title: "Posyandu Balita".into(), content: "Jadwal posyandu bulan ini.".into(), ..Default::default() };
        let article =
            content_helpers::create_news(&fx.pool, &fx.activity, fx.assets.as_ref(), &admin, &input, None).unwrap();
        let app = init_app!(fx);
        let cookie = login!(app, admin);

        let req = test::TestRequest::post()
            .uri(&format!("/api/news/{}/status", article.id))
            .cookie(cookie.clone())
            .set_json(json!({ "status": "published" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "published");
        assert!(!body["data"]["published_at"].is_null());
        assert_eq!(body["data"]["reviewed_by"], admin.id);

        let req = test::TestRequest::post()
            .uri(&format!("/api/news/{}/status", article.id))
            .cookie(cookie.clone())
            .set_json(json!({ "status": "archived" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/api/news/9999/status")
            .cookie(cookie.clone())
            .set_json(json!({ "status": "draft" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/api/news?status=archived").cookie(cookie).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn account_management_is_limited_to_super_admins() {
        let fx = fixture();
        let admin = make_user(&fx.pool, "operator", Role::Admin);
        let root = make_user(&fx.pool, "kades", Role::SuperAdmin);
        let app = init_app!(fx);

        let admin_cookie = login!(app, admin);
        let req = test::TestRequest::get().uri("/api/users").cookie(admin_cookie).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let root_cookie = login!(app, root);
        let req = test::TestRequest::get().uri("/api/users").cookie(root_cookie.clone()).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let req = test::TestRequest::post()
            .uri(&format!("/api/users/{}/delete", root.id))
            .cookie(root_cookie.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/api/users")
            .cookie(root_cookie)
            .insert_header(("content-type", "application/x-www-form-urlencoded"))
            .set_payload("username=sekdes&password=password123&role=admin")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
    }

    #[actix_web::test]
    async fn settings_update_refreshes_village_name() {
        let fx = fixture();
        let root = make_user(&fx.pool, "kades", Role::SuperAdmin);
        let app = init_app!(fx);
        let cookie = login!(app, root);

        let req = test::TestRequest::post()
            .uri("/api/settings")
            .cookie(cookie.clone())
            .insert_header(("content-type", "application/x-www-form-urlencoded"))
            .set_payload("village_name=Desa+Sukamaju")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(*fx.state.village_name.read().unwrap(), "Desa Sukamaju");

        let req = test::TestRequest::post()
            .uri("/api/settings")
            .cookie(cookie)
            .insert_header(("content-type", "application/x-www-form-urlencoded"))
            .set_payload("max_file_upload_size_mb=abc")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn gallery_upload_stores_photo() {
        let fx = fixture();
        let admin = make_user(&fx.pool, "operator", Role::Admin);
        let app = init_app!(fx);
        let cookie = login!(app, admin);

        let body = "--XBOUNDARY\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\r\n\
            Panen Raya\r\n\
            --XBOUNDARY\r\n\
            Content-Disposition: form-data; name=\"photo\"; filename=\"panen.png\"\r\n\
            Content-Type: image/png\r\n\r\n\
            PNGDATA\r\n\
            --XBOUNDARY--\r\n";
        let req = test::TestRequest::post()
            .uri("/api/gallery")
            .cookie(cookie.clone())
            .insert_header(("content-type", "multipart/form-data; boundary=XBOUNDARY"))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["data"]["slug"], "panen-raya");
        assert_eq!(json["data"]["status"], "draft");
        assert_eq!(fx.assets.uploads.lock().unwrap().as_slice(), ["gallery/0-7.png"]);

        let no_photo = "--XBOUNDARY\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\r\n\
            Tanpa Foto\r\n\
            --XBOUNDARY--\r\n";
        let req = test::TestRequest::post()
            .uri("/api/gallery")
            .cookie(cookie)
            .insert_header(("content-type", "multipart/form-data; boundary=XBOUNDARY"))
            .set_payload(no_photo)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn gallery_photo_must_be_an_image() {
        let fx = fixture();
        let admin = make_user(&fx.pool, "operator", Role::Admin);
        let app = init_app!(fx);
        let cookie = login!(app, admin);

        // application/pdf is on the default allowlist for letter templates.
        let body = "--XBOUNDARY\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\r\n\
            Surat Pindah\r\n\
            --XBOUNDARY\r\n\
            Content-Disposition: form-data; name=\"photo\"; filename=\"surat.pdf\"\r\n\
            Content-Type: application/pdf\r\n\r\n\
            %PDF-1.4\r\n\
            --XBOUNDARY--\r\n";
        let req = test::TestRequest::post()
            .uri("/api/gallery")
            .cookie(cookie)
            .insert_header(("content-type", "multipart/form-data; boundary=XBOUNDARY"))
            .set_payload(body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        assert!(fx.assets.uploads.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn multipart_forms_cap_the_number_of_fields() {
        let fx = fixture();
        let admin = make_user(&fx.pool, "operator", Role::Admin);
        let app = init_app!(fx);
        let cookie = login!(app, admin);

        let mut body = String::new();
        for i in 0..40 {
            body.push_str(&format!(
                "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"extra{}\"\r\n\r\nnilai\r\n",
                i
            ));
        }
        body.push_str("--XBOUNDARY--\r\n");
        let req = test::TestRequest::post()
            .uri("/api/news")
            .cookie(cookie)
            .insert_header(("content-type", "multipart/form-data; boundary=XBOUNDARY"))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("Too many form fields"));
    }
}
