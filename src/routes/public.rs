use crate::helper::village_helpers::{self, ContactSubmission};
use crate::helper::{content_helpers, form_helpers, public_helpers};
use crate::models::db_operations::content_db_operations::{ContentFilter, ContentSort};
use crate::models::ContentStatus;
use crate::routes::{content_error_response, ok_data};
use crate::{AppState, DbPool};
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Listing parameters shared by the public and management content endpoints.
#[derive(Deserialize, Debug, Default)]
pub struct ContentQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub q: Option<String>,
    pub sort: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ContentQuery {
    /// Ignores `status`; callers that honour it set it themselves.
    pub fn filter(&self) -> ContentFilter {
        let (limit, offset) = form_helpers::page_window(self.page, self.limit);
        ContentFilter {
            status: None,
            category: non_empty(&self.category).map(|c| c.to_lowercase()),
            search: non_empty(&self.q),
            sort: ContentSort::parse(self.sort.as_deref()),
            limit,
            offset,
        }
    }

    /// `Err` carries the rejected status string.
    pub fn status(&self) -> Result<Option<ContentStatus>, String> {
        match non_empty(&self.status) {
            None => Ok(None),
            Some(s) => ContentStatus::parse(&s).map(Some).ok_or(s),
        }
    }
}

#[derive(Deserialize)]
pub struct PopulationQuery {
    pub category: Option<String>,
    pub year: Option<i32>,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/is_server_active", web::get().to(is_server_active))
            .route("/village", web::get().to(get_village_info))
            .route("/news", web::get().to(list_news))
            .route("/news/categories", web::get().to(list_news_categories))
            .route("/news/{slug}", web::get().to(get_news_by_slug))
            .route("/gallery", web::get().to(list_gallery))
            .route("/gallery/{slug}", web::get().to(get_gallery_by_slug))
            .route("/letters", web::get().to(list_letter_templates))
            .route("/letters/{id}/download", web::get().to(download_letter_template))
            .route("/population", web::get().to(list_population_stats))
            .route("/population/summary", web::get().to(get_population_summary))
            .route("/profile", web::get().to(list_profile_sections))
            .route("/profile/{key}", web::get().to(get_profile_section))
            .route("/contact", web::post().to(submit_contact_message)),
    );
}

async fn is_server_active() -> impl Responder {
    HttpResponse::Ok().body("active")
}

async fn get_village_info(app_state: web::Data<AppState>) -> impl Responder {
    let village_name = app_state
        .village_name
        .read()
        .unwrap_or_else(|poisoned| {
            log::error!("RwLock for village_name was poisoned on village info! Recovering lock.");
            poisoned.into_inner()
        })
        .clone();
    ok_data(json!({ "village_name": village_name }))
}

async fn list_news(pool: web::Data<DbPool>, query: web::Query<ContentQuery>) -> impl Responder {
    match content_helpers::list_published_news(&pool, query.filter()) {
        Ok(page) => ok_data(page),
        Err(e) => content_error_response(e),
    }
}

async fn list_news_categories(pool: web::Data<DbPool>) -> impl Responder {
    match content_helpers::news_categories(&pool) {
        Ok(categories) => ok_data(categories),
        Err(e) => content_error_response(e),
    }
}

async fn get_news_by_slug(slug: web::Path<String>, pool: web::Data<DbPool>) -> impl Responder {
    match content_helpers::read_published_news(&pool, &slug) {
        Ok(article) => ok_data(public_helpers::render_news(article)),
        Err(e) => content_error_response(e),
    }
}

async fn list_gallery(pool: web::Data<DbPool>, query: web::Query<ContentQuery>) -> impl Responder {
    match content_helpers::list_published_gallery(&pool, query.filter()) {
        Ok(page) => ok_data(page),
        Err(e) => content_error_response(e),
    }
}

async fn get_gallery_by_slug(slug: web::Path<String>, pool: web::Data<DbPool>) -> impl Responder {
    match content_helpers::read_published_gallery(&pool, &slug) {
        Ok(item) => ok_data(item),
        Err(e) => content_error_response(e),
    }
}

async fn list_letter_templates(pool: web::Data<DbPool>) -> impl Responder {
    match village_helpers::list_letter_templates(&pool) {
        Ok(templates) => ok_data(templates),
        Err(e) => content_error_response(e),
    }
}

/// Counts the download, then redirects to the stored file.
async fn download_letter_template(
    id: web::Path<i64>,
    pool: web::Data<DbPool>,
    app_state: web::Data<AppState>,
) -> impl Responder {
    match village_helpers::download_letter_template(&pool, id.into_inner()) {
        Ok(template) => HttpResponse::Found()
            .append_header(("location", app_state.assets.url_for(&template.file_path)))
            .finish(),
        Err(e) => content_error_response(e),
    }
}

async fn list_population_stats(pool: web::Data<DbPool>, query: web::Query<PopulationQuery>) -> impl Responder {
    match village_helpers::list_population_stats(&pool, query.category.as_deref(), query.year) {
        Ok(stats) => ok_data(stats),
        Err(e) => content_error_response(e),
    }
}

async fn get_population_summary(pool: web::Data<DbPool>, query: web::Query<PopulationQuery>) -> impl Responder {
    match village_helpers::population_summary(&pool, query.year) {
        Ok(Some(summary)) => ok_data(summary),
        Ok(None) => HttpResponse::NotFound().json(json!({ "success": false, "error": "No population data recorded yet." })),
        Err(e) => content_error_response(e),
    }
}

async fn list_profile_sections(pool: web::Data<DbPool>) -> impl Responder {
    match village_helpers::list_profile_sections(&pool) {
        Ok(sections) => ok_data(sections),
        Err(e) => content_error_response(e),
    }
}

async fn get_profile_section(key: web::Path<String>, pool: web::Data<DbPool>) -> impl Responder {
    match village_helpers::get_profile_section(&pool, &key) {
        Ok(section) => ok_data(section),
        Err(e) => content_error_response(e),
    }
}

/// Accepts either a JSON body or a plain URL-encoded form post.
async fn submit_contact_message(req: HttpRequest, pool: web::Data<DbPool>, body: web::Bytes) -> impl Responder {
    let submission = if req.content_type() == "application/json" {
        match serde_json::from_slice::<ContactSubmission>(&body) {
            Ok(s) => s,
            Err(e) => {
                return HttpResponse::BadRequest()
                    .json(json!({ "success": false, "error": format!("Invalid JSON body: {}", e) }))
            }
        }
    } else {
        let parsed = match form_helpers::parse_form(&body) {
            Ok(p) => p,
            Err(response) => return response,
        };
        ContactSubmission {
            name: parsed.get("name").cloned().unwrap_or_default(),
            email: parsed.get("email").cloned().unwrap_or_default(),
            phone: parsed.get("phone").cloned(),
            subject: parsed.get("subject").cloned(),
            message: parsed.get("message").cloned().unwrap_or_default(),
        }
    };

    match village_helpers::submit_contact_message(&pool, &submission) {
        Ok(id) => HttpResponse::Created().json(json!({
            "success": true,
            "message": "Thank you, your message has been received.",
            "id": id
        })),
        Err(e) => content_error_response(e),
    }
}
