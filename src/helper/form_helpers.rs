use actix_web::{web, HttpResponse};
use std::collections::HashMap;
use url::form_urlencoded;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Parses URL-encoded form data from bytes, handling potential UTF-8 errors gracefully.
pub fn parse_form(form_bytes: &web::Bytes) -> Result<HashMap<String, String>, HttpResponse> {
    let body = match String::from_utf8(form_bytes.to_vec()) {
        Ok(s) => s,
        Err(_) => return Err(HttpResponse::BadRequest().body("Invalid UTF-8 in request body.")),
    };
    Ok(form_urlencoded::parse(body.as_bytes()).into_owned().collect())
}

/// HTML checkboxes are present when ticked; JSON-ish clients send "true"/"1".
pub fn form_flag(form: &HashMap<String, String>, key: &str) -> bool {
    match form.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) => !matches!(v.as_str(), "false" | "0" | "off" | "no"),
        None => false,
    }
}

/// Turns optional `page` (1-based) and `limit` query values into `(limit, offset)`.
pub fn page_window(page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let page = page.unwrap_or(1).max(1);
    (limit, (page - 1).saturating_mul(limit))
}
