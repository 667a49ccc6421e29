pub mod admin;
pub mod public;

use crate::helper::asset_store::AssetError;
use crate::helper::content_helpers::ContentError;
use actix_web::error::BlockingError;
use actix_web::HttpResponse;
use serde::Serialize;
use serde_json::json;

pub(crate) fn internal_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(json!({ "success": false, "error": "An internal error occurred." }))
}

pub(crate) fn ok_data<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "success": true, "data": data }))
}

pub(crate) fn asset_error_response(e: &AssetError) -> HttpResponse {
    let body = json!({ "success": false, "error": e.to_string() });
    match e {
        AssetError::TooLarge(_) => HttpResponse::PayloadTooLarge().json(body),
        AssetError::Io(_) => {
            log::error!("Asset storage failure: {}", e);
            internal_error()
        }
        _ => HttpResponse::BadRequest().json(body),
    }
}

pub(crate) fn content_error_response(e: ContentError) -> HttpResponse {
    let body = json!({ "success": false, "error": e.to_string() });
    match &e {
        ContentError::Forbidden => HttpResponse::Forbidden().json(body),
        ContentError::NotFound => HttpResponse::NotFound().json(body),
        ContentError::InvalidState(_) | ContentError::Conflict(_) => HttpResponse::Conflict().json(body),
        ContentError::Validation(_) => HttpResponse::BadRequest().json(body),
        ContentError::Asset(asset) => asset_error_response(asset),
        ContentError::Database(_) | ContentError::Pool(_) => {
            log::error!("Content operation failed: {}", e);
            internal_error()
        }
    }
}

/// Flattens the result of a `web::block` call around a content helper.
pub(crate) fn unblock<T>(result: Result<Result<T, ContentError>, BlockingError>) -> Result<T, HttpResponse> {
    match result {
        Ok(inner) => inner.map_err(content_error_response),
        Err(e) => {
            log::error!("Blocking task failed: {}", e);
            Err(internal_error())
        }
    }
}
