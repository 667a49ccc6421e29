use crate::helper::sanitization_helpers;
use crate::models::db_operations::users_db_operations;
use crate::models::{Actor, NewsArticle};
use crate::DbPool;
use serde::Serialize;

pub fn verify_actor_credentials(pool: &DbPool, username: &str, password: &str) -> Option<Actor> {
    match pool.get() {
        Ok(conn) => users_db_operations::verify_credentials(&conn, username, password),
        Err(e) => {
            log::error!("Could not get DB connection from pool for login: {}", e);
            None
        }
    }
}

/// A published article as the public site renders it.
#[derive(Serialize)]
pub struct RenderedNews {
    #[serde(flatten)]
    pub article: NewsArticle,
    pub content_html: String,
    pub paragraphs: Vec<String>,
}

pub fn render_news(article: NewsArticle) -> RenderedNews {
    let content_html = sanitization_helpers::render_article_html(&article.content);
    let paragraphs = sanitization_helpers::split_paragraphs(&article.content);
    RenderedNews { article, content_html, paragraphs }
}
