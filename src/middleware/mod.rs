use crate::models::Role;
use actix_session::{Session, SessionExt};
use actix_web::{dev, FromRequest, HttpRequest};
use serde::Serialize;
use std::future::{ready, Ready};

pub const SESSION_USER_ID: &str = "user_id";
pub const SESSION_USERNAME: &str = "username";
pub const SESSION_ROLE: &str = "role";

/// The session's view of who is logged in. Handlers reload the account from
/// the store before acting, since the session may outlive a role change.
#[derive(Serialize, Debug, Clone)]
pub struct AuthenticatedActor {
    pub user_id: i64,
    pub username: String,
    pub role: Option<Role>,
}

impl FromRequest for AuthenticatedActor {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let session = req.get_session();
        match (
            session.get::<i64>(SESSION_USER_ID),
            session.get::<String>(SESSION_USERNAME),
            session.get::<String>(SESSION_ROLE),
        ) {
            (Ok(Some(user_id)), Ok(Some(username)), Ok(Some(role))) => {
                ready(Ok(AuthenticatedActor { user_id, username, role: Role::parse(&role) }))
            }
            _ => ready(Err(actix_web::error::ErrorUnauthorized("Not logged in."))),
        }
    }
}

/// Admits sessions whose role is one of the known roles.
pub fn admin_guard(session: &Session) -> bool {
    session
        .get::<String>(SESSION_ROLE)
        .unwrap_or(None)
        .and_then(|role| Role::parse(&role))
        .is_some()
}
