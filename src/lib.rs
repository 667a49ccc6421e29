use std::sync::{Arc, RwLock};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
pub type DbPool = Pool<SqliteConnectionManager>;

use crate::helper::asset_store::AssetStore;

pub struct AppState {
    /// Mirrors the `village_name` setting so pages need no database round trip.
    pub village_name: Arc<RwLock<String>>,
    pub assets: Arc<dyn AssetStore>,
}

pub mod config;
pub mod helper;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod setup;
