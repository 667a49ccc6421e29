pub mod activity_db_operations;
pub mod content_db_operations;
pub mod users_db_operations;
pub mod village_db_operations;
