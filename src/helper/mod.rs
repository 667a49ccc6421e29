pub mod admin_helpers;
pub mod asset_store;
pub mod content_helpers;
pub mod form_helpers;
pub mod permissions;
pub mod public_helpers;
pub mod publication;
pub mod sanitization_helpers;
pub mod slug_helpers;
pub mod village_helpers;
