use crate::helper::admin_helpers::log_activity;
use crate::helper::asset_store::{AssetStore, UploadedFile};
use crate::helper::content_helpers::{require_action, ContentError};
use crate::helper::permissions::Action;
use crate::helper::sanitization_helpers;
use crate::models::db_operations::village_db_operations::{self, NewContactMessage};
use crate::models::{Actor, ContactMessage, LetterTemplate, PopulationStat, PopulationSummary, ProfileSection};
use crate::DbPool;
use redb::Database;
use serde::Deserialize;

pub const LETTER_BUCKET: &str = "letters";

pub const POPULATION_CATEGORIES: [&str; 5] = ["age_group", "education", "occupation", "religion", "marital_status"];

/// The category whose labels partition the whole population.
pub const SUMMARY_CATEGORY: &str = "age_group";

fn required_text(raw: &str, field: &str, max_chars: usize) -> Result<String, ContentError> {
    let value = sanitization_helpers::strip_all_html(raw.trim()).trim().to_string();
    if value.is_empty() {
        return Err(ContentError::Validation(format!("{} is required.", field)));
    }
    limited(value, field, max_chars)
}

fn limited(value: String, field: &str, max_chars: usize) -> Result<String, ContentError> {
    if value.chars().count() > max_chars {
        return Err(ContentError::Validation(format!("{} cannot exceed {} characters.", field, max_chars)));
    }
    Ok(value)
}

// --- Letter templates ---

pub fn list_letter_templates(pool: &DbPool) -> Result<Vec<LetterTemplate>, ContentError> {
    let conn = pool.get()?;
    Ok(village_db_operations::read_all_letter_templates(&conn)?)
}

pub fn upload_letter_template(
    pool: &DbPool,
    activity: &Database,
    assets: &dyn AssetStore,
    actor: &Actor,
    title: &str,
    description: &str,
    file: &UploadedFile,
) -> Result<LetterTemplate, ContentError> {
    require_action(actor, Action::EditContent)?;
    let title = required_text(title, "Title", 200)?;
    let description = limited(sanitization_helpers::strip_all_html(description.trim()), "Description", 1000)?;
    let original_filename = sanitization_helpers::strip_all_html(&file.original_filename);
    let conn = pool.get()?;

    let stored = assets.upload(LETTER_BUCKET, &file.bytes, file.ext)?;
    let inserted = village_db_operations::insert_letter_template(&conn, &title, &description, &stored.path, &original_filename)
        .and_then(|id| village_db_operations::read_letter_template(&conn, id));
    let template = match inserted {
        Ok(Some(template)) => template,
        Ok(None) => return Err(ContentError::NotFound),
        Err(e) => {
            if let Err(remove_err) = assets.remove(&stored.path) {
                log::error!("Failed to remove orphaned letter asset '{}': {}", stored.path, remove_err);
            }
            return Err(e.into());
        }
    };

    log_activity(activity, actor, "create", "letter_template", Some(template.id.to_string()), format!("Uploaded letter template '{}'", title));
    Ok(template)
}

pub fn delete_letter_template(
    pool: &DbPool,
    activity: &Database,
    assets: &dyn AssetStore,
    actor: &Actor,
    id: i64,
) -> Result<(), ContentError> {
    require_action(actor, Action::DeleteContent)?;
    let conn = pool.get()?;
    let template = village_db_operations::read_letter_template(&conn, id)?.ok_or(ContentError::NotFound)?;

    if let Err(e) = assets.remove(&template.file_path) {
        log::error!("Failed to remove letter asset '{}': {}", template.file_path, e);
    }
    village_db_operations::delete_letter_template(&conn, id)?;

    log_activity(activity, actor, "delete", "letter_template", Some(id.to_string()), format!("Deleted letter template '{}'", template.title));
    Ok(())
}

/// Looks the template up for download and counts it; a failed count is only logged.
pub fn download_letter_template(pool: &DbPool, id: i64) -> Result<LetterTemplate, ContentError> {
    let conn = pool.get()?;
    let mut template = village_db_operations::read_letter_template(&conn, id)?.ok_or(ContentError::NotFound)?;
    match village_db_operations::increment_download_count(&conn, id) {
        Ok(_) => template.download_count += 1,
        Err(e) => log::warn!("Failed to count download of letter template {}: {}", id, e),
    }
    Ok(template)
}

// --- Population statistics ---

#[derive(Debug, Clone, Deserialize)]
pub struct PopulationInput {
    pub category: String,
    pub label: String,
    pub male: i64,
    pub female: i64,
    pub year: i32,
}

pub fn upsert_population_stat(
    pool: &DbPool,
    activity: &Database,
    actor: &Actor,
    input: &PopulationInput,
) -> Result<PopulationStat, ContentError> {
    require_action(actor, Action::EditContent)?;
    let category = input.category.trim();
    if !POPULATION_CATEGORIES.contains(&category) {
        return Err(ContentError::Validation(format!(
            "'{}' is not a population category. Use one of: {}.",
            category,
            POPULATION_CATEGORIES.join(", ")
        )));
    }
    let label = required_text(&input.label, "Label", 100)?;
    if input.male < 0 || input.female < 0 {
        return Err(ContentError::Validation("Counts cannot be negative.".to_string()));
    }
    if !(1900..=2100).contains(&input.year) {
        return Err(ContentError::Validation("Year must be between 1900 and 2100.".to_string()));
    }

    let conn = pool.get()?;
    let id = village_db_operations::upsert_population_stat(&conn, category, &label, input.male, input.female, input.year)?;
    let stat = village_db_operations::read_population_stats(&conn, Some(category), Some(input.year))?
        .into_iter()
        .find(|s| s.id == id)
        .ok_or(ContentError::NotFound)?;

    log_activity(
        activity,
        actor,
        "upsert",
        "population_stat",
        Some(id.to_string()),
        format!("Set {} '{}' for {}: {} male, {} female", category, label, input.year, input.male, input.female),
    );
    Ok(stat)
}

pub fn delete_population_stat(pool: &DbPool, activity: &Database, actor: &Actor, id: i64) -> Result<(), ContentError> {
    require_action(actor, Action::DeleteContent)?;
    let conn = pool.get()?;
    if village_db_operations::delete_population_stat(&conn, id)? == 0 {
        return Err(ContentError::NotFound);
    }
    log_activity(activity, actor, "delete", "population_stat", Some(id.to_string()), format!("Deleted population stat {}", id));
    Ok(())
}

pub fn list_population_stats(pool: &DbPool, category: Option<&str>, year: Option<i32>) -> Result<Vec<PopulationStat>, ContentError> {
    let conn = pool.get()?;
    let category = category.map(str::trim).filter(|c| !c.is_empty());
    Ok(village_db_operations::read_population_stats(&conn, category, year)?)
}

/// Summary for `year`, or for the latest recorded year. `None` when nothing
/// has been recorded yet.
pub fn population_summary(pool: &DbPool, year: Option<i32>) -> Result<Option<PopulationSummary>, ContentError> {
    let conn = pool.get()?;
    let year = match year {
        Some(y) => y,
        None => match village_db_operations::latest_population_year(&conn)? {
            Some(y) => y,
            None => return Ok(None),
        },
    };
    Ok(Some(village_db_operations::population_summary(&conn, SUMMARY_CATEGORY, year)?))
}

// --- Regional profile ---

fn valid_profile_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= 50 && key.chars().all(|c| c.is_ascii_lowercase() || c == '_')
}

pub fn upsert_profile_section(
    pool: &DbPool,
    activity: &Database,
    actor: &Actor,
    key: &str,
    title: &str,
    content: &str,
) -> Result<ProfileSection, ContentError> {
    require_action(actor, Action::EditContent)?;
    let key = key.trim();
    if !valid_profile_key(key) {
        return Err(ContentError::Validation("Section key may only contain lowercase letters and '_'.".to_string()));
    }
    let title = required_text(title, "Title", 200)?;
    let content = sanitization_helpers::sanitize_markdown_content(content.trim());

    let conn = pool.get()?;
    village_db_operations::upsert_profile_section(&conn, key, &title, &content)?;
    let section = village_db_operations::read_profile_section(&conn, key)?.ok_or(ContentError::NotFound)?;

    log_activity(activity, actor, "upsert", "profile_section", Some(key.to_string()), format!("Updated profile section '{}'", title));
    Ok(section)
}

pub fn list_profile_sections(pool: &DbPool) -> Result<Vec<ProfileSection>, ContentError> {
    let conn = pool.get()?;
    Ok(village_db_operations::read_profile_sections(&conn)?)
}

pub fn get_profile_section(pool: &DbPool, key: &str) -> Result<ProfileSection, ContentError> {
    let conn = pool.get()?;
    village_db_operations::read_profile_section(&conn, key)?.ok_or(ContentError::NotFound)
}

// --- Contact messages ---

#[derive(Debug, Clone, Deserialize)]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub message: String,
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace),
        None => false,
    }
}

/// Public form submission. Every field is stripped of HTML before storage.
pub fn submit_contact_message(pool: &DbPool, submission: &ContactSubmission) -> Result<i64, ContentError> {
    let name = required_text(&submission.name, "Name", 100)?;
    let email = required_text(&submission.email, "Email", 254)?;
    if !valid_email(&email) {
        return Err(ContentError::Validation("Please provide a valid email address.".to_string()));
    }
    let phone = match submission.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => {
            let phone = limited(sanitization_helpers::strip_all_html(p), "Phone", 30)?;
            if !phone.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')')) {
                return Err(ContentError::Validation("Phone may only contain digits, spaces, and + - ( ).".to_string()));
            }
            Some(phone)
        }
        None => None,
    };
    let subject = limited(
        sanitization_helpers::strip_all_html(submission.subject.as_deref().unwrap_or("").trim()),
        "Subject",
        200,
    )?;
    let message = required_text(&submission.message, "Message", 5000)?;

    let conn = pool.get()?;
    let new_message = NewContactMessage { name: &name, email: &email, phone: phone.as_deref(), subject: &subject, message: &message };
    let id = village_db_operations::insert_contact_message(&conn, &new_message)?;
    log::info!("Received contact message {} from '{}'", id, email);
    Ok(id)
}

pub fn list_contact_messages(
    pool: &DbPool,
    actor: &Actor,
    unread_only: bool,
    limit: u32,
    offset: u32,
) -> Result<Vec<ContactMessage>, ContentError> {
    require_action(actor, Action::EditContent)?;
    let conn = pool.get()?;
    Ok(village_db_operations::read_contact_messages(&conn, unread_only, limit, offset)?)
}

pub fn unread_message_count(pool: &DbPool, actor: &Actor) -> Result<i64, ContentError> {
    require_action(actor, Action::EditContent)?;
    let conn = pool.get()?;
    Ok(village_db_operations::count_unread_messages(&conn)?)
}

pub fn mark_contact_message(pool: &DbPool, activity: &Database, actor: &Actor, id: i64, is_read: bool) -> Result<(), ContentError> {
    require_action(actor, Action::EditContent)?;
    let conn = pool.get()?;
    if village_db_operations::mark_message_read(&conn, id, is_read)? == 0 {
        return Err(ContentError::NotFound);
    }
    let state = if is_read { "read" } else { "unread" };
    log_activity(activity, actor, "update", "contact_message", Some(id.to_string()), format!("Marked message {} as {}", id, state));
    Ok(())
}

pub fn delete_contact_message(pool: &DbPool, activity: &Database, actor: &Actor, id: i64) -> Result<(), ContentError> {
    require_action(actor, Action::DeleteContent)?;
    let conn = pool.get()?;
    if village_db_operations::delete_contact_message(&conn, id)? == 0 {
        return Err(ContentError::NotFound);
    }
    log_activity(activity, actor, "delete", "contact_message", Some(id.to_string()), format!("Deleted message {}", id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_operations::users_db_operations;
    use crate::models::Role;
    use crate::test_support::{open_activity_db, open_pool, RecordingAssetStore};

    fn admin(pool: &DbPool) -> Actor {
        let conn = pool.get().unwrap();
        let id = users_db_operations::create_user(&conn, "operator", "password123", Role::Admin).unwrap();
        users_db_operations::read_user_by_id(&conn, id).unwrap().unwrap()
    }

    fn submission(email: &str, message: &str) -> ContactSubmission {
        ContactSubmission {
            name: "<b>Siti</b>".to_string(),
            email: email.to_string(),
            phone: Some("+62 812-3456".to_string()),
            subject: None,
            message: message.to_string(),
        }
    }

    #[test]
    fn contact_submission_is_validated_and_stripped() {
        let (_d, pool) = open_pool();
        assert!(matches!(submit_contact_message(&pool, &submission("siti.example.com", "Halo")), Err(ContentError::Validation(_))));
        assert!(matches!(submit_contact_message(&pool, &submission("siti@example.com", "   ")), Err(ContentError::Validation(_))));
        let long = "a".repeat(5001);
        assert!(matches!(submit_contact_message(&pool, &submission("siti@example.com", &long)), Err(ContentError::Validation(_))));

        submit_contact_message(&pool, &submission("siti@example.com", "Kapan posyandu <i>dibuka</i>?")).unwrap();
        let conn = pool.get().unwrap();
        let stored = &village_db_operations::read_contact_messages(&conn, false, 10, 0).unwrap()[0];
        assert_eq!(stored.name, "Siti");
        assert_eq!(stored.message, "Kapan posyandu dibuka?");
        assert!(!stored.is_read);
    }

    #[test]
    fn population_rejects_unknown_categories_and_summarizes_latest_year() {
        let (_d1, pool) = open_pool();
        let (_d2, activity) = open_activity_db();
        let actor = admin(&pool);

        let bad = PopulationInput { category: "hobby".to_string(), label: "x".to_string(), male: 1, female: 1, year: 2024 };
        assert!(matches!(upsert_population_stat(&pool, &activity, &actor, &bad), Err(ContentError::Validation(_))));
        assert!(population_summary(&pool, None).unwrap().is_none());

        for (label, male, female, year) in [("0-14", 100, 90, 2023), ("0-14", 110, 95, 2024), ("15-64", 300, 310, 2024)] {
            let input = PopulationInput { category: "age_group".to_string(), label: label.to_string(), male, female, year };
            upsert_population_stat(&pool, &activity, &actor, &input).unwrap();
        }
        let summary = population_summary(&pool, None).unwrap().unwrap();
        assert_eq!(summary.year, 2024);
        assert_eq!(summary.total, 815);
        assert_eq!(population_summary(&pool, Some(2023)).unwrap().unwrap().total, 190);
    }

    #[test]
    fn letter_download_counts_and_delete_tolerates_missing_asset() {
        let (_d1, pool) = open_pool();
        let (_d2, activity) = open_activity_db();
        let actor = admin(&pool);
        let store = RecordingAssetStore { fail_removal: true, ..Default::default() };
        let file = UploadedFile {
            bytes: b"%PDF-1.4".to_vec(),
            ext: "pdf",
            content_type: "application/pdf".to_string(),
            original_filename: "surat-domisili.pdf".to_string(),
        };

        let template = upload_letter_template(&pool, &activity, &store, &actor, "Surat Domisili", "", &file).unwrap();
        assert!(template.file_path.starts_with("letters/"));
        assert_eq!(download_letter_template(&pool, template.id).unwrap().download_count, 1);

        delete_letter_template(&pool, &activity, &store, &actor, template.id).unwrap();
        assert_eq!(store.removals.lock().unwrap().len(), 1);
        assert!(list_letter_templates(&pool).unwrap().is_empty());
    }

    #[test]
    fn profile_keys_are_restricted() {
        let (_d1, pool) = open_pool();
        let (_d2, activity) = open_activity_db();
        let actor = admin(&pool);
        assert!(matches!(
            upsert_profile_section(&pool, &activity, &actor, "../history", "Sejarah", "..."),
            Err(ContentError::Validation(_))
        ));
        let section = upsert_profile_section(&pool, &activity, &actor, "history", "Sejarah", "Desa berdiri tahun 1901.").unwrap();
        assert_eq!(get_profile_section(&pool, "history").unwrap().content, section.content);
    }

    #[test]
    fn marking_missing_message_is_not_found() {
        let (_d1, pool) = open_pool();
        let (_d2, activity) = open_activity_db();
        let actor = admin(&pool);
        assert!(matches!(mark_contact_message(&pool, &activity, &actor, 99, true), Err(ContentError::NotFound)));
    }
}
