use crate::models::ContentKind;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use uuid::Uuid;

/// Insert attempts before a slug collision is reported as a conflict.
pub const MAX_SLUG_INSERT_ATTEMPTS: usize = 16;

#[derive(Error, Debug)]
pub enum SlugError<E: std::error::Error + 'static> {
    #[error("Could not find a free slug for '{0}' after repeated collisions.")]
    Exhausted(String),
    #[error(transparent)]
    Store(E),
}

/// What the store reported for one insert attempt.
pub enum InsertOutcome<T> {
    Inserted(T),
    SlugTaken,
}

fn disallowed_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9_\s-]").expect("static regex"))
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

fn hyphen_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-+").expect("static regex"))
}

/// Lowercases, drops everything except ASCII word chars, whitespace and
/// hyphens, then joins words with single hyphens.
pub fn normalize_slug(title: &str) -> String {
    let lower = title.to_lowercase();
    let stripped = disallowed_chars().replace_all(&lower, "");
    let hyphenated = whitespace_runs().replace_all(&stripped, "-");
    let collapsed = hyphen_runs().replace_all(&hyphenated, "-");
    collapsed.trim_matches('-').to_string()
}

/// Normalized base, or `<kind>-<8 hex>` when nothing survives normalization.
pub fn base_slug(kind: ContentKind, title: &str) -> String {
    let base = normalize_slug(title);
    if base.is_empty() {
        let id = Uuid::new_v4().simple().to_string();
        format!("{}-{}", kind.slug_prefix(), &id[..8])
    } else {
        base
    }
}

fn candidate(base: &str, suffix: u32) -> String {
    if suffix == 0 {
        base.to_string()
    } else {
        format!("{}-{}", base, suffix)
    }
}

/// Probes `base`, `base-1`, `base-2`, … starting at `start` and returns the
/// first free candidate with its suffix.
pub fn first_free_slug<E, F>(base: &str, start: u32, mut exists: F) -> Result<(String, u32), E>
where
    F: FnMut(&str) -> Result<bool, E>,
{
    let mut suffix = start;
    loop {
        let slug = candidate(base, suffix);
        if !exists(&slug)? {
            return Ok((slug, suffix));
        }
        suffix += 1;
    }
}

/// Probe-then-insert with retry. A concurrent writer can take the probed slug
/// between the probe and the insert; the store's unique constraint reports
/// that as `SlugTaken` and probing resumes from the next suffix.
pub fn insert_with_unique_slug<T, E, P, I>(base: &str, mut exists: P, mut insert: I) -> Result<(String, T), SlugError<E>>
where
    E: std::error::Error + 'static,
    P: FnMut(&str) -> Result<bool, E>,
    I: FnMut(&str) -> Result<InsertOutcome<T>, E>,
{
    let mut start = 0;
    for _ in 0..MAX_SLUG_INSERT_ATTEMPTS {
        let (slug, suffix) = first_free_slug(base, start, &mut exists).map_err(SlugError::Store)?;
        match insert(&slug).map_err(SlugError::Store)? {
            InsertOutcome::Inserted(value) => return Ok((slug, value)),
            InsertOutcome::SlugTaken => {
                log::warn!("Slug '{}' was taken between probe and insert. Retrying.", slug);
                start = suffix + 1;
            }
        }
    }
    Err(SlugError::Exhausted(base.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::convert::Infallible;

    #[test]
    fn normalizes_titles() {
        assert_eq!(normalize_slug("Contoh Judul"), "contoh-judul");
        assert_eq!(normalize_slug("  Musyawarah   Desa 2024!  "), "musyawarah-desa-2024");
        assert_eq!(normalize_slug("Panen -- Raya"), "panen-raya");
        assert_eq!(normalize_slug("-Gotong_Royong-"), "gotong_royong");
        assert_eq!(normalize_slug("Rp. 5.000,- per KK?"), "rp-5000-per-kk");
    }

    #[test]
    fn empty_title_gets_generated_slug() {
        let slug = base_slug(ContentKind::News, "!!!");
        assert!(slug.starts_with("berita-"));
        assert_eq!(slug.len(), "berita-".len() + 8);
        assert!(base_slug(ContentKind::Gallery, "").starts_with("galeri-"));
    }

    #[test]
    fn sequential_creations_get_numbered_suffixes() {
        let mut taken: HashSet<String> = HashSet::new();
        let mut produced = Vec::new();
        for _ in 0..4 {
            let (slug, _) = first_free_slug::<Infallible, _>("kerja-bakti", 0, |s| Ok(taken.contains(s))).unwrap();
            taken.insert(slug.clone());
            produced.push(slug);
        }
        assert_eq!(produced, vec!["kerja-bakti", "kerja-bakti-1", "kerja-bakti-2", "kerja-bakti-3"]);
    }

    #[test]
    fn retries_after_a_lost_insert_race() {
        // The probe sees nothing, but another writer grabs "rapat" first.
        let mut stored: HashSet<String> = HashSet::new();
        let mut attempts = 0;
        let (slug, id) = insert_with_unique_slug::<_, Infallible, _, _>(
            "rapat",
            |_| Ok(false),
            |s| {
                attempts += 1;
                if s == "rapat" {
                    return Ok(InsertOutcome::SlugTaken);
                }
                stored.insert(s.to_string());
                Ok(InsertOutcome::Inserted(42))
            },
        )
        .unwrap();
        assert_eq!(slug, "rapat-1");
        assert_eq!(id, 42);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn gives_up_after_bounded_attempts() {
        let result = insert_with_unique_slug::<(), Infallible, _, _>("x", |_| Ok(false), |_| Ok(InsertOutcome::SlugTaken));
        assert!(matches!(result, Err(SlugError::Exhausted(_))));
    }
}
