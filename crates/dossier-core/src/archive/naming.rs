//! Stored-name derivation for archive entries.
//!
//! Caller-supplied logical names are user input: they may contain path
//! separators, control characters, or collide with each other. Names stored
//! inside an archive are derived deterministically — sanitized, length-capped
//! with the extension preserved, and de-duplicated with a numeric suffix.

use crate::config::PackagingLimits;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Characters allowed in a stored name; everything else becomes `_`.
fn disallowed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex literal"))
}

/// Allocates unique stored names for one archive.
///
/// Allocation order matters: the same logical names in the same order always
/// produce the same stored names.
pub struct StoredNamer {
    used: HashSet<String>,
    max_len: usize,
}

impl StoredNamer {
    pub fn new() -> Self {
        Self::with_max_len(PackagingLimits::MAX_STORED_NAME_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            used: HashSet::new(),
            max_len,
        }
    }

    /// Derive a unique stored name for a logical name.
    pub fn allocate(&mut self, logical_name: &str) -> String {
        let base = truncate_preserving_ext(&sanitize(logical_name), self.max_len);

        let mut candidate = base.clone();
        let mut counter = 1;
        while self.used.contains(&candidate) {
            let (stem, ext) = split_extension(&base);
            candidate = if ext.is_empty() {
                format!("{}_{}", stem, counter)
            } else {
                format!("{}_{}.{}", stem, counter, ext)
            };
            counter += 1;
        }

        self.used.insert(candidate.clone());
        candidate
    }
}

impl Default for StoredNamer {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip unsafe characters and leading dots from a logical name.
fn sanitize(name: &str) -> String {
    let cleaned = disallowed().replace_all(name, "_");
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Split a name into (stem, extension); extension excludes the dot.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rsplit_once('.') {
        // A trailing or leading dot is not a real extension.
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, ext),
        _ => (name, ""),
    }
}

/// Cap the name at `max_len` characters, keeping the extension intact.
fn truncate_preserving_ext(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    if ext.is_empty() || ext.len() + 1 >= max_len {
        return name.chars().take(max_len).collect();
    }
    let stem_budget = max_len - ext.len() - 1;
    let stem: String = stem.chars().take(stem_budget).collect();
    format!("{}.{}", stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name_kept() {
        let mut namer = StoredNamer::new();
        assert_eq!(namer.allocate("consent.pdf"), "consent.pdf");
    }

    #[test]
    fn test_path_separators_sanitized() {
        let mut namer = StoredNamer::new();
        assert_eq!(namer.allocate("reports/2024/final.pdf"), "reports_2024_final.pdf");
        assert_eq!(namer.allocate("data\\sheet.xlsx"), "data_sheet.xlsx");

        // Traversal attempts lose their separators and leading dots.
        let stored = namer.allocate("../../etc/passwd");
        assert!(!stored.contains('/'));
        assert!(!stored.starts_with('.'));
    }

    #[test]
    fn test_duplicates_get_numeric_suffix() {
        let mut namer = StoredNamer::new();
        assert_eq!(namer.allocate("a.pdf"), "a.pdf");
        assert_eq!(namer.allocate("a.pdf"), "a_1.pdf");
        assert_eq!(namer.allocate("a.pdf"), "a_2.pdf");
    }

    #[test]
    fn test_duplicates_without_extension() {
        let mut namer = StoredNamer::new();
        assert_eq!(namer.allocate("notes"), "notes");
        assert_eq!(namer.allocate("notes"), "notes_1");
    }

    #[test]
    fn test_sanitized_collision_still_unique() {
        // Distinct logical names that sanitize to the same string must not
        // end up sharing a stored name.
        let mut namer = StoredNamer::new();
        let a = namer.allocate("report 1.pdf");
        let b = namer.allocate("report&1.pdf");
        assert_eq!(a, "report_1.pdf");
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncation_preserves_extension() {
        let mut namer = StoredNamer::with_max_len(20);
        let stored = namer.allocate(&format!("{}.pdf", "x".repeat(100)));
        assert!(stored.len() <= 20);
        assert!(stored.ends_with(".pdf"));
    }

    #[test]
    fn test_empty_and_dotted_names() {
        let mut namer = StoredNamer::new();
        assert_eq!(namer.allocate(""), "file");
        assert_eq!(namer.allocate(".hidden"), "hidden");
    }

    #[test]
    fn test_deterministic_across_instances() {
        let names = ["a.pdf", "a.pdf", "b c.txt", "b_c.txt"];
        let run = |names: &[&str]| {
            let mut namer = StoredNamer::new();
            names.iter().map(|n| namer.allocate(n)).collect::<Vec<_>>()
        };
        assert_eq!(run(&names), run(&names));
    }
}
