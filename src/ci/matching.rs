//! Fuzzy reconciliation of configured required-check names against the
//! names a CI provider actually reports.
//!
//! Providers report workflow-job names with prefixes and suffixes the user
//! cannot predict ("Run tests", "build / ubuntu-latest", "npm test"), so
//! strict equality would make required-check matching useless. The rules
//! live here, isolated from the decision logic, so they stay auditable.

/// True when a configured requirement name matches a reported check name.
///
/// Rules, in order:
/// 1. equal, case-insensitively
/// 2. the requirement is a substring of the reported name
/// 3. the reported name contains one of the generated variants
pub fn matches_check_name(required: &str, reported: &str) -> bool {
    let required = required.trim().to_lowercase();
    let reported = reported.trim().to_lowercase();
    if required.is_empty() || reported.is_empty() {
        return false;
    }

    if required == reported || reported.contains(&required) {
        return true;
    }

    name_variants(&required)
        .iter()
        .any(|variant| reported.contains(variant))
}

/// Variant spellings a provider is likely to use for a requirement name.
/// `required` must already be lowercased.
fn name_variants(required: &str) -> Vec<String> {
    vec![
        format!("{required}s"),
        format!("run {required}"),
        format!("npm {required}"),
        format!("{required} /"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_case_insensitive() {
        assert!(matches_check_name("test", "test"));
        assert!(matches_check_name("Test", "TEST"));
        assert!(matches_check_name("build", "Build"));
    }

    #[test]
    fn test_substring_match() {
        assert!(matches_check_name("test", "Run tests"));
        assert!(matches_check_name("build", "build / ubuntu-latest"));
        assert!(matches_check_name("lint", "npm lint"));
        assert!(matches_check_name("test", "test-coverage"));
    }

    #[test]
    fn test_no_match() {
        assert!(!matches_check_name("test", "build"));
        assert!(!matches_check_name("deploy", "Run tests"));
    }

    #[test]
    fn test_empty_names_never_match() {
        assert!(!matches_check_name("", "test"));
        assert!(!matches_check_name("test", ""));
        assert!(!matches_check_name("", ""));
        assert!(!matches_check_name("   ", "test"));
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert!(matches_check_name(" test ", "Run tests"));
    }
}
