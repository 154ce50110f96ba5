//! Validation and normalization of the identifiers that end up in shell commands, paths and
//! rendered proxy documents.

use std::sync::LazyLock;

use regex::Regex;

use crate::{HostcoreError, HostcoreResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("valid username regex"));

static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
        .expect("valid domain regex")
});

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+){0,2}$").expect("valid version regex"));

static ENV_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env name regex"));

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks a Unix username against the portable, injection-safe pattern.
pub fn validate_username(username: &str) -> HostcoreResult<()> {
    if USERNAME_PATTERN.is_match(username) {
        Ok(())
    } else {
        Err(HostcoreError::InvalidUsername(username.to_string()))
    }
}

/// Checks a PHP version string such as `8.4`.
pub fn validate_version(version: &str) -> HostcoreResult<()> {
    if VERSION_PATTERN.is_match(version) {
        Ok(())
    } else {
        Err(HostcoreError::InvalidVersion(version.to_string()))
    }
}

/// Returns true if `name` can be used as an environment variable name.
pub fn is_valid_env_name(name: &str) -> bool {
    ENV_NAME_PATTERN.is_match(name)
}

/// Returns true if `value` fits in a single proxy configuration token.
///
/// Values with a backslash are written between backticks, which have no escapes, so a value
/// that holds both a backslash and a backtick has no safe form.
pub fn is_quotable(value: &str) -> bool {
    !(value.contains('\\') && value.contains('`'))
}

/// Normalizes a domain: trims, lowercases, and strips any scheme, path, query, port or trailing
/// dot. The result must be a plain host name.
pub fn normalize_domain(input: &str) -> HostcoreResult<String> {
    let mut domain = input.trim().to_ascii_lowercase();

    if let Some((_, rest)) = domain.split_once("://") {
        domain = rest.to_string();
    }

    if let Some(end) = domain.find(['/', '?', '#']) {
        domain.truncate(end);
    }

    if let Some((host, port)) = domain.rsplit_once(':') {
        if port.chars().all(|c| c.is_ascii_digit()) {
            domain = host.to_string();
        }
    }

    let domain = domain.trim_end_matches('.').to_string();
    if domain.len() > 253 || !DOMAIN_PATTERN.is_match(&domain) {
        return Err(HostcoreError::InvalidDomain(input.to_string()));
    }

    Ok(domain)
}

/// Normalizes a list of alias domains: each one is normalized, duplicates are dropped, and any
/// alias equal to `primary` is removed. Order of first appearance is kept.
pub fn normalize_aliases(primary: &str, aliases: &[String]) -> HostcoreResult<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(aliases.len());
    for alias in aliases {
        if alias.trim().is_empty() {
            continue;
        }

        let alias = normalize_domain(alias)?;
        if alias != primary && !normalized.contains(&alias) {
            normalized.push(alias);
        }
    }

    Ok(normalized)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        for name in ["alice", "_svc", "web-01", "a"] {
            assert!(validate_username(name).is_ok(), "{name} should be valid");
        }

        for name in ["", "Alice", "1abc", "alice;rm -rf /", "a b", &"a".repeat(33)] {
            assert!(
                matches!(validate_username(name), Err(HostcoreError::InvalidUsername(_))),
                "{name} should be invalid"
            );
        }
    }

    #[test]
    fn test_validate_version() {
        assert!(validate_version("8.4").is_ok());
        assert!(validate_version("8").is_ok());
        assert!(validate_version("8.3.12").is_ok());
        assert!(validate_version("8.4-zts").is_err());
        assert!(validate_version("../8.4").is_err());
    }

    #[test]
    fn test_is_quotable() {
        assert!(is_quotable("plain"));
        assert!(is_quotable("C:\\"));
        assert!(is_quotable("a`b"));
        assert!(!is_quotable("a\\`b"));
    }

    #[test]
    fn test_normalize_domain() -> anyhow::Result<()> {
        assert_eq!(normalize_domain("Alice.Test")?, "alice.test");
        assert_eq!(normalize_domain("https://alice.test/wp-admin?x=1")?, "alice.test");
        assert_eq!(normalize_domain(" www.alice.test:8080 ")?, "www.alice.test");
        assert_eq!(normalize_domain("alice.test.")?, "alice.test");
        assert_eq!(normalize_domain("localhost")?, "localhost");

        for bad in ["", "alice test", "-alice.test", "alice..test", "alice.test {", "a\"b.test"] {
            assert!(
                matches!(normalize_domain(bad), Err(HostcoreError::InvalidDomain(_))),
                "{bad} should be rejected"
            );
        }

        Ok(())
    }

    #[test]
    fn test_normalize_aliases() -> anyhow::Result<()> {
        let aliases = vec![
            "WWW.alice.test".to_string(),
            "alice.test".to_string(),
            "http://www.alice.test/".to_string(),
            "".to_string(),
            "shop.alice.test".to_string(),
        ];

        assert_eq!(
            normalize_aliases("alice.test", &aliases)?,
            vec!["www.alice.test", "shop.alice.test"]
        );

        Ok(())
    }
}
