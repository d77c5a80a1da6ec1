use std::borrow::Cow;

use validator::ValidationError;

/// Maximum length of a slug.
const MAX_SLUG_LENGTH: usize = 64;

/// Maximum number of entries in an allowed-domains list.
const MAX_ALLOWED_DOMAINS: usize = 200;

/// Validate a URL-friendly slug: lowercase alphanumeric segments joined by
/// single hyphens. Examples: "acme-corp", "org1", "test-org-123".
pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    let well_formed = !slug.is_empty()
        && slug.len() <= MAX_SLUG_LENGTH
        && slug
            .split('-')
            .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));

    if well_formed {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_slug");
        err.message = Some(Cow::Borrowed(
            "Slug must be lowercase alphanumeric segments separated by hyphens",
        ));
        Err(err)
    }
}

/// Validate an email-domain allow-list.
///
/// Entries must be bare domain names ("acme.com"), not addresses or URLs.
pub fn validate_domains(domains: &[String]) -> Result<(), ValidationError> {
    if domains.len() > MAX_ALLOWED_DOMAINS {
        let mut err = ValidationError::new("too_many_domains");
        err.message = Some(Cow::Owned(format!(
            "Maximum {} allowed domains",
            MAX_ALLOWED_DOMAINS
        )));
        return Err(err);
    }

    for domain in domains {
        let valid = domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !valid {
            let mut err = ValidationError::new("invalid_domain");
            err.message = Some(Cow::Owned(format!("'{}' is not a valid domain", domain)));
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("acme-corp", true)]
    #[case("org1", true)]
    #[case("a", true)]
    #[case("Acme", false)]
    #[case("-acme", false)]
    #[case("acme--corp", false)]
    #[case("acme_corp", false)]
    #[case("", false)]
    fn test_validate_slug(#[case] slug: &str, #[case] ok: bool) {
        assert_eq!(validate_slug(slug).is_ok(), ok);
    }

    #[rstest]
    #[case(&["acme.com"], true)]
    #[case(&["acme.com", "sub.acme.co.uk"], true)]
    #[case(&["user@acme.com"], false)]
    #[case(&["https://acme.com"], false)]
    #[case(&["localhost"], false)]
    fn test_validate_domains(#[case] domains: &[&str], #[case] ok: bool) {
        let domains: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
        assert_eq!(validate_domains(&domains).is_ok(), ok);
    }
}
