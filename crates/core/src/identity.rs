//! Canonical external identifier derivation for people and organizations.
//!
//! All functions here are pure and return `None` when the input does not
//! match, so callers can apply their own fallback precedence (handle before
//! email, pre-known company id before URL segment).

const PROFILE_MARKER: &str = "linkedin.com/in/";

/// Extracts the public profile handle from a LinkedIn profile URL.
///
/// The handle is the path segment after `/in/`, terminated by `/`, `?`, or
/// `#`. Case of the handle itself is preserved; the marker match is
/// case-insensitive.
pub fn extract_profile_handle(url: &str) -> Option<String> {
    let lower = url.to_ascii_lowercase();
    let start = lower.find(PROFILE_MARKER)? + PROFILE_MARKER.len();
    let handle: String =
        url[start..].chars().take_while(|c| !matches!(c, '/' | '?' | '#')).collect();
    if handle.is_empty() {
        None
    } else {
        Some(handle)
    }
}

/// Extracts the company-page segment from a company profile URL: the path
/// segment immediately following a literal `company` segment.
pub fn extract_company_segment(url: &str) -> Option<String> {
    let after_scheme = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    let path_start = after_scheme.find('/')?;
    let path = &after_scheme[path_start..];
    let path = path.split(['?', '#']).next().unwrap_or(path);

    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("company") {
            return segments.next().filter(|next| !next.is_empty()).map(str::to_string);
        }
    }
    None
}

/// Normalizes a website string to a bare lowercase hostname: defaults the
/// scheme to https, drops path/query/port, and strips a leading `www.`.
pub fn normalize_website(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_ascii_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(lower.as_str());

    let host: String = without_scheme
        .chars()
        .take_while(|c| !matches!(c, '/' | '?' | '#' | ':'))
        .collect();
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return None;
    }

    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
