use reqwest::Url;

use crate::error::{DriverError, Result};

/// Resolve a request path against the session base URL.
///
/// Rules, first match wins:
/// - empty or `/` path: the base URL as configured
/// - path with a scheme: used verbatim once it parses
/// - absolute path while the base has a non-root path: appended to the base
///   path, so agents mounted behind a sub-path proxy keep their prefix
/// - anything else: standard reference resolution
pub fn resolve_url(base: &str, path: &str) -> Result<String> {
    let path = path.trim();
    if path.is_empty() || path == "/" {
        return Ok(base.to_string());
    }

    if has_scheme(path) {
        Url::parse(path).map_err(|e| invalid(path, e))?;
        return Ok(path.to_string());
    }

    let base_url = Url::parse(base).map_err(|e| invalid(base, e))?;

    if path.starts_with('/') && !matches!(base_url.path(), "" | "/") {
        return Ok(format!("{}{}", base.trim_end_matches('/'), path));
    }

    base_url
        .join(path)
        .map(|u| u.to_string())
        .map_err(|e| invalid(path, e))
}

/// `scheme://` at the very start, before any path, query or fragment.
fn has_scheme(path: &str) -> bool {
    let Some((scheme, _)) = path.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn invalid(url: &str, e: impl std::fmt::Display) -> DriverError {
    DriverError::InvalidArgument(format!("invalid url '{}': {}", url, e))
}
