//! Utility functions and helpers.

pub mod http;
pub mod log;

use url::Url;

/// File-name-safe identifier for a site address.
///
/// Host and path are kept (scheme, query and fragment dropped) and every
/// non-alphanumeric character becomes `_`.
pub fn site_slug(site: &str) -> String {
    let raw = match Url::parse(site) {
        Ok(url) => format!("{}{}", url.host_str().unwrap_or_default(), url.path()),
        Err(_) => site.to_string(),
    };

    let slug: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "site".to_string()
    } else {
        slug.to_string()
    }
}
