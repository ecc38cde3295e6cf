// Utility functions
use url::Url;

/// Resolves a link found on a page against the site root.
pub fn absolute_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Strips ASCII and full-width spaces the site pads labels with ("正　　字").
pub fn clean_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{3000}')
        .collect()
}

/// Turns a record key into a safe single path segment.
pub fn path_segment(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
