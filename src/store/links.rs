use url::Url;

/// Reduce a link to the form used for lookups.
///
/// Different sources reference the same chapter with cosmetic variations
/// (`www.`, trailing slash, fragments, host casing). Values that do not parse
/// as URLs are only trimmed. Returns `None` for blank input.
pub fn normalize_link(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut url = match Url::parse(trimmed) {
        Ok(url) if url.has_host() => url,
        _ => return Some(trimmed.to_string()),
    };

    url.set_fragment(None);
    if let Some(host) = url.host_str().map(|h| h.trim_start_matches("www.").to_string()) {
        // Host is already lowercased by the parser
        let _ = url.set_host(Some(&host));
    }

    let mut normalized = url.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    Some(normalized)
}
