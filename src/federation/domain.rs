//! Destination domain keys
//!
//! The circuit breaker tracks failures per destination domain. A domain key
//! is the lowercased host of the target URL, with the port appended when it
//! is not the scheme default, so two servers on the same host but different
//! ports back off independently.

/// Domain key for an already parsed destination URL.
///
/// `Url::port` is `None` for the scheme's default port, so `:443` on https
/// and `:80` on http never reach the key. IPv6 hosts keep their brackets
/// only when a port follows.
pub fn domain_of(url: &url::Url) -> String {
    let Some(host) = url.host_str() else {
        return String::new();
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string(),
    }
}

/// Extract the domain key from an inbox URI or bare authority.
///
/// Input without a scheme is read as an https authority, so
/// `example.com:443` and `https://example.com/inbox` share a key. Anything
/// that still fails to parse falls back to its lowercased authority text.
pub fn extract_domain(uri: &str) -> String {
    let uri = uri.trim();
    if uri.is_empty() {
        return String::new();
    }

    let parsed = if uri.contains("://") {
        url::Url::parse(uri)
    } else {
        url::Url::parse(&format!("https://{uri}"))
    };

    match parsed {
        Ok(url) if url.host_str().is_some() => domain_of(&url),
        _ => {
            let rest = uri.split_once("://").map_or(uri, |(_, rest)| rest);
            let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
            rest[..end].trim().trim_end_matches('.').to_ascii_lowercase()
        }
    }
}
