//! URL Normalizer — pure, deterministic, no I/O.

use url::Url;

const INVALID: &str = "invalid";

/// Two-label public suffixes we special-case for `get_base_domain`. Not an
/// exhaustive public-suffix list — just the common ones a content-extraction
/// domain key needs (a full PSL pull is out of scope for this component).
const TWO_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "gov.uk", "ac.uk", "co.jp", "co.nz", "co.za", "com.au", "com.br", "com.cn",
];

/// Parse `input`; return a lowercase hostname with any leading `www.`
/// stripped, or `"invalid"` when it does not parse as an absolute
/// `http`/`https` URL with a non-empty host.
///
/// A scheme-less input (e.g. a bare hostname, possibly with a path) is
/// treated as implicitly `http://` as long as it contains no whitespace —
/// this is what makes the function idempotent on its own output, since
/// `normalize_domain` returns a bare hostname.
pub fn normalize_domain(input: &str) -> String {
    if input.contains("://") {
        let Ok(parsed) = Url::parse(input) else {
            return INVALID.to_string();
        };
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return INVALID.to_string();
        }
        return host_or_invalid(parsed.host_str());
    }

    if input.trim().is_empty() || input.chars().any(|c| c.is_whitespace()) {
        return INVALID.to_string();
    }
    let Ok(parsed) = Url::parse(&format!("http://{input}")) else {
        return INVALID.to_string();
    };
    host_or_invalid(parsed.host_str())
}

fn host_or_invalid(host: Option<&str>) -> String {
    match host {
        Some(h) if !h.is_empty() => {
            let lower = h.to_ascii_lowercase();
            lower.strip_prefix("www.").unwrap_or(&lower).to_string()
        }
        _ => INVALID.to_string(),
    }
}

/// Return the registrable domain for an already-normalized hostname, folding
/// known two-label public suffixes (e.g. `news.bbc.co.uk` -> `bbc.co.uk`).
pub fn get_base_domain(host: &str) -> String {
    if host == INVALID {
        return INVALID.to_string();
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host.to_string();
    }

    let last_two = labels[labels.len() - 2..].join(".");
    if TWO_LABEL_SUFFIXES.contains(&last_two.as_str()) && labels.len() >= 3 {
        return labels[labels.len() - 3..].join(".");
    }

    labels[labels.len() - 2..].join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_www_and_lowercases() {
        assert_eq!(normalize_domain("https://WWW.Example.com/a/b"), "example.com");
    }

    #[test]
    fn bare_host_without_scheme_normalizes_like_a_url() {
        assert_eq!(normalize_domain("example.com/a"), "example.com");
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert_eq!(normalize_domain("ftp://example.com"), INVALID);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(normalize_domain("not a url"), INVALID);
    }

    #[test]
    fn idempotent() {
        let once = normalize_domain("https://www.Example.COM");
        // normalize_domain expects a URL; feeding the bare host back through
        // a scheme-qualified URL models the idempotence property.
        let twice = normalize_domain(&format!("https://{once}"));
        assert_eq!(once, twice);
    }

    #[test]
    fn base_domain_handles_two_label_suffix() {
        assert_eq!(get_base_domain("news.bbc.co.uk"), "bbc.co.uk");
    }

    #[test]
    fn base_domain_handles_plain_tld() {
        assert_eq!(get_base_domain("www.example.com"), "www.example.com");
        assert_eq!(get_base_domain("sub.example.com"), "example.com");
    }
}
