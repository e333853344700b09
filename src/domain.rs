//! Domain matching primitives
//!
//! Two questions are answered here, both without I/O and without ever
//! failing loudly:
//!
//! - [`same_domain`]: do two hosts belong to the same site? Hosts with a
//!   public-suffix registrable domain compare on that domain; IP literals,
//!   `localhost` and other hosts without one compare verbatim. Ports must
//!   always match.
//! - [`matches_pattern`]: does a URL match a domain pattern? Patterns are
//!   exact hostnames, `*` globs (e.g. `*.example.com`) or `/regex/flags`.
//!
//! Malformed input resolves to "no match".

use crate::error::{IsolationError, Result};
use regex::{Regex, RegexBuilder};
use url::{Host, Url};

const WEB_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

/// Schemes whose URLs are matched as opaque strings instead of by host
const OPAQUE_PREFIXES: &[&str] = &["about:", "moz-extension:", "chrome-extension:", "chrome:"];

/// Check whether two URLs or `host[:port]` strings are the same domain
pub fn same_domain(a: &str, b: &str) -> bool {
    let (Some(a), Some(b)) = (parse_web_url(a), parse_web_url(b)) else {
        return false;
    };
    if a.port() != b.port() {
        return false;
    }
    let (Some(host_a), Some(host_b)) = (a.host(), b.host()) else {
        return false;
    };

    match (registrable_domain(&host_a), registrable_domain(&host_b)) {
        (Some(domain_a), Some(domain_b)) => domain_a == domain_b,
        _ => host_a == host_b,
    }
}

/// Check whether a URL matches a domain pattern
pub fn matches_pattern(url: &str, pattern: &str) -> bool {
    if let Some((body, flags)) = split_regex_literal(pattern) {
        return match compile_regex(body, flags) {
            Ok(re) => re.is_match(url),
            Err(e) => {
                tracing::trace!(pattern = %pattern, error = %e, "Skipping invalid pattern");
                false
            }
        };
    }

    let hostname = if is_opaque(url) {
        url.to_string()
    } else {
        match parse_web_url(url).and_then(|u| u.host_str().map(str::to_string)) {
            Some(host) => host,
            None => return false,
        }
    };

    if hostname.eq_ignore_ascii_case(pattern) {
        return true;
    }
    if !pattern.contains('*') {
        return false;
    }

    RegexBuilder::new(&glob_to_regex(pattern))
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(&hostname))
        .unwrap_or(false)
}

/// Lowercase hostname of a web URL or bare `host[:port]`
///
/// Returns `None` for non-web URLs (`about:`, extension pages, `data:`).
pub fn host_of(url: &str) -> Option<String> {
    parse_web_url(url).and_then(|u| u.host_str().map(str::to_string))
}

/// Check that a pattern can be used for matching
///
/// Globs and exact hostnames always compile; only regex literals can fail.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    match split_regex_literal(pattern) {
        Some((body, flags)) => compile_regex(body, flags).map(|_| ()),
        None => Ok(()),
    }
}

fn registrable_domain<'a>(host: &'a Host<&'a str>) -> Option<&'a str> {
    match host {
        Host::Domain(domain) => psl::domain_str(*domain),
        Host::Ipv4(_) | Host::Ipv6(_) => None,
    }
}

fn is_opaque(url: &str) -> bool {
    OPAQUE_PREFIXES.iter().any(|prefix| url.starts_with(prefix))
}

/// Parse a web URL, falling back to `http://` for bare `host[:port]`
fn parse_web_url(input: &str) -> Option<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    match Url::parse(trimmed) {
        Ok(url) if url.host().is_some() => {
            WEB_SCHEMES.contains(&url.scheme()).then_some(url)
        }
        // "example.com:8080" parses as scheme "example.com" with path "8080"
        Ok(url) if looks_like_port(url.path()) => parse_bare_host(trimmed),
        Ok(_) => None,
        Err(_) => parse_bare_host(trimmed),
    }
}

fn parse_bare_host(input: &str) -> Option<Url> {
    Url::parse(&format!("http://{}", input))
        .ok()
        .filter(|url| url.host().is_some())
}

fn looks_like_port(path: &str) -> bool {
    let first = path.split('/').next().unwrap_or("");
    !first.is_empty() && first.chars().all(|c| c.is_ascii_digit())
}

/// Split `/body/flags` into its parts
fn split_regex_literal(pattern: &str) -> Option<(&str, &str)> {
    let rest = pattern.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    Some((&rest[..end], &rest[end + 1..]))
}

fn compile_regex(body: &str, flags: &str) -> Result<Regex> {
    let invalid = |reason: String| IsolationError::InvalidPattern {
        pattern: format!("/{}/{}", body, flags),
        reason,
    };

    let mut builder = RegexBuilder::new(body);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            // Global, sticky and unicode have no effect on a single test
            'g' | 'y' | 'u' => {}
            other => return Err(invalid(format!("unsupported flag '{}'", other))),
        }
    }

    builder.build().map_err(|e| invalid(e.to_string()))
}

/// Convert a `*` glob into an anchored regex, escaping everything else
fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    for (i, literal) in pattern.split('*').enumerate() {
        if i > 0 {
            regex.push_str(".*");
        }
        regex.push_str(&regex::escape(literal));
    }
    regex.push('$');
    regex
}
