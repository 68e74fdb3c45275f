//! Canonical request fingerprints used for deduplication.
//!
//! The canonical form is
//! `scheme://[user@]host/escaped-path?sorted-query @#@ sorted-headers @#@ cookies`
//! followed by the raw body bytes, hashed with MD5. Query parameters and
//! headers are sorted by key and then by value, so two requests that only
//! differ in parameter order share a fingerprint.

use crate::request::Request;
use std::collections::BTreeMap;
use std::fmt;
use url::form_urlencoded::byte_serialize;

const SECTION_SEPARATOR: &str = "@#@";

/// 128-bit content hash of a canonicalized request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn of(request: &Request) -> Self {
        let mut data = canonical_form(request).into_bytes();
        data.extend_from_slice(&request.body);
        Fingerprint(md5::compute(&data).0)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

fn escape(s: &str) -> String {
    byte_serialize(s.as_bytes()).collect()
}

fn join_sorted<'a>(pairs: impl Iterator<Item = (String, &'a str)>) -> String {
    let mut grouped: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (k, v) in pairs {
        grouped.entry(k).or_default().push(v);
    }
    let mut parts = Vec::new();
    for (k, mut values) in grouped {
        values.sort_unstable();
        for v in values {
            parts.push(format!("{}={}", escape(&k), escape(v)));
        }
    }
    parts.join("&")
}

/// Builds the canonical string (without the body) for `request`.
pub(crate) fn canonical_form(request: &Request) -> String {
    let url_part = match request.url() {
        Some(u) => {
            let mut s = format!("{}://", u.scheme());
            if !u.username().is_empty() || u.password().is_some() {
                s.push_str(u.username());
                if let Some(password) = u.password() {
                    s.push(':');
                    s.push_str(password);
                }
                s.push('@');
            }
            if let Some(host) = u.host_str() {
                s.push_str(&host.to_lowercase());
            }
            if let Some(port) = u.port() {
                s.push_str(&format!(":{port}"));
            }
            let path = u.path();
            if !path.is_empty() && !path.starts_with('/') {
                s.push('/');
            }
            s.push_str(path);
            if u.query().is_some_and(|q| !q.is_empty()) {
                let pairs: Vec<(String, String)> = u.query_pairs().into_owned().collect();
                s.push('?');
                s.push_str(&join_sorted(
                    pairs.iter().map(|(k, v)| (k.clone(), v.as_str())),
                ));
            }
            s
        }
        None => request.raw_url().to_string(),
    };

    let headers = join_sorted(
        request
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str())),
    );

    let cookies = request
        .cookies
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    [url_part, headers, cookies].join(SECTION_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Request {
        Request::get("https://Example.com/get?b=2&a=1&a=0")
            .with_header("d", "d")
            .with_header("Accept", "text/html")
            .with_cookie("b", "b")
            .with_body("c=c")
    }

    #[test]
    fn canonical_form_sorts_query_and_headers() {
        let form = canonical_form(&sample());
        assert_eq!(
            form,
            "https://example.com/get?a=0&a=1&b=2@#@accept=text%2Fhtml&d=d@#@b=b"
        );
    }

    #[test]
    fn parameter_and_header_order_do_not_matter() {
        let reordered = Request::get("https://example.com/get?a=0&b=2&a=1")
            .with_header("accept", "text/html")
            .with_header("D", "d")
            .with_cookie("b", "b")
            .with_body("c=c");
        assert_eq!(sample().fingerprint(), reordered.fingerprint());
    }

    #[test]
    fn body_cookies_and_userinfo_change_the_fingerprint() {
        let base = sample().fingerprint();
        assert_ne!(base, sample().with_body("other").fingerprint());
        assert_ne!(base, sample().with_cookie("x", "y").fingerprint());

        let with_user = Request::get("https://user@example.com/");
        let without_user = Request::get("https://example.com/");
        assert_ne!(with_user.fingerprint(), without_user.fingerprint());
        assert!(canonical_form(&with_user).starts_with("https://user@example.com/"));
    }

    #[test]
    fn display_is_lowercase_hex() {
        let printed = sample().fingerprint().to_string();
        assert_eq!(printed.len(), 32);
        assert!(printed.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
