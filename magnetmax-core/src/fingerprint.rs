//! Request fingerprinting.
//!
//! A fingerprint identifies "the same logical call" for both the response
//! cache and the reliable-request queue. Headers never take part, so a call
//! replayed with a fresh bearer token keeps its identity.

use md5::{Digest, Md5};

/// Computes the fingerprint of a call: the MD5 hex digest of
/// `method ‖ url ‖ body`.
pub fn fingerprint(method: &str, url: &str, body: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(method.as_bytes());
    hasher.update(url.as_bytes());
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpRequest;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("GET", "https://api.example.com/api/users", b"");
        let b = fingerprint("GET", "https://api.example.com/api/users", b"");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_known_digest() {
        // md5("") with nothing appended
        assert_eq!(fingerprint("", "", b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_fingerprint_ignores_headers() {
        let plain = HttpRequest::post("https://api.example.com/api/items").with_body(b"{}".to_vec());
        let with_auth = plain
            .clone()
            .with_header("Authorization", "Bearer abc")
            .with_header("X-Trace", "1");

        assert_eq!(plain.fingerprint(), with_auth.fingerprint());
    }

    #[test]
    fn test_fingerprint_depends_on_method_url_and_body() {
        let base = fingerprint("GET", "https://h/api/a", b"x");
        assert_ne!(base, fingerprint("POST", "https://h/api/a", b"x"));
        assert_ne!(base, fingerprint("GET", "https://h/api/b", b"x"));
        assert_ne!(base, fingerprint("GET", "https://h/api/a", b"y"));
    }
}
