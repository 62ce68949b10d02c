//! Refresh-token cookie transport.
//!
//! The refresh secret travels only in an `HttpOnly` cookie; it is never placed in
//! a response body.

use axum::http::{HeaderMap, HeaderValue, header};

pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
    pub max_age_secs: i64,
}

impl CookiePolicy {
    pub fn new(secure: bool, ttl_days: i64) -> Self {
        Self {
            secure,
            max_age_secs: ttl_days * 24 * 60 * 60,
        }
    }

    pub fn set(&self, value: &str) -> String {
        self.render(value, self.max_age_secs)
    }

    pub fn clear(&self) -> String {
        self.render("", 0)
    }

    fn render(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!("{REFRESH_COOKIE}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}");
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    pub fn header(&self, value: &str) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.set(value)).ok()
    }

    pub fn clear_header(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.clear()).ok()
    }
}

/// Extract the refresh token from `Cookie` headers, if present and non-empty.
pub fn refresh_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|raw| find_cookie(raw, REFRESH_COOKIE))
}

/// Find `name` in a `Cookie` header value (`a=1; b=2`).
pub fn find_cookie(raw: &str, name: &str) -> Option<String> {
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn set_cookie_attributes() {
        let policy = CookiePolicy::new(false, 7);
        assert_eq!(
            policy.set("abc"),
            "refreshToken=abc; HttpOnly; SameSite=Lax; Path=/; Max-Age=604800"
        );
        assert!(CookiePolicy::new(true, 7).set("abc").ends_with("; Secure"));
        assert!(policy.clear().contains("Max-Age=0"));
    }

    #[test]
    fn finds_refresh_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; refreshToken=deadbeef; lang=en"));
        assert_eq!(refresh_token(&headers).as_deref(), Some("deadbeef"));
    }

    #[test]
    fn empty_or_missing_cookie_is_none() {
        let mut headers = HeaderMap::new();
        assert!(refresh_token(&headers).is_none());
        headers.insert(header::COOKIE, HeaderValue::from_static("refreshToken="));
        assert!(refresh_token(&headers).is_none());
        headers.insert(header::COOKIE, HeaderValue::from_static("xrefreshToken=1"));
        assert!(refresh_token(&headers).is_none());
    }

    proptest! {
        #[test]
        fn round_trips_hex_secrets(secret in "[0-9a-f]{1,96}", other in "[a-z]{1,8}=[a-z0-9]{0,8}") {
            let raw = format!("{other}; {REFRESH_COOKIE}={secret}");
            prop_assert_eq!(find_cookie(&raw, REFRESH_COOKIE), Some(secret));
        }

        #[test]
        fn never_panics_on_arbitrary_input(raw in ".*") {
            let _ = find_cookie(&raw, REFRESH_COOKIE);
        }
    }
}
