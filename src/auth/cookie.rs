// src/auth/cookie.rs

use std::sync::Mutex;
use std::time::{Duration, Instant};

use cookie_crate::time::OffsetDateTime;
use cookie_crate::Cookie;
use http::header::{HeaderValue, SET_COOKIE};
use http::HeaderMap;

use crate::server::filter::AUTH_COOKIE;
use crate::token::strip_quotes;

/// The client's copy of the server's `auth` cookie.
///
/// Shared across tasks. A cookie with a lifetime is dropped after nine
/// tenths of it so it is never presented right at its expiry.
#[derive(Debug, Default)]
pub struct SessionToken {
    cookie: Mutex<Option<StoredCookie>>,
}

#[derive(Debug, Clone)]
struct StoredCookie {
    /// Always double-quoted.
    value: String,
    expires_at: Option<Instant>,
}

impl StoredCookie {
    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| Instant::now() >= at)
    }
}

impl SessionToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token holding `value` with no expiry.
    pub fn from_value(value: &str) -> Self {
        let token = Self::new();
        token.set(Some(value));
        token
    }

    pub fn is_set(&self) -> bool {
        self.current().is_some()
    }

    /// Replaces the cookie value, or clears it with `None`.
    pub fn set(&self, value: Option<&str>) {
        self.store(value, None);
    }

    pub fn clear(&self) {
        self.set(None);
    }

    /// The cookie value without surrounding quotes.
    pub fn value(&self) -> Option<String> {
        self.current().map(|c| strip_quotes(&c.value).to_owned())
    }

    /// `Cookie: auth="..."` for the next request.
    pub fn cookie_header(&self) -> Option<HeaderValue> {
        let cookie = self.current()?;
        HeaderValue::from_str(&format!("{AUTH_COOKIE}={}", cookie.value)).ok()
    }

    /// Picks the `auth` cookie out of `Set-Cookie` response headers.
    /// Unparseable headers are skipped.
    pub fn store_from_headers(&self, headers: &HeaderMap) {
        for header in headers.get_all(SET_COOKIE) {
            let Ok(text) = header.to_str() else {
                continue;
            };
            let cookie = match Cookie::parse(text) {
                Ok(cookie) => cookie,
                Err(e) => {
                    log::debug!("Cannot parse cookie header, reason={e}");
                    continue;
                }
            };
            if cookie.name().eq_ignore_ascii_case(AUTH_COOKIE) {
                self.store(Some(cookie.value()), lifetime(&cookie));
            }
        }
    }

    fn current(&self) -> Option<StoredCookie> {
        let mut guard = self.cookie.lock().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref().map_or(false, StoredCookie::is_expired) {
            *guard = None;
        }
        guard.clone()
    }

    fn store(&self, value: Option<&str>, lifetime: Option<i64>) {
        let stored = value.filter(|v| !strip_quotes(v).is_empty()).and_then(|value| {
            let expires_at = match lifetime {
                Some(secs) => {
                    let secs = secs.saturating_mul(9) / 10;
                    if secs <= 0 {
                        return None;
                    }
                    // too far out to represent: treat as a session cookie
                    Instant::now().checked_add(Duration::from_secs(secs as u64))
                }
                None => None,
            };
            let value = if value.starts_with('"') {
                value.to_owned()
            } else {
                format!("\"{value}\"")
            };
            Some(StoredCookie { value, expires_at })
        });
        *self.cookie.lock().unwrap_or_else(|e| e.into_inner()) = stored;
    }
}

/// Seconds the cookie may live, from `Max-Age` or else `Expires`.
fn lifetime(cookie: &Cookie<'_>) -> Option<i64> {
    if let Some(max_age) = cookie.max_age() {
        return Some(max_age.whole_seconds());
    }
    cookie
        .expires_datetime()
        .map(|at| (at - OffsetDateTime::now_utc()).whole_seconds())
}
