// src/token.rs

//! The authentication token carried inside the signed session cookie.
//!
//! A token encodes as `k=v` pairs joined with `&`:
//!
//! ```text
//! u=bob&p=bob@EXAMPLE.COM&t=kerberos&e=1700000000000
//! ```
//!
//! `i` (max-inactive deadline) is only written when set.

use std::collections::HashMap;
use std::fmt;

use crate::clock::{Clock, SystemClock};
use crate::error;
use crate::Result;

const ATTR_SEPARATOR: char = '&';
const USER_NAME: &str = "u";
const PRINCIPAL: &str = "p";
const MAX_INACTIVES: &str = "i";
const TYPE: &str = "t";
const EXPIRES: &str = "e";

const REQUIRED: [&str; 4] = [USER_NAME, PRINCIPAL, TYPE, EXPIRES];

/// An authenticated identity with its scheme and validity window.
///
/// Tokens are immutable apart from [`set_expires`](Self::set_expires) and
/// [`set_max_inactive`](Self::set_max_inactive), both of which regenerate
/// the cached text form.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticationToken {
    user_name: String,
    principal: String,
    auth_type: String,
    max_inactive: i64,
    expires: i64,
    encoded: String,
}

impl AuthenticationToken {
    /// Unauthenticated-but-permitted access.
    ///
    /// Its setters are no-ops and it is never signed into a cookie.
    pub const ANONYMOUS: AuthenticationToken = AuthenticationToken {
        user_name: String::new(),
        principal: String::new(),
        auth_type: String::new(),
        max_inactive: -1,
        expires: -1,
        encoded: String::new(),
    };

    /// Creates a token with no expiry.
    ///
    /// Each field must be non-empty and must not contain `&`.
    pub fn new(
        user_name: impl Into<String>,
        principal: impl Into<String>,
        auth_type: impl Into<String>,
    ) -> Result<Self> {
        let user_name = check_attribute(user_name.into(), "userName")?;
        let principal = check_attribute(principal.into(), "principal")?;
        let auth_type = check_attribute(auth_type.into(), "type")?;
        let mut token = AuthenticationToken {
            user_name,
            principal,
            auth_type,
            max_inactive: -1,
            expires: -1,
            encoded: String::new(),
        };
        token.generate();
        Ok(token)
    }

    /// Decodes a token from its text form.
    ///
    /// One surrounding pair of double quotes is stripped. Unknown attributes,
    /// including a trailing signature `s`, are ignored.
    pub fn parse(token_str: &str) -> Result<Self> {
        let token_str = strip_quotes(token_str);
        let map = split(token_str)?;
        if !REQUIRED.iter().all(|k| map.contains_key(k)) {
            return Err(error::decode("Invalid token string, missing attributes"));
        }
        let expires = parse_millis(map[EXPIRES], EXPIRES)?;
        let mut token = AuthenticationToken::new(map[USER_NAME], map[PRINCIPAL], map[TYPE])?;
        if let Some(max_inactive) = map.get(MAX_INACTIVES) {
            token.max_inactive = parse_millis(max_inactive, MAX_INACTIVES)?;
        }
        token.expires = expires;
        token.generate();
        Ok(token)
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// The full identity, e.g. `bob@EXAMPLE.COM` for Kerberos.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// The scheme that produced this token.
    pub fn auth_type(&self) -> &str {
        &self.auth_type
    }

    /// Absolute inactivity deadline in epoch millis, `-1` when unset.
    pub fn max_inactive(&self) -> i64 {
        self.max_inactive
    }

    /// Absolute expiry in epoch millis, `-1` for never.
    pub fn expires(&self) -> i64 {
        self.expires
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_name.is_empty()
    }

    pub fn set_expires(&mut self, expires: i64) {
        if !self.is_anonymous() {
            self.expires = expires;
            self.generate();
        }
    }

    pub fn set_max_inactive(&mut self, max_inactive: i64) {
        if !self.is_anonymous() {
            self.max_inactive = max_inactive;
            self.generate();
        }
    }

    /// Returns the cached text form.
    pub fn encode(&self) -> &str {
        &self.encoded
    }

    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        (self.max_inactive != -1 && now_millis > self.max_inactive)
            || (self.expires != -1 && now_millis > self.expires)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemClock.now_millis())
    }

    fn generate(&mut self) {
        let mut s = format!(
            "{USER_NAME}={}&{PRINCIPAL}={}&{TYPE}={}&",
            self.user_name, self.principal, self.auth_type
        );
        if self.max_inactive != -1 {
            s.push_str(&format!("{MAX_INACTIVES}={}&", self.max_inactive));
        }
        s.push_str(&format!("{EXPIRES}={}", self.expires));
        self.encoded = s;
    }
}

impl fmt::Display for AuthenticationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl fmt::Debug for AuthenticationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            return f.write_str("AuthenticationToken(ANONYMOUS)");
        }
        f.debug_struct("AuthenticationToken")
            .field("user_name", &self.user_name)
            .field("principal", &self.principal)
            .field("type", &self.auth_type)
            .field("max_inactive", &self.max_inactive)
            .field("expires", &self.expires)
            .finish()
    }
}

fn check_attribute(value: String, name: &str) -> Result<String> {
    if value.is_empty() || value.contains(ATTR_SEPARATOR) {
        return Err(error::decode(format!(
            "{name} is empty or contains a '{ATTR_SEPARATOR}'"
        )));
    }
    Ok(value)
}

pub(crate) fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn split(token_str: &str) -> Result<HashMap<&str, &str>> {
    let mut map = HashMap::new();
    for part in token_str.split(ATTR_SEPARATOR).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| error::decode("Invalid authentication token"))?;
        map.insert(key, value);
    }
    Ok(map)
}

fn parse_millis(value: &str, key: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|_| error::decode(format!("Invalid value for '{key}' attribute: {value}")))
}
