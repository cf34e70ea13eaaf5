// src/server/mod.rs

//! Server-side authentication.
//!
//! An [`AuthenticationHandler`] looks at a request head and either
//! produces an [`AuthenticationToken`] or a [`Challenge`] to send back.
//! The [`AuthenticationFilter`] wraps a handler with signed cookie
//! issuance and verification so a client authenticates once per token
//! validity period.

use std::fmt;

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use http::request::Parts;
use http::{HeaderMap, StatusCode};

use crate::error;
use crate::token::AuthenticationToken;
use crate::Result;

pub mod directory;
pub mod filter;
pub mod multi;
pub mod pseudo;
mod registry;
pub mod spnego;

pub use self::directory::{BindRequest, BindTransport, DirectoryBindHandler, DirectoryBinder};
#[cfg(feature = "tower")]
pub use self::filter::{AuthenticationLayer, AuthenticationService};
pub use self::filter::{AuthenticationFilter, FilterConfig, FilterDecision};
pub use self::multi::MultiSchemeDispatcher;
pub use self::pseudo::PseudoHandler;
pub use self::registry::{Collaborators, HandlerFactory, HandlerRegistry};
pub use self::spnego::{AcceptStep, GssAcceptor, ServerCredential, SpnegoHandler};

pub const BASIC: &str = "Basic";
pub const NEGOTIATE: &str = "Negotiate";
pub const DIGEST: &str = "Digest";

/// What a handler decided about one request.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// The request is authenticated. `headers` are added to the response,
    /// e.g. a final mutual-authentication token.
    Authenticated {
        token: AuthenticationToken,
        headers: HeaderMap,
    },
    /// The client must retry with credentials.
    Challenge(Challenge),
}

impl AuthOutcome {
    pub fn authenticated(token: AuthenticationToken) -> Self {
        AuthOutcome::Authenticated {
            token,
            headers: HeaderMap::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated { .. })
    }

    pub fn token(&self) -> Option<&AuthenticationToken> {
        match self {
            AuthOutcome::Authenticated { token, .. } => Some(token),
            AuthOutcome::Challenge(_) => None,
        }
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        match self {
            AuthOutcome::Authenticated { .. } => None,
            AuthOutcome::Challenge(challenge) => Some(challenge),
        }
    }
}

impl From<Challenge> for AuthOutcome {
    fn from(challenge: Challenge) -> Self {
        AuthOutcome::Challenge(challenge)
    }
}

/// A response status plus the headers telling the client how to
/// authenticate.
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    status: StatusCode,
    headers: HeaderMap,
}

impl Challenge {
    pub fn new(status: StatusCode) -> Self {
        Challenge {
            status,
            headers: HeaderMap::new(),
        }
    }

    /// `401` with `WWW-Authenticate: <scheme>`.
    pub fn unauthorized(scheme: &'static str) -> Self {
        Challenge::new(StatusCode::UNAUTHORIZED)
            .with_header(WWW_AUTHENTICATE, HeaderValue::from_static(scheme))
    }

    /// Appends a header; repeated names are kept.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub(crate) fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Builds the response carrying this challenge.
    pub fn into_response<B: Default>(self) -> http::Response<B> {
        let mut response = http::Response::new(B::default());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// One authentication scheme on the server side.
#[async_trait]
pub trait AuthenticationHandler: Send + Sync {
    /// The type name tokens from this handler carry.
    fn auth_type(&self) -> &str;

    /// Token types a cookie may carry to be accepted in front of this
    /// handler.
    fn token_types(&self) -> Vec<String> {
        vec![self.auth_type().to_owned()]
    }

    async fn authenticate(&self, request: &Parts) -> Result<AuthOutcome>;

    /// Releases resources held by the handler.
    fn close(&self) {}
}

impl fmt::Debug for dyn AuthenticationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationHandler")
            .field("type", &self.auth_type())
            .finish()
    }
}

/// Returns the canonical spelling of a supported HTTP authentication
/// scheme.
pub fn check_auth_scheme(scheme: &str) -> Result<&'static str> {
    [BASIC, NEGOTIATE, DIGEST]
        .into_iter()
        .find(|s| s.eq_ignore_ascii_case(scheme.trim()))
        .ok_or_else(|| {
            error::configuration(format!(
                "Unsupported HTTP authentication scheme {scheme} . \
                 Supported schemes are [{BASIC}, {NEGOTIATE}, {DIGEST}]"
            ))
        })
}

/// Whether the `Authorization` value uses `scheme`, ignoring case and
/// surrounding whitespace.
pub fn match_auth_scheme(scheme: &str, authorization: &str) -> bool {
    let scheme = scheme.trim().as_bytes();
    let authorization = authorization.trim().as_bytes();
    authorization.len() >= scheme.len()
        && authorization[..scheme.len()].eq_ignore_ascii_case(scheme)
}

/// The `Authorization` header as text, if present and readable.
pub(crate) fn authorization(request: &Parts) -> Option<&str> {
    request
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Strips a `<scheme> ` prefix (case-insensitive) from `authorization`.
pub(crate) fn strip_scheme<'a>(scheme: &str, authorization: &'a str) -> Option<&'a str> {
    let authorization = authorization.trim_start();
    if match_auth_scheme(scheme, authorization) {
        Some(authorization[scheme.len()..].trim())
    } else {
        None
    }
}
