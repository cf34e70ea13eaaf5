// src/auth/mod.rs

//! Client-side authentication.
//!
//! A [`ClientAuthenticator`] obtains the server's signed `auth` cookie into a
//! [`SessionToken`]; the [`CookieTokenClient`] then replays that cookie on
//! ordinary requests.

use std::error::Error as StdError;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, AUTHORIZATION, COOKIE};
use http::{Method, Request, Response, StatusCode};
use url::Url;

use crate::error;
use crate::Result;

mod client;
mod cookie;
mod gss;
mod negotiate;
mod pseudo;
#[cfg(feature = "http1-transport")]
mod transport;

pub use self::client::CookieTokenClient;
pub use self::cookie::SessionToken;
pub use self::gss::{Initiator, InitiatorContext};
pub use self::negotiate::SpnegoClientAuthenticator;
pub use self::pseudo::PseudoClientAuthenticator;
#[cfg(feature = "http1-transport")]
pub use self::transport::HyperTransport;

/// Sends one buffered request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: Request<Bytes>,
    ) -> std::result::Result<Response<Bytes>, Box<dyn StdError + Send + Sync>>;
}

/// Runs an authentication sequence against `url`, leaving the result in
/// `token`.
#[async_trait]
pub trait ClientAuthenticator: Send + Sync {
    async fn authenticate(&self, url: &Url, token: &SessionToken, transport: &dyn Transport)
        -> Result<()>;
}

/// Sends an `OPTIONS` probe carrying the current cookie.
pub(crate) async fn probe(
    transport: &dyn Transport,
    url: &Url,
    token: &SessionToken,
    authorization: Option<HeaderValue>,
) -> Result<Response<Bytes>> {
    let mut request = Request::builder()
        .method(Method::OPTIONS)
        .uri(url.as_str())
        .body(Bytes::new())
        .map_err(error::request)?;
    inject_token(&mut request, token);
    if let Some(authorization) = authorization {
        request.headers_mut().insert(AUTHORIZATION, authorization);
    }
    transport.execute(request).await.map_err(error::request)
}

/// Adds the session cookie, if any, to `request`.
pub(crate) fn inject_token<B>(request: &mut Request<B>, token: &SessionToken) {
    if let Some(cookie) = token.cookie_header() {
        request.headers_mut().append(COOKIE, cookie);
    }
}

/// Stores the cookie of a successful response. Any other outcome clears
/// the token and becomes an error.
pub(crate) fn extract_token<B>(
    url: &Url,
    response: &Response<B>,
    token: &SessionToken,
) -> Result<()> {
    let status = response.status();
    match status {
        status if status.is_success() => {
            token.store_from_headers(response.headers());
            Ok(())
        }
        StatusCode::NOT_FOUND => {
            log::trace!("clearing session token, status {status}");
            token.clear();
            Err(error::not_found(url.clone()))
        }
        _ => {
            log::trace!("clearing session token, status {status}");
            token.clear();
            Err(error::status_code(url.clone(), status))
        }
    }
}
