// src/auth/client.rs

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response};
use url::Url;

use super::{extract_token, inject_token, ClientAuthenticator, SessionToken, Transport};
use crate::{error, Result};

/// Opens authenticated connections and keeps the session cookie current.
///
/// [`open`](CookieTokenClient::open) runs the authenticator only while the
/// token is unset or expired; [`execute`](CookieTokenClient::execute) sends
/// ordinary requests with the cookie and picks up any refreshed one.
#[derive(Clone)]
pub struct CookieTokenClient {
    authenticator: Arc<dyn ClientAuthenticator>,
    transport: Arc<dyn Transport>,
}

impl CookieTokenClient {
    pub fn new(authenticator: Arc<dyn ClientAuthenticator>, transport: Arc<dyn Transport>) -> Self {
        CookieTokenClient {
            authenticator,
            transport,
        }
    }

    /// Authenticates against `url` unless `token` already holds a cookie.
    pub async fn open(&self, url: &Url, token: &SessionToken) -> Result<()> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(error::request(format!("URL must be for HTTP/HTTPS, got {other}"))
                    .with_url(url.clone()))
            }
        }
        if token.is_set() {
            return Ok(());
        }
        log::debug!("authenticating against {url}");
        self.authenticator
            .authenticate(url, token, self.transport.as_ref())
            .await
    }

    /// Sends `request` with the session cookie. A non-2xx answer clears
    /// the token and is returned as an error.
    pub async fn execute(
        &self,
        mut request: Request<Bytes>,
        token: &SessionToken,
    ) -> Result<Response<Bytes>> {
        let url = Url::parse(&request.uri().to_string()).map_err(error::request)?;
        inject_token(&mut request, token);
        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| error::request(e).with_url(url.clone()))?;
        extract_token(&url, &response, token)?;
        Ok(response)
    }
}

impl fmt::Debug for CookieTokenClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieTokenClient").finish_non_exhaustive()
    }
}
