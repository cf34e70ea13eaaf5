// src/auth/negotiate.rs

//! HTTP Negotiate (SPNEGO) client sequence with fallback.
//!
//! Implements the client side of RFC 4559: probe the endpoint, and if it
//! answers with a `Negotiate` challenge, exchange GSS tokens until the
//! context is established and the server has issued its cookie.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use url::Url;

use super::gss::Initiator;
use super::{
    extract_token, probe, ClientAuthenticator, PseudoClientAuthenticator, SessionToken, Transport,
};
use crate::server::NEGOTIATE;
use crate::token::AuthenticationToken;
use crate::{error, Result};

const MAX_ROUNDTRIPS: usize = 5;

/// Token types that mean the server already authenticated us with Kerberos.
const KERBEROS_TYPES: [&str; 2] = ["kerberos", "kerberos-dt"];

/// Derive the Service Principal Name (SPN) from a URL.
///
/// For HTTP authentication, the SPN format is "HTTP/<hostname>", with the
/// host lowercased.
///
/// # Examples
/// ```ignore
/// assert_eq!(derive_spn("http://Example.com/path"), Ok("HTTP/example.com"));
/// assert_eq!(derive_spn("https://server.corp.com:8080/"), Ok("HTTP/server.corp.com"));
/// ```
pub(crate) fn derive_spn(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| error::negotiate("URL has no host for SPN"))?;

    Ok(format!("HTTP/{}", host.to_lowercase()))
}

/// Parse the `Negotiate` challenge out of `WWW-Authenticate`.
///
/// Returns `Some(None)` for a bare "Negotiate", `Some(Some(token))` for
/// "Negotiate <token>", and `None` when no Negotiate challenge is present.
fn parse_www_authenticate(headers: &HeaderMap) -> Option<Option<Vec<u8>>> {
    let mut negotiate_token = None;

    for value in headers.get_all(WWW_AUTHENTICATE) {
        if let Ok(value_str) = value.to_str() {
            let trimmed = value_str.trim();

            if trimmed.eq_ignore_ascii_case(NEGOTIATE) {
                negotiate_token = Some(None);
            } else if trimmed.to_lowercase().starts_with("negotiate ") {
                // Extract base64 token
                let token_str = trimmed[NEGOTIATE.len()..].trim();
                if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(token_str) {
                    negotiate_token = Some(Some(decoded));
                }
            }
        }
    }

    negotiate_token
}

/// Authenticates with SPNEGO, falling back to another authenticator when
/// the endpoint does not ask for `Negotiate`.
#[derive(Clone)]
pub struct SpnegoClientAuthenticator {
    initiator: Arc<dyn Initiator>,
    fallback: Arc<dyn ClientAuthenticator>,
}

impl SpnegoClientAuthenticator {
    /// Falls back to [`PseudoClientAuthenticator::new`].
    pub fn new(initiator: Arc<dyn Initiator>) -> Self {
        SpnegoClientAuthenticator {
            initiator,
            fallback: Arc::new(PseudoClientAuthenticator::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ClientAuthenticator>) -> Self {
        self.fallback = fallback;
        self
    }

    async fn run(&self, url: &Url, token: &SessionToken, transport: &dyn Transport) -> Result<()> {
        let response = probe(transport, url, token, None).await?;

        let mut need_fallback = false;
        if response.status() == StatusCode::OK {
            log::debug!("endpoint authenticated the probe on our behalf");
            extract_token(url, &response, token)?;
            if is_token_kerberos(token)? {
                return Ok(());
            }
            need_fallback = true;
        }

        let is_negotiate = response.status() == StatusCode::UNAUTHORIZED
            && parse_www_authenticate(response.headers()).is_some();
        if !need_fallback && is_negotiate {
            log::debug!("Performing our own SPNEGO sequence.");
            self.spnego_sequence(url, token, transport, response).await
        } else {
            log::debug!("Using fallback authenticator sequence.");
            self.fallback.authenticate(url, token, transport).await
        }
    }

    async fn spnego_sequence(
        &self,
        url: &Url,
        token: &SessionToken,
        transport: &dyn Transport,
        mut last: Response<Bytes>,
    ) -> Result<()> {
        let spn = derive_spn(url)?;
        let mut ctx = self.initiator.context(&spn).map_err(|e| {
            error::negotiate(format!("could not create a security context for {spn}: {e}"))
        })?;

        let mut input_token = Vec::new();
        for round in 0..MAX_ROUNDTRIPS {
            let (output_token, is_complete) = ctx
                .initialize(&input_token)
                .map_err(|e| error::negotiate(format!("InitializeContext failed: {e}")))?;

            if !output_token.is_empty() {
                let token_base64 = base64::engine::general_purpose::STANDARD.encode(&output_token);
                let authorization = HeaderValue::from_str(&format!("{NEGOTIATE} {token_base64}"))
                    .map_err(|_| error::negotiate("Invalid authorization header"))?;
                last = probe(transport, url, token, Some(authorization)).await?;
            }

            if is_complete {
                log::debug!("SPNEGO context established after {} round(s)", round + 1);
                // the last response still decides the outcome
                return extract_token(url, &last, token);
            }

            input_token = read_token(last.status(), last.headers())?;
        }

        Err(error::negotiate("Too many authentication round-trips"))
    }
}

#[async_trait]
impl ClientAuthenticator for SpnegoClientAuthenticator {
    async fn authenticate(
        &self,
        url: &Url,
        token: &SessionToken,
        transport: &dyn Transport,
    ) -> Result<()> {
        if token.is_set() {
            return Ok(());
        }
        self.run(url, token, transport)
            .await
            .map_err(|e| e.with_url(url.clone()))
    }
}

impl std::fmt::Debug for SpnegoClientAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpnegoClientAuthenticator").finish_non_exhaustive()
    }
}

/// Reads the server's next token from a `200` or `401` response.
fn read_token(status: StatusCode, headers: &HeaderMap) -> Result<Vec<u8>> {
    if status != StatusCode::OK && status != StatusCode::UNAUTHORIZED {
        return Err(error::negotiate(format!(
            "Invalid SPNEGO sequence, status code: {}",
            status.as_u16()
        )));
    }
    match parse_www_authenticate(headers) {
        Some(Some(server_token)) => Ok(server_token),
        _ => Err(error::negotiate(
            "Invalid SPNEGO sequence, 'WWW-Authenticate' header incorrect",
        )),
    }
}

fn is_token_kerberos(token: &SessionToken) -> Result<bool> {
    match token.value() {
        Some(value) => {
            let parsed = AuthenticationToken::parse(&value)?;
            Ok(KERBEROS_TYPES.contains(&parsed.auth_type()))
        }
        None => Ok(false),
    }
}
