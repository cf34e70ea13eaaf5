// src/server/directory.rs

//! HTTP Basic credentials checked by binding to a directory server.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use http::request::Parts;

use super::{authorization, strip_scheme, AuthOutcome, AuthenticationHandler, Challenge, BASIC};
use crate::config::Properties;
use crate::error;
use crate::token::AuthenticationToken;
use crate::Result;

pub const TYPE: &str = "ldap";
/// `ldap://` or `ldaps://` URL of the directory server.
pub const PROVIDER_URL: &str = "ldap.providerurl";
/// Bind DNs become `uid=<user>,<basedn>`. Exclusive with [`BIND_DOMAIN`].
pub const BASE_DN: &str = "ldap.basedn";
/// Appended as `@<domain>` to bare user names. Exclusive with [`BASE_DN`].
pub const BIND_DOMAIN: &str = "ldap.binddomain";
pub const ENABLE_START_TLS: &str = "ldap.enablestarttls";
pub const DISABLE_HOSTNAME_VERIFICATION: &str = "ldap.disablehostnameverification";

/// How the bind connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindTransport {
    /// As given by the provider URL scheme (`ldap` or `ldaps`).
    Plain,
    /// Upgrade a plain connection with the StartTLS extended operation.
    StartTls,
}

/// One simple bind attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub provider_url: String,
    pub bind_dn: String,
    pub password: String,
    pub transport: BindTransport,
    /// Only meaningful with [`BindTransport::StartTls`].
    pub disable_hostname_verification: bool,
}

impl fmt::Debug for BindRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindRequest")
            .field("provider_url", &self.provider_url)
            .field("bind_dn", &self.bind_dn)
            .field("transport", &self.transport)
            .field("disable_hostname_verification", &self.disable_hostname_verification)
            .finish_non_exhaustive()
    }
}

/// Performs the directory bind. Success means the password is valid.
#[async_trait]
pub trait DirectoryBinder: Send + Sync {
    async fn bind(
        &self,
        request: &BindRequest,
    ) -> std::result::Result<(), Box<dyn StdError + Send + Sync>>;
}

/// Authenticates `Basic` credentials against a directory.
pub struct DirectoryBindHandler {
    provider_url: String,
    base_dn: Option<String>,
    bind_domain: Option<String>,
    transport: BindTransport,
    disable_hostname_verification: bool,
    binder: Arc<dyn DirectoryBinder>,
}

/// Where bind DNs come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DnSource {
    BaseDn(String),
    Domain(String),
}

impl DirectoryBindHandler {
    fn build(binder: Arc<dyn DirectoryBinder>, provider_url: &str, dn: DnSource) -> Self {
        let (base_dn, bind_domain) = match dn {
            DnSource::BaseDn(dn) => (Some(dn), None),
            DnSource::Domain(domain) => (None, Some(domain)),
        };
        DirectoryBindHandler {
            provider_url: provider_url.to_owned(),
            base_dn,
            bind_domain,
            transport: BindTransport::Plain,
            disable_hostname_verification: false,
            binder,
        }
    }

    /// Binds as `uid=<user>,<base_dn>`.
    pub fn with_base_dn(
        binder: Arc<dyn DirectoryBinder>,
        provider_url: &str,
        base_dn: &str,
    ) -> Self {
        Self::build(binder, provider_url, DnSource::BaseDn(base_dn.to_owned()))
    }

    /// Binds as `<user>@<domain>`, or as given when the user name already
    /// carries a domain.
    pub fn with_domain(binder: Arc<dyn DirectoryBinder>, provider_url: &str, domain: &str) -> Self {
        Self::build(binder, provider_url, DnSource::Domain(domain.to_owned()))
    }

    /// Switches to StartTLS. Fails for an `ldaps://` provider.
    pub fn start_tls(mut self, disable_hostname_verification: bool) -> Result<Self> {
        if self.provider_url.to_ascii_lowercase().starts_with("ldaps") {
            return Err(error::configuration(
                "Can not use ldaps and StartTls option at the same time",
            ));
        }
        self.transport = BindTransport::StartTls;
        self.disable_hostname_verification = disable_hostname_verification;
        Ok(self)
    }

    pub fn from_properties(props: &Properties, binder: Arc<dyn DirectoryBinder>) -> Result<Self> {
        let provider_url = props
            .require(PROVIDER_URL)
            .map_err(|_| error::configuration("The LDAP URI can not be empty"))?;
        let dn = match (props.get(BASE_DN), props.get(BIND_DOMAIN)) {
            (Some(base_dn), None) => DnSource::BaseDn(base_dn.trim().to_owned()),
            (None, Some(domain)) => DnSource::Domain(domain.trim().to_owned()),
            _ => {
                return Err(error::configuration(
                    "Either LDAP base DN or LDAP domain value needs to be specified",
                ))
            }
        };
        let handler = Self::build(binder, provider_url, dn);
        if props.get_bool(ENABLE_START_TLS, false)? {
            handler.start_tls(props.get_bool(DISABLE_HOSTNAME_VERIFICATION, false)?)
        } else {
            Ok(handler)
        }
    }

    pub fn transport(&self) -> BindTransport {
        self.transport
    }

    fn bind_dn(&self, user_name: &str) -> String {
        match &self.base_dn {
            Some(base_dn) => format!("uid={user_name},{base_dn}"),
            None => user_name.to_owned(),
        }
    }

    async fn authenticate_user(
        &self,
        user_name: &str,
        password: &str,
    ) -> Result<AuthenticationToken> {
        if user_name.is_empty() {
            return Err(error::directory_bind(
                "a null or blank username has been provided",
            ));
        }
        let user_name = match &self.bind_domain {
            Some(domain) if !has_domain(user_name) => format!("{user_name}@{domain}"),
            _ => user_name.to_owned(),
        };
        if password.is_empty() || password.as_bytes()[0] == 0 {
            return Err(error::directory_bind(
                "a null or blank password has been provided",
            ));
        }

        let request = BindRequest {
            provider_url: self.provider_url.clone(),
            bind_dn: self.bind_dn(&user_name),
            password: password.to_owned(),
            transport: self.transport,
            disable_hostname_verification: self.disable_hostname_verification,
        };
        if let Err(e) = self.binder.bind(&request).await {
            log::debug!("bind failed for {}: {e}", request.bind_dn);
            return Err(error::directory_bind(format!(
                "bind failed for {}",
                request.bind_dn
            )));
        }
        log::debug!("Authentication successful for {}", request.bind_dn);
        AuthenticationToken::new(user_name.as_str(), user_name.as_str(), TYPE)
    }
}

#[async_trait]
impl AuthenticationHandler for DirectoryBindHandler {
    fn auth_type(&self) -> &str {
        TYPE
    }

    async fn authenticate(&self, request: &Parts) -> Result<AuthOutcome> {
        let encoded = match authorization(request) {
            None => {
                log::trace!("Basic auth starting");
                return Ok(Challenge::unauthorized(BASIC).into());
            }
            Some(value) => match strip_scheme(BASIC, value) {
                Some(encoded) => encoded,
                None => {
                    log::warn!("'Authorization' does not start with '{BASIC}'");
                    return Ok(Challenge::unauthorized(BASIC).into());
                }
            },
        };

        let Some((user_name, password)) = decode_basic(encoded) else {
            log::debug!("malformed Basic credentials");
            return Ok(Challenge::unauthorized(BASIC).into());
        };
        let token = self.authenticate_user(&user_name, &password).await?;
        Ok(AuthOutcome::authenticated(token))
    }
}

impl fmt::Debug for DirectoryBindHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryBindHandler")
            .field("provider_url", &self.provider_url)
            .field("base_dn", &self.base_dn)
            .field("bind_domain", &self.bind_domain)
            .field("transport", &self.transport)
            .finish()
    }
}

fn decode_basic(encoded: &str) -> Option<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_owned(), password.to_owned()))
}

/// `user@domain` and `user/host` already carry a domain; a leading
/// separator does not count.
fn has_domain(user_name: &str) -> bool {
    user_name
        .find(['/', '@'])
        .map_or(false, |idx| idx > 0)
}
