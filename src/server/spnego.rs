// src/server/spnego.rs

//! SPNEGO (`Negotiate`) authentication against a keytab.
//!
//! The GSS library itself sits behind [`GssAcceptor`]. Each request is one
//! self-contained accept step; no negotiation state is kept between
//! requests.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use http::header::{HeaderValue, WWW_AUTHENTICATE};
use http::request::Parts;
use http::HeaderMap;

use super::{authorization, strip_scheme, AuthOutcome, AuthenticationHandler, Challenge, NEGOTIATE};
use crate::config::Properties;
use crate::error;
use crate::krb::{self, KerberosName, NameRules};
use crate::token::AuthenticationToken;
use crate::Result;

pub const TYPE: &str = "kerberos";
/// Service principal, or `*` for every `HTTP/*` principal in the keytab.
pub const PRINCIPAL: &str = "kerberos.principal";
pub const KEYTAB: &str = "kerberos.keytab";
pub const NAME_RULES: &str = "kerberos.name.rules";
/// `hadoop` or `mit`.
pub const RULE_MECHANISM: &str = "kerberos.name.rules.mechanism";
/// Comma or newline separated paths served without authentication.
pub const ENDPOINT_WHITELIST: &str = "kerberos.endpoint.whitelist";

/// A keytab entry the acceptor may use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerCredential {
    principal: String,
    keytab: PathBuf,
}

impl ServerCredential {
    pub fn new(principal: impl Into<String>, keytab: impl Into<PathBuf>) -> Self {
        ServerCredential {
            principal: principal.into(),
            keytab: keytab.into(),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn keytab(&self) -> &Path {
        &self.keytab
    }

    /// Whether a ticket for `requested` can be accepted with this
    /// credential. A configured principal without a realm matches any
    /// realm.
    fn accepts(&self, requested: &str) -> bool {
        if self.principal.contains('@') {
            self.principal == requested
        } else {
            requested.split('@').next() == Some(self.principal.as_str())
        }
    }
}

/// The result of feeding one client token to a fresh GSS context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptStep {
    /// More round trips are needed; send the token back to the client.
    Continue(Vec<u8>),
    Established {
        client_principal: String,
        output_token: Option<Vec<u8>>,
    },
}

/// Server-side GSS primitives.
pub trait GssAcceptor: Send + Sync {
    /// Accepts `token` with a new security context bound to `credential`.
    fn accept(
        &self,
        credential: &ServerCredential,
        token: &[u8],
    ) -> std::result::Result<AcceptStep, Box<dyn StdError + Send + Sync>>;

    /// Lists the principals stored in `keytab`.
    fn keytab_principals(
        &self,
        keytab: &Path,
    ) -> std::result::Result<Vec<String>, Box<dyn StdError + Send + Sync>>;
}

/// Authenticates `Negotiate` requests.
pub struct SpnegoHandler {
    auth_type: String,
    credentials: Vec<ServerCredential>,
    rules: NameRules,
    whitelist: HashSet<String>,
    acceptor: Arc<dyn GssAcceptor>,
}

impl SpnegoHandler {
    /// Serves `principal` from `keytab`. A principal of `*` selects every
    /// `HTTP/*` entry of the keytab.
    pub fn new(
        acceptor: Arc<dyn GssAcceptor>,
        principal: &str,
        keytab: impl Into<PathBuf>,
    ) -> Result<Self> {
        let keytab = keytab.into();
        if !keytab.exists() {
            return Err(error::configuration(format!(
                "Keytab does not exist: {}",
                keytab.display()
            )));
        }
        let principals = if principal.trim() == "*" {
            let found: Vec<String> = acceptor
                .keytab_principals(&keytab)
                .map_err(error::configuration)?
                .into_iter()
                .filter(|p| p.starts_with("HTTP/"))
                .collect();
            if found.is_empty() {
                return Err(error::configuration(format!(
                    "No HTTP principals exist in the keytab {}",
                    keytab.display()
                )));
            }
            found
        } else {
            vec![principal.trim().to_owned()]
        };

        let credentials: Vec<ServerCredential> = principals
            .into_iter()
            .map(|p| {
                log::info!("Using keytab {}, for principal {p}", keytab.display());
                ServerCredential::new(p, keytab.clone())
            })
            .collect();

        let mut handler = SpnegoHandler {
            auth_type: TYPE.to_owned(),
            credentials,
            rules: NameRules::default(),
            whitelist: HashSet::new(),
            acceptor,
        };
        handler.rules = handler.with_realm_fallback(NameRules::default());
        Ok(handler)
    }

    pub fn from_properties(props: &Properties, acceptor: Arc<dyn GssAcceptor>) -> Result<Self> {
        let principal = props
            .require(PRINCIPAL)
            .map_err(|_| error::configuration("Principal not defined in configuration"))?;
        let keytab = props
            .require(KEYTAB)
            .map_err(|_| error::configuration("Keytab not defined in configuration"))?;
        let mut handler = Self::new(acceptor, principal, keytab)?;

        let mut rules = match props.get(NAME_RULES) {
            Some(rules) => NameRules::parse(rules)?,
            None => NameRules::default(),
        };
        if let Some(mechanism) = props.get(RULE_MECHANISM) {
            rules = rules.with_mechanism(mechanism.trim().parse()?);
        }
        handler = handler.with_name_rules(rules);

        if let Some(whitelist) = props.get(ENDPOINT_WHITELIST) {
            handler = handler.with_whitelist(whitelist)?;
        }
        Ok(handler)
    }

    /// Replaces the short-name rules. Without a default realm of their
    /// own, the realm of the first server principal is used.
    pub fn with_name_rules(mut self, rules: NameRules) -> Self {
        self.rules = self.with_realm_fallback(rules);
        self
    }

    /// Adds paths that skip authentication, separated by commas or
    /// newlines. Each must be `/` followed by word characters.
    pub fn with_whitelist(mut self, whitelist: &str) -> Result<Self> {
        for endpoint in whitelist.split([',', '\n']).map(str::trim) {
            if endpoint.is_empty() {
                continue;
            }
            let valid = endpoint
                .strip_prefix('/')
                .map_or(false, |rest| {
                    !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
                });
            if !valid {
                return Err(error::configuration(format!(
                    "The element of the whitelist: {endpoint} must start with '/' \
                     and must not contain special characters afterwards"
                )));
            }
            self.whitelist.insert(endpoint.to_owned());
        }
        Ok(self)
    }

    pub fn credentials(&self) -> &[ServerCredential] {
        &self.credentials
    }

    fn with_realm_fallback(&self, rules: NameRules) -> NameRules {
        if rules.default_realm().is_some() {
            return rules;
        }
        let realm = self
            .credentials
            .first()
            .and_then(|c| KerberosName::parse(&c.principal).ok())
            .and_then(|n| n.realm().map(str::to_owned));
        match realm {
            Some(realm) => rules.with_default_realm(realm),
            None => rules,
        }
    }

    fn credential_for(&self, server_principal: &str) -> Result<&ServerCredential> {
        if !server_principal.starts_with("HTTP/") {
            return Err(error::negotiate(format!(
                "Invalid server principal {server_principal} decoded from the client request"
            )));
        }
        self.credentials
            .iter()
            .find(|c| c.accepts(server_principal))
            .ok_or_else(|| {
                error::negotiate(format!(
                    "Server principal {server_principal} is not served by this endpoint"
                ))
            })
    }
}

#[async_trait]
impl AuthenticationHandler for SpnegoHandler {
    fn auth_type(&self) -> &str {
        &self.auth_type
    }

    async fn authenticate(&self, request: &Parts) -> Result<AuthOutcome> {
        let path = request.uri.path();
        if self.whitelist.contains(path) {
            return Ok(AuthOutcome::authenticated(AuthenticationToken::ANONYMOUS));
        }

        let encoded = match authorization(request) {
            None => {
                log::trace!("SPNEGO starting for url: {path}");
                return Ok(Challenge::unauthorized(NEGOTIATE).into());
            }
            Some(value) => match strip_scheme(NEGOTIATE, value) {
                Some(encoded) => encoded,
                None => {
                    log::warn!("'Authorization' does not start with '{NEGOTIATE}'");
                    return Ok(Challenge::unauthorized(NEGOTIATE).into());
                }
            },
        };

        let client_token = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(error::negotiate)?;
        let server_principal = krb::token_server_name(&client_token)?;
        let credential = self.credential_for(&server_principal)?;
        log::trace!("SPNEGO initiated with server principal [{server_principal}]");

        match self.acceptor.accept(credential, &client_token).map_err(error::negotiate)? {
            AcceptStep::Continue(output) => {
                log::trace!("SPNEGO in progress");
                let value = if output.is_empty() {
                    HeaderValue::from_static(NEGOTIATE)
                } else {
                    negotiate_header(&output)?
                };
                Ok(Challenge::new(http::StatusCode::UNAUTHORIZED)
                    .with_header(WWW_AUTHENTICATE, value)
                    .into())
            }
            AcceptStep::Established {
                client_principal,
                output_token,
            } => {
                let name = KerberosName::parse(&client_principal)?;
                let user_name = self.rules.short_name(&name)?;
                let token = AuthenticationToken::new(
                    user_name,
                    client_principal.as_str(),
                    self.auth_type.as_str(),
                )?;
                let mut headers = HeaderMap::new();
                if let Some(output) = output_token.filter(|t| !t.is_empty()) {
                    headers.insert(WWW_AUTHENTICATE, negotiate_header(&output)?);
                }
                log::trace!("SPNEGO completed for client principal [{client_principal}]");
                Ok(AuthOutcome::Authenticated { token, headers })
            }
        }
    }
}

impl fmt::Debug for SpnegoHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpnegoHandler")
            .field("type", &self.auth_type)
            .field("credentials", &self.credentials)
            .field("rules", &self.rules)
            .field("whitelist", &self.whitelist)
            .finish()
    }
}

fn negotiate_header(token: &[u8]) -> Result<HeaderValue> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(token);
    HeaderValue::from_str(&format!("{NEGOTIATE} {encoded}"))
        .map_err(|_| error::negotiate("Invalid WWW-Authenticate header"))
}
