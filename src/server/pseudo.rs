// src/server/pseudo.rs

//! Trusts the `user.name` query parameter.

use async_trait::async_trait;
use http::header::{HeaderValue, WWW_AUTHENTICATE};
use http::request::Parts;
use http::StatusCode;

use super::{AuthOutcome, AuthenticationHandler, Challenge};
use crate::config::Properties;
use crate::token::AuthenticationToken;
use crate::Result;

pub const TYPE: &str = "simple";
/// Whether requests without `user.name` proceed anonymously.
pub const ANONYMOUS_ALLOWED: &str = "simple.anonymous.allowed";
/// The query parameter carrying the user name.
pub const USER_NAME: &str = "user.name";

const PSEUDO_AUTH: &str = "PseudoAuth";

/// Accepts whatever user the client claims to be.
#[derive(Debug, Clone)]
pub struct PseudoHandler {
    auth_type: String,
    anonymous_allowed: bool,
}

impl PseudoHandler {
    pub fn new(anonymous_allowed: bool) -> Self {
        PseudoHandler {
            auth_type: TYPE.to_owned(),
            anonymous_allowed,
        }
    }

    /// Uses a custom token type instead of `simple`.
    pub fn with_type(mut self, auth_type: impl Into<String>) -> Self {
        self.auth_type = auth_type.into();
        self
    }

    pub fn from_properties(props: &Properties) -> Result<Self> {
        Ok(Self::new(props.get_bool(ANONYMOUS_ALLOWED, false)?))
    }

    pub fn anonymous_allowed(&self) -> bool {
        self.anonymous_allowed
    }
}

#[async_trait]
impl AuthenticationHandler for PseudoHandler {
    fn auth_type(&self) -> &str {
        &self.auth_type
    }

    async fn authenticate(&self, request: &Parts) -> Result<AuthOutcome> {
        match user_name(request) {
            Some(name) => Ok(AuthOutcome::authenticated(AuthenticationToken::new(
                name.as_str(),
                name.as_str(),
                self.auth_type.as_str(),
            )?)),
            None if self.anonymous_allowed => {
                Ok(AuthOutcome::authenticated(AuthenticationToken::ANONYMOUS))
            }
            None => Ok(Challenge::new(StatusCode::FORBIDDEN)
                .with_header(WWW_AUTHENTICATE, HeaderValue::from_static(PSEUDO_AUTH))
                .into()),
        }
    }
}

fn user_name(request: &Parts) -> Option<String> {
    let query = request.uri.query().filter(|q| !q.is_empty())?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == USER_NAME)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::request;

    #[tokio::test]
    async fn test_anonymous_disallowed_is_forbidden() {
        let handler = PseudoHandler::new(false);
        let outcome = handler.authenticate(&request("/", None)).await.unwrap();
        let challenge = outcome.challenge().unwrap();
        assert_eq!(challenge.status(), StatusCode::FORBIDDEN);
        assert_eq!(challenge.headers()[WWW_AUTHENTICATE], "PseudoAuth");
    }

    #[tokio::test]
    async fn test_anonymous_allowed() {
        let handler = PseudoHandler::new(true);
        let outcome = handler.authenticate(&request("/?foo=bar", None)).await.unwrap();
        assert!(outcome.token().unwrap().is_anonymous());
    }

    #[tokio::test]
    async fn test_user_name_from_query() {
        let handler = PseudoHandler::new(false);
        let outcome = handler
            .authenticate(&request("/data?op=LIST&user.name=alice%20b", None))
            .await
            .unwrap();
        let token = outcome.token().unwrap();
        assert_eq!(token.user_name(), "alice b");
        assert_eq!(token.principal(), "alice b");
        assert_eq!(token.auth_type(), "simple");
    }

    #[tokio::test]
    async fn test_custom_type() {
        let handler = PseudoHandler::new(false).with_type("delegated");
        let outcome = handler.authenticate(&request("/?user.name=bob", None)).await.unwrap();
        assert_eq!(outcome.token().unwrap().auth_type(), "delegated");
    }

    #[test]
    fn test_from_properties() {
        let props = Properties::new().with(ANONYMOUS_ALLOWED, "true");
        assert!(PseudoHandler::from_properties(&props).unwrap().anonymous_allowed());
        assert!(!PseudoHandler::from_properties(&Properties::new())
            .unwrap()
            .anonymous_allowed());
    }
}
