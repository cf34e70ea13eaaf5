// src/auth/pseudo.rs

use async_trait::async_trait;
use url::Url;

use super::{extract_token, probe, ClientAuthenticator, SessionToken, Transport};
use crate::server::pseudo::USER_NAME;
use crate::Result;

/// Claims a user name through the `user.name` query parameter.
#[derive(Debug, Clone, Default)]
pub struct PseudoClientAuthenticator {
    user_name: Option<String>,
}

impl PseudoClientAuthenticator {
    /// Uses the `USER` environment variable. Without it the request goes
    /// out with no user name and the server decides on anonymous access.
    pub fn new() -> Self {
        PseudoClientAuthenticator {
            user_name: std::env::var("USER").ok().filter(|u| !u.is_empty()),
        }
    }

    pub fn with_user_name(user_name: impl Into<String>) -> Self {
        PseudoClientAuthenticator {
            user_name: Some(user_name.into()),
        }
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }
}

#[async_trait]
impl ClientAuthenticator for PseudoClientAuthenticator {
    async fn authenticate(
        &self,
        url: &Url,
        token: &SessionToken,
        transport: &dyn Transport,
    ) -> Result<()> {
        let mut url = url.clone();
        if let Some(user_name) = &self.user_name {
            url.query_pairs_mut().append_pair(USER_NAME, user_name);
        }
        let response = probe(transport, &url, token, None).await?;
        extract_token(&url, &response, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{response, Scripted};
    use http::{Method, StatusCode};

    #[tokio::test]
    async fn test_appends_user_name() {
        let transport = Scripted::new(vec![response(
            StatusCode::OK,
            &[("set-cookie", "auth=\"u=alice&p=alice&t=simple&e=1&s=sig\"")],
        )]);
        let token = SessionToken::new();
        let url = Url::parse("http://localhost:8080/data?op=LIST").unwrap();
        PseudoClientAuthenticator::with_user_name("alice b")
            .authenticate(&url, &token, &transport)
            .await
            .unwrap();

        let sent = transport.request(0);
        assert_eq!(sent.method(), Method::OPTIONS);
        assert_eq!(sent.uri(), "http://localhost:8080/data?op=LIST&user.name=alice+b");
        assert!(token.value().unwrap().starts_with("u=alice&"));
    }

    #[tokio::test]
    async fn test_forbidden_clears_token() {
        let transport = Scripted::new(vec![response(StatusCode::FORBIDDEN, &[])]);
        let token = SessionToken::from_value("u=old");
        let err = PseudoClientAuthenticator::with_user_name("bob")
            .authenticate(&Url::parse("http://localhost/").unwrap(), &token, &transport)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert!(!token.is_set());
    }
}
