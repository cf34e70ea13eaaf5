// src/server/filter.rs

//! Signed-cookie session in front of an [`AuthenticationHandler`].
//!
//! A request carrying a valid `auth` cookie proceeds without touching the
//! handler. Otherwise the handler runs, and a successful authentication is
//! signed into a new cookie.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cookie_crate::time::{Duration as CookieDuration, OffsetDateTime};
use cookie_crate::Cookie;
use http::header::{HeaderValue, COOKIE, SET_COOKIE, WWW_AUTHENTICATE};
use http::request::Parts;
use http::{HeaderMap, StatusCode};

use super::registry::{Collaborators, HandlerRegistry};
use super::{AuthOutcome, AuthenticationHandler, Challenge};
use crate::clock::{Clock, SystemClock};
use crate::config::Properties;
use crate::error;
use crate::secret::{self, SecretSource, StoreConnector};
use crate::signer::RequestSigner;
use crate::token::{strip_quotes, AuthenticationToken};
use crate::Result;

/// Name of the session cookie.
pub const AUTH_COOKIE: &str = "auth";
/// When set, only keys starting with `<prefix>.` are read, with the prefix
/// removed.
pub const CONFIG_PREFIX: &str = "config.prefix";
/// Handler type name, resolved through the [`HandlerRegistry`].
pub const AUTH_TYPE: &str = "type";
/// Seconds a cookie stays valid.
pub const AUTH_TOKEN_VALIDITY: &str = "token.validity";
/// Seconds a cookie may go unused; `-1` disables the check.
pub const AUTH_TOKEN_MAX_INACTIVE_INTERVAL: &str = "token.max-inactive-interval";
pub const COOKIE_DOMAIN: &str = "cookie.domain";
pub const COOKIE_PATH: &str = "cookie.path";
/// Whether the cookie carries `Expires`/`Max-Age` or lives for the browser
/// session only.
pub const COOKIE_PERSISTENT: &str = "cookie.persistent";

const DEFAULT_VALIDITY_SECS: i64 = 36000;

/// Cookie and token lifetime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    validity: Duration,
    max_inactive: Option<Duration>,
    cookie_domain: Option<String>,
    cookie_path: Option<String>,
    cookie_persistent: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            validity: Duration::from_secs(DEFAULT_VALIDITY_SECS as u64),
            max_inactive: None,
            cookie_domain: None,
            cookie_path: None,
            cookie_persistent: false,
        }
    }
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Tokens unused for longer than `max_inactive` are rejected. Every
    /// accepted request refreshes the deadline.
    pub fn max_inactive(mut self, max_inactive: Option<Duration>) -> Self {
        self.max_inactive = max_inactive;
        self
    }

    pub fn cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.cookie_domain = Some(domain.into());
        self
    }

    pub fn cookie_path(mut self, path: impl Into<String>) -> Self {
        self.cookie_path = Some(path.into());
        self
    }

    pub fn cookie_persistent(mut self, persistent: bool) -> Self {
        self.cookie_persistent = persistent;
        self
    }

    pub fn get_validity(&self) -> Duration {
        self.validity
    }

    pub fn from_properties(props: &Properties) -> Result<Self> {
        let validity = props.get_i64(AUTH_TOKEN_VALIDITY, DEFAULT_VALIDITY_SECS)?;
        if validity <= 0 {
            return Err(error::configuration(format!(
                "{AUTH_TOKEN_VALIDITY} must be positive, got {validity}"
            )));
        }
        let max_inactive = props.get_i64(AUTH_TOKEN_MAX_INACTIVE_INTERVAL, -1)?;
        let mut config = FilterConfig::new()
            .validity(Duration::from_secs(validity as u64))
            .max_inactive((max_inactive > 0).then(|| Duration::from_secs(max_inactive as u64)))
            .cookie_persistent(props.get_bool(COOKIE_PERSISTENT, false)?);
        if let Some(domain) = props.get(COOKIE_DOMAIN) {
            config = config.cookie_domain(domain.trim());
        }
        if let Some(path) = props.get(COOKIE_PATH) {
            config = config.cookie_path(path.trim());
        }
        Ok(config)
    }
}

/// What to do with a request.
#[derive(Debug, Clone)]
pub enum FilterDecision {
    /// Pass the request on. `headers` go on the eventual response and may
    /// include a `Set-Cookie`.
    Proceed {
        token: AuthenticationToken,
        headers: HeaderMap,
    },
    /// Answer right away.
    Respond(Challenge),
}

enum CookieToken {
    Absent,
    Rejected,
    Valid(AuthenticationToken),
}

/// Verifies session cookies and falls back to the handler.
pub struct AuthenticationFilter {
    handler: Arc<dyn AuthenticationHandler>,
    token_types: Vec<String>,
    secrets: Arc<dyn SecretSource>,
    signer: RequestSigner,
    config: FilterConfig,
    clock: Arc<dyn Clock>,
}

impl AuthenticationFilter {
    pub fn new(
        handler: Arc<dyn AuthenticationHandler>,
        secrets: Arc<dyn SecretSource>,
        config: FilterConfig,
    ) -> Self {
        AuthenticationFilter {
            token_types: handler.token_types(),
            handler,
            signer: RequestSigner::new(secrets.clone()),
            secrets,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the handler, secret source and cookie settings from
    /// configuration.
    pub async fn from_properties(
        props: &Properties,
        registry: &HandlerRegistry,
        collaborators: &Collaborators,
        connector: Option<&dyn StoreConnector>,
    ) -> Result<Self> {
        let props = match props.get(CONFIG_PREFIX).map(str::trim) {
            Some(prefix) if !prefix.is_empty() => props.strip_prefix(&format!("{prefix}.")),
            _ => props.clone(),
        };
        let auth_type = props.require(AUTH_TYPE).map_err(|_| {
            error::configuration("Authentication type must be specified: simple|kerberos|<type>")
        })?;
        let handler = registry.create(auth_type, &props, collaborators)?;
        let config = FilterConfig::from_properties(&props)?;
        let secrets = secret::from_properties(&props, config.validity, connector).await?;
        log::info!("authentication filter initialized with {auth_type} handler");
        Ok(Self::new(handler, secrets, config))
    }

    pub fn handler(&self) -> &Arc<dyn AuthenticationHandler> {
        &self.handler
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Decides whether `request` may proceed.
    ///
    /// Handler failures become `403`. Errors are returned only when a
    /// cookie cannot be issued.
    pub async fn check(&self, request: &Parts) -> Result<FilterDecision> {
        let now = self.clock.now_millis();
        let secure = request.uri.scheme() == Some(&http::uri::Scheme::HTTPS);

        let rejected = match self.token_from_cookie(request, now) {
            CookieToken::Valid(mut token) => {
                let mut headers = HeaderMap::new();
                if let Some(max_inactive) = self.config.max_inactive {
                    token.set_max_inactive(now + millis(max_inactive));
                    headers.append(SET_COOKIE, self.auth_cookie(&token, secure, now)?);
                }
                log::debug!("request [{}] user [{}] authenticated", request.uri, token.user_name());
                return Ok(FilterDecision::Proceed { token, headers });
            }
            CookieToken::Rejected => true,
            CookieToken::Absent => false,
        };

        let outcome = match self.handler.authenticate(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Authentication exception: {e}");
                let challenge = Challenge::new(StatusCode::FORBIDDEN);
                return Ok(FilterDecision::Respond(self.clear_if(challenge, rejected, secure)?));
            }
        };

        match outcome {
            AuthOutcome::Authenticated { mut token, mut headers } => {
                if !token.is_anonymous() {
                    token.set_expires(now + millis(self.config.validity));
                    if let Some(max_inactive) = self.config.max_inactive {
                        token.set_max_inactive(now + millis(max_inactive));
                    }
                    headers.append(SET_COOKIE, self.auth_cookie(&token, secure, now)?);
                    log::debug!(
                        "request [{}] user [{}] authenticated",
                        request.uri,
                        token.user_name()
                    );
                }
                Ok(FilterDecision::Proceed { token, headers })
            }
            AuthOutcome::Challenge(mut challenge) => {
                if challenge.status() == StatusCode::UNAUTHORIZED
                    && !challenge.headers().contains_key(WWW_AUTHENTICATE)
                {
                    challenge = challenge.with_status(StatusCode::FORBIDDEN);
                }
                Ok(FilterDecision::Respond(self.clear_if(challenge, rejected, secure)?))
            }
        }
    }

    /// Stops the handler and any secret rotation.
    pub fn close(&self) {
        self.handler.close();
        self.secrets.close();
    }

    fn token_from_cookie(&self, request: &Parts, now: i64) -> CookieToken {
        let Some(value) = auth_cookie_value(&request.headers) else {
            return CookieToken::Absent;
        };
        let token = self
            .signer
            .verify_and_extract(strip_quotes(&value))
            .and_then(|payload| AuthenticationToken::parse(&payload));
        match token {
            Ok(token) if !self.token_types.iter().any(|t| t == token.auth_type()) => {
                log::debug!("AuthenticationToken ignored: invalid type {}", token.auth_type());
                CookieToken::Rejected
            }
            Ok(token) if token.is_expired_at(now) => {
                log::debug!("AuthenticationToken ignored: AuthenticationToken expired");
                CookieToken::Rejected
            }
            Ok(token) => CookieToken::Valid(token),
            Err(e) => {
                log::debug!("AuthenticationToken ignored: {e}");
                CookieToken::Rejected
            }
        }
    }

    fn auth_cookie(
        &self,
        token: &AuthenticationToken,
        secure: bool,
        now: i64,
    ) -> Result<HeaderValue> {
        let signed = self.signer.sign(token.encode())?;
        let mut cookie = Cookie::build((AUTH_COOKIE, format!("\"{signed}\"")))
            .http_only(true)
            .secure(secure);
        if let Some(domain) = &self.config.cookie_domain {
            cookie = cookie.domain(domain.clone());
        }
        if let Some(path) = &self.config.cookie_path {
            cookie = cookie.path(path.clone());
        }
        if self.config.cookie_persistent && token.expires() >= 0 {
            let remaining = (token.expires() - now).max(0) / 1000;
            cookie = cookie.max_age(CookieDuration::seconds(remaining));
            if let Ok(expires) = OffsetDateTime::from_unix_timestamp(token.expires() / 1000) {
                cookie = cookie.expires(expires);
            }
        }
        header_value(cookie.build())
    }

    fn clear_if(&self, challenge: Challenge, rejected: bool, secure: bool) -> Result<Challenge> {
        if !rejected {
            return Ok(challenge);
        }
        let mut cookie = Cookie::build((AUTH_COOKIE, ""))
            .http_only(true)
            .secure(secure)
            .max_age(CookieDuration::ZERO);
        if let Some(domain) = &self.config.cookie_domain {
            cookie = cookie.domain(domain.clone());
        }
        if let Some(path) = &self.config.cookie_path {
            cookie = cookie.path(path.clone());
        }
        Ok(challenge.with_header(SET_COOKIE, header_value(cookie.build())?))
    }
}

impl fmt::Debug for AuthenticationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationFilter")
            .field("handler", &self.handler)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn auth_cookie_value(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(|c| c.ok())
        .find(|c| c.name() == AUTH_COOKIE)
        .map(|c| c.value().to_owned())
}

fn header_value(cookie: Cookie<'_>) -> Result<HeaderValue> {
    HeaderValue::from_str(&cookie.to_string())
        .map_err(|_| error::configuration("cookie attributes are not valid header text"))
}

fn millis(d: Duration) -> i64 {
    d.as_millis() as i64
}

#[cfg(feature = "tower")]
pub use self::layer::{AuthenticationLayer, AuthenticationService};

#[cfg(feature = "tower")]
mod layer {
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use futures_util::future::BoxFuture;
    use http::{Request, Response, StatusCode};
    use tower::{Layer, Service};

    use super::{AuthenticationFilter, FilterDecision};
    use crate::server::Challenge;

    /// Applies an [`AuthenticationFilter`] to a tower service.
    ///
    /// Authenticated requests carry their
    /// [`AuthenticationToken`](crate::AuthenticationToken) in the request
    /// extensions.
    #[derive(Debug, Clone)]
    pub struct AuthenticationLayer {
        filter: Arc<AuthenticationFilter>,
    }

    impl AuthenticationLayer {
        pub fn new(filter: Arc<AuthenticationFilter>) -> Self {
            AuthenticationLayer { filter }
        }
    }

    impl<S> Layer<S> for AuthenticationLayer {
        type Service = AuthenticationService<S>;

        fn layer(&self, inner: S) -> Self::Service {
            AuthenticationService {
                inner,
                filter: self.filter.clone(),
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct AuthenticationService<S> {
        inner: S,
        filter: Arc<AuthenticationFilter>,
    }

    impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AuthenticationService<S>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        ReqBody: Send + 'static,
        ResBody: Default + Send + 'static,
    {
        type Response = S::Response;
        type Error = S::Error;
        type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            self.inner.poll_ready(cx)
        }

        fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
            let clone = self.inner.clone();
            let mut inner = std::mem::replace(&mut self.inner, clone);
            let filter = self.filter.clone();
            Box::pin(async move {
                let (mut parts, body) = req.into_parts();
                match filter.check(&parts).await {
                    Ok(FilterDecision::Proceed { token, headers }) => {
                        parts.extensions.insert(token);
                        let mut response = inner.call(Request::from_parts(parts, body)).await?;
                        for (name, value) in headers.iter() {
                            response.headers_mut().append(name, value.clone());
                        }
                        Ok(response)
                    }
                    Ok(FilterDecision::Respond(challenge)) => Ok(challenge.into_response()),
                    Err(e) => {
                        log::error!("authentication filter failed: {e}");
                        Ok(Challenge::new(StatusCode::INTERNAL_SERVER_ERROR).into_response())
                    }
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::secret::StaticSecretSource;
    use crate::server::pseudo::PseudoHandler;

    const NOW: i64 = 1_700_000_000_000;

    fn filter(config: FilterConfig) -> (AuthenticationFilter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let secrets = Arc::new(StaticSecretSource::new("secret").unwrap());
        let filter = AuthenticationFilter::new(Arc::new(PseudoHandler::new(false)), secrets, config)
            .with_clock(clock.clone());
        (filter, clock)
    }

    fn request(uri: &str, cookie: Option<&str>) -> Parts {
        let mut builder = http::Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn issued_cookie(decision: &FilterDecision) -> String {
        match decision {
            FilterDecision::Proceed { headers, .. } => {
                let set_cookie = headers[SET_COOKIE].to_str().unwrap();
                set_cookie.split(';').next().unwrap().to_owned()
            }
            FilterDecision::Respond(c) => panic!("unexpected challenge {c:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_user_is_forbidden() {
        let (filter, _) = filter(FilterConfig::new());
        match filter.check(&request("/", None)).await.unwrap() {
            FilterDecision::Respond(challenge) => {
                assert_eq!(challenge.status(), StatusCode::FORBIDDEN);
                assert_eq!(challenge.headers()[WWW_AUTHENTICATE], "PseudoAuth");
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_issues_and_accepts_cookie() {
        let (filter, clock) = filter(FilterConfig::new().cookie_path("/"));
        let decision = filter.check(&request("/?user.name=alice", None)).await.unwrap();
        let cookie = issued_cookie(&decision);
        assert!(cookie.starts_with("auth=\"u=alice&p=alice&t=simple&e="));

        if let FilterDecision::Proceed { token, headers } = &decision {
            assert_eq!(token.expires(), NOW + 36_000_000);
            let set_cookie = headers[SET_COOKIE].to_str().unwrap();
            assert!(set_cookie.contains("HttpOnly"));
            assert!(set_cookie.contains("Path=/"));
            assert!(!set_cookie.contains("Expires"));
        }

        clock.advance(1000);
        match filter.check(&request("/other", Some(&cookie))).await.unwrap() {
            FilterDecision::Proceed { token, headers } => {
                assert_eq!(token.user_name(), "alice");
                assert!(headers.get(SET_COOKIE).is_none());
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_cookie_falls_back_to_handler() {
        let (filter, clock) = filter(FilterConfig::new().validity(Duration::from_secs(10)));
        let decision = filter.check(&request("/?user.name=alice", None)).await.unwrap();
        let cookie = issued_cookie(&decision);

        clock.advance(10_001);
        match filter.check(&request("/", Some(&cookie))).await.unwrap() {
            FilterDecision::Respond(challenge) => {
                assert_eq!(challenge.status(), StatusCode::FORBIDDEN);
                let cleared = challenge.headers()[SET_COOKIE].to_str().unwrap();
                assert!(cleared.starts_with("auth=;"));
                assert!(cleared.contains("Max-Age=0"));
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tampered_cookie_is_ignored() {
        let (filter, _) = filter(FilterConfig::new());
        let decision = filter.check(&request("/?user.name=alice", None)).await.unwrap();
        let cookie = issued_cookie(&decision);
        let tampered = cookie.replace("alice", "admin");
        let decision = filter
            .check(&request("/?user.name=bob", Some(&tampered)))
            .await
            .unwrap();
        match decision {
            FilterDecision::Proceed { token, .. } => assert_eq!(token.user_name(), "bob"),
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_foreign_token_type_is_ignored() {
        let (filter, _) = filter(FilterConfig::new());
        let token = AuthenticationToken::new("alice", "alice", "kerberos").unwrap();
        let signed = filter.signer.sign(token.encode()).unwrap();
        let decision = filter
            .check(&request("/", Some(&format!("auth=\"{signed}\""))))
            .await
            .unwrap();
        assert!(matches!(decision, FilterDecision::Respond(_)));
    }

    #[tokio::test]
    async fn test_max_inactive_slides() {
        let (filter, clock) =
            filter(FilterConfig::new().max_inactive(Some(Duration::from_secs(60))));
        let decision = filter.check(&request("/?user.name=alice", None)).await.unwrap();
        let cookie = issued_cookie(&decision);

        clock.advance(50_000);
        let refreshed = filter.check(&request("/", Some(&cookie))).await.unwrap();
        if let FilterDecision::Proceed { token, .. } = &refreshed {
            assert_eq!(token.max_inactive(), NOW + 50_000 + 60_000);
        }
        let refreshed = issued_cookie(&refreshed);

        clock.advance(50_000);
        assert!(matches!(
            filter.check(&request("/", Some(&refreshed))).await.unwrap(),
            FilterDecision::Proceed { .. }
        ));
        assert!(matches!(
            filter.check(&request("/", Some(&cookie))).await.unwrap(),
            FilterDecision::Respond(_)
        ));
    }

    #[tokio::test]
    async fn test_anonymous_gets_no_cookie() {
        let clock = Arc::new(ManualClock::new(NOW));
        let filter = AuthenticationFilter::new(
            Arc::new(PseudoHandler::new(true)),
            Arc::new(StaticSecretSource::new("secret").unwrap()),
            FilterConfig::new(),
        )
        .with_clock(clock);
        match filter.check(&request("/", None)).await.unwrap() {
            FilterDecision::Proceed { token, headers } => {
                assert!(token.is_anonymous());
                assert!(headers.is_empty());
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_persistent_cookie_expires() {
        let (filter, _) = filter(
            FilterConfig::new()
                .cookie_persistent(true)
                .cookie_domain("example.com")
                .validity(Duration::from_secs(60)),
        );
        let decision = filter
            .check(&request("https://example.com/?user.name=a", None))
            .await
            .unwrap();
        if let FilterDecision::Proceed { headers, .. } = decision {
            let set_cookie = headers[SET_COOKIE].to_str().unwrap();
            assert!(set_cookie.contains("Max-Age=60"));
            assert!(set_cookie.contains("Expires="));
            assert!(set_cookie.contains("Domain=example.com"));
            assert!(set_cookie.contains("Secure"));
        } else {
            panic!("expected a cookie");
        }
    }

    #[test]
    fn test_config_from_properties() {
        let config = FilterConfig::from_properties(&Properties::new()).unwrap();
        assert_eq!(config, FilterConfig::new());

        let props = Properties::new()
            .with(AUTH_TOKEN_VALIDITY, "60")
            .with(AUTH_TOKEN_MAX_INACTIVE_INTERVAL, "30")
            .with(COOKIE_DOMAIN, "example.com")
            .with(COOKIE_PERSISTENT, "true");
        let config = FilterConfig::from_properties(&props).unwrap();
        assert_eq!(config.get_validity(), Duration::from_secs(60));
        assert_eq!(config.max_inactive, Some(Duration::from_secs(30)));
        assert!(config.cookie_persistent);

        let bad = Properties::new().with(AUTH_TOKEN_VALIDITY, "0");
        assert!(FilterConfig::from_properties(&bad).unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_from_properties_with_prefix() {
        let props = Properties::new()
            .with(CONFIG_PREFIX, "web")
            .with("web.type", "simple")
            .with("web.simple.anonymous.allowed", "true")
            .with("web.signature.secret", "secret");
        let filter = AuthenticationFilter::from_properties(
            &props,
            &HandlerRegistry::default(),
            &Collaborators::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(filter.handler().auth_type(), "simple");

        let missing = Properties::new().with("signature.secret", "secret");
        let err = AuthenticationFilter::from_properties(
            &missing,
            &HandlerRegistry::default(),
            &Collaborators::default(),
            None,
        )
        .await
        .unwrap_err();
        assert!(err.is_configuration());
    }
}
