// tests/filter.rs

use std::convert::Infallible;
use std::error::Error as StdError;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use clusterauth::config::Properties;
use clusterauth::server::{
    directory, multi, spnego, AcceptStep, AuthenticationFilter, AuthenticationLayer, BindRequest,
    Collaborators, DirectoryBinder, GssAcceptor, HandlerRegistry, ServerCredential,
};
use clusterauth::AuthenticationToken;
use http::header::{AUTHORIZATION, COOKIE, SET_COOKIE, WWW_AUTHENTICATE};
use http::{Request, Response, StatusCode};
use tower::{Layer, Service, ServiceExt};

struct Directory;

#[async_trait]
impl DirectoryBinder for Directory {
    async fn bind(&self, request: &BindRequest) -> Result<(), Box<dyn StdError + Send + Sync>> {
        if request.bind_dn == "uid=alice,ou=people,dc=example,dc=com"
            && request.password == "secret"
        {
            Ok(())
        } else {
            Err("invalid credentials".into())
        }
    }
}

struct NoKerberos;

impl GssAcceptor for NoKerberos {
    fn accept(
        &self,
        _credential: &ServerCredential,
        _token: &[u8],
    ) -> Result<AcceptStep, Box<dyn StdError + Send + Sync>> {
        Err("no kerberos in this test".into())
    }

    fn keytab_principals(
        &self,
        _keytab: &Path,
    ) -> Result<Vec<String>, Box<dyn StdError + Send + Sync>> {
        Ok(Vec::new())
    }
}

async fn hello(req: Request<String>) -> Result<Response<String>, Infallible> {
    let user = req
        .extensions()
        .get::<AuthenticationToken>()
        .map(|token| token.user_name().to_owned())
        .unwrap_or_default();
    Ok(Response::new(format!("hello {user}")))
}

async fn multi_scheme_filter(keytab: &Path) -> Arc<AuthenticationFilter> {
    let props = Properties::new()
        .with("config.prefix", "web.auth")
        .with("web.auth.type", multi::TYPE)
        .with(format!("web.auth.{}", multi::SCHEMES), "Basic, Negotiate")
        .with(format!("web.auth.{}", multi::scheme_handler_key("Basic")), directory::TYPE)
        .with(format!("web.auth.{}", multi::scheme_handler_key("Negotiate")), spnego::TYPE)
        .with(format!("web.auth.{}", directory::PROVIDER_URL), "ldap://localhost:389")
        .with(format!("web.auth.{}", directory::BASE_DN), "ou=people,dc=example,dc=com")
        .with(format!("web.auth.{}", spnego::PRINCIPAL), "HTTP/localhost@EXAMPLE.COM")
        .with(format!("web.auth.{}", spnego::KEYTAB), keytab.display().to_string())
        .with("web.auth.signature.secret", "s3cret");
    let collaborators = Collaborators::default()
        .with_binder(Arc::new(Directory))
        .with_acceptor(Arc::new(NoKerberos));
    let filter = AuthenticationFilter::from_properties(
        &props,
        &HandlerRegistry::default(),
        &collaborators,
        None,
    )
    .await
    .unwrap();
    Arc::new(filter)
}

fn get(authorization: Option<&str>, cookie: Option<&str>) -> Request<String> {
    let mut builder = Request::get("http://localhost/data");
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }
    if let Some(value) = cookie {
        builder = builder.header(COOKIE, value);
    }
    builder.body(String::new()).unwrap()
}

#[tokio::test]
async fn test_basic_login_then_cookie() {
    let _ = env_logger::try_init();
    let keytab = tempfile::NamedTempFile::new().unwrap();
    let filter = multi_scheme_filter(keytab.path()).await;
    let svc = AuthenticationLayer::new(filter).layer(tower::service_fn(hello));

    // alice:secret
    let res = svc
        .clone()
        .oneshot(get(Some("Basic YWxpY2U6c2VjcmV0"), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.body(), "hello alice");
    let set_cookie = res.headers()[SET_COOKIE].to_str().unwrap().to_owned();
    assert!(set_cookie.starts_with("auth=\"u=alice&p=alice&t=ldap&e="));
    assert!(set_cookie.contains("HttpOnly"));

    let cookie = set_cookie.split(';').next().unwrap();
    let res = svc.clone().oneshot(get(None, Some(cookie))).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.body(), "hello alice");
    assert!(res.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_challenge_lists_every_scheme() {
    let keytab = tempfile::NamedTempFile::new().unwrap();
    let filter = multi_scheme_filter(keytab.path()).await;
    let mut svc = AuthenticationLayer::new(filter).layer(tower::service_fn(hello));

    let res = svc.ready().await.unwrap().call(get(None, None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let schemes: Vec<_> = res.headers().get_all(WWW_AUTHENTICATE).iter().collect();
    assert_eq!(schemes, vec!["Basic", "Negotiate"]);
}

#[tokio::test]
async fn test_failed_bind_is_forbidden() {
    let keytab = tempfile::NamedTempFile::new().unwrap();
    let filter = multi_scheme_filter(keytab.path()).await;
    let svc = AuthenticationLayer::new(filter).layer(tower::service_fn(hello));

    // alice:wrong
    let res = svc.oneshot(get(Some("Basic YWxpY2U6d3Jvbmc="), None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(res.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_forged_cookie_is_cleared() {
    let keytab = tempfile::NamedTempFile::new().unwrap();
    let filter = multi_scheme_filter(keytab.path()).await;
    let svc = AuthenticationLayer::new(filter).layer(tower::service_fn(hello));

    let forged = "auth=\"u=mallory&p=mallory&t=ldap&e=99999999999999&s=Zm9yZ2Vk\"";
    let res = svc.oneshot(get(None, Some(forged))).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let cleared = res.headers()[SET_COOKIE].to_str().unwrap();
    assert!(cleared.starts_with("auth=;"));
    assert!(cleared.contains("Max-Age=0"));
}
