// src/lib.rs

#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # clusterauth
//!
//! Signed-cookie HTTP authentication for cluster-internal endpoints.
//!
//! A server authenticates a client once, through Kerberos/SPNEGO, HTTP Basic
//! credentials checked by a directory bind, or a trusted `user.name` query
//! parameter. It then hands out a signed, time-bounded `auth` cookie so later
//! requests skip the handshake. Every process of a fleet can accept the same
//! cookie because the signing secret is rotated in lockstep through a shared
//! versioned store.
//!
//! ## Server
//!
//! Pick a handler, a secret source, and wrap them in an
//! [`AuthenticationFilter`](server::AuthenticationFilter):
//!
//! ```rust
//! # use std::sync::Arc;
//! # use clusterauth::secret::StaticSecretSource;
//! # use clusterauth::server::{AuthenticationFilter, FilterConfig, FilterDecision, PseudoHandler};
//! # async fn run() -> clusterauth::Result<()> {
//! let filter = AuthenticationFilter::new(
//!     Arc::new(PseudoHandler::new(false)),
//!     Arc::new(StaticSecretSource::new("s3cret")?),
//!     FilterConfig::default(),
//! );
//!
//! let request = http::Request::get("http://localhost/data?user.name=alice")
//!     .body(())
//!     .unwrap();
//! let (parts, _) = request.into_parts();
//! match filter.check(&parts).await? {
//!     FilterDecision::Proceed { token, .. } => println!("hello {}", token.user_name()),
//!     FilterDecision::Respond(challenge) => println!("{}", challenge.status()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! With the `tower` feature the same filter runs as a
//! [`tower::Layer`](https://docs.rs/tower) in front of any service.
//!
//! ## Client
//!
//! A [`ClientAuthenticator`](auth::ClientAuthenticator) obtains the cookie
//! and a [`CookieTokenClient`](auth::CookieTokenClient) replays it:
//!
//! ```rust,no_run
//! # #[cfg(feature = "http1-transport")]
//! # async fn run() -> clusterauth::Result<()> {
//! use std::sync::Arc;
//! use clusterauth::auth::{
//!     CookieTokenClient, HyperTransport, PseudoClientAuthenticator, SessionToken,
//! };
//!
//! let client = CookieTokenClient::new(
//!     Arc::new(PseudoClientAuthenticator::new()),
//!     Arc::new(HyperTransport::new()),
//! );
//! let token = SessionToken::new();
//! let url = url::Url::parse("http://localhost:8080/data").unwrap();
//! client.open(&url, &token).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Optional Features
//!
//! - **http1-transport** *(enabled by default)*: a plain HTTP/1 client
//!   transport over hyper.
//! - **tower**: `AuthenticationLayer` middleware.
//! - **serde**: (de)serialization of [`Properties`](config::Properties).
//!
//! ## Logging
//!
//! Uses the `log` facade. Credentials and secret bytes are never logged.

pub use self::error::{Error, Result};
pub use self::signer::RequestSigner;
pub use self::token::AuthenticationToken;

pub mod auth;
pub mod clock;
pub mod config;
mod error;
pub mod krb;
pub mod secret;
pub mod server;
pub mod signer;
pub mod token;
