// src/server/multi.rs

//! Routes a request to a handler by its `Authorization` scheme.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderValue, WWW_AUTHENTICATE};
use http::request::Parts;
use http::StatusCode;

use super::registry::{Collaborators, HandlerRegistry};
use super::{
    authorization, check_auth_scheme, match_auth_scheme, AuthOutcome, AuthenticationHandler,
    Challenge,
};
use crate::config::Properties;
use crate::error;
use crate::Result;

pub const TYPE: &str = "multi-scheme";
/// Comma separated list of `Basic`, `Negotiate` or `Digest`.
pub const SCHEMES: &str = "multi-scheme-auth-handler.schemes";

/// Key naming the handler type for `scheme`, always lowercase.
pub fn scheme_handler_key(scheme: &str) -> String {
    format!("{SCHEMES}.{scheme}.handler").to_lowercase()
}

/// Ordered `(scheme, handler)` bindings.
#[derive(Debug, Default)]
pub struct MultiSchemeDispatcher {
    bindings: Vec<(&'static str, Arc<dyn AuthenticationHandler>)>,
}

impl MultiSchemeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding. Each scheme may be bound once.
    pub fn bind(mut self, scheme: &str, handler: Arc<dyn AuthenticationHandler>) -> Result<Self> {
        let scheme = check_auth_scheme(scheme)?;
        if self.bindings.iter().any(|(s, _)| *s == scheme) {
            return Err(error::configuration(format!(
                "Handler is already specified for {scheme} authentication scheme."
            )));
        }
        self.bindings.push((scheme, handler));
        Ok(self)
    }

    /// Builds the sub-handlers through `registry`. Each sub-handler sees
    /// the complete `props`.
    pub fn from_properties(
        props: &Properties,
        registry: &HandlerRegistry,
        collaborators: &Collaborators,
    ) -> Result<Self> {
        let schemes = props
            .get(SCHEMES)
            .ok_or_else(|| error::configuration(format!("{SCHEMES} must be specified")))?;

        let mut dispatcher = MultiSchemeDispatcher::new();
        for scheme in schemes.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let key = scheme_handler_key(scheme);
            let handler_type = props.require(&key).map_err(|_| {
                error::configuration(format!("No auth handler configured for scheme {scheme}"))
            })?;
            if handler_type.eq_ignore_ascii_case(TYPE) {
                return Err(error::configuration(format!(
                    "Scheme {scheme} can not be handled by another {TYPE} handler"
                )));
            }
            let handler = registry.create(handler_type, props, collaborators)?;
            dispatcher = dispatcher.bind(scheme, handler)?;
        }
        if dispatcher.bindings.is_empty() {
            return Err(error::configuration(format!("{SCHEMES} must not be empty")));
        }
        Ok(dispatcher)
    }

    /// Configured schemes in order.
    pub fn schemes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.bindings.iter().map(|(scheme, _)| *scheme)
    }
}

#[async_trait]
impl AuthenticationHandler for MultiSchemeDispatcher {
    fn auth_type(&self) -> &str {
        TYPE
    }

    fn token_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for t in self.bindings.iter().flat_map(|(_, h)| h.token_types()) {
            if !types.contains(&t) {
                types.push(t);
            }
        }
        types
    }

    async fn authenticate(&self, request: &Parts) -> Result<AuthOutcome> {
        if let Some(value) = authorization(request) {
            if let Some((scheme, handler)) = self
                .bindings
                .iter()
                .find(|(scheme, _)| match_auth_scheme(scheme, value))
            {
                log::trace!("dispatching {scheme} request to {} handler", handler.auth_type());
                return handler.authenticate(request).await;
            }
            log::debug!("no handler bound for the 'Authorization' scheme of this request");
        }

        let challenge = self
            .bindings
            .iter()
            .fold(Challenge::new(StatusCode::UNAUTHORIZED), |challenge, (scheme, _)| {
                challenge.with_header(WWW_AUTHENTICATE, HeaderValue::from_static(*scheme))
            });
        Ok(challenge.into())
    }

    fn close(&self) {
        for (_, handler) in &self.bindings {
            handler.close();
        }
    }
}
