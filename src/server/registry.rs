// src/server/registry.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::directory::{self, DirectoryBindHandler, DirectoryBinder};
use super::multi::{self, MultiSchemeDispatcher};
use super::pseudo::{self, PseudoHandler};
use super::spnego::{self, GssAcceptor, SpnegoHandler};
use super::AuthenticationHandler;
use crate::config::Properties;
use crate::error;
use crate::Result;

/// Builds a handler of one type from configuration.
pub type HandlerFactory =
    fn(&Properties, &HandlerRegistry, &Collaborators) -> Result<Arc<dyn AuthenticationHandler>>;

/// External services handlers are built on.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub acceptor: Option<Arc<dyn GssAcceptor>>,
    pub binder: Option<Arc<dyn DirectoryBinder>>,
}

impl Collaborators {
    pub fn with_acceptor(mut self, acceptor: Arc<dyn GssAcceptor>) -> Self {
        self.acceptor = Some(acceptor);
        self
    }

    pub fn with_binder(mut self, binder: Arc<dyn DirectoryBinder>) -> Self {
        self.binder = Some(binder);
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("acceptor", &self.acceptor.is_some())
            .field("binder", &self.binder.is_some())
            .finish()
    }
}

/// Handler type names mapped to their factories.
///
/// The default registry knows `simple`, `kerberos`, `ldap` and
/// `multi-scheme`. Names are matched case-insensitively.
#[derive(Clone)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    /// A registry with no handler types.
    pub fn empty() -> Self {
        HandlerRegistry {
            factories: HashMap::new(),
        }
    }

    /// Adds or replaces the factory for `name`.
    pub fn register(mut self, name: &str, factory: HandlerFactory) -> Self {
        self.factories.insert(name.to_ascii_lowercase(), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.trim().to_ascii_lowercase())
    }

    pub fn create(
        &self,
        name: &str,
        props: &Properties,
        collaborators: &Collaborators,
    ) -> Result<Arc<dyn AuthenticationHandler>> {
        let factory = self
            .factories
            .get(&name.trim().to_ascii_lowercase())
            .ok_or_else(|| {
                error::configuration(format!("Unknown authentication handler type: {name}"))
            })?;
        log::debug!("creating {name} authentication handler");
        factory(props, self, collaborators)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        HandlerRegistry::empty()
            .register(pseudo::TYPE, create_pseudo)
            .register(spnego::TYPE, create_spnego)
            .register(directory::TYPE, create_directory)
            .register(multi::TYPE, create_multi)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry").field("types", &names).finish()
    }
}

fn create_pseudo(
    props: &Properties,
    _: &HandlerRegistry,
    _: &Collaborators,
) -> Result<Arc<dyn AuthenticationHandler>> {
    Ok(Arc::new(PseudoHandler::from_properties(props)?))
}

fn create_spnego(
    props: &Properties,
    _: &HandlerRegistry,
    collaborators: &Collaborators,
) -> Result<Arc<dyn AuthenticationHandler>> {
    let acceptor = collaborators
        .acceptor
        .clone()
        .ok_or_else(|| error::configuration("kerberos handler requires a GSS acceptor"))?;
    Ok(Arc::new(SpnegoHandler::from_properties(props, acceptor)?))
}

fn create_directory(
    props: &Properties,
    _: &HandlerRegistry,
    collaborators: &Collaborators,
) -> Result<Arc<dyn AuthenticationHandler>> {
    let binder = collaborators
        .binder
        .clone()
        .ok_or_else(|| error::configuration("ldap handler requires a directory binder"))?;
    Ok(Arc::new(DirectoryBindHandler::from_properties(props, binder)?))
}

fn create_multi(
    props: &Properties,
    registry: &HandlerRegistry,
    collaborators: &Collaborators,
) -> Result<Arc<dyn AuthenticationHandler>> {
    Ok(Arc::new(MultiSchemeDispatcher::from_properties(
        props,
        registry,
        collaborators,
    )?))
}
