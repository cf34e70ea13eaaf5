// src/secret/mod.rs

//! Signing secrets and their rotation.
//!
//! A [`SecretSource`] hands out immutable [`SecretState`] snapshots: the
//! secret new signatures are made with, and the one before it, which is
//! still accepted for verification. Sources that rotate swap in a new
//! snapshot atomically, so a reader never sees a half-rotated pair.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::config::Properties;
use crate::error;
use crate::Result;

mod coordinated;
mod random;
mod rollover;
pub mod store;

pub use self::coordinated::{
    CoordinatedSecretSource, CoordinatedSecretSourceBuilder, SecretRecord, StoreAuth,
    StoreConnector, StoreSettings,
};
pub use self::random::RandomSecretSource;

/// Selects the secret source implementation.
pub const SIGNER_SECRET_PROVIDER: &str = "signer.secret.provider";
/// Literal secret for the `static` provider.
pub const SIGNATURE_SECRET: &str = "signature.secret";
/// Path of a file holding the secret for the `file` provider.
pub const SIGNATURE_SECRET_FILE: &str = "signature.secret.file";

/// The secrets accepted at one instant.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretState {
    current: Bytes,
    previous: Option<Bytes>,
}

impl SecretState {
    /// Creates a snapshot. `current` must not be empty.
    pub fn new(current: impl Into<Bytes>, previous: Option<Bytes>) -> Result<Self> {
        let current = current.into();
        if current.is_empty() {
            return Err(error::configuration("secret cannot be empty"));
        }
        Ok(SecretState { current, previous })
    }

    pub fn current(&self) -> &Bytes {
        &self.current
    }

    pub fn previous(&self) -> Option<&Bytes> {
        self.previous.as_ref()
    }

    /// Current secret first, then the previous one if any.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        std::iter::once(&self.current).chain(self.previous.iter())
    }

    /// The state after `next` takes over.
    pub(crate) fn rotate(&self, next: Bytes) -> SecretState {
        SecretState {
            current: next,
            previous: Some(self.current.clone()),
        }
    }
}

impl fmt::Debug for SecretState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretState")
            .field("current", &"[redacted]")
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}

/// Provides the secrets a [`RequestSigner`](crate::RequestSigner) uses.
pub trait SecretSource: Send + Sync + fmt::Debug {
    /// Returns the secrets in effect right now.
    fn snapshot(&self) -> Arc<SecretState>;

    fn current_secret(&self) -> Bytes {
        self.snapshot().current().clone()
    }

    /// Every secret that verification should accept, current first.
    fn all_secrets(&self) -> Vec<Bytes> {
        self.snapshot().iter().cloned().collect()
    }

    /// Stops any background rotation.
    fn close(&self) {}
}

/// A secret that never changes.
pub struct StaticSecretSource {
    state: Arc<SecretState>,
}

impl StaticSecretSource {
    pub fn new(secret: impl Into<Bytes>) -> Result<Self> {
        Ok(StaticSecretSource {
            state: Arc::new(SecretState::new(secret, None)?),
        })
    }

    /// Reads the secret from a file. Trailing line breaks are not part of
    /// the secret.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            error::configuration(format!(
                "could not read signature secret file {}: {e}",
                path.display()
            ))
        })?;
        let secret = contents.trim_end_matches(['\r', '\n']);
        if secret.is_empty() {
            return Err(error::configuration(format!(
                "signature secret file {} is empty",
                path.display()
            )));
        }
        Self::new(secret.to_owned())
    }
}

impl SecretSource for StaticSecretSource {
    fn snapshot(&self) -> Arc<SecretState> {
        self.state.clone()
    }
}

impl fmt::Debug for StaticSecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSecretSource").finish_non_exhaustive()
    }
}

/// The secret source implementations selectable through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSourceKind {
    Static,
    File,
    Random,
    Coordinated,
}

impl SecretSourceKind {
    /// Reads [`SIGNER_SECRET_PROVIDER`]. When it is absent the kind follows
    /// from which secret keys are present, falling back to `random`.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        match props.get(SIGNER_SECRET_PROVIDER).map(str::trim) {
            Some(name) if !name.is_empty() => name.parse(),
            _ if props.get(SIGNATURE_SECRET_FILE).is_some() => Ok(SecretSourceKind::File),
            _ if props.get(SIGNATURE_SECRET).is_some() => Ok(SecretSourceKind::Static),
            _ => Ok(SecretSourceKind::Random),
        }
    }
}

impl FromStr for SecretSourceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(SecretSourceKind::Static),
            "file" => Ok(SecretSourceKind::File),
            "random" => Ok(SecretSourceKind::Random),
            "coordinated" => Ok(SecretSourceKind::Coordinated),
            other => Err(error::configuration(format!(
                "unknown {SIGNER_SECRET_PROVIDER} '{other}'"
            ))),
        }
    }
}

/// Builds the secret source selected by `props`.
///
/// `validity` is the rotation interval for rotating sources. The
/// `coordinated` kind needs a `connector` to reach its store.
pub async fn from_properties(
    props: &Properties,
    validity: Duration,
    connector: Option<&dyn StoreConnector>,
) -> Result<Arc<dyn SecretSource>> {
    let kind = SecretSourceKind::from_properties(props)?;
    log::debug!("using {kind:?} secret source");
    match kind {
        SecretSourceKind::Static => {
            let secret = props.require(SIGNATURE_SECRET)?;
            Ok(Arc::new(StaticSecretSource::new(secret.to_owned())?))
        }
        SecretSourceKind::File => {
            let path = props.require(SIGNATURE_SECRET_FILE)?;
            Ok(Arc::new(StaticSecretSource::from_file(path)?))
        }
        SecretSourceKind::Random => Ok(Arc::new(RandomSecretSource::new().start(validity)?)),
        SecretSourceKind::Coordinated => {
            let connector = connector.ok_or_else(|| {
                error::configuration("the coordinated secret source needs a store connector")
            })?;
            let settings = StoreSettings::from_properties(props)?;
            let store = connector.connect(&settings).await?;
            let source = CoordinatedSecretSource::builder(store, settings.path())
                .validity(validity)
                .init()
                .await?;
            Ok(Arc::new(source))
        }
    }
}
