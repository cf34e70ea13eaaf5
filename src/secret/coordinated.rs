// src/secret/coordinated.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::rngs::StdRng;
use tokio::sync::Mutex;

use super::rollover::{self, Rollover, Task};
use super::store::{CoordinationStore, StoreError};
use super::{SecretSource, SecretState};
use crate::clock::{Clock, SystemClock};
use crate::config::Properties;
use crate::error;
use crate::Result;

/// Address of the coordination store.
pub const STORE_CONNECTION_STRING: &str = "signer.secret.provider.store.connection.string";
/// Path of the shared secret record inside the store.
pub const STORE_PATH: &str = "signer.secret.provider.store.path";
/// `none` or `sasl`.
pub const STORE_AUTH_TYPE: &str = "signer.secret.provider.store.auth.type";
pub const STORE_KERBEROS_KEYTAB: &str = "signer.secret.provider.store.kerberos.keytab";
pub const STORE_KERBEROS_PRINCIPAL: &str = "signer.secret.provider.store.kerberos.principal";

const DEFAULT_CONNECTION_STRING: &str = "localhost:2181";
const DEFAULT_VALIDITY: Duration = Duration::from_secs(36_000);

/// Layout version written at the head of every record.
const DATA_VERSION: i32 = 0;

/// The record every process of a fleet reads and writes.
///
/// Big-endian layout: `i32` data version, then `next`, `current` and
/// `previous` each as an `i32` length followed by the bytes (length 0 for
/// an absent previous), then the next rollover as `i64` epoch millis.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub next: Bytes,
    pub current: Bytes,
    pub previous: Option<Bytes>,
    pub next_rollover: i64,
}

impl SecretRecord {
    pub fn encode(&self) -> Bytes {
        let previous = self.previous.as_deref().unwrap_or_default();
        let mut buf = BytesMut::with_capacity(
            4 + 12 + self.next.len() + self.current.len() + previous.len() + 8,
        );
        buf.put_i32(DATA_VERSION);
        for secret in [&self.next[..], &self.current[..], previous] {
            buf.put_i32(secret.len() as i32);
            buf.put_slice(secret);
        }
        buf.put_i64(self.next_rollover);
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        let version = read_i32(&mut data)?;
        if version > DATA_VERSION {
            return Err(error::store(format!(
                "Cannot parse secret record; data version {version} is newer than {DATA_VERSION}"
            )));
        }
        let next = read_secret(&mut data)?;
        let current = read_secret(&mut data)?;
        let previous = read_secret(&mut data)?;
        if data.remaining() < 8 {
            return Err(error::store("secret record is truncated"));
        }
        let next_rollover = data.get_i64();
        if next.is_empty() || current.is_empty() {
            return Err(error::store("secret record holds an empty secret"));
        }
        Ok(SecretRecord {
            next,
            current,
            previous: (!previous.is_empty()).then_some(previous),
            next_rollover,
        })
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("has_previous", &self.previous.is_some())
            .field("next_rollover", &self.next_rollover)
            .finish_non_exhaustive()
    }
}

fn read_i32(data: &mut &[u8]) -> Result<i32> {
    if data.remaining() < 4 {
        return Err(error::store("secret record is truncated"));
    }
    Ok(data.get_i32())
}

fn read_secret(data: &mut &[u8]) -> Result<Bytes> {
    let len = read_i32(data)?;
    if len < 0 || len as usize > data.remaining() {
        return Err(error::store(format!(
            "secret record has an invalid length {len}"
        )));
    }
    Ok(data.copy_to_bytes(len as usize))
}

/// How the coordination client authenticates to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAuth {
    None,
    Sasl { principal: String, keytab: PathBuf },
}

/// Client settings for the coordination store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    connection_string: String,
    path: String,
    auth: StoreAuth,
}

impl StoreSettings {
    pub fn new(connection_string: impl Into<String>, path: impl Into<String>) -> Self {
        StoreSettings {
            connection_string: connection_string.into(),
            path: path.into(),
            auth: StoreAuth::None,
        }
    }

    pub fn with_auth(mut self, auth: StoreAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Reads the `signer.secret.provider.store.*` keys.
    ///
    /// `sasl` authentication needs both a principal and an existing keytab;
    /// setup fails rather than falling back to an unauthenticated client.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let connection_string = props
            .get_or(STORE_CONNECTION_STRING, DEFAULT_CONNECTION_STRING)
            .trim()
            .to_owned();
        let path = props.require(STORE_PATH)?.to_owned();
        let auth_type = props.get_or(STORE_AUTH_TYPE, "none").trim().to_ascii_lowercase();
        let auth = match auth_type.as_str() {
            "none" => StoreAuth::None,
            "sasl" => {
                let principal = props.require(STORE_KERBEROS_PRINCIPAL)?.to_owned();
                let keytab = props.require(STORE_KERBEROS_KEYTAB)?;
                if !Path::new(keytab).exists() {
                    return Err(error::configuration(format!(
                        "store keytab {keytab} does not exist"
                    )));
                }
                StoreAuth::Sasl {
                    principal,
                    keytab: PathBuf::from(keytab),
                }
            }
            other => {
                return Err(error::configuration(format!(
                    "{STORE_AUTH_TYPE} must be 'none' or 'sasl', got '{other}'"
                )))
            }
        };
        Ok(StoreSettings {
            connection_string,
            path,
            auth,
        })
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn auth(&self) -> &StoreAuth {
        &self.auth
    }
}

/// Opens a [`CoordinationStore`] client from [`StoreSettings`].
///
/// Implementations must fail rather than fall back to an unauthenticated
/// session when the configured [`StoreAuth`] cannot be established.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(
        &self,
        settings: &StoreSettings,
    ) -> std::result::Result<Arc<dyn CoordinationStore>, StoreError>;
}

/// A secret rotated in lockstep by every process sharing a store record.
///
/// Each process promotes the shared `next` secret at the shared rollover
/// deadline and then races to publish a fresh `next` with a
/// compare-and-swap. One write wins; the others adopt what it wrote on
/// their re-read, so the fleet converges without a leader.
pub struct CoordinatedSecretSource {
    inner: Arc<Inner>,
    task: Task,
}

struct Inner {
    rollover: Rollover,
    store: Arc<dyn CoordinationStore>,
    path: String,
    validity_ms: i64,
    meta: Mutex<Meta>,
}

struct Meta {
    version: i64,
    next_secret: Bytes,
    next_rollover: i64,
}

/// Configures and initializes a [`CoordinatedSecretSource`].
#[must_use]
pub struct CoordinatedSecretSourceBuilder {
    store: Arc<dyn CoordinationStore>,
    path: String,
    validity: Duration,
    clock: Arc<dyn Clock>,
    rng: Option<StdRng>,
    schedule: bool,
}

impl CoordinatedSecretSourceBuilder {
    /// How long each secret stays current. Defaults to ten hours.
    pub fn validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rng(mut self, rng: StdRng) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Whether to spawn the rotation task. Defaults to `true`; without it
    /// rotation only happens through
    /// [`roll_secret`](CoordinatedSecretSource::roll_secret).
    pub fn schedule(mut self, schedule: bool) -> Self {
        self.schedule = schedule;
        self
    }

    /// Creates or joins the shared record and, unless disabled, schedules
    /// rotation at the record's rollover deadline.
    ///
    /// Any store failure other than finding the record already present
    /// fails initialization.
    pub async fn init(self) -> Result<CoordinatedSecretSource> {
        let validity_ms = i64::try_from(self.validity.as_millis()).unwrap_or(i64::MAX);
        if validity_ms < 1 {
            return Err(error::configuration("rollover interval must be positive"));
        }
        let rollover = match self.rng {
            Some(rng) => Rollover::new(rng),
            None => Rollover::from_entropy(),
        };

        let now = self.clock.now_millis();
        let record = SecretRecord {
            next: rollover.generate(),
            current: rollover.generate(),
            previous: None,
            next_rollover: now + validity_ms,
        };
        match self.store.create(&self.path, record.encode()).await {
            Ok(()) => log::info!("Created secret record at {}", self.path),
            Err(StoreError::AlreadyExists) => {
                log::info!("The secret record at {} already exists, retrieving data", self.path)
            }
            Err(e) => return Err(e.into()),
        }

        let versioned = self.store.get(&self.path).await?;
        let record = SecretRecord::decode(&versioned.data)?;
        rollover.publish(SecretState {
            current: record.current,
            previous: record.previous,
        });

        let mut initial_delay = record.next_rollover - now;
        let mut i = 1;
        while initial_delay < 1 {
            initial_delay += validity_ms * i;
            i += 1;
        }

        let inner = Arc::new(Inner {
            rollover,
            store: self.store,
            path: self.path,
            validity_ms,
            meta: Mutex::new(Meta {
                version: versioned.version,
                next_secret: record.next,
                next_rollover: record.next_rollover,
            }),
        });
        let task = Task::default();
        if self.schedule {
            let ticker = inner.clone();
            task.set(rollover::schedule(
                Duration::from_millis(initial_delay as u64),
                self.validity,
                move || {
                    let inner = ticker.clone();
                    async move { inner.roll().await }
                },
            )?);
            log::debug!("first coordinated rollover in {initial_delay}ms");
        }
        Ok(CoordinatedSecretSource { inner, task })
    }
}

impl CoordinatedSecretSource {
    /// Starts configuring a source backed by the record at `path`.
    pub fn builder(
        store: Arc<dyn CoordinationStore>,
        path: impl Into<String>,
    ) -> CoordinatedSecretSourceBuilder {
        CoordinatedSecretSourceBuilder {
            store,
            path: path.into(),
            validity: DEFAULT_VALIDITY,
            clock: Arc::new(SystemClock),
            rng: None,
            schedule: true,
        }
    }

    /// Performs one rotation: promote the shared next secret, try to
    /// publish a new one, then re-read the record.
    ///
    /// Store errors are logged, never returned; the next rotation retries.
    pub async fn roll_secret(&self) {
        self.inner.roll().await;
    }

    /// Store version of the record as last read.
    pub async fn version(&self) -> i64 {
        self.inner.meta.lock().await.version
    }

    /// The agreed rollover deadline in epoch millis.
    pub async fn next_rollover(&self) -> i64 {
        self.inner.meta.lock().await.next_rollover
    }

    pub fn is_rotating(&self) -> bool {
        self.task.is_running()
    }
}

impl Inner {
    async fn roll(&self) {
        let mut meta = self.meta.lock().await;
        self.rollover.rotate_to(meta.next_secret.clone());
        meta.next_rollover += self.validity_ms;

        let state = self.rollover.load();
        let record = SecretRecord {
            next: self.rollover.generate(),
            current: state.current().clone(),
            previous: state.previous().cloned(),
            next_rollover: meta.next_rollover,
        };
        match self.store.set(&self.path, record.encode(), meta.version).await {
            Ok(version) => log::debug!("published new secrets at version {version}"),
            Err(StoreError::BadVersion) => log::debug!(
                "Unable to push to the store; another process already rolled the secret"
            ),
            Err(e) => log::error!("An unexpected error occurred while pushing to the store: {e}"),
        }

        if let Err(e) = self.pull(&mut meta).await {
            log::error!("An unexpected error occurred while pulling from the store: {e}");
        }
        log::info!("secret rolled over");
    }

    async fn pull(&self, meta: &mut Meta) -> Result<()> {
        let versioned = self.store.get(&self.path).await?;
        let record = SecretRecord::decode(&versioned.data)?;
        meta.version = versioned.version;
        meta.next_secret = record.next;
        meta.next_rollover = record.next_rollover;

        let local = self.rollover.load();
        if local.current() != &record.current || local.previous() != record.previous.as_ref() {
            log::debug!("adopting secrets published by another process");
            self.rollover.publish(SecretState {
                current: record.current,
                previous: record.previous,
            });
        }
        Ok(())
    }
}

impl SecretSource for CoordinatedSecretSource {
    fn snapshot(&self) -> Arc<SecretState> {
        self.inner.rollover.load()
    }

    fn close(&self) {
        self.task.abort();
    }
}

impl fmt::Debug for CoordinatedSecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatedSecretSource")
            .field("path", &self.inner.path)
            .field("rotating", &self.is_rotating())
            .finish()
    }
}

impl fmt::Debug for CoordinatedSecretSourceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatedSecretSourceBuilder")
            .field("path", &self.path)
            .field("validity", &self.validity)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::secret::store::MemoryStore;
    use rand::SeedableRng;
    use std::io::Write;

    fn record(previous: Option<&'static [u8]>) -> SecretRecord {
        SecretRecord {
            next: Bytes::from_static(b"next"),
            current: Bytes::from_static(b"cur"),
            previous: previous.map(Bytes::from_static),
            next_rollover: 1_234,
        }
    }

    #[test]
    fn test_record_layout() {
        let encoded = record(None).encode();
        let expected: Vec<u8> = [
            &0i32.to_be_bytes()[..],
            &4i32.to_be_bytes(),
            b"next",
            &3i32.to_be_bytes(),
            b"cur",
            &0i32.to_be_bytes(),
            &1_234i64.to_be_bytes(),
        ]
        .concat();
        assert_eq!(&encoded[..], &expected[..]);
        assert_eq!(SecretRecord::decode(&encoded).unwrap(), record(None));

        let with_previous = record(Some(b"prev"));
        assert_eq!(
            SecretRecord::decode(&with_previous.encode()).unwrap(),
            with_previous
        );
    }

    #[test]
    fn test_record_rejects_newer_version() {
        let mut encoded = record(None).encode().to_vec();
        encoded[..4].copy_from_slice(&1i32.to_be_bytes());
        assert!(SecretRecord::decode(&encoded).unwrap_err().is_store());
    }

    #[test]
    fn test_record_rejects_truncation() {
        let encoded = record(Some(b"prev")).encode();
        for len in [0, 3, 6, 10, encoded.len() - 1] {
            assert!(SecretRecord::decode(&encoded[..len]).unwrap_err().is_store());
        }
    }

    #[test]
    fn test_record_rejects_negative_length() {
        let mut encoded = record(None).encode().to_vec();
        encoded[4..8].copy_from_slice(&(-1i32).to_be_bytes());
        assert!(SecretRecord::decode(&encoded).unwrap_err().is_store());
    }

    #[test]
    fn test_settings_defaults() {
        let props = Properties::new().with(STORE_PATH, "/secrets");
        let settings = StoreSettings::from_properties(&props).unwrap();
        assert_eq!(settings.connection_string(), "localhost:2181");
        assert_eq!(settings.path(), "/secrets");
        assert_eq!(settings.auth(), &StoreAuth::None);
    }

    #[test]
    fn test_settings_sasl_fails_closed() {
        let props = Properties::new()
            .with(STORE_PATH, "/secrets")
            .with(STORE_AUTH_TYPE, "sasl");
        assert!(StoreSettings::from_properties(&props)
            .unwrap_err()
            .is_configuration());

        let props = props
            .with(STORE_KERBEROS_PRINCIPAL, "store/host@REALM")
            .with(STORE_KERBEROS_KEYTAB, "/nonexistent/store.keytab");
        assert!(StoreSettings::from_properties(&props)
            .unwrap_err()
            .is_configuration());

        let mut keytab = tempfile::NamedTempFile::new().unwrap();
        keytab.write_all(b"\x05\x02").unwrap();
        let props = props.with(STORE_KERBEROS_KEYTAB, keytab.path().to_string_lossy());
        let settings = StoreSettings::from_properties(&props).unwrap();
        assert!(matches!(
            settings.auth(),
            StoreAuth::Sasl { principal, .. } if principal == "store/host@REALM"
        ));
    }

    #[test]
    fn test_settings_rejects_unknown_auth() {
        let props = Properties::new()
            .with(STORE_PATH, "/secrets")
            .with(STORE_AUTH_TYPE, "digest");
        assert!(StoreSettings::from_properties(&props)
            .unwrap_err()
            .is_configuration());
    }

    #[tokio::test]
    async fn test_init_creates_record() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(10_000));
        let source = CoordinatedSecretSource::builder(store.clone(), "/secret")
            .validity(Duration::from_secs(1))
            .clock(clock)
            .rng(StdRng::seed_from_u64(5))
            .schedule(false)
            .init()
            .await
            .unwrap();

        let stored = SecretRecord::decode(&store.get("/secret").await.unwrap().data).unwrap();
        assert_eq!(source.current_secret(), stored.current);
        assert!(source.snapshot().previous().is_none());
        assert_eq!(source.next_rollover().await, 11_000);
        assert_eq!(source.version().await, 0);
        assert!(!source.is_rotating());
    }

    #[tokio::test]
    async fn test_init_adopts_existing_record() {
        let store = Arc::new(MemoryStore::new());
        store.create("/secret", record(Some(b"prev")).encode()).await.unwrap();

        let source = CoordinatedSecretSource::builder(store, "/secret")
            .clock(Arc::new(ManualClock::new(0)))
            .schedule(false)
            .init()
            .await
            .unwrap();
        assert_eq!(source.current_secret(), Bytes::from_static(b"cur"));
        assert_eq!(
            source.all_secrets(),
            vec![Bytes::from_static(b"cur"), Bytes::from_static(b"prev")]
        );
        assert_eq!(source.next_rollover().await, 1_234);
    }

    #[tokio::test]
    async fn test_init_fails_on_corrupt_record() {
        let store = Arc::new(MemoryStore::new());
        store.create("/secret", Bytes::from_static(b"\x00\x00")).await.unwrap();
        let err = CoordinatedSecretSource::builder(store, "/secret")
            .schedule(false)
            .init()
            .await
            .unwrap_err();
        assert!(err.is_store());
    }

    #[tokio::test]
    async fn test_roll_promotes_next() {
        let store = Arc::new(MemoryStore::new());
        let source = CoordinatedSecretSource::builder(store.clone(), "/secret")
            .validity(Duration::from_secs(1))
            .clock(Arc::new(ManualClock::new(0)))
            .rng(StdRng::seed_from_u64(9))
            .schedule(false)
            .init()
            .await
            .unwrap();
        let before = SecretRecord::decode(&store.get("/secret").await.unwrap().data).unwrap();

        source.roll_secret().await;

        let after = SecretRecord::decode(&store.get("/secret").await.unwrap().data).unwrap();
        assert_eq!(source.current_secret(), before.next);
        assert_eq!(source.snapshot().previous(), Some(&before.current));
        assert_eq!(after.current, before.next);
        assert_eq!(after.previous, Some(before.current));
        assert_eq!(after.next_rollover, 2_000);
        assert_eq!(source.version().await, 1);
    }
}
