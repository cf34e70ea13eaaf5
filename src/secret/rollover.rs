// src/secret/rollover.rs

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::SecretState;
use crate::error;
use crate::Result;

/// Length in bytes of generated secrets.
pub(crate) const SECRET_LEN: usize = 32;

/// The rotating half of a secret source: the published snapshot and the
/// generator new secrets come from.
pub(crate) struct Rollover {
    state: ArcSwap<SecretState>,
    rng: Mutex<StdRng>,
}

impl Rollover {
    pub(crate) fn new(mut rng: StdRng) -> Rollover {
        let first = generate(&mut rng);
        Rollover {
            state: ArcSwap::from_pointee(SecretState {
                current: first,
                previous: None,
            }),
            rng: Mutex::new(rng),
        }
    }

    pub(crate) fn from_entropy() -> Rollover {
        Rollover::new(StdRng::from_entropy())
    }

    pub(crate) fn load(&self) -> Arc<SecretState> {
        self.state.load_full()
    }

    pub(crate) fn publish(&self, state: SecretState) {
        self.state.store(Arc::new(state));
    }

    /// Makes `next` current and demotes the old current to previous.
    pub(crate) fn rotate_to(&self, next: Bytes) {
        self.state.rcu(|state| state.rotate(next.clone()));
    }

    pub(crate) fn generate(&self) -> Bytes {
        match self.rng.lock() {
            Ok(mut rng) => generate(&mut rng),
            Err(poisoned) => generate(&mut poisoned.into_inner()),
        }
    }
}

fn generate(rng: &mut StdRng) -> Bytes {
    let mut secret = vec![0u8; SECRET_LEN];
    rng.fill_bytes(&mut secret);
    Bytes::from(secret)
}

/// Runs `tick` after `initial_delay` and then every `period` on the current
/// tokio runtime.
pub(crate) fn schedule<F, Fut>(
    initial_delay: Duration,
    period: Duration,
    mut tick: F,
) -> Result<JoinHandle<()>>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if period.is_zero() {
        return Err(error::configuration("rollover interval must be positive"));
    }
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| error::configuration(format!("secret rotation needs a tokio runtime: {e}")))?;
    Ok(runtime.spawn(async move {
        let mut interval = time::interval_at(Instant::now() + initial_delay, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tick().await;
        }
    }))
}

/// Holds the rotation task and aborts it on drop.
#[derive(Default)]
pub(crate) struct Task(Mutex<Option<JoinHandle<()>>>);

impl Task {
    pub(crate) fn set(&self, handle: JoinHandle<()>) {
        if let Ok(mut slot) = self.0.lock() {
            if let Some(old) = slot.replace(handle) {
                old.abort();
            }
        }
    }

    pub(crate) fn abort(&self) {
        if let Ok(mut slot) = self.0.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.0
            .lock()
            .map(|slot| slot.as_ref().map_or(false, |h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.abort();
    }
}
