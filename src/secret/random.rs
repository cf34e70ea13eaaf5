// src/secret/random.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::rollover::{self, Rollover, Task};
use super::{SecretSource, SecretState};
use crate::Result;

/// A process-local secret regenerated every rollover interval.
///
/// Cookies signed by one process cannot be verified by another; use a
/// [`CoordinatedSecretSource`](super::CoordinatedSecretSource) for fleets.
pub struct RandomSecretSource {
    rollover: Arc<Rollover>,
    task: Task,
}

impl RandomSecretSource {
    /// Creates a source with a fresh secret and no rotation scheduled.
    pub fn new() -> Self {
        Self::from_rollover(Rollover::from_entropy())
    }

    /// Uses a deterministic generator.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self::from_rollover(Rollover::new(rng))
    }

    fn from_rollover(rollover: Rollover) -> Self {
        RandomSecretSource {
            rollover: Arc::new(rollover),
            task: Task::default(),
        }
    }

    /// Rotates the secret every `validity` on the current tokio runtime
    /// until the source is closed or dropped.
    pub fn start(self, validity: Duration) -> Result<Self> {
        let rollover = self.rollover.clone();
        let handle = rollover::schedule(validity, validity, move || {
            let rollover = rollover.clone();
            async move {
                roll(&rollover);
            }
        })?;
        self.task.set(handle);
        log::debug!("random secret rotation every {validity:?}");
        Ok(self)
    }

    /// Replaces the current secret with a new one; the old one stays
    /// valid as the previous secret.
    pub fn roll_secret(&self) {
        roll(&self.rollover);
    }

    pub fn is_rotating(&self) -> bool {
        self.task.is_running()
    }
}

fn roll(rollover: &Rollover) {
    rollover.rotate_to(rollover.generate());
    log::info!("secret rolled over");
}

impl Default for RandomSecretSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretSource for RandomSecretSource {
    fn snapshot(&self) -> Arc<SecretState> {
        self.rollover.load()
    }

    fn close(&self) {
        self.task.abort();
    }
}

impl fmt::Debug for RandomSecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomSecretSource")
            .field("rotating", &self.is_rotating())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    #[test]
    fn test_roll_secret_shifts_current_to_previous() {
        let source = RandomSecretSource::seeded(42);
        let first = source.current_secret();
        assert_eq!(first.len(), rollover::SECRET_LEN);
        assert!(source.snapshot().previous().is_none());

        source.roll_secret();
        let state = source.snapshot();
        assert_ne!(state.current(), &first);
        assert_eq!(state.previous(), Some(&first));
        assert_eq!(source.all_secrets().len(), 2);
    }

    #[test]
    fn test_seeded_sources_agree() {
        assert_eq!(
            RandomSecretSource::seeded(3).current_secret(),
            RandomSecretSource::seeded(3).current_secret()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rotates_on_schedule() {
        let source = RandomSecretSource::seeded(1)
            .start(Duration::from_secs(60))
            .unwrap();
        assert!(source.is_rotating());
        let first = source.current_secret();

        time::sleep(Duration::from_secs(59)).await;
        assert_eq!(source.current_secret(), first);

        time::sleep(Duration::from_secs(2)).await;
        assert_ne!(source.current_secret(), first);
        assert_eq!(source.snapshot().previous(), Some(&first));

        source.close();
        assert!(!source.is_rotating());
        let after_close = source.current_secret();
        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.current_secret(), after_close);
    }
}
