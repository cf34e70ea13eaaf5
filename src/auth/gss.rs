// src/auth/gss.rs

//! Client-side GSS primitives.
//!
//! The crate does not link a GSS library. Applications plug one in through
//! [`Initiator`], typically backed by the user's credential cache.

use std::error::Error as StdError;

/// Creates security contexts on behalf of the current user.
pub trait Initiator: Send + Sync {
    /// Starts a context for `service_principal` (`HTTP/<host>`), requesting
    /// mutual authentication and credential delegation.
    fn context(
        &self,
        service_principal: &str,
    ) -> Result<Box<dyn InitiatorContext>, Box<dyn StdError + Send + Sync>>;
}

/// One security context being established.
pub trait InitiatorContext: Send {
    /// Consumes the server's token (empty on the first call) and returns the
    /// token to send plus whether the context is now established.
    fn initialize(
        &mut self,
        input: &[u8],
    ) -> Result<(Vec<u8>, bool), Box<dyn StdError + Send + Sync>>;
}
