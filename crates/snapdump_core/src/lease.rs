//! Lease and expiry state machine.
//!
//! Shared by [`crate::ReplicationContext`] and by sweepers that decide when
//! a context may be destroyed:
//!
//! ```text
//!  ACTIVE --use ok--> LEASED --release to 0--> ACTIVE
//!  ACTIVE --deleted or expired, no leases--> RECLAIMABLE (terminal)
//! ```
//!
//! A leased context is never reclaimable, however long ago it expired.

use crate::clock::Timestamp;
use crate::error::ReplicationError;
use std::time::Duration;

/// Lifecycle phase of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPhase {
    /// No outstanding leases; still alive.
    Active,
    /// At least one lease is held.
    Leased,
    /// Deleted or expired with no leases; may be destroyed.
    Reclaimable,
}

/// Why a lease request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseDenied {
    /// The context has been marked deleted.
    Deleted,
    /// An exclusive lease is held.
    ExclusiveHeld,
    /// An exclusive lease was requested while shared leases are held.
    InUse,
}

impl LeaseDenied {
    /// Converts the refusal into an error for `context`.
    pub(crate) fn into_error(self, context: impl std::fmt::Display) -> ReplicationError {
        match self {
            Self::Deleted => ReplicationError::gone(format!("{context} is deleted")),
            Self::ExclusiveHeld => {
                ReplicationError::conflict(format!("{context} is leased exclusively"))
            }
            Self::InUse => ReplicationError::conflict(format!(
                "{context} is in use, cannot lease exclusively"
            )),
        }
    }
}

/// Lease bookkeeping for one context.
#[derive(Debug, Clone)]
pub struct LeaseState {
    ttl: Duration,
    expires: Timestamp,
    users: usize,
    exclusive: bool,
    deleted: bool,
}

impl LeaseState {
    /// Creates an unleased state expiring `ttl` after `now`.
    #[must_use]
    pub fn new(ttl: Duration, now: Timestamp) -> Self {
        Self {
            ttl,
            expires: now.saturating_add(ttl),
            users: 0,
            exclusive: false,
            deleted: false,
        }
    }

    /// Tries to take a lease.
    ///
    /// On success the lease count is incremented and the expiry moves to
    /// `now + ttl` (the configured TTL when `ttl` is `None`). On failure
    /// nothing changes.
    pub fn try_acquire(
        &mut self,
        now: Timestamp,
        ttl: Option<Duration>,
        exclusive: bool,
    ) -> Result<(), LeaseDenied> {
        if self.deleted {
            return Err(LeaseDenied::Deleted);
        }
        if self.exclusive {
            return Err(LeaseDenied::ExclusiveHeld);
        }
        if exclusive && self.users > 0 {
            return Err(LeaseDenied::InUse);
        }

        self.users += 1;
        self.exclusive = exclusive;
        self.expires = now.saturating_add(ttl.unwrap_or(self.ttl));
        Ok(())
    }

    /// Gives back one lease.
    ///
    /// Returns the number of leases still held. A release without a
    /// matching lease changes nothing.
    pub fn release(&mut self) -> usize {
        self.users = self.users.saturating_sub(1);
        if self.users == 0 {
            self.exclusive = false;
        }
        self.users
    }

    /// Marks the context deleted. Idempotent.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    /// Returns true once marked deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Returns true while any lease is held.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.users > 0
    }

    /// Returns true while an exclusive lease is held.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Returns the number of leases held.
    #[must_use]
    pub fn users(&self) -> usize {
        self.users
    }

    /// Returns the configured TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the expiry time.
    #[must_use]
    pub fn expires(&self) -> Timestamp {
        self.expires
    }

    /// Returns true once `now` is past the expiry time.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires
    }

    /// Returns true if the context may be destroyed at `now`.
    #[must_use]
    pub fn is_reclaimable(&self, now: Timestamp) -> bool {
        self.users == 0 && (self.deleted || self.is_expired(now))
    }

    /// Returns the lifecycle phase at `now`.
    #[must_use]
    pub fn phase(&self, now: Timestamp) -> ContextPhase {
        if self.is_used() {
            ContextPhase::Leased
        } else if self.is_reclaimable(now) {
            ContextPhase::Reclaimable
        } else {
            ContextPhase::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    fn state() -> LeaseState {
        LeaseState::new(TTL, Timestamp::ZERO)
    }

    #[test]
    fn new_state_is_active() {
        let s = state();
        assert_eq!(s.phase(Timestamp::ZERO), ContextPhase::Active);
        assert_eq!(s.expires(), Timestamp::from_secs(30));
    }

    #[test]
    fn unleased_context_reclaimable_after_ttl() {
        let s = state();
        assert!(!s.is_reclaimable(Timestamp::from_secs(30)));
        assert!(s.is_reclaimable(Timestamp::from_secs(31)));
        assert!(!s.is_deleted());
    }

    #[test]
    fn leased_context_never_reclaimable() {
        let mut s = state();
        s.try_acquire(Timestamp::ZERO, None, false).unwrap();
        s.mark_deleted();
        assert!(!s.is_reclaimable(Timestamp::from_secs(10_000)));
        assert_eq!(s.phase(Timestamp::from_secs(10_000)), ContextPhase::Leased);

        s.release();
        assert_eq!(s.phase(Timestamp::from_secs(10_000)), ContextPhase::Reclaimable);
    }

    #[test]
    fn exclusive_twice_fails() {
        let mut s = state();
        let ttl = Some(Duration::from_secs(10));
        assert!(s.try_acquire(Timestamp::ZERO, ttl, true).is_ok());
        assert_eq!(
            s.try_acquire(Timestamp::ZERO, ttl, true),
            Err(LeaseDenied::ExclusiveHeld)
        );
        assert_eq!(s.users(), 1);
    }

    #[test]
    fn shared_after_exclusive_fails() {
        let mut s = state();
        s.try_acquire(Timestamp::ZERO, None, true).unwrap();
        assert_eq!(
            s.try_acquire(Timestamp::ZERO, None, false),
            Err(LeaseDenied::ExclusiveHeld)
        );
    }

    #[test]
    fn exclusive_after_shared_fails() {
        let mut s = state();
        s.try_acquire(Timestamp::ZERO, None, false).unwrap();
        assert_eq!(
            s.try_acquire(Timestamp::ZERO, None, true),
            Err(LeaseDenied::InUse)
        );
    }

    #[test]
    fn shared_leases_stack() {
        let mut s = state();
        for _ in 0..5 {
            s.try_acquire(Timestamp::ZERO, None, false).unwrap();
        }
        assert_eq!(s.users(), 5);
        assert_eq!(s.release(), 4);
    }

    #[test]
    fn release_clears_exclusive() {
        let mut s = state();
        s.try_acquire(Timestamp::ZERO, None, true).unwrap();
        assert!(s.is_exclusive());
        s.release();
        assert!(!s.is_exclusive());
        assert!(s.try_acquire(Timestamp::ZERO, None, false).is_ok());
    }

    #[test]
    fn unmatched_release_is_harmless() {
        let mut s = state();
        assert_eq!(s.release(), 0);
        assert!(!s.is_used());
        s.try_acquire(Timestamp::ZERO, None, true).unwrap();
        assert_eq!(s.users(), 1);
    }

    #[test]
    fn acquire_renews_expiry() {
        let mut s = state();
        let now = Timestamp::from_secs(100);
        s.try_acquire(now, Some(Duration::from_secs(5)), false).unwrap();
        assert_eq!(s.expires(), Timestamp::from_secs(105));
        s.try_acquire(now, None, false).unwrap();
        assert_eq!(s.expires(), Timestamp::from_secs(130));
    }

    #[test]
    fn deleted_refuses_leases() {
        let mut s = state();
        s.mark_deleted();
        s.mark_deleted();
        assert_eq!(
            s.try_acquire(Timestamp::ZERO, None, false),
            Err(LeaseDenied::Deleted)
        );
        assert_eq!(s.users(), 0);
        assert!(s.is_reclaimable(Timestamp::ZERO));
    }

    #[test]
    fn denial_maps_to_error_kinds() {
        use crate::error::ErrorKind;
        assert_eq!(LeaseDenied::Deleted.into_error("batch:1").kind(), ErrorKind::Gone);
        assert_eq!(
            LeaseDenied::ExclusiveHeld.into_error("batch:1").kind(),
            ErrorKind::Conflict
        );
    }
}
