//! Identity / onboarding boundary.
//!
//! The verification flow itself lives elsewhere; the engine consumes it as
//! two booleans plus the connected destination account, per user.

use std::collections::HashMap;

use crate::model::{DestinationRef, UserId};

pub trait IdentityProvider {
    /// The user's connected payout destination, if onboarding linked one.
    fn payout_destination(&self, user: &UserId) -> Option<DestinationRef>;

    /// Whether funds can be paid out to this user at all.
    fn is_payout_destination_configured(&self, user: &UserId) -> bool {
        self.payout_destination(user).is_some()
    }

    /// Whether the identity-verification flow completed for this user.
    fn is_identity_verified(&self, user: &UserId) -> bool;
}

/// A user's onboarding state as the engine sees it.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub destination: Option<DestinationRef>,
    pub identity_verified: bool,
}

/// In-memory directory of user onboarding state, loaded from the flat-file
/// store in the binary and built directly in tests.
#[derive(Debug, Default)]
pub struct Directory {
    users: HashMap<UserId, UserProfile>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user: UserId, profile: UserProfile) {
        self.users.insert(user, profile);
    }

    /// Shorthand for a fully payout-ready user.
    pub fn insert_ready(&mut self, user: impl Into<String>, destination: impl Into<String>) {
        self.insert(
            UserId::new(user),
            UserProfile {
                destination: Some(DestinationRef::new(destination)),
                identity_verified: true,
            },
        );
    }
}

impl IdentityProvider for Directory {
    fn payout_destination(&self, user: &UserId) -> Option<DestinationRef> {
        self.users.get(user).and_then(|p| p.destination.clone())
    }

    fn is_identity_verified(&self, user: &UserId) -> bool {
        self.users.get(user).is_some_and(|p| p.identity_verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_has_nothing() {
        let dir = Directory::new();
        let user = UserId::new("ghost");
        assert!(dir.payout_destination(&user).is_none());
        assert!(!dir.is_payout_destination_configured(&user));
        assert!(!dir.is_identity_verified(&user));
    }

    #[test]
    fn ready_user_is_configured_and_verified() {
        let mut dir = Directory::new();
        dir.insert_ready("h1", "acct_1");

        let user = UserId::new("h1");
        assert_eq!(dir.payout_destination(&user), Some(DestinationRef::new("acct_1")));
        assert!(dir.is_payout_destination_configured(&user));
        assert!(dir.is_identity_verified(&user));
    }

    #[test]
    fn destination_without_verification() {
        let mut dir = Directory::new();
        dir.insert(
            UserId::new("h2"),
            UserProfile {
                destination: Some(DestinationRef::new("acct_2")),
                identity_verified: false,
            },
        );

        let user = UserId::new("h2");
        assert!(dir.is_payout_destination_configured(&user));
        assert!(!dir.is_identity_verified(&user));
    }
}
