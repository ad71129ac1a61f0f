use tasksync_shared::UserProfile;
use tokio::sync::watch;

use crate::backend::{IdentityProvider, OwnerQuery};
use crate::error::{SyncError, SyncResult};

/// Explicit signed-in context handed to every component that scopes
/// queries by owner.
pub struct Session<'a, I: IdentityProvider> {
    identity: &'a I,
}

impl<I: IdentityProvider> Clone for Session<'_, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I: IdentityProvider> Copy for Session<'_, I> {}

impl<'a, I: IdentityProvider> Session<'a, I> {
    pub fn new(identity: &'a I) -> Self {
        Self { identity }
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.identity.current_user()
    }

    pub fn require_user(&self) -> SyncResult<UserProfile> {
        self.identity.current_user().ok_or(SyncError::Unauthenticated)
    }

    pub fn owner_query(&self) -> SyncResult<OwnerQuery> {
        Ok(OwnerQuery::tasks_of(self.require_user()?.uid))
    }

    pub fn auth_changes(&self) -> watch::Receiver<Option<UserProfile>> {
        self.identity.watch()
    }
}

/// Display summary of the signed-in profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileCard {
    pub name: String,
    pub email: String,
    pub photo_url: Option<String>,
}

impl ProfileCard {
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            name: profile
                .display_name
                .clone()
                .unwrap_or_else(|| profile.uid.clone()),
            email: profile.email.clone().unwrap_or_default(),
            photo_url: profile.photo_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use tasksync_shared::UserProfile;
    use tokio::sync::watch;

    use super::{ProfileCard, Session};
    use crate::backend::IdentityProvider;
    use crate::error::SyncError;

    struct FixedIdentity {
        user: RefCell<Option<UserProfile>>,
        tx: watch::Sender<Option<UserProfile>>,
    }

    impl IdentityProvider for FixedIdentity {
        fn current_user(&self) -> Option<UserProfile> {
            self.user.borrow().clone()
        }

        fn watch(&self) -> watch::Receiver<Option<UserProfile>> {
            self.tx.subscribe()
        }
    }

    #[test]
    fn unauthenticated_without_user() {
        let (tx, _) = watch::channel(None);
        let identity = FixedIdentity {
            user: RefCell::new(None),
            tx,
        };
        let session = Session::new(&identity);
        assert!(matches!(session.require_user(), Err(SyncError::Unauthenticated)));
        assert!(session.owner_query().is_err());

        *identity.user.borrow_mut() = Some(UserProfile::new("u9"));
        assert_eq!(session.owner_query().expect("query").owner, "u9");
    }

    #[test]
    fn profile_card_falls_back_to_uid() {
        let mut profile = UserProfile::new("u1");
        assert_eq!(ProfileCard::from_profile(&profile).name, "u1");
        profile.display_name = Some("Ada".to_string());
        profile.email = Some("ada@example.com".to_string());
        let card = ProfileCard::from_profile(&profile);
        assert_eq!(card.name, "Ada");
        assert_eq!(card.email, "ada@example.com");
    }
}
