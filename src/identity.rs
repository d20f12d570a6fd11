use std::env;

use tokio::sync::watch;
use tracing::info;

/// Signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// Stable user id, also the player key in sessions.
    pub uid: String,
    /// Name shown to other players.
    pub display_name: String,
    /// Avatar image URL, may be empty.
    pub avatar_url: String,
}

/// Source of the local user's identity.
///
/// `watch` lets long-running session tasks observe sign-out or a user switch.
pub trait IdentityProvider: Send + Sync {
    /// Signed-in user, if any.
    fn current_user(&self) -> Option<UserProfile>;
    /// Receiver notified on sign-in, sign-out and user changes.
    fn watch(&self) -> watch::Receiver<Option<UserProfile>>;
}

/// Identity provider holding a single, explicitly assigned user.
pub struct StaticIdentityProvider {
    user: watch::Sender<Option<UserProfile>>,
}

impl StaticIdentityProvider {
    /// Provider starting with `user`, or signed out.
    pub fn new(user: Option<UserProfile>) -> Self {
        let (user, _rx) = watch::channel(user);
        Self { user }
    }

    /// Provider with `user` already signed in.
    pub fn signed_in(user: UserProfile) -> Self {
        Self::new(Some(user))
    }

    /// Build from `RACE_ROOM_UID`, `RACE_ROOM_DISPLAY_NAME` and `RACE_ROOM_AVATAR_URL`.
    /// Without a uid the provider starts signed out.
    pub fn from_env() -> Self {
        let Ok(uid) = env::var("RACE_ROOM_UID") else {
            info!("RACE_ROOM_UID not set, starting signed out");
            return Self::new(None);
        };
        let display_name = env::var("RACE_ROOM_DISPLAY_NAME").unwrap_or_else(|_| uid.clone());
        let avatar_url = env::var("RACE_ROOM_AVATAR_URL").unwrap_or_default();
        info!(uid = %uid, "signed in from environment");
        Self::signed_in(UserProfile {
            uid,
            display_name,
            avatar_url,
        })
    }

    /// Replace the current user.
    pub fn sign_in(&self, user: UserProfile) {
        self.user.send_replace(Some(user));
    }

    /// Clear the current user.
    pub fn sign_out(&self) {
        self.user.send_replace(None);
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn current_user(&self) -> Option<UserProfile> {
        self.user.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<UserProfile>> {
        self.user.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ada() -> UserProfile {
        UserProfile {
            uid: "a1".into(),
            display_name: "Ada".into(),
            avatar_url: String::new(),
        }
    }

    #[test]
    fn sign_out_clears_current_user() {
        let provider = StaticIdentityProvider::signed_in(ada());
        assert_eq!(provider.current_user(), Some(ada()));

        provider.sign_out();
        assert_eq!(provider.current_user(), None);
    }

    #[tokio::test]
    async fn watchers_observe_changes() {
        let provider = StaticIdentityProvider::new(None);
        let mut rx = provider.watch();

        provider.sign_in(ada());
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().map(|u| u.uid.as_str()), Some("a1"));
    }
}
