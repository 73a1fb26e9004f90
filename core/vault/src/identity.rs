//! Identity collaborator.

use std::sync::RwLock;

use passbox_common::{Error, Result, UserId};

/// Supplies the id of the user the session acts for.
pub trait IdentityProvider: Send + Sync {
    /// The current user.
    ///
    /// # Errors
    /// - [`Error::Identity`] when nobody is signed in
    fn current_user(&self) -> Result<UserId>;
}

/// Process-local identity that can be signed in and out.
#[derive(Debug, Default)]
pub struct LocalIdentity {
    user: RwLock<Option<UserId>>,
}

impl LocalIdentity {
    /// Identity signed in as `user`.
    pub fn new(user: UserId) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    /// Identity with nobody signed in.
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: UserId) {
        if let Ok(mut current) = self.user.write() {
            *current = Some(user);
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut current) = self.user.write() {
            *current = None;
        }
    }
}

impl IdentityProvider for LocalIdentity {
    fn current_user(&self) -> Result<UserId> {
        self.user
            .read()
            .map_err(|_| Error::Identity("Identity lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| Error::Identity("No authenticated user".to_string()))
    }
}
