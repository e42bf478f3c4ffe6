//! User collaborator: profile lookup for notifications and receipts.
//!
//! Registration lives outside this system. The directory is fed from verified
//! token claims as users show up.

use std::collections::HashMap;
use std::sync::RwLock;

use agriconnect_auth::Role;
use agriconnect_core::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

pub trait UserDirectory: Send + Sync {
    fn get_user(&self, id: UserId) -> Option<UserProfile>;
}

impl<D> UserDirectory for std::sync::Arc<D>
where
    D: UserDirectory + ?Sized,
{
    fn get_user(&self, id: UserId) -> Option<UserProfile> {
        (**self).get_user(id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: UserProfile) {
        if let Ok(mut users) = self.users.write() {
            users.insert(profile.id, profile);
        }
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn get_user(&self, id: UserId) -> Option<UserProfile> {
        self.users.read().ok()?.get(&id).cloned()
    }
}
