//! In-memory user store for fast, deterministic tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use user_service_core::store::{StoreError, UniqueField, UserStore};
use user_service_core::user::{NewUser, User, UserChanges, UserId};

/// `HashMap`-backed [`UserStore`] enforcing the same uniqueness rules as the
/// Postgres store.
///
/// Clones share state, so a test can keep a handle for assertions after
/// passing the store to a service.
///
/// # Example
///
/// ```
/// use user_service_testing::InMemoryUserStore;
/// use user_service_core::store::UserStore;
/// use user_service_core::user::NewUser;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryUserStore::new();
/// let user = store.create(NewUser::parse(Some("alice".into()), Some("a@x.io".into()))?).await?;
/// assert_eq!(store.get(user.id).await?, user);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<UserId, User>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryUserStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StoreError::Backend`] (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().unwrap().len()
    }

    /// Whether the store holds no users.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.read().unwrap().is_empty()
    }

    /// All stored users, in no particular order.
    #[must_use]
    pub fn users(&self) -> Vec<User> {
        self.users.read().unwrap().values().cloned().collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Backend("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

/// First uniqueness violation `candidate` would cause, ignoring its own row.
fn find_conflict(users: &HashMap<UserId, User>, candidate: &User) -> Option<StoreError> {
    users
        .values()
        .filter(|other| other.id != candidate.id)
        .find_map(|other| {
            if other.username == candidate.username {
                Some(StoreError::Conflict {
                    field: UniqueField::Username,
                    value: candidate.username.clone(),
                })
            } else if other.email == candidate.email {
                Some(StoreError::Conflict {
                    field: UniqueField::Email,
                    value: candidate.email.clone(),
                })
            } else {
                None
            }
        })
}

impl UserStore for InMemoryUserStore {
    fn create(
        &self,
        user: NewUser,
    ) -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let user = user.into_user(UserId::new());
            let mut users = self.users.write().unwrap();
            if let Some(conflict) = find_conflict(&users, &user) {
                return Err(conflict);
            }
            users.insert(user.id, user.clone());
            Ok(user)
        })
    }

    fn get(
        &self,
        id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            self.users
                .read()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound(id))
        })
    }

    fn update(
        &self,
        id: UserId,
        changes: UserChanges,
    ) -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let mut users = self.users.write().unwrap();
            let current = users.get(&id).ok_or(StoreError::NotFound(id))?;
            let updated = changes.apply_to(current);
            if let Some(conflict) = find_conflict(&users, &updated) {
                return Err(conflict);
            }
            users.insert(id, updated.clone());
            Ok(updated)
        })
    }

    fn delete(
        &self,
        id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            self.users
                .write()
                .unwrap()
                .remove(&id)
                .ok_or(StoreError::NotFound(id))
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move { self.check_available() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser::parse(Some(username.to_string()), Some(email.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_distinct_ids() {
        let store = InMemoryUserStore::new();
        let a = store.create(new_user("alice", "a@x.io")).await.unwrap();
        let b = store.create(new_user("bob", "b@x.io")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let store = InMemoryUserStore::new();
        store.create(new_user("alice", "a@x.io")).await.unwrap();

        let err = store.create(new_user("alice", "other@x.io")).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                field: UniqueField::Username,
                value: "alice".to_string()
            }
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_may_keep_own_values() {
        let store = InMemoryUserStore::new();
        let user = store.create(new_user("alice", "a@x.io")).await.unwrap();

        let changes = UserChanges::parse(Some("alice".to_string()), None).unwrap();
        let updated = store.update(user.id, changes).await.unwrap();
        assert_eq!(updated, user);
    }

    #[tokio::test]
    async fn test_update_into_taken_email_leaves_row_unchanged() {
        let store = InMemoryUserStore::new();
        store.create(new_user("alice", "a@x.io")).await.unwrap();
        let bob = store.create(new_user("bob", "b@x.io")).await.unwrap();

        let changes = UserChanges::parse(None, Some("a@x.io".to_string())).unwrap();
        let err = store.update(bob.id, changes).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: UniqueField::Email, .. }));
        assert_eq!(store.get(bob.id).await.unwrap(), bob);
    }

    #[tokio::test]
    async fn test_delete_frees_username() {
        let store = InMemoryUserStore::new();
        let user = store.create(new_user("alice", "a@x.io")).await.unwrap();
        assert_eq!(store.delete(user.id).await.unwrap(), user);
        assert_eq!(store.get(user.id).await, Err(StoreError::NotFound(user.id)));

        store.create(new_user("alice", "a@x.io")).await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_ping() {
        let store = InMemoryUserStore::new();
        assert!(store.ping().await.is_ok());
        store.set_unavailable(true);
        assert!(matches!(store.ping().await, Err(StoreError::Backend(_))));
    }
}
