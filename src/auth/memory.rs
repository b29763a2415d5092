use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{
    repo::{StoreError, UserStore},
    repo_types::{Role, User, UserUpdate, VerifyOutcome},
};

/// In-process `UserStore` with the same uniqueness and atomicity rules as Postgres.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record directly, bypassing the flows.
    pub fn seed(&self, email: &str, password_hash: &str, is_active: bool, role: Role) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            is_active,
            is_verified: true,
            role,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut users = self.users.lock().unwrap();
        assert!(users.iter().all(|u| u.email != email), "seeded duplicate email");
        users.push(user.clone());
        user
    }

    pub fn count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    fn new_user(email: &str, password_hash: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            is_active: true,
            is_verified: true,
            role: Role::default(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.lock().unwrap().clone())
    }

    async fn verify_or_create(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<(User, VerifyOutcome), StoreError> {
        let mut users = self.users.lock().unwrap();
        match users.iter_mut().find(|u| u.email == email) {
            Some(user) if user.is_verified => Ok((user.clone(), VerifyOutcome::AlreadyVerified)),
            Some(user) => {
                user.is_active = true;
                user.is_verified = true;
                Ok((user.clone(), VerifyOutcome::Verified))
            }
            None => {
                let user = Self::new_user(email, password_hash);
                users.push(user.clone());
                Ok((user, VerifyOutcome::Created))
            }
        }
    }

    async fn find_or_create_federated(&self, email: &str) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.email == email) {
            user.is_verified = true;
            return Ok(user.clone());
        }
        let user = Self::new_user(email, "");
        users.push(user.clone());
        Ok(user)
    }

    async fn set_password_hash(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.lock().unwrap();
        Ok(users.iter_mut().find(|u| u.email == email).map(|user| {
            user.password_hash = password_hash.to_string();
            user.clone()
        }))
    }

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, StoreError> {
        let mut users = self.users.lock().unwrap();
        if let Some(email) = &update.email {
            if users.iter().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::DuplicateEmail);
            }
        }
        Ok(users.iter_mut().find(|u| u.id == id).map(|user| {
            if let Some(email) = update.email {
                user.email = email;
            }
            if let Some(hash) = update.password_hash {
                user.password_hash = hash;
            }
            if let Some(active) = update.is_active {
                user.is_active = active;
            }
            user.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_or_create_reports_each_transition() {
        let store = MemoryUserStore::new();
        let (user, outcome) = store.verify_or_create("a@x.com", "h1").await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Created);
        assert!(user.is_active && user.is_verified);
        assert_eq!(user.password_hash, "h1");

        let (again, outcome) = store.verify_or_create("a@x.com", "h2").await.unwrap();
        assert_eq!(outcome, VerifyOutcome::AlreadyVerified);
        assert_eq!(again.id, user.id);
        assert_eq!(again.password_hash, "h1");
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn update_refuses_to_steal_an_email() {
        let store = MemoryUserStore::new();
        store.seed("a@x.com", "h", true, Role::User);
        let b = store.seed("b@x.com", "h", true, Role::User);

        let err = store
            .update(
                b.id,
                UserUpdate {
                    email: Some("a@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn federated_creation_has_empty_hash() {
        let store = MemoryUserStore::new();
        let user = store.find_or_create_federated("g@x.com").await.unwrap();
        assert!(user.is_federated_only());
        assert!(user.is_active && user.is_verified);
        assert_eq!(user.role, Role::User);

        let same = store.find_or_create_federated("g@x.com").await.unwrap();
        assert_eq!(same.id, user.id);
        assert_eq!(store.count(), 1);
    }
}
