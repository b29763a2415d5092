use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{Role, User, UserRow, UserUpdate, VerifyOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("corrupt user record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

/// Keyed record store over users. Email uniqueness is enforced here, and every
/// mutation is a single atomic read-modify-write.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn list(&self) -> Result<Vec<User>, StoreError>;

    /// Materializes a pending registration: creates the record active and
    /// verified, or flips an existing unverified record to active and verified.
    async fn verify_or_create(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<(User, VerifyOutcome), StoreError>;

    /// Returns the record for `email`, creating a federated-only one if absent.
    /// Existing records are marked verified.
    async fn find_or_create_federated(&self, email: &str) -> Result<User, StoreError>;

    async fn set_password_hash(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<Option<User>, StoreError>;

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, StoreError>;
}

const USER_COLUMNS: &str =
    "id, email, password_hash, is_active, is_verified, role, created_at";

fn into_user(row: UserRow) -> Result<User, StoreError> {
    User::try_from(row).map_err(StoreError::Corrupt)
}

fn map_unique(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
        _ => StoreError::Backend(err),
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_user).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_user).transpose()
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, email"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(into_user).collect()
    }

    async fn verify_or_create(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<(User, VerifyOutcome), StoreError> {
        let mut tx = self.db.begin().await?;

        let existing = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 FOR UPDATE"
        ))
        .bind(email)
        .fetch_optional(&mut *tx)
        .await?;

        let result = match existing {
            Some(row) if row.is_verified => (into_user(row)?, VerifyOutcome::AlreadyVerified),
            Some(_) => {
                let row = sqlx::query_as::<_, UserRow>(&format!(
                    "UPDATE users SET is_active = TRUE, is_verified = TRUE \
                     WHERE email = $1 RETURNING {USER_COLUMNS}"
                ))
                .bind(email)
                .fetch_one(&mut *tx)
                .await?;
                (into_user(row)?, VerifyOutcome::Verified)
            }
            None => {
                let inserted = sqlx::query_as::<_, UserRow>(&format!(
                    "INSERT INTO users (id, email, password_hash, is_active, is_verified, role, created_at) \
                     VALUES ($1, $2, $3, TRUE, TRUE, $4, $5) \
                     ON CONFLICT (email) DO NOTHING \
                     RETURNING {USER_COLUMNS}"
                ))
                .bind(Uuid::new_v4())
                .bind(email)
                .bind(password_hash)
                .bind(Role::default().as_str())
                .bind(OffsetDateTime::now_utc())
                .fetch_optional(&mut *tx)
                .await?;

                match inserted {
                    Some(row) => (into_user(row)?, VerifyOutcome::Created),
                    // A concurrent verification of the same link won the insert.
                    None => {
                        let row = sqlx::query_as::<_, UserRow>(&format!(
                            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
                        ))
                        .bind(email)
                        .fetch_one(&mut *tx)
                        .await?;
                        (into_user(row)?, VerifyOutcome::AlreadyVerified)
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(result)
    }

    async fn find_or_create_federated(&self, email: &str) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, email, password_hash, is_active, is_verified, role, created_at) \
             VALUES ($1, $2, '', TRUE, TRUE, $3, $4) \
             ON CONFLICT (email) DO UPDATE SET is_verified = TRUE \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(Role::default().as_str())
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.db)
        .await?;
        into_user(row)
    }

    async fn set_password_hash(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET password_hash = $2 WHERE email = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(email)
        .bind(password_hash)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_user).transpose()
    }

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET \
                email = COALESCE($2, email), \
                password_hash = COALESCE($3, password_hash), \
                is_active = COALESCE($4, is_active) \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(update.email)
        .bind(update.password_hash)
        .bind(update.is_active)
        .fetch_optional(&self.db)
        .await
        .map_err(map_unique)?;
        row.map(into_user).transpose()
    }
}
