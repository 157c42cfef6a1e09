//! User store boundary and its Postgres implementation

use anyhow::Result;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::models::{NewUser, User};

/// Lookup boundary the login flow depends on.
///
/// Production wires in [`PostgresUserStore`]; tests substitute an in-memory
/// implementation. Callers must treat `Ok(None)` and `Err` the same way when
/// talking to the client, so a response never reveals whether an email is
/// registered.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a user by email. `Ok(None)` when no such user exists; `Err` on
    /// transport or query failure.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
}

/// User store backed by PostgreSQL
#[derive(Clone)]
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    /// Create a new Postgres-backed user store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a user, hashing the plaintext password on the way in.
    ///
    /// Not exposed on the HTTP surface; used for seeding and administrative
    /// setup.
    pub async fn create(&self, new_user: &NewUser) -> Result<User> {
        info!("Creating new user: {}", new_user.email);

        let password_hash = hash_password(&new_user.password)?;

        let row = sqlx::query(
            r#"
            INSERT INTO users (first_name, last_name, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, first_name, last_name, email, password_hash, created_at, updated_at
            "#,
        )
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.email)
        .bind(&password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(user_from_row(&row))
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, first_name, last_name, email, password_hash, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> User {
    User {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Hash a plaintext password with argon2 and a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?
        .to_string();

    Ok(password_hash)
}
