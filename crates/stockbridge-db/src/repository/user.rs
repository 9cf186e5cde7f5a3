//! # User Repository
//!
//! Store users are never synced. Imported sales and returns only resolve
//! their actor by username, and keep a null actor when it is unknown here.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::error::{DbError, DbResult};
use stockbridge_core::validation::validate_username;
use stockbridge_core::{new_id, User, UserRole};

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        UserRepository { pool }
    }

    /// Creates a user. Fails with `UniqueViolation` when the username is taken.
    pub async fn create(&self, username: &str, role: UserRole) -> DbResult<User> {
        validate_username(username)?;

        let user = User {
            id: new_id(),
            username: username.trim().to_string(),
            role,
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO users (id, username, role, created_at) VALUES (?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.username)
            .bind(user.role)
            .bind(user.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match DbError::from(e) {
                DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                    field,
                    value: user.username.clone(),
                },
                other => other,
            })?;

        info!(username = %user.username, role = ?user.role, "User created");
        Ok(user)
    }

    pub async fn get_by_username(&self, username: &str) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, role, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

}

/// Resolves a username to a local user id.
pub(crate) async fn user_id_by_username(
    conn: &mut SqliteConnection,
    username: Option<&str>,
) -> DbResult<Option<String>> {
    let Some(username) = username else {
        return Ok(None);
    };

    let id = sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}
