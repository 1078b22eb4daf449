use sqlx::PgPool;

use crate::users::repo_types::{NewUser, User, UserChanges};

const USER_COLUMNS: &str = "id, username, email, full_name, bio, hashed_password, \
                            is_active, is_admin, created_at, updated_at";

impl User {
    /// Insert a new row. Uniqueness violations surface as a database error
    /// with `is_unique_violation()`; the caller decides how to report them.
    pub async fn insert(db: &PgPool, new_user: &NewUser) -> Result<User, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, full_name, bio, hashed_password, is_active, is_admin)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.full_name)
        .bind(&new_user.bio)
        .bind(&new_user.hashed_password)
        .bind(new_user.is_active)
        .bind(new_user.is_admin)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_username(db: &PgPool, username: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
    }

    /// List users in insertion order.
    pub async fn list(db: &PgPool, limit: i64, offset: i64) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await
    }

    /// Apply only the fields present in `changes` in a single atomic UPDATE.
    /// The nullable columns use a presence flag so an explicit NULL can be
    /// written, which COALESCE alone cannot express. Returns `None` when no
    /// row with `id` exists.
    pub async fn update(
        db: &PgPool,
        id: i64,
        changes: &UserChanges,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET
                username        = COALESCE($2, username),
                email           = COALESCE($3, email),
                full_name       = CASE WHEN $4 THEN $5 ELSE full_name END,
                bio             = CASE WHEN $6 THEN $7 ELSE bio END,
                hashed_password = COALESCE($8, hashed_password),
                is_active       = COALESCE($9, is_active),
                is_admin        = COALESCE($10, is_admin),
                updated_at      = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(changes.username.as_deref())
        .bind(changes.email.as_deref())
        .bind(changes.full_name.is_some())
        .bind(changes.full_name.clone().flatten())
        .bind(changes.bio.is_some())
        .bind(changes.bio.clone().flatten())
        .bind(changes.hashed_password.as_deref())
        .bind(changes.is_active)
        .bind(changes.is_admin)
        .fetch_optional(db)
        .await
    }

    /// Hard delete. Returns whether a row was removed.
    pub async fn delete(db: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
