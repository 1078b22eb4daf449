use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::{ApiError, DuplicateField, DuplicateKind};
use crate::users::dto::{UserCreate, UserUpdate};
use crate::users::password::{hash_password, verify_password};
use crate::users::repo_types::{NewUser, User, UserChanges};

const MAX_PAGE_SIZE: i64 = 100;

/// Clamp pagination inputs to skip >= 0 and 1 <= limit <= 100. The handler
/// already defaults these; re-clamping here keeps the store queries bounded
/// no matter who calls.
pub(crate) fn clamp_page(skip: i64, limit: i64) -> (i64, i64) {
    (skip.max(0), limit.clamp(1, MAX_PAGE_SIZE))
}

/// Map a storage error, reporting unique-index violations as duplicates.
/// This is the safety net for writers racing past the service pre-checks;
/// the constraint name tells us which field collided.
fn map_write_error(e: sqlx::Error, kind: DuplicateKind) -> ApiError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            let field = match db_err.constraint() {
                Some("users_email_key") => DuplicateField::Email,
                _ => DuplicateField::Username,
            };
            return ApiError::Duplicate(field, kind);
        }
    }
    ApiError::Storage(e)
}

pub async fn create_user(db: &PgPool, data: UserCreate) -> Result<User, ApiError> {
    data.validate().map_err(ApiError::InvalidInput)?;

    // Pre-checks give a precise error without burning an id from the
    // sequence; the unique indexes remain the actual guarantee.
    if get_user_by_username(db, &data.username).await?.is_some() {
        warn!(username = %data.username, "username already registered");
        return Err(ApiError::Duplicate(
            DuplicateField::Username,
            DuplicateKind::Registered,
        ));
    }
    if get_user_by_email(db, &data.email).await?.is_some() {
        warn!(email = %data.email, "email already registered");
        return Err(ApiError::Duplicate(
            DuplicateField::Email,
            DuplicateKind::Registered,
        ));
    }

    let hashed_password = hash_password(&data.password)?;
    let new_user = NewUser {
        username: data.username,
        email: data.email,
        full_name: data.full_name,
        bio: data.bio,
        hashed_password,
        is_active: data.is_active,
        is_admin: data.is_admin,
    };
    let user = User::insert(db, &new_user)
        .await
        .map_err(|e| map_write_error(e, DuplicateKind::Registered))?;

    info!(user_id = user.id, username = %user.username, "user created");
    Ok(user)
}

pub async fn get_user(db: &PgPool, id: i64) -> Result<Option<User>, ApiError> {
    Ok(User::find_by_id(db, id).await?)
}

pub async fn get_user_by_username(db: &PgPool, username: &str) -> Result<Option<User>, ApiError> {
    Ok(User::find_by_username(db, username).await?)
}

pub async fn get_user_by_email(db: &PgPool, email: &str) -> Result<Option<User>, ApiError> {
    Ok(User::find_by_email(db, email).await?)
}

pub async fn list_users(db: &PgPool, skip: i64, limit: i64) -> Result<Vec<User>, ApiError> {
    let (skip, limit) = clamp_page(skip, limit);
    Ok(User::list(db, limit, skip).await?)
}

pub async fn update_user(db: &PgPool, id: i64, data: UserUpdate) -> Result<User, ApiError> {
    data.validate().map_err(ApiError::InvalidInput)?;

    let current = User::find_by_id(db, id).await?.ok_or(ApiError::NotFound)?;

    // Uniqueness re-checks only when the value actually changes, so a no-op
    // update of a user's own username does not conflict with itself.
    if let Some(username) = &data.username {
        if *username != current.username
            && get_user_by_username(db, username).await?.is_some()
        {
            warn!(user_id = id, username = %username, "username already taken");
            return Err(ApiError::Duplicate(
                DuplicateField::Username,
                DuplicateKind::Taken,
            ));
        }
    }
    if let Some(email) = &data.email {
        if *email != current.email && get_user_by_email(db, email).await?.is_some() {
            warn!(user_id = id, email = %email, "email already taken");
            return Err(ApiError::Duplicate(
                DuplicateField::Email,
                DuplicateKind::Taken,
            ));
        }
    }

    let changes = build_changes(data)?;

    // Nothing was supplied: skip the UPDATE entirely so updated_at is not
    // refreshed by a no-op request.
    if changes.is_empty() {
        return Ok(current);
    }

    let updated = User::update(db, id, &changes)
        .await
        .map_err(|e| map_write_error(e, DuplicateKind::Taken))?
        .ok_or(ApiError::NotFound)?;

    info!(user_id = id, "user updated");
    Ok(updated)
}

/// Turn the request DTO into a store-level change set, substituting the
/// password hash. Plaintext never crosses into the repo or the logs.
fn build_changes(data: UserUpdate) -> Result<UserChanges, ApiError> {
    let hashed_password = match data.password {
        Some(plain) => Some(hash_password(&plain)?),
        None => None,
    };
    Ok(UserChanges {
        username: data.username,
        email: data.email,
        full_name: data.full_name,
        bio: data.bio,
        hashed_password,
        is_active: data.is_active,
        is_admin: data.is_admin,
    })
}

pub async fn delete_user(db: &PgPool, id: i64) -> Result<(), ApiError> {
    if !User::delete(db, id).await? {
        return Err(ApiError::NotFound);
    }
    info!(user_id = id, "user deleted");
    Ok(())
}

/// Look up by username and check the password. Unknown usernames
/// short-circuit before any hashing runs; the response is identical to a
/// wrong password, but the elapsed time is not (see DESIGN.md).
pub async fn authenticate(db: &PgPool, username: &str, password: &str) -> Result<User, ApiError> {
    let found = User::find_by_username(db, username).await?;
    let user = check_credentials(found, username, password)?;
    info!(user_id = user.id, username = %user.username, "user authenticated");
    Ok(user)
}

/// Credential decision for a fetched user. A wrong password on a disabled
/// account reports bad credentials, not the disabled state; only callers
/// holding valid credentials learn the account is inactive.
fn check_credentials(
    found: Option<User>,
    username: &str,
    password: &str,
) -> Result<User, ApiError> {
    let user = match found {
        Some(u) => u,
        None => {
            warn!(username = %username, "login unknown username");
            return Err(ApiError::InvalidCredentials);
        }
    };

    if !verify_password(password, &user.hashed_password)? {
        warn!(user_id = user.id, "login invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    if !user.is_active {
        warn!(user_id = user.id, "login on disabled account");
        return Err(ApiError::AccountDisabled);
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_page_bounds_inputs() {
        assert_eq!(clamp_page(0, 100), (0, 100));
        assert_eq!(clamp_page(-5, 0), (0, 1));
        assert_eq!(clamp_page(4, 2), (4, 2));
        assert_eq!(clamp_page(0, 1000), (0, 100));
    }

    #[test]
    fn build_changes_hashes_the_password() {
        let data: UserUpdate =
            serde_json::from_str(r#"{"password": "new-password-1"}"#).unwrap();
        let changes = build_changes(data).unwrap();
        let hash = changes.hashed_password.expect("password change present");
        assert_ne!(hash, "new-password-1");
        assert!(verify_password("new-password-1", &hash).unwrap());
        assert!(changes.username.is_none());
        assert!(changes.bio.is_none());
    }

    #[test]
    fn build_changes_keeps_presence_of_nullable_fields() {
        let data: UserUpdate =
            serde_json::from_str(r#"{"full_name": null, "bio": "hi"}"#).unwrap();
        let changes = build_changes(data).unwrap();
        assert_eq!(changes.full_name, Some(None));
        assert_eq!(changes.bio, Some(Some("hi".into())));
        assert!(changes.hashed_password.is_none());
        assert!(!changes.is_empty());
    }

    #[test]
    fn empty_update_is_a_no_op_write() {
        // update_user returns the current row without touching the store
        // when the change set is empty, so updated_at stays put.
        let data: UserUpdate = serde_json::from_str("{}").unwrap();
        assert!(build_changes(data).unwrap().is_empty());

        let data: UserUpdate = serde_json::from_str(r#"{"is_active": false}"#).unwrap();
        assert!(!build_changes(data).unwrap().is_empty());
    }

    fn stored_user(hashed_password: String, is_active: bool) -> User {
        User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            full_name: None,
            bio: None,
            hashed_password,
            is_active,
            is_admin: false,
            created_at: time::OffsetDateTime::UNIX_EPOCH,
            updated_at: time::OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn credentials_decision_table() {
        let hash = hash_password("right-password").unwrap();

        let err = check_credentials(None, "ghost", "whatever").unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));

        let active = stored_user(hash.clone(), true);
        let err = check_credentials(Some(active), "alice", "wrong-password").unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));

        // Disabled state is not revealed to a caller with bad credentials.
        let disabled = stored_user(hash.clone(), false);
        let err = check_credentials(Some(disabled), "alice", "wrong-password").unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));

        let disabled = stored_user(hash.clone(), false);
        let err = check_credentials(Some(disabled), "alice", "right-password").unwrap_err();
        assert!(matches!(err, ApiError::AccountDisabled));

        let active = stored_user(hash, true);
        let user = check_credentials(Some(active), "alice", "right-password").unwrap();
        assert_eq!(user.id, 1);
    }
}
