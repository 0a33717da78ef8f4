//! services/api/src/adapters/auth.rs
//!
//! Email and password accounts stored in Postgres, verified with argon2, and
//! the auth sessions that tie an HTTP client to an account.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reading_tracker_core::domain::{Credentials, UserIdentity};
use reading_tracker_core::ports::{AuthProvider, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(FromRow)]
struct AccountRecord {
    user_id: Uuid,
    hashed_password: String,
    display_name: Option<String>,
}

impl AccountRecord {
    fn to_domain(self) -> UserIdentity {
        UserIdentity {
            user_id: self.user_id.to_string(),
            display_name: self.display_name,
        }
    }
}

#[derive(Clone)]
pub struct PgAuthProvider {
    pool: PgPool,
}

impl PgAuthProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates an account and returns its identity.
    pub async fn register(&self, credentials: &Credentials, display_name: Option<String>) -> PortResult<UserIdentity> {
        let email = normalize_email(&credentials.email);
        if email.is_empty() || credentials.password.len() < 6 {
            return Err(PortError::Unexpected(
                "An email and a password of at least 6 characters are required".to_string(),
            ));
        }
        let salt = SaltString::generate(&mut OsRng);
        let hashed_password = Argon2::default()
            .hash_password(credentials.password.as_bytes(), &salt)
            .map_err(|e| {
                error!("Failed to hash password: {:?}", e);
                PortError::Unexpected("Failed to hash password".to_string())
            })?
            .to_string();

        let record: AccountRecord = sqlx::query_as(
            "INSERT INTO users (user_id, email, hashed_password, display_name) VALUES ($1, $2, $3, $4) \
             RETURNING user_id, hashed_password, display_name",
        )
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&hashed_password)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                PortError::Unexpected(format!("An account for {} already exists", email))
            }
            _ => PortError::Unexpected(e.to_string()),
        })?;

        info!("Registered user {}", record.user_id);
        Ok(record.to_domain())
    }

    /// Stores a new auth session for `user_id` that is valid until `expires_at`.
    pub async fn create_auth_session(
        &self,
        auth_session_id: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let user_id = parse_user_id(user_id)?;
        sqlx::query("INSERT INTO auth_sessions (auth_session_id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(auth_session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Returns the user an unexpired auth session belongs to.
    pub async fn validate_auth_session(&self, auth_session_id: &str) -> PortResult<String> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM auth_sessions WHERE auth_session_id = $1 AND expires_at > now()")
                .bind(auth_session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Unavailable(e.to_string()))?;
        row.map(|(user_id,)| user_id.to_string()).ok_or(PortError::Unauthorized)
    }

    pub async fn delete_auth_session(&self, auth_session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE auth_session_id = $1")
            .bind(auth_session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

fn parse_user_id(user_id: &str) -> PortResult<Uuid> {
    Uuid::parse_str(user_id).map_err(|e| PortError::Unexpected(format!("Invalid user id {}: {}", user_id, e)))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl AuthProvider for PgAuthProvider {
    async fn sign_in(&self, credentials: &Credentials) -> PortResult<UserIdentity> {
        let email = normalize_email(&credentials.email);
        let record: Option<AccountRecord> =
            sqlx::query_as("SELECT user_id, hashed_password, display_name FROM users WHERE email = $1")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Unavailable(e.to_string()))?;
        let Some(record) = record else {
            warn!("Sign in attempt for unknown account");
            return Err(PortError::Unauthorized);
        };

        let parsed_hash = PasswordHash::new(&record.hashed_password).map_err(|e| {
            error!("Failed to parse password hash: {:?}", e);
            PortError::Unexpected("Authentication error".to_string())
        })?;
        if Argon2::default()
            .verify_password(credentials.password.as_bytes(), &parsed_hash)
            .is_err()
        {
            return Err(PortError::Unauthorized);
        }
        Ok(record.to_domain())
    }

    async fn sign_out(&self) -> PortResult<()> {
        // Auth sessions are revoked by the logout route.
        Ok(())
    }
}
