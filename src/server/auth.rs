//! API-key authentication.
//!
//! Accounts live in a small SQLite table in the storage root. Keys are
//! shown once at creation; only their SHA-256 is stored.

use std::path::Path;
use std::sync::Mutex;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::{sha256_bytes, CoreError};

use super::error::ApiError;
use super::AppState;

const API_KEY_PREFIX: &str = "cr_";
const API_KEY_RANDOM_LEN: usize = 32;
const API_KEY_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// The authenticated caller, inserted into request extensions by the
/// auth middleware.
#[derive(Clone, Debug)]
pub struct AuthUser(pub String);

pub struct UserStore {
    conn: Mutex<Connection>,
}

impl UserStore {
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path)
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                api_key_hash TEXT NOT NULL
            );",
        )
        .map_err(|err| CoreError::Storage(err.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an account and return its API key. The key is not
    /// recoverable later.
    pub fn add_user(&self, username: &str) -> Result<String, CoreError> {
        validate_username(username)?;
        let key = generate_api_key();
        let hash = sha256_bytes(key.as_bytes()).to_hex();

        let conn = self.conn.lock().unwrap_or_else(|err| err.into_inner());
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO users (username, api_key_hash) VALUES (?1, ?2)",
                params![username, hash],
            )
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        if inserted == 0 {
            return Err(CoreError::validation(
                "user-exists",
                format!("user `{username}` already exists"),
            ));
        }
        Ok(key)
    }

    /// Resolve an API key to its username.
    pub fn verify(&self, api_key: &str) -> Result<Option<String>, CoreError> {
        let hash = sha256_bytes(api_key.as_bytes()).to_hex();
        let conn = self.conn.lock().unwrap_or_else(|err| err.into_inner());
        conn.query_row(
            "SELECT username FROM users WHERE api_key_hash = ?1",
            params![hash],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| CoreError::Storage(err.to_string()))
    }

    pub fn list(&self) -> Result<Vec<String>, CoreError> {
        let conn = self.conn.lock().unwrap_or_else(|err| err.into_inner());
        let mut stmt = conn
            .prepare("SELECT username FROM users ORDER BY username")
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.map_err(|err| CoreError::Storage(err.to_string()))?);
        }
        Ok(users)
    }
}

fn generate_api_key() -> String {
    let mut rng = rand::rng();
    let mut key = String::with_capacity(API_KEY_PREFIX.len() + API_KEY_RANDOM_LEN);
    key.push_str(API_KEY_PREFIX);
    for _ in 0..API_KEY_RANDOM_LEN {
        let idx = rng.random_range(0..API_KEY_ALPHABET.len());
        key.push(API_KEY_ALPHABET[idx] as char);
    }
    key
}

fn validate_username(username: &str) -> Result<(), CoreError> {
    if username.is_empty() || username.len() > 64 {
        return Err(CoreError::validation(
            "username",
            "username must be 1..=64 characters",
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(CoreError::validation(
            "username",
            "username may only contain letters, digits, `.`, `_`, and `-`",
        ));
    }
    Ok(())
}

/// Reject requests without a valid `x-api-key` header.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let username = state
        .users
        .verify(key)
        .map_err(|err| ApiError::internal(err.to_string()))?
        .ok_or(ApiError::Unauthorized)?;

    request.extensions_mut().insert(AuthUser(username));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_keys_have_expected_shape() {
        let key = generate_api_key();
        assert!(key.starts_with(API_KEY_PREFIX));
        assert_eq!(key.len(), API_KEY_PREFIX.len() + API_KEY_RANDOM_LEN);
    }

    #[test]
    fn user_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(&dir.path().join("users.db")).unwrap();

        let key = store.add_user("alice").unwrap();
        assert_eq!(store.verify(&key).unwrap(), Some("alice".to_string()));
        assert_eq!(store.verify("cr_bogus").unwrap(), None);

        assert!(store.add_user("alice").is_err());
        assert!(store.add_user("bad name").is_err());

        store.add_user("bob").unwrap();
        assert_eq!(store.list().unwrap(), vec!["alice", "bob"]);
    }
}
