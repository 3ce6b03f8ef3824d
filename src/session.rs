//! The authentication/session state machine: authenticate, refresh, and the
//! access checks a request handler runs before it is allowed to dispatch SQL.

use std::sync::Arc;

use rand::RngCore;
use subtle::ConstantTimeEq;
use suresql_core::model::{TokenRecord, UserRow};
use suresql_core::{SqlDriver, SureSqlError};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::node::NodeState;
use crate::users;

/// Computes a password hash for storage and verifies a candidate against a
/// stored hash. The concrete hashing primitive (bcrypt, argon2, ...) is a
/// pluggable collaborator; the gateway only ever compares hashes in constant
/// time, never plaintext.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> String;
    fn verify(&self, password: &str, stored_hash: &str) -> bool;
}

/// A placeholder hasher for development and tests. Not fit for production
/// credential storage — swap in a real collaborator before handling real
/// passwords.
#[derive(Default)]
pub struct DevHasher;

impl PasswordHasher for DevHasher {
    fn hash(&self, password: &str) -> String {
        format!("dev${password}")
    }

    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let candidate = self.hash(password);
        bool::from(candidate.as_bytes().ct_eq(stored_hash.as_bytes()))
    }
}

/// A mutable credential pair. The password is cleared to zero bytes as soon
/// as it has been consumed, so no later code path can observe it in memory.
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    fn take_password(&mut self) -> String {
        std::mem::take(&mut self.password)
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        zeroize_string(std::mem::take(&mut self.password));
    }
}

/// Consumes `s`, overwriting its bytes with zero and handing back the same
/// allocation as a plain `Vec<u8>`. `into_bytes` returns the string's own
/// buffer rather than a copy, and a `Vec<u8>` has no UTF-8 invariant to
/// preserve, so the overwrite needs no `unsafe`.
fn zeroize_string(s: String) -> Vec<u8> {
    let mut bytes = s.into_bytes();
    for b in bytes.iter_mut() {
        *b = 0;
    }
    bytes
}

/// A minted access/refresh pair, ready to hand back to the caller.
pub struct IssuedToken {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: OffsetDateTime,
    pub refresh_expires_at: OffsetDateTime,
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Step 1: authenticate a username/password pair, open a session driver, and
/// admit it to the pool under a freshly-minted token pair.
///
/// Runs the user lookup and hash comparison on both the found and
/// not-found paths so a missing username takes the same code path length as
/// a wrong password; the comparison itself always goes through
/// [`PasswordHasher::verify`], which is constant-time over the hash bytes.
pub async fn authenticate(
    node: &NodeState,
    hasher: &dyn PasswordHasher,
    mut credentials: Credentials,
    cancel: &CancellationToken,
) -> Result<IssuedToken, SureSqlError> {
    suresql_core::validate::validate_username(&credentials.username)?;

    let internal_driver = node.internal_driver().await;
    let user = users::find_by_username(&internal_driver, &credentials.username, cancel).await?;
    let password = credentials.take_password();

    let authenticated = match &user {
        Some(row) => hasher.verify(&password, &row.password_hash),
        None => {
            hasher.verify(&password, "$no-such-user$");
            false
        }
    };
    zeroize_string(password);

    let Some(user) = user.filter(|_| authenticated) else {
        node.metrics.record_auth_attempt(true);
        return Err(SureSqlError::AuthInvalidCredentials);
    };

    match open_and_admit(node, &user).await {
        Ok(issued) => {
            node.metrics.record_auth_attempt(false);
            Ok(issued)
        }
        Err(err) => {
            node.metrics.record_auth_attempt(true);
            Err(err)
        }
    }
}

async fn open_and_admit(node: &NodeState, user: &UserRow) -> Result<IssuedToken, SureSqlError> {
    let driver = node
        .open_session_driver()
        .await
        .map_err(|e| SureSqlError::from_driver("OpenSessionDriver", e))?;
    node.metrics.record_connection_created();

    let access_token = random_token();
    let refresh_token = random_token();

    let pool = node.pool().await;
    if !pool.put(access_token.clone(), driver.clone()).await {
        node.metrics.record_pool_exhaustion();
        driver.close().await;
        return Err(SureSqlError::PoolExhausted);
    }

    let config = node.config().await;
    let now = OffsetDateTime::now_utc();
    let access_expires_at = now + config.token_ttl;
    let refresh_expires_at = now + config.refresh_ttl;

    let record = TokenRecord {
        access_token: access_token.clone(),
        refresh_token: refresh_token.clone(),
        user_id: user.id,
        username: user.username.clone(),
        access_expires_at,
        refresh_expires_at,
        created_at: now,
    };
    node.token_store.save_token(record).await;
    node.metrics.record_token_created();

    Ok(IssuedToken {
        access_token,
        refresh_token,
        access_expires_at,
        refresh_expires_at,
    })
}

/// Step 2: resolve an access token to its leased driver, failing with the
/// auth error kinds a request handler maps onto 401 responses.
pub async fn resolve_session(
    node: &NodeState,
    access_token: &str,
) -> Result<Arc<dyn SqlDriver>, SureSqlError> {
    if access_token.is_empty() {
        return Err(SureSqlError::AuthMissingToken);
    }
    let (record, present) = node.token_store.token_exist(access_token).await;
    if !present {
        return Err(SureSqlError::AuthInvalidToken);
    }
    let record = record.expect("present implies Some");
    if record.access_expires_at <= OffsetDateTime::now_utc() {
        return Err(SureSqlError::AuthExpired);
    }
    node.pool()
        .await
        .get(access_token)
        .await
        .ok_or(SureSqlError::AuthInvalidToken)
}

/// Step 3: "rebind never rename" — a refresh always destroys
/// the old access key and its driver, and mints an entirely new pair rather
/// than extending the old one.
pub async fn refresh(
    node: &NodeState,
    refresh_token: &str,
) -> Result<IssuedToken, SureSqlError> {
    let (record, present) = node.token_store.refresh_token_exist(refresh_token).await;
    if !present {
        return Err(SureSqlError::AuthInvalidToken);
    }
    let record = record.expect("present implies Some");
    if record.refresh_expires_at <= OffsetDateTime::now_utc() {
        return Err(SureSqlError::AuthExpired);
    }

    let pool = node.pool().await;
    pool.close(&record.access_token).await;
    node.token_store
        .delete_pair(&record.access_token, refresh_token)
        .await;
    node.metrics.record_refresh_used();

    let user = UserRow {
        id: record.user_id,
        username: record.username,
        password_hash: String::new(),
        role: String::new(),
        created_at: record.created_at,
    };
    open_and_admit(node, &user).await
}

/// Step 4: explicit logout. Drops the pool entry and both token-store
/// records for the pair.
pub async fn expire(node: &NodeState, access_token: &str, refresh_token: &str) {
    node.pool().await.close(access_token).await;
    node.token_store
        .delete_pair(access_token, refresh_token)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_hasher_round_trips() {
        let hasher = DevHasher;
        let hash = hasher.hash("swordfish");
        assert!(hasher.verify("swordfish", &hash));
        assert!(!hasher.verify("wrong", &hash));
    }

    #[test]
    fn take_password_empties_the_field_leaving_only_the_taken_copy_live() {
        let mut creds = Credentials::new("alice".to_string(), "hunter2".to_string());
        let taken = creds.take_password();
        assert_eq!(taken, "hunter2");
        assert_eq!(creds.password, "", "take_password must leave the field empty");
        drop(creds);
        drop(taken);
    }

    #[test]
    fn zeroize_string_overwrites_the_actual_secret_bytes() {
        let zeroed = zeroize_string("hunter2".to_string());
        assert_eq!(zeroed.len(), 7);
        assert!(
            zeroed.iter().all(|&b| b == 0),
            "the live secret bytes must be overwritten, not just the emptied field"
        );
    }

    #[test]
    fn random_tokens_are_64_hex_characters_and_distinct() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
