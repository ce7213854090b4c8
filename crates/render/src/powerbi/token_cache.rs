use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;

use super::AccessTokenPair;

/// Holds a consumer's critical section for as long as it's alive. Acquired
/// via [`TokenCacheManager::lock`] and held across both the refresh HTTP
/// call and the subsequent `update` write, so two concurrent 403s for the
/// same consumer can't each independently refresh.
pub struct TokenUpdateGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Mirrors the `TokenCacheManager` interface (`Get`/`Update` keyed by an
/// opaque consumer id). `consumer_id` here is always the
/// Slack/Teams user's workspace-scoped id, serialized as a plain string.
#[async_trait]
pub trait TokenCacheManager: Send + Sync {
    async fn get(&self, consumer_id: &str) -> Result<AccessTokenPair, String>;
    async fn update(&self, consumer_id: &str, access_data: &AccessTokenPair) -> Result<(), String>;
    /// Acquires the per-consumer critical section. Callers must hold the
    /// returned guard across both the refresh call and `update` — `update`
    /// itself does no locking of its own.
    async fn lock(&self, consumer_id: &str) -> TokenUpdateGuard;
}

/// A Postgres-backed token cache with an exclusive per-user critical
/// section spanning refresh-then-write, not just the write. Each user id
/// gets its own `tokio::sync::Mutex`, created lazily and kept in a
/// process-wide registry, made explicit here since sqlx's connection pool
/// doesn't serialize callers for us the way the source's row-level
/// locking does.
pub struct PostgresTokenCacheManager {
    pool: PgPool,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PostgresTokenCacheManager {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, consumer_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(consumer_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl TokenCacheManager for PostgresTokenCacheManager {
    #[instrument(skip(self))]
    async fn get(&self, consumer_id: &str) -> Result<AccessTokenPair, String> {
        let row: (String, String) = sqlx::query_as(
            "SELECT access_token, refresh_token FROM users WHERE id = $1",
        )
        .bind(consumer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "user not found".to_string())?;

        Ok(AccessTokenPair {
            access_token: row.0,
            refresh_token: row.1,
        })
    }

    #[instrument(skip(self, access_data))]
    async fn update(&self, consumer_id: &str, access_data: &AccessTokenPair) -> Result<(), String> {
        sqlx::query("UPDATE users SET access_token = $1, refresh_token = $2 WHERE id = $3")
            .bind(&access_data.access_token)
            .bind(&access_data.refresh_token)
            .bind(consumer_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn lock(&self, consumer_id: &str) -> TokenUpdateGuard {
        let mutex = self.lock_for(consumer_id).await;
        TokenUpdateGuard { _guard: mutex.lock_owned().await }
    }
}
