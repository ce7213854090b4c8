use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use crate::domain::user::{SlackUserId, User, UserRepository};
use crate::domain::workspace::{Workspace, WorkspaceRepository};
use crate::error::{Error, Result};
use crate::repository::postgres_workspace::PostgresWorkspaceRepository;
use crate::retry::with_fast_retry;

#[derive(FromRow)]
struct UserRow {
    workspace_id: String,
    id: String,
    is_active: bool,
    hash_id: String,
    access_token: String,
    refresh_token: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            workspace_id: row.workspace_id,
            id: row.id,
            is_active: row.is_active,
            email: String::new(),
            hash_id: row.hash_id,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
        }
    }
}

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    #[instrument(skip(self))]
    async fn get_by_id(&self, id: &SlackUserId) -> Result<User> {
        let row = with_fast_retry("user.get_by_id", || async {
            sqlx::query_as::<_, UserRow>(
                "SELECT workspace_id, id, is_active, hash_id, access_token, refresh_token \
                 FROM users WHERE workspace_id = $1 AND id = $2",
            )
            .bind(&id.workspace_id)
            .bind(&id.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;

        row.map(User::from).ok_or(Error::NotFound)
    }

    #[instrument(skip(self, user))]
    async fn migrate_enterprise_user_to_use_team_id(&self, user: &mut User) -> Result<()> {
        if !crate::domain::user::is_enterprise_grid_id(&user.id) {
            return Ok(());
        }

        let enterprise_user = with_fast_retry("user.migrate.lookup", || async {
            sqlx::query_as::<_, UserRow>(
                "SELECT workspace_id, id, is_active, hash_id, access_token, refresh_token \
                 FROM users WHERE id = $1",
            )
            .bind(&user.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?
        .ok_or(Error::NotFound)?;

        if enterprise_user.workspace_id == user.workspace_id {
            return Ok(());
        }

        let workspace_repo = PostgresWorkspaceRepository::new(self.pool.clone());
        let workspace_data = workspace_repo.get_by_id(&enterprise_user.workspace_id).await?;

        let mut tx = self.pool.begin().await.map_err(Error::from)?;

        let new_workspace = Workspace {
            id: user.workspace_id.clone(),
            is_active: workspace_data.is_active,
            bot_access_token: workspace_data.bot_access_token,
        };
        sqlx::query(
            "INSERT INTO workspaces (id, is_active, bot_access_token) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET is_active = EXCLUDED.is_active, bot_access_token = EXCLUDED.bot_access_token",
        )
        .bind(&new_workspace.id)
        .bind(new_workspace.is_active)
        .bind(&new_workspace.bot_access_token)
        .execute(&mut *tx)
        .await
        .map_err(Error::from)?;

        sqlx::query("UPDATE users SET workspace_id = $1 WHERE id = $2 AND workspace_id = $3")
            .bind(&new_workspace.id)
            .bind(&user.id)
            .bind(&user.workspace_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::from)?;

        tx.commit().await.map_err(Error::from)?;
        user.workspace_id = new_workspace.id;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_by_hash(&self, hash: &str) -> Result<User> {
        let row = with_fast_retry("user.get_by_hash", || async {
            sqlx::query_as::<_, UserRow>(
                "SELECT workspace_id, id, is_active, hash_id, access_token, refresh_token \
                 FROM users WHERE hash_id = $1",
            )
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;

        row.map(User::from).ok_or(Error::NotFound)
    }

    #[instrument(skip(self, user))]
    async fn store(&self, user: &User) -> Result<()> {
        with_fast_retry("user.store", || async {
            sqlx::query(
                "INSERT INTO users (workspace_id, id, is_active, email, hash_id, access_token, refresh_token) \
                 VALUES ($1, $2, TRUE, $3, $4, $5, $6)",
            )
            .bind(&user.workspace_id)
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.hash_id)
            .bind(&user.access_token)
            .bind(&user.refresh_token)
            .execute(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self, user))]
    async fn update(&self, user: &User) -> Result<()> {
        let result = with_fast_retry("user.update", || async {
            sqlx::query(
                "UPDATE users SET access_token = $1, refresh_token = $2 \
                 WHERE workspace_id = $3 AND id = $4",
            )
            .bind(&user.access_token)
            .bind(&user.refresh_token)
            .bind(&user.workspace_id)
            .bind(&user.id)
            .execute(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;

        if result.rows_affected() != 1 {
            return Err(Error::NotUpdated);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deactivate(&self, id: &SlackUserId) -> Result<()> {
        with_fast_retry("user.deactivate", || async {
            sqlx::query("UPDATE users SET is_active = FALSE WHERE workspace_id = $1 AND id = $2")
                .bind(&id.workspace_id)
                .bind(&id.id)
                .execute(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reactivate(&self, id: &SlackUserId) -> Result<()> {
        with_fast_retry("user.reactivate", || async {
            sqlx::query("UPDATE users SET is_active = TRUE WHERE workspace_id = $1 AND id = $2")
                .bind(&id.workspace_id)
                .bind(&id.id)
                .execute(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(())
    }
}
