use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use crate::domain::workspace::{Workspace, WorkspaceRepository};
use crate::error::{Error, Result};
use crate::retry::with_fast_retry;

#[derive(FromRow)]
struct WorkspaceRow {
    id: String,
    is_active: bool,
    bot_access_token: String,
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Workspace {
            id: row.id,
            is_active: row.is_active,
            bot_access_token: row.bot_access_token,
        }
    }
}

pub struct PostgresWorkspaceRepository {
    pool: PgPool,
}

impl PostgresWorkspaceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkspaceRepository for PostgresWorkspaceRepository {
    #[instrument(skip(self))]
    async fn get_by_id(&self, id: &str) -> Result<Workspace> {
        let row = with_fast_retry("workspace.get_by_id", || async {
            sqlx::query_as::<_, WorkspaceRow>(
                "SELECT id, is_active, bot_access_token FROM workspaces WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;

        row.map(Workspace::from).ok_or(Error::NotFound)
    }

    #[instrument(skip(self, workspace))]
    async fn upsert(&self, workspace: &Workspace) -> Result<()> {
        with_fast_retry("workspace.upsert", || async {
            sqlx::query(
                "INSERT INTO workspaces (id, is_active, bot_access_token) VALUES ($1, $2, $3) \
                 ON CONFLICT (id) DO UPDATE SET is_active = EXCLUDED.is_active, bot_access_token = EXCLUDED.bot_access_token",
            )
            .bind(&workspace.id)
            .bind(workspace.is_active)
            .bind(&workspace.bot_access_token)
            .execute(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_soft(&self, id: &str) -> Result<()> {
        with_fast_retry("workspace.delete_soft", || async {
            sqlx::query("UPDATE workspaces SET is_active = FALSE WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(())
    }
}
