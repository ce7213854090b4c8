use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: String,
    pub is_active: bool,
    pub bot_access_token: String,
}

#[async_trait]
pub trait WorkspaceRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Workspace>;
    async fn upsert(&self, workspace: &Workspace) -> Result<()>;
    /// Marks a workspace inactive without deleting its row — `DeleteSoft`'s
    /// meaning preserved under that name, since scheduled tasks still
    /// reference the workspace by id.
    async fn delete_soft(&self, id: &str) -> Result<()>;
}
