use async_trait::async_trait;

use crate::error::Result;

/// Lightweight access/refresh token pair, kept distinct from [`User`] so
/// the Power BI token cache can hand one back without loading the full
/// user row — the role an `AccessData` interface plays.
pub trait AccessData {
    fn access_token(&self) -> &str;
    fn refresh_token(&self) -> &str;
}

/// Identifies a Slack user within a workspace (or, for Enterprise Grid
/// installs, within the grid's shared team id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlackUserId {
    pub workspace_id: String,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct User {
    pub workspace_id: String,
    pub id: String,
    pub is_active: bool,
    pub email: String,
    pub hash_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl User {
    pub fn slack_user_id(&self) -> SlackUserId {
        SlackUserId {
            workspace_id: self.workspace_id.clone(),
            id: self.id.clone(),
        }
    }
}

impl AccessData for User {
    fn access_token(&self) -> &str {
        &self.access_token
    }

    fn refresh_token(&self) -> &str {
        &self.refresh_token
    }
}

/// Enterprise Grid ids are prefixed `W`; such a user may exist under a
/// grid-level id while the stored row still keys on the legacy team id.
pub fn is_enterprise_grid_id(id: &str) -> bool {
    id.starts_with('W')
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_id(&self, id: &SlackUserId) -> Result<User>;
    /// Retries `get_by_id` against the migrated team-id row when the
    /// caller passed an Enterprise Grid id and the direct lookup missed.
    async fn migrate_enterprise_user_to_use_team_id(&self, user: &mut User) -> Result<()>;
    async fn get_by_hash(&self, hash: &str) -> Result<User>;
    async fn store(&self, user: &User) -> Result<()>;
    async fn update(&self, user: &User) -> Result<()>;
    async fn deactivate(&self, id: &SlackUserId) -> Result<()>;
    async fn reactivate(&self, id: &SlackUserId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_enterprise_grid_ids() {
        assert!(is_enterprise_grid_id("W0123456"));
        assert!(!is_enterprise_grid_id("T0123456"));
    }
}
