pub mod postgres_alert;
pub mod postgres_task;
pub mod postgres_user;
pub mod postgres_workspace;

pub use postgres_alert::PostgresAlertRepository;
pub use postgres_task::PostgresPostReportTaskRepository;
pub use postgres_user::PostgresUserRepository;
pub use postgres_workspace::PostgresWorkspaceRepository;
