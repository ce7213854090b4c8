//! Domain model, persistence, queueing, and ambient-stack primitives
//! (config, error taxonomy, retry, activity context) shared by the render
//! and worker crates.

pub mod activity;
pub mod analytics;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod hash;
pub mod ksuid;
pub mod queue;
pub mod repository;
pub mod retry;

pub use activity::ActivityInfo;
pub use analytics::{AnalyticsSink, Event as AnalyticsEvent, LoggingAnalyticsSink};
pub use config::Config;
pub use error::{Error, Result};
