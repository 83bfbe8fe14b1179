//! PostgreSQL connection management for the vector storage services
//!
//! Wraps SeaORM's connection pool with environment-driven configuration,
//! startup retry and health checks. Feature `config` adds `core_config::FromEnv`
//! support for [`postgres::PostgresConfig`].
//!
//! ```ignore
//! use core_config::FromEnv;
//! use database::postgres::{self, PostgresConfig};
//!
//! let config = PostgresConfig::from_env()?;
//! let db = postgres::connect_from_config_with_retry(config, None).await?;
//! postgres::check_health(&db).await?;
//! ```

pub mod common;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use common::{DatabaseError, DatabaseResult};
