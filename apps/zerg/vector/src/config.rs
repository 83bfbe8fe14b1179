//! Configuration for the vector store CLI

use core_config::FromEnv;
use database::postgres::PostgresConfig;
use domain_vector::StoreConfig;
use eyre::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: PostgresConfig,
    pub store: StoreConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: PostgresConfig::from_env()?,
            store: StoreConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_database_url() {
        temp_env::with_var_unset("DATABASE_URL", || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn test_loads_both_sections() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("postgres://u:p@localhost/rag")),
                ("DB_SCHEMA", Some("Vectors")),
                ("VECTOR_BATCH_SIZE", Some("25")),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.database.url(), "postgres://u:p@localhost/rag");
                assert_eq!(config.store.schema, "vectors");
                assert_eq!(config.store.batch_size, 25);
            },
        );
    }
}
