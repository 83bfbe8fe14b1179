use core_config::{env_or_default, env_parse, ConfigError, FromEnv};

use crate::models::GENERAL_NAMESPACE;

/// Postgres caps bind parameters per statement at 65535
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Columns bound per chunk in a multi-row insert
pub(crate) const PARAMS_PER_ROW: usize = 7;

/// Namespace store configuration, passed in at construction
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Postgres schema holding every table, always lowercase
    pub schema: String,
    /// Table holding chunks of every namespace
    pub shared_table: String,
    /// Table recording which raw namespace owns each sanitized table name
    pub registry_table: String,
    pub embedding_dimension: usize,
    /// Chunks per write transaction
    pub batch_size: usize,
    /// Namespaces containing this token (case-insensitive) are not copied to `general`
    pub exempt_marker: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            shared_table: "embeddings".to_string(),
            registry_table: "namespace_tables".to_string(),
            embedding_dimension: 768,
            batch_size: 100,
            exempt_marker: "totalsoft".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into().to_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_exempt_marker(mut self, marker: impl Into<String>) -> Self {
        self.exempt_marker = marker.into();
        self
    }

    /// Whether chunks written under `namespace` also get a `general` replica
    pub fn should_copy_to_general(&self, namespace: &str) -> bool {
        if namespace == GENERAL_NAMESPACE {
            return false;
        }
        let marker = self.exempt_marker.trim().to_lowercase();
        marker.is_empty() || !namespace.to_lowercase().contains(&marker)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "DB_SCHEMA".to_string(),
                details: "must not be empty".to_string(),
            });
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMBEDDING_DIMENSION".to_string(),
                details: "must be positive".to_string(),
            });
        }
        if self.batch_size == 0 || self.batch_size * PARAMS_PER_ROW > MAX_BIND_PARAMS {
            return Err(ConfigError::InvalidValue {
                key: "VECTOR_BATCH_SIZE".to_string(),
                details: format!(
                    "must be between 1 and {}",
                    MAX_BIND_PARAMS / PARAMS_PER_ROW
                ),
            });
        }
        Ok(())
    }
}

impl FromEnv for StoreConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            schema: env_or_default("DB_SCHEMA", &defaults.schema)
                .trim()
                .to_lowercase(),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", defaults.embedding_dimension)?,
            batch_size: env_parse("VECTOR_BATCH_SIZE", defaults.batch_size)?,
            exempt_marker: env_or_default("GENERAL_COPY_EXEMPT_MARKER", &defaults.exempt_marker),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }
}
