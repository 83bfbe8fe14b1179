//! Shared test utilities for the vector store crates
//!
//! - `TestDatabase`: pgvector-enabled PostgreSQL container (feature: "postgres")
//! - `TestDataBuilder`: deterministic sources, namespaces and embeddings
//! - `assertions`: assertion helpers
//!
//! ```rust,no_run
//! use test_utils::{TestDatabase, TestDataBuilder};
//!
//! #[tokio::test]
//! async fn my_postgres_test() {
//!     let db = TestDatabase::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_test");
//!
//!     let source = builder.source("doc");
//!     let embedding = builder.embedding(768, 0);
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::TestDatabase;

/// Builder for test data with deterministic randomization
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed from the test name so each test gets its own, reproducible data
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic chunk identifier for position `index`
    pub fn chunk_id(&self, index: u64) -> String {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&index.to_le_bytes());
        Uuid::from_bytes(uuid_bytes).to_string()
    }

    /// Source identifier unique to this builder, e.g. `doc-1234-main`
    pub fn source(&self, suffix: &str) -> String {
        format!("doc-{}-{}", self.seed, suffix)
    }

    /// Namespace unique to this builder, e.g. `team-1234-x`
    pub fn namespace(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.seed % 1_000_000)
    }

    /// Deterministic non-zero embedding; different `salt`s point in different directions
    pub fn embedding(&self, dimension: usize, salt: u64) -> Vec<f32> {
        let mut state = self.seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (0..dimension)
            .map(|_| {
                // xorshift64
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                ((state % 2000) as f32 / 1000.0) - 1.0 + 1e-3
            })
            .collect()
    }

    /// Unit vector along `axis`
    pub fn axis(dimension: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[axis % dimension] = 1.0;
        v
    }
}

pub mod assertions {
    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Assert distances never decrease along the result list
    pub fn assert_non_decreasing(distances: &[f64], context: &str) {
        for pair in distances.windows(2) {
            assert!(
                pair[0] <= pair[1],
                "{}: distances not ordered: {:?}",
                context,
                distances
            );
        }
    }
}
