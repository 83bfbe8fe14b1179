//! Namespace → Postgres identifier mapping.

use sha2::{Digest, Sha256};

/// Postgres truncates identifiers longer than this (NAMEDATALEN - 1)
pub const MAX_IDENT_LEN: usize = 63;

const HASH_SUFFIX_LEN: usize = 8;
const NUMERIC_PREFIX: &str = "ns_";

/// Map a free-form namespace to a table name.
///
/// Lowercases, replaces anything outside `[a-z0-9_]` with `_`, prefixes names
/// that are empty or start with a digit, and shortens names over the
/// identifier limit to a prefix plus a hash of the raw input.
pub fn sanitize(raw: &str) -> String {
    let mut name: String = raw
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, NUMERIC_PREFIX);
    }

    if name.len() > MAX_IDENT_LEN {
        return bounded(&name, raw);
    }
    name
}

/// Name of an index on `table`, kept unique within the schema after truncation.
///
/// Indexes share the relation namespace with tables, so the name contains `$`,
/// which `sanitize` never emits; no namespace table can take an index's name.
pub fn index_name(table: &str, suffix: &str) -> String {
    let name = format!("idx${}${}", table, suffix);
    if name.len() > MAX_IDENT_LEN {
        return bounded(&name, &name);
    }
    name
}

fn bounded(name: &str, hash_input: &str) -> String {
    let digest = Sha256::digest(hash_input.as_bytes());
    let hex: String = digest
        .iter()
        .take(HASH_SUFFIX_LEN / 2)
        .map(|b| format!("{:02x}", b))
        .collect();
    // name is ASCII here, so byte slicing is safe
    let keep = MAX_IDENT_LEN - HASH_SUFFIX_LEN - 1;
    format!("{}_{}", &name[..keep], hex)
}

/// Double-quote an identifier for interpolation into SQL
pub fn quote_ident(input: &str) -> String {
    format!("\"{}\"", input.replace('"', "\"\""))
}

/// Schema-qualified table reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// `"schema"."table"`
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Quoted, schema-qualified index name for this table
    pub fn index(&self, suffix: &str) -> String {
        quote_ident(&index_name(&self.table, suffix))
    }
}
