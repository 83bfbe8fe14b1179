//! Command-line interface

use clap::{Parser, Subcommand};
use domain_vector::{resolve_namespace, NamespaceStore};
use eyre::Result;
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "zerg-vector")]
#[command(about = "Operate the namespace-partitioned vector store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create the extension, schema, shared table and `general` table
    Init,

    /// Check database connectivity
    Health,

    /// Delete every chunk of a source from one namespace
    Delete {
        #[arg(short, long)]
        source: String,

        /// Defaults to `general`
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// List sources stored under a namespace
    Sources {
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Count chunks of a source in a namespace
    Count {
        #[arg(short, long)]
        source: String,

        #[arg(short, long)]
        namespace: Option<String>,
    },
}

/// Run a command that only needs the store, returning its JSON report
pub async fn run_store_command<S: NamespaceStore + ?Sized>(
    store: &S,
    command: &Command,
) -> Result<Option<Value>> {
    let report = match command {
        Command::Delete { source, namespace } => {
            let namespace = resolve_namespace(namespace.as_deref(), None);
            let summary = store.delete_by_source(source, &namespace).await?;
            json!({
                "source": source,
                "namespace": namespace,
                "deleted_shared": summary.shared,
                "deleted_namespace": summary.namespace,
            })
        }
        Command::Sources { namespace } => {
            let namespace = resolve_namespace(namespace.as_deref(), None);
            let sources = store.list_sources(&namespace).await?;
            json!({ "namespace": namespace, "sources": sources })
        }
        Command::Count { source, namespace } => {
            let namespace = resolve_namespace(namespace.as_deref(), None);
            let count = store.count_by_source(source, &namespace).await?;
            json!({ "source": source, "namespace": namespace, "count": count })
        }
        Command::Init | Command::Health => return Ok(None),
    };
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_vector::{Chunk, InMemoryNamespaceStore, StoreConfig};

    #[test]
    fn test_parse_delete() {
        let cli = Cli::try_parse_from([
            "zerg-vector",
            "delete",
            "--source",
            "doc-1",
            "--namespace",
            "project-a",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Delete {
                source: "doc-1".to_string(),
                namespace: Some("project-a".to_string()),
            }
        );
    }

    #[test]
    fn test_delete_requires_source() {
        assert!(Cli::try_parse_from(["zerg-vector", "delete"]).is_err());
    }

    #[tokio::test]
    async fn test_store_commands_report_json() {
        let store = InMemoryNamespaceStore::new(StoreConfig::default().with_dimension(2));
        let chunks = vec![
            Chunk::new("project-a", "doc-1", 0, "one", vec![1.0, 0.0]),
            Chunk::new("project-a", "doc-1", 1, "two", vec![0.0, 1.0]),
        ];
        store.upsert(chunks, "project-a").await.unwrap();

        let count = run_store_command(
            &store,
            &Command::Count {
                source: "doc-1".to_string(),
                namespace: Some("project-a".to_string()),
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(count["count"], 2);

        let sources = run_store_command(&store, &Command::Sources { namespace: None })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sources["namespace"], "general");
        assert_eq!(sources["sources"], json!(["doc-1"]));

        let deleted = run_store_command(
            &store,
            &Command::Delete {
                source: "doc-1".to_string(),
                namespace: Some("project-a".to_string()),
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(deleted["deleted_shared"], 2);
        assert_eq!(deleted["deleted_namespace"], 2);

        assert!(run_store_command(&store, &Command::Init).await.unwrap().is_none());
    }
}
