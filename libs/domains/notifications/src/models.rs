use serde::{Deserialize, Serialize};

/// Outcome of one ingestion attempt, as sent to the callback endpoint.
///
/// Wire keys follow the consumer's webhook contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(rename = "file_id")]
    pub source_id: String,
    #[serde(rename = "embedded")]
    pub succeeded: bool,
    pub namespace: String,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl Completion {
    pub fn success(source_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            succeeded: true,
            namespace: namespace.into(),
            error_detail: None,
        }
    }

    pub fn failure(
        source_id: impl Into<String>,
        namespace: impl Into<String>,
        error_detail: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            succeeded: false,
            namespace: namespace.into(),
            error_detail: Some(error_detail.into()),
        }
    }
}
