use serde::{Deserialize, Serialize};

use crate::types::DynamicParam;

/// Outcome reported inside a result message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    #[default]
    Success,
    Error,
}

/// The structured payload carried in the `content` of a result message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(default)]
    pub status: ResultStatus,

    /// Headline shown above the details.
    #[serde(default)]
    pub message: String,

    /// The generated query text.
    #[serde(default)]
    pub generated_sql: String,

    #[serde(default)]
    pub dynamic_params: Vec<DynamicParam>,

    #[serde(default)]
    pub explanation: String,

    /// Extra detail for failed generations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ResultPayload {
    /// Returns true when the service reported a failure.
    pub fn is_error(&self) -> bool {
        self.status == ResultStatus::Error
    }
}
