use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::DynamicParam;

/// A column the generated query may reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableField {
    pub table_name: String,
    pub field_name: String,
    #[serde(default)]
    pub field_type: String,
    #[serde(default)]
    pub remark: String,
}

/// A fixed parameter the host application always supplies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuiltinParam {
    pub param_name: String,
    #[serde(default)]
    pub param_type: String,
    #[serde(default)]
    pub remark: String,
    /// Usually a number; passed through as given.
    #[serde(default)]
    pub default_value: Value,
}

/// The request body sent to the generation endpoint.
///
/// The schema is owned by the remote service; fields this crate does not know
/// about are kept in `extra` and echoed back unchanged.  Empty fields are left
/// out of the serialized body, so they never show up as empty query parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseInfo {
    /// The natural-language question.
    #[serde(default)]
    pub nl_query: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub table_structure: Vec<TableField>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_params: Vec<DynamicParam>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub builtin_params: Vec<BuiltinParam>,

    /// A previous query the user wants refined.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sql: String,

    /// A previous execution error the user wants explained.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_msg: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BaseInfo {
    /// Returns a copy of this body asking `nl_query`.
    pub fn with_query(&self, nl_query: impl Into<String>) -> Self {
        Self {
            nl_query: nl_query.into(),
            ..self.clone()
        }
    }
}
