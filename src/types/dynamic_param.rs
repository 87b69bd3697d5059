use serde::{Deserialize, Serialize};

/// A user-adjustable parameter of a generated query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicParam {
    /// Parameter name as it appears in the query.
    pub param_name: String,

    /// Declared type, e.g. `string` or `date`.
    #[serde(default)]
    pub param_type: String,

    /// Human-readable description.
    #[serde(default)]
    pub remark: String,

    /// Default value, as text.
    #[serde(default)]
    pub default_value: String,
}

impl DynamicParam {
    /// Creates a new parameter with empty type, remark and default.
    pub fn new(param_name: impl Into<String>) -> Self {
        Self {
            param_name: param_name.into(),
            ..Self::default()
        }
    }
}
