//! Tool catalog and call result types shared by every provider.

use serde::{Deserialize, Serialize};

/// Schema for a tool exposed by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description,
            input_schema,
        }
    }

    /// Project onto the name/description pair.
    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
        }
    }
}

/// Name and description of a tool, without its schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub structured_content: Option<serde_json::Value>,
    pub text_content: Option<String>,
    pub content: Vec<serde_json::Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Plain text result, mostly useful for tests and simple providers.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            structured_content: None,
            content: vec![serde_json::json!({ "type": "text", "text": text })],
            text_content: Some(text),
            is_error: false,
        }
    }

    pub fn into_value_or_text(self) -> serde_json::Value {
        if let Some(structured) = self.structured_content {
            return structured;
        }
        if let Some(text) = self.text_content {
            return serde_json::Value::String(text);
        }
        serde_json::Value::Array(self.content)
    }
}
