use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

/// Envelope every tool returns, serialized as JSON text content.
/// `content` holds the tool payload (itself JSON for structured results).
#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub status: &'static str,
    pub content: String,
    pub content_type: &'static str,
    pub metadata: ToolMetadata,
}

#[derive(Debug, Serialize)]
pub struct ToolMetadata {
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(serialize_with = "finite_or_zero")]
    pub duration_seconds: f64,
}

impl ToolMetadata {
    pub fn new(tool_name: &str, duration_seconds: f64) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            error_kind: None,
            duration_seconds,
        }
    }
}

// JSON has no NaN or infinity.
fn finite_or_zero<S: serde::Serializer>(secs: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(if secs.is_finite() { *secs } else { 0.0 })
}

impl ToolResponse {
    pub fn success(content: String, metadata: ToolMetadata) -> Self {
        Self {
            status: "success",
            content,
            content_type: "text",
            metadata,
        }
    }

    /// Success whose payload is a serialized value.
    pub fn json<T: Serialize>(payload: &T, metadata: ToolMetadata) -> Self {
        match serde_json::to_string(payload) {
            Ok(content) => Self {
                status: "success",
                content,
                content_type: "json",
                metadata,
            },
            Err(e) => Self::error(format!("serialization failed: {e}"), "internal", metadata),
        }
    }

    pub fn error(message: String, kind: &'static str, mut metadata: ToolMetadata) -> Self {
        metadata.error_kind = Some(kind);
        Self {
            status: "error",
            content: message,
            content_type: "text",
            metadata,
        }
    }

    /// Convert to MCP CallToolResult.
    /// Always a transport-level success; failures are reported in the payload
    /// (`"status": "error"`) so one failing tool call does not cancel its siblings.
    pub fn into_call_tool_result(self) -> CallToolResult {
        let text = serde_json::to_string(&self).unwrap_or_else(|e| {
            serde_json::json!({
                "status": "error",
                "content": format!("serialization failed: {e}"),
                "content_type": "text",
                "metadata": { "tool_name": self.metadata.tool_name, "error_kind": "internal" },
            })
            .to_string()
        });
        CallToolResult::success(vec![Content::text(text)])
    }
}
