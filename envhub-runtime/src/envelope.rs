//! The `{success, code, message?, data}` envelope shared by every HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InstanceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            code: 0,
            message: None,
            data,
        }
    }
}

impl ApiResponse<Value> {
    pub fn error(err: &InstanceError) -> Self {
        Self {
            success: false,
            code: i64::from(err.status_code()),
            message: Some(err.message().to_string()),
            data: Value::Null,
        }
    }
}

/// Maximum number of body bytes echoed into an error message.
pub const MAX_ERROR_BODY: usize = 500;

/// Truncate a response body on a char boundary for logging/errors.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &body[..end])
}
