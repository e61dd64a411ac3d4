// Shared extraction helpers for the JSON bodies the completion service returns.

use serde_json::Value;

/// Human-readable failure detail from an error body.
///
/// The service reports errors as `{"detail": ...}`; proxies in front of it
/// tend to use `error` or `message`. Non-JSON bodies were stored under `raw`.
pub fn extract_error_detail(payload: &Value) -> Option<String> {
    ["detail", "error", "message", "raw"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub status: String,
    pub active_sessions: Option<u64>,
    pub timestamp: Option<String>,
}

pub fn extract_health(payload: &Value) -> HealthSummary {
    HealthSummary {
        status: payload
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        active_sessions: payload.get("active_sessions").and_then(|v| v.as_u64()),
        timestamp: payload
            .get("timestamp")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub developer_message: Option<String>,
    pub message_count: Option<u64>,
    pub created_at: Option<String>,
    pub last_updated: Option<String>,
}

pub fn extract_session(payload: &Value) -> Option<SessionSummary> {
    let session_id = payload.get("session_id").and_then(|v| v.as_str())?;
    let text = |key: &str| {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };
    Some(SessionSummary {
        session_id: session_id.to_string(),
        developer_message: text("developer_message"),
        message_count: payload.get("message_count").and_then(|v| v.as_u64()),
        created_at: text("created_at"),
        last_updated: text("last_updated"),
    })
}
