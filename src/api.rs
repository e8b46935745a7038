//! Request/response types for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::session::Turn;

/// Prefix for session identifiers.
pub const SESSION_ID_PREFIX: &str = "session_";
/// Prefix for tool call identifiers.
pub const CALL_ID_PREFIX: &str = "call_";

fn default_requester_id() -> String {
    "user".to_string()
}

fn default_requester_type() -> String {
    "human".to_string()
}

/// POST /api/v1/sessions response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub created_at: String,
}

/// POST /api/v1/sessions/{id}/messages request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(default = "default_requester_id")]
    pub requester_id: String,
    #[serde(default = "default_requester_type")]
    pub requester_type: String,
}

/// GET /api/v1/sessions/{id}/history response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub turns: Vec<Turn>,
}

/// GET /api/v1/sessions/{id}/stats response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub session_id: String,
    pub turn_count: usize,
    pub total_cost_usd: f64,
    pub total_savings_usd: f64,
    pub cache_hit_ratio: f64,
    pub session_age_seconds: f64,
}

/// One entry in the session listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: String,
    pub last_activity_at: String,
    pub turn_count: usize,
}

/// GET /api/v1/sessions response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_defaults_requester_fields() {
        let req: SendMessageRequest = serde_json::from_str(r#"{"message":"Hello"}"#).unwrap();
        assert_eq!(req.message, "Hello");
        assert_eq!(req.requester_id, "user");
        assert_eq!(req.requester_type, "human");
    }

    #[test]
    fn send_message_accepts_agent_requester() {
        let req: SendMessageRequest = serde_json::from_str(
            r#"{"message":"Hi","requester_id":"planner-7","requester_type":"agent"}"#,
        )
        .unwrap();
        assert_eq!(req.requester_id, "planner-7");
        assert_eq!(req.requester_type, "agent");
    }
}
