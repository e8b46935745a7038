//! Turn and step types.
//!
//! A turn is one user message's full round trip through the model/tool
//! loop. It is built incrementally on the orchestrator's stack and only
//! becomes visible in session history once it reaches a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cost::CostMetrics;
use crate::llm::{Message, Role, ToolCall};

/// The user input that started a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
    pub requester_id: String,
    pub requester_type: String,
}

/// One atomic unit produced during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// A chunk of assistant text, in emission order.
    Content { text: String },
    /// The model requested a tool.
    ToolCall {
        call_id: String,
        name: String,
        input: serde_json::Value,
    },
    /// The tool finished; exactly one per ToolCall, immediately after it.
    ToolResult {
        call_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Why a turn failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub kind: String,
    pub message: String,
}

/// Terminal state of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    /// The turn is recorded with whatever accumulated; the answer may be
    /// partial.
    Failed { failure: TurnFailure },
}

/// One user message through to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub user_message: UserMessage,
    pub steps: Vec<Step>,
    /// Concatenation of all content emitted in this turn.
    pub final_text: String,
    pub usage: CostMetrics,
    pub outcome: TurnOutcome,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Turn {
    /// Whether the turn reached `Completed`.
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, TurnOutcome::Completed)
    }

    /// Flatten this turn into model messages for a later conversation.
    ///
    /// Content chunks collapse into the final assistant text; tool calls
    /// and results keep their interleaving so the model sees the loop it
    /// ran.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = vec![Message::text(Role::User, &self.user_message.content)];

        for step in &self.steps {
            match step {
                Step::Content { .. } => {}
                Step::ToolCall {
                    call_id,
                    name,
                    input,
                } => {
                    messages.push(Message::assistant_tool_calls(
                        None,
                        vec![ToolCall {
                            id: call_id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        }],
                    ));
                }
                Step::ToolResult {
                    call_id,
                    output,
                    error,
                    ..
                } => {
                    let content = match (output, error) {
                        (Some(value), _) => value.to_string(),
                        (None, Some(err)) => format!("Error: {err}"),
                        (None, None) => String::new(),
                    };
                    messages.push(Message::tool_result(call_id, content));
                }
            }
        }

        if !self.final_text.is_empty() {
            messages.push(Message::text(Role::Assistant, &self.final_text));
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(content: &str) -> UserMessage {
        UserMessage {
            content: content.to_string(),
            requester_id: "user".to_string(),
            requester_type: "human".to_string(),
        }
    }

    fn completed_turn(steps: Vec<Step>, final_text: &str) -> Turn {
        Turn {
            user_message: user("find X"),
            steps,
            final_text: final_text.to_string(),
            usage: CostMetrics::default(),
            outcome: TurnOutcome::Completed,
            started_at: Utc::now(),
            ended_at: Utc::now(),
        }
    }

    #[test]
    fn simple_turn_to_messages() {
        let turn = completed_turn(
            vec![
                Step::Content { text: "Hi".into() },
                Step::Content {
                    text: " there".into(),
                },
            ],
            "Hi there",
        );
        let messages = turn.to_messages();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content_str(), "Hi there");
    }

    #[test]
    fn tool_loop_turn_keeps_interleaving() {
        let turn = completed_turn(
            vec![
                Step::ToolCall {
                    call_id: "call_1".into(),
                    name: "search_docs".into(),
                    input: serde_json::json!({"query": "X"}),
                },
                Step::ToolResult {
                    call_id: "call_1".into(),
                    name: "search_docs".into(),
                    output: Some(serde_json::json!({"results": []})),
                    error: None,
                },
                Step::Content {
                    text: "Nothing found".into(),
                },
            ],
            "Nothing found",
        );
        let messages = turn.to_messages();

        assert_eq!(messages.len(), 4);
        assert!(messages[1].tool_calls.is_some());
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[3].content_str(), "Nothing found");
    }

    #[test]
    fn tool_error_result_becomes_error_text() {
        let turn = completed_turn(
            vec![
                Step::ToolCall {
                    call_id: "call_2".into(),
                    name: "query_skill".into(),
                    input: serde_json::json!({"name": "nope"}),
                },
                Step::ToolResult {
                    call_id: "call_2".into(),
                    name: "query_skill".into(),
                    output: None,
                    error: Some("skill 'nope' not found".into()),
                },
            ],
            "",
        );
        let messages = turn.to_messages();

        assert_eq!(messages.len(), 3);
        assert!(messages[2].content_str().starts_with("Error:"));
    }

    #[test]
    fn step_serialization_tags() {
        let step = Step::ToolCall {
            call_id: "call_1".into(),
            name: "search_docs".into(),
            input: serde_json::json!({}),
        };
        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"type\":\"tool_call\""));

        let outcome = TurnOutcome::Failed {
            failure: TurnFailure {
                kind: "tool_loop_exceeded".into(),
                message: "limit reached".into(),
            },
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
    }
}
