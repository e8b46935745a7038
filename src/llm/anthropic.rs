//! Anthropic Messages API provider.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;

use super::error::ModelError;
use super::provider::ModelProvider;
use super::types::{ChatRequest, Message, ModelEvent, ModelStream, Role, ToolCall, UsageReport};
use crate::sse_parser::SseFrameStream;

/// Provider speaking the Anthropic Messages API, streaming only.
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    api_version: String,
}

impl AnthropicProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    pub const DEFAULT_API_VERSION: &'static str = "2023-06-01";

    #[must_use]
    pub fn new(client: Client, api_key: String, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string()),
            api_key,
            api_version: Self::DEFAULT_API_VERSION.to_string(),
        }
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ModelStream, ModelError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = to_request(&request);

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return Err(ModelError::RateLimit { retry_after });
            }
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let frames = SseFrameStream::new(response.bytes_stream());
        Ok(Box::pin(StreamAdapter::new(frames)))
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(serde::Serialize)]
struct Request {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<serde_json::Value>,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    stream: bool,
}

#[derive(serde::Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<serde_json::Value>,
}

#[derive(serde::Serialize)]
#[serde(untagged)]
enum RequestMessage {
    Text {
        role: String,
        content: String,
    },
    ContentBlocks {
        role: String,
        content: Vec<ContentBlock>,
    },
}

#[derive(serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

fn to_request(request: &ChatRequest) -> Request {
    let mut messages = Vec::new();

    for msg in &request.messages {
        match msg.role {
            Role::User => messages.push(RequestMessage::Text {
                role: "user".to_string(),
                content: msg.content.clone().unwrap_or_default(),
            }),
            Role::Assistant => {
                if let Some(ref tool_calls) = msg.tool_calls {
                    let mut blocks = Vec::new();
                    if let Some(ref content) = msg.content {
                        if !content.is_empty() {
                            blocks.push(ContentBlock::Text {
                                text: content.clone(),
                            });
                        }
                    }
                    for tc in tool_calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: tc.input.clone(),
                        });
                    }
                    messages.push(RequestMessage::ContentBlocks {
                        role: "assistant".to_string(),
                        content: blocks,
                    });
                } else {
                    messages.push(RequestMessage::Text {
                        role: "assistant".to_string(),
                        content: msg.content.clone().unwrap_or_default(),
                    });
                }
            }
            Role::Tool => {
                // Tool results travel as user messages with tool_result blocks.
                if let Some(ref tool_call_id) = msg.tool_call_id {
                    messages.push(RequestMessage::ContentBlocks {
                        role: "user".to_string(),
                        content: vec![ContentBlock::ToolResult {
                            tool_use_id: tool_call_id.clone(),
                            content: msg.content.clone().unwrap_or_default(),
                        }],
                    });
                }
            }
        }
    }

    // Cache the system prompt and the tool table: both are stable across
    // turns, which is where the cache-read savings come from.
    let cache_control = serde_json::json!({"type": "ephemeral"});
    let system = request.system.as_ref().map(|text| {
        serde_json::json!([{
            "type": "text",
            "text": text,
            "cache_control": cache_control.clone(),
        }])
    });

    let tools = if request.tools.is_empty() {
        None
    } else {
        let last = request.tools.len() - 1;
        Some(
            request
                .tools
                .iter()
                .enumerate()
                .map(|(i, t)| AnthropicTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                    cache_control: (i == last).then(|| cache_control.clone()),
                })
                .collect(),
        )
    };

    Request {
        model: request.model.clone(),
        max_tokens: request.max_tokens,
        system,
        messages,
        temperature: request.temperature,
        tools,
        stream: true,
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Adapter converting Anthropic SSE frames into [`ModelEvent`]s.
struct StreamAdapter<S> {
    inner: SseFrameStream<S>,
    done: bool,
    usage: UsageReport,
    saw_usage: bool,
    tool_calls: Vec<ToolCallAccumulator>,
    tool_use_requested: bool,
}

/// Accumulates one tool_use block across input_json deltas.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

impl<S> StreamAdapter<S> {
    fn new(inner: SseFrameStream<S>) -> Self {
        Self {
            inner,
            done: false,
            usage: UsageReport::default(),
            saw_usage: false,
            tool_calls: Vec::new(),
            tool_use_requested: false,
        }
    }

    fn finalize_tool_calls(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.tool_calls)
            .into_iter()
            .filter(|tc| !tc.id.is_empty())
            .map(|tc| {
                let input = if tc.input_json.trim().is_empty() {
                    serde_json::Value::Object(Default::default())
                } else {
                    serde_json::from_str(&tc.input_json).unwrap_or_else(|e| {
                        tracing::warn!(
                            tool = %tc.name,
                            error = %e,
                            "malformed tool input json, using empty object"
                        );
                        serde_json::Value::Object(Default::default())
                    })
                };
                ToolCall {
                    id: tc.id,
                    name: tc.name,
                    input,
                }
            })
            .collect()
    }

    fn take_usage(&mut self) -> Option<UsageReport> {
        self.saw_usage.then(|| std::mem::take(&mut self.usage))
    }
}

impl<S> Stream for StreamAdapter<S>
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<ModelEvent, ModelError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    if frame.data.is_empty() {
                        continue;
                    }
                    let parsed = match serde_json::from_str::<StreamFrame>(&frame.data) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::debug!(
                                data = %frame.data,
                                error = %e,
                                "unrecognized upstream sse frame"
                            );
                            continue;
                        }
                    };

                    match parsed {
                        StreamFrame::MessageStart { message } => {
                            if let Some(u) = message.and_then(|m| m.usage) {
                                self.usage.fold(&u.into_report());
                                self.saw_usage = true;
                            }
                        }
                        StreamFrame::ContentBlockStart {
                            index,
                            content_block: Some(block),
                        } if block.block_type == "tool_use" => {
                            let idx = index.unwrap_or(0) as usize;
                            while self.tool_calls.len() <= idx {
                                self.tool_calls.push(ToolCallAccumulator::default());
                            }
                            self.tool_calls[idx].id = block.id.unwrap_or_default();
                            self.tool_calls[idx].name = block.name.unwrap_or_default();
                        }
                        StreamFrame::ContentBlockStart { .. }
                        | StreamFrame::ContentBlockStop { .. }
                        | StreamFrame::Ping
                        | StreamFrame::Unknown => {}
                        StreamFrame::ContentBlockDelta { index, delta } => {
                            if let Some(text) = delta.text {
                                if !text.is_empty() {
                                    return Poll::Ready(Some(Ok(ModelEvent::Chunk(text))));
                                }
                            }
                            if let Some(partial) = delta.partial_json {
                                let idx = index.unwrap_or(0) as usize;
                                if idx < self.tool_calls.len() {
                                    self.tool_calls[idx].input_json.push_str(&partial);
                                }
                            }
                        }
                        StreamFrame::MessageDelta { usage, stop_reason } => {
                            if let Some(u) = usage {
                                self.usage.output_tokens = u.output_tokens;
                                self.saw_usage = true;
                            }
                            if stop_reason.as_deref() == Some("tool_use") {
                                self.tool_use_requested = true;
                            }
                        }
                        StreamFrame::MessageStop => {
                            self.done = true;
                            if self.tool_use_requested && !self.tool_calls.is_empty() {
                                let calls = self.finalize_tool_calls();
                                if !calls.is_empty() {
                                    // Done is emitted on the next poll, when
                                    // the exhausted inner stream returns None.
                                    self.done = false;
                                    self.tool_use_requested = false;
                                    return Poll::Ready(Some(Ok(ModelEvent::ToolUse(calls))));
                                }
                            }
                            let usage = self.take_usage();
                            return Poll::Ready(Some(Ok(ModelEvent::Done { usage })));
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(ModelError::Request(e))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if !self.tool_calls.is_empty() {
                        let calls = self.finalize_tool_calls();
                        if !calls.is_empty() {
                            self.done = false;
                            return Poll::Ready(Some(Ok(ModelEvent::ToolUse(calls))));
                        }
                    }
                    let usage = self.take_usage();
                    return Poll::Ready(Some(Ok(ModelEvent::Done { usage })));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// ============================================================================
// Upstream Frame Types
// ============================================================================

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamFrame {
    MessageStart {
        message: Option<StartMessage>,
    },
    ContentBlockStart {
        index: Option<u32>,
        content_block: Option<StreamContentBlock>,
    },
    ContentBlockDelta {
        index: Option<u32>,
        delta: Delta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: Option<u32>,
    },
    MessageDelta {
        usage: Option<DeltaUsage>,
        stop_reason: Option<String>,
    },
    MessageStop,
    Ping,
    #[serde(other)]
    Unknown,
}

#[derive(serde::Deserialize)]
struct StartMessage {
    usage: Option<WireUsage>,
}

#[derive(serde::Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

impl WireUsage {
    fn into_report(self) -> UsageReport {
        UsageReport {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_write_tokens: self.cache_creation_input_tokens,
            cache_read_tokens: self.cache_read_input_tokens,
        }
    }
}

#[derive(serde::Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    output_tokens: u64,
}

#[derive(serde::Deserialize)]
struct StreamContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(serde::Deserialize)]
struct Delta {
    text: Option<String>,
    partial_json: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolDefinition;

    fn request_with(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            messages,
            system: Some("You are the archivist.".to_string()),
            temperature: None,
            max_tokens: 4000,
            tools: vec![],
        }
    }

    #[test]
    fn converts_text_messages() {
        let req = to_request(&request_with(vec![
            Message::text(Role::User, "Hello"),
            Message::text(Role::Assistant, "Hi there"),
        ]));

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Hello");
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn system_prompt_carries_cache_control() {
        let req = to_request(&request_with(vec![Message::text(Role::User, "Hi")]));
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["system"][0]["text"], "You are the archivist.");
        assert_eq!(json["system"][0]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn tool_calls_become_tool_use_blocks() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "search_docs".to_string(),
            input: serde_json::json!({"query": "X"}),
        };
        let req = to_request(&request_with(vec![
            Message::text(Role::User, "find X"),
            Message::assistant_tool_calls(Some("Searching".to_string()), vec![call]),
            Message::tool_result("call_1", r#"{"results":[]}"#),
        ]));

        let json = serde_json::to_value(&req).unwrap();
        let assistant = &json["messages"][1];
        assert_eq!(assistant["content"][0]["type"], "text");
        assert_eq!(assistant["content"][1]["type"], "tool_use");
        assert_eq!(assistant["content"][1]["name"], "search_docs");

        let tool_msg = &json["messages"][2];
        assert_eq!(tool_msg["role"], "user");
        assert_eq!(tool_msg["content"][0]["type"], "tool_result");
        assert_eq!(tool_msg["content"][0]["tool_use_id"], "call_1");
    }

    #[test]
    fn last_tool_definition_carries_cache_control() {
        let mut request = request_with(vec![Message::text(Role::User, "Hi")]);
        request.tools = vec![
            ToolDefinition {
                name: "search_docs".to_string(),
                description: "Search the knowledge base".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            },
            ToolDefinition {
                name: "get_catalog".to_string(),
                description: "List modules".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            },
        ];

        let json = serde_json::to_value(to_request(&request)).unwrap();
        assert!(json["tools"][0].get("cache_control").is_none());
        assert_eq!(json["tools"][1]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn wire_usage_maps_cache_fields() {
        let wire: WireUsage = serde_json::from_str(
            r#"{"input_tokens":12,"output_tokens":0,
                "cache_creation_input_tokens":800,"cache_read_input_tokens":2400}"#,
        )
        .unwrap();
        let report = wire.into_report();
        assert_eq!(report.input_tokens, 12);
        assert_eq!(report.cache_write_tokens, 800);
        assert_eq!(report.cache_read_tokens, 2400);
    }

    #[tokio::test]
    async fn adapter_decodes_text_stream() {
        use futures::StreamExt;

        let frames = vec![
            r#"{"type":"message_start","message":{"usage":{"input_tokens":10,"output_tokens":0,"cache_read_input_tokens":100}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"text":"Hi"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"text":" there"}}"#,
            r#"{"type":"message_delta","usage":{"output_tokens":4},"stop_reason":"end_turn"}"#,
            r#"{"type":"message_stop"}"#,
        ];
        let body: String = frames
            .iter()
            .map(|f| format!("event: x\ndata: {f}\n\n"))
            .collect();
        let bytes: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![Ok(bytes::Bytes::from(body))];
        let mut adapter =
            StreamAdapter::new(SseFrameStream::new(Box::pin(futures::stream::iter(bytes))));

        let mut chunks = String::new();
        let mut usage = None;
        while let Some(event) = adapter.next().await {
            match event.unwrap() {
                ModelEvent::Chunk(text) => chunks.push_str(&text),
                ModelEvent::Done { usage: u } => usage = u,
                ModelEvent::ToolUse(_) => panic!("unexpected tool use"),
            }
        }

        assert_eq!(chunks, "Hi there");
        let usage = usage.unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 4);
        assert_eq!(usage.cache_read_tokens, 100);
    }

    #[tokio::test]
    async fn adapter_accumulates_tool_use() {
        use futures::StreamExt;

        let frames = vec![
            r#"{"type":"message_start","message":{"usage":{"input_tokens":8,"output_tokens":0}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"call_9","name":"search_docs"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"partial_json":"{\"que"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"partial_json":"ry\":\"X\"}"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","usage":{"output_tokens":12},"stop_reason":"tool_use"}"#,
            r#"{"type":"message_stop"}"#,
        ];
        let body: String = frames
            .iter()
            .map(|f| format!("event: x\ndata: {f}\n\n"))
            .collect();
        let bytes: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![Ok(bytes::Bytes::from(body))];
        let mut adapter =
            StreamAdapter::new(SseFrameStream::new(Box::pin(futures::stream::iter(bytes))));

        let mut tool_calls = Vec::new();
        let mut saw_done = false;
        while let Some(event) = adapter.next().await {
            match event.unwrap() {
                ModelEvent::ToolUse(calls) => tool_calls = calls,
                ModelEvent::Done { .. } => saw_done = true,
                ModelEvent::Chunk(_) => panic!("unexpected chunk"),
            }
        }

        assert!(saw_done);
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].id, "call_9");
        assert_eq!(tool_calls[0].name, "search_docs");
        assert_eq!(tool_calls[0].input, serde_json::json!({"query": "X"}));
    }
}
