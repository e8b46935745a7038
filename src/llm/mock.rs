//! Deterministic mock providers for tests.
//!
//! `ScriptedProvider` lets tests specify exact model-event sequences,
//! including tool calls, without network access. Each `chat_stream` call
//! pops the next script; a repeating provider replays one script forever,
//! which is how runaway tool loops are exercised.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use super::error::ModelError;
use super::provider::ModelProvider;
use super::types::{ChatRequest, ModelEvent, ModelStream, ToolCall, UsageReport};

/// A pre-scripted provider. The outer `Vec` is the ordered list of calls;
/// the inner `Vec` is the event sequence emitted for that call.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<ModelEvent>>>,
    /// Script replayed once the queue is empty (None: extra calls error).
    repeat: Option<Vec<ModelEvent>>,
    /// The last request seen, for inspection by tests.
    last_request: Mutex<Option<ChatRequest>>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of response scripts.
    pub fn new(scripts: Vec<Vec<ModelEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            repeat: None,
            last_request: Mutex::new(None),
        }
    }

    /// Build a provider that replays the same script for every call.
    pub fn repeating(script: Vec<ModelEvent>) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            repeat: Some(script),
            last_request: Mutex::new(None),
        }
    }

    /// The request most recently passed to `chat_stream`.
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().unwrap().clone()
    }

    /// Convenience: a single-call script of text chunks plus a usage report.
    pub fn chunks(parts: &[&str], usage: UsageReport) -> Vec<ModelEvent> {
        let mut events: Vec<ModelEvent> = parts
            .iter()
            .map(|p| ModelEvent::Chunk((*p).to_string()))
            .collect();
        events.push(ModelEvent::Done { usage: Some(usage) });
        events
    }

    /// Convenience: a single-call script requesting one tool.
    pub fn tool_use(call: ToolCall, usage: UsageReport) -> Vec<ModelEvent> {
        vec![
            ModelEvent::ToolUse(vec![call]),
            ModelEvent::Done { usage: Some(usage) },
        ]
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ModelStream, ModelError> {
        *self.last_request.lock().unwrap() = Some(request);

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.pop_front() {
                Some(s) => s,
                None => match &self.repeat {
                    Some(s) => s.clone(),
                    None => {
                        return Err(ModelError::Api {
                            status: 500,
                            message: "scripted provider exhausted".to_string(),
                        });
                    }
                },
            }
        };

        let events: Vec<Result<ModelEvent, ModelError>> = script.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}
