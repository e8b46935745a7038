//! The turn orchestrator.
//!
//! Drives one user turn through the model/tool loop:
//! 1. Build the conversation from history plus the new user message
//! 2. Call the model and stream its events
//! 3. On tool calls: dispatch, feed results back, call the model again
//! 4. On a plain completion: finalize the turn
//! 5. Bound the loop by the configured iteration limit
//!
//! Events are emitted over an mpsc channel as they are produced; the
//! cancellation token is observed at every suspension point, so a client
//! disconnect ends the turn at the next await rather than consuming model
//! resources indefinitely. Whatever terminal state is reached, the turn is
//! appended to session history.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ulid::Ulid;

use super::handle::SessionHandle;
use super::turn::{Step, Turn, TurnFailure, TurnOutcome, UserMessage};
use crate::api::CALL_ID_PREFIX;
use crate::cost::{CostMetrics, PricingTable};
use crate::llm::{
    ChatRequest, Message, ModelError, ModelEvent, ModelProvider, Role, ToolCall, UsageReport,
};
use crate::tools::ToolDispatcher;

/// Retry budget for transient model-backend failures at stream start.
const MODEL_START_RETRIES: u32 = 3;

/// Events emitted while a turn runs, in strict production order.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Started {
        session_id: String,
    },
    Content {
        text: String,
    },
    ToolCall {
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        name: String,
        output: Result<serde_json::Value, String>,
    },
    Completed {
        usage: CostMetrics,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

/// Why a turn failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Model backend error, including per-suspension-point timeouts.
    ModelError,
    /// The tool loop hit its iteration limit.
    ToolLoopExceeded,
    /// The client went away mid-stream.
    ClientDisconnected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ModelError => "model_error",
            FailureKind::ToolLoopExceeded => "tool_loop_exceeded",
            FailureKind::ClientDisconnected => "client_disconnected",
        }
    }
}

/// Tunables for one turn.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    /// Maximum model/tool iterations before the turn fails.
    pub max_tool_iterations: u32,
    /// Per-suspension-point timeout while awaiting model events.
    pub model_idle_timeout: Duration,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            max_tool_iterations: 5,
            model_idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Everything a turn needs beyond the session itself.
#[derive(Clone)]
pub struct TurnContext {
    pub provider: Arc<dyn ModelProvider>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub pricing: PricingTable,
    pub options: TurnOptions,
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: u32,
}

/// Internal accumulation for a turn in progress.
struct TurnBuilder {
    user: UserMessage,
    steps: Vec<Step>,
    final_text: String,
    usage: UsageReport,
    started_at: chrono::DateTime<Utc>,
}

impl TurnBuilder {
    fn new(user: UserMessage) -> Self {
        Self {
            user,
            steps: Vec::new(),
            final_text: String::new(),
            usage: UsageReport::default(),
            started_at: Utc::now(),
        }
    }

    fn finish(self, outcome: TurnOutcome, pricing: &PricingTable) -> Turn {
        Turn {
            user_message: self.user,
            steps: self.steps,
            final_text: self.final_text,
            usage: CostMetrics::compute(&self.usage, pricing),
            outcome,
            started_at: self.started_at,
            ended_at: Utc::now(),
        }
    }
}

/// Emitter that notices a gone receiver and flips the cancellation token,
/// so a dropped stream is observed at the next suspension point.
struct Emitter {
    tx: mpsc::Sender<TurnEvent>,
    cancel: CancellationToken,
}

impl Emitter {
    async fn emit(&self, event: TurnEvent) {
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
        }
    }
}

/// Run one turn to a terminal state.
///
/// The finished turn (completed or failed) is appended to the session; the
/// turn gate must already be held by the caller via `begin_turn`.
pub async fn run_turn(
    ctx: TurnContext,
    handle: SessionHandle,
    user: UserMessage,
    events: mpsc::Sender<TurnEvent>,
    cancel: CancellationToken,
) {
    let emitter = Emitter {
        tx: events,
        cancel: cancel.clone(),
    };

    emitter
        .emit(TurnEvent::Started {
            session_id: handle.id().to_string(),
        })
        .await;

    let mut builder = TurnBuilder::new(user);

    let mut messages = match handle.conversation().await {
        Ok(m) => m,
        Err(e) => {
            // Session actor gone before the turn even started; nothing to
            // append to.
            warn!(session_id = %handle.id(), error = %e, "session unavailable at turn start");
            emitter
                .emit(TurnEvent::Failed {
                    kind: FailureKind::ModelError,
                    message: e.to_string(),
                })
                .await;
            return;
        }
    };
    messages.push(Message::text(Role::User, &builder.user.content));

    let outcome = drive_loop(&ctx, &emitter, &cancel, &mut builder, &mut messages).await;
    finalize(&ctx, &handle, &emitter, builder, outcome).await;
}

/// The model/tool loop itself. Returns the terminal outcome.
async fn drive_loop(
    ctx: &TurnContext,
    emitter: &Emitter,
    cancel: &CancellationToken,
    builder: &mut TurnBuilder,
    messages: &mut Vec<Message>,
) -> Result<(), (FailureKind, String)> {
    let max_iterations = ctx.options.max_tool_iterations;
    let mut iteration = 0u32;

    loop {
        iteration += 1;
        if iteration > max_iterations {
            return Err((
                FailureKind::ToolLoopExceeded,
                format!("tool loop exceeded {max_iterations} iterations"),
            ));
        }

        debug!(iteration, max_iterations, messages = messages.len(), "turn iteration");

        let request = ChatRequest {
            model: ctx.model.clone(),
            messages: messages.clone(),
            system: ctx.system_prompt.clone(),
            temperature: ctx.temperature,
            max_tokens: ctx.max_output_tokens,
            tools: ctx.dispatcher.definitions(),
        };

        let mut stream = start_stream(ctx, cancel, request).await?;

        // Consume the stream: content chunks forward immediately, tool
        // calls collect for dispatch after the model stops.
        let mut pending_calls: Vec<ToolCall> = Vec::new();
        let mut iteration_text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err((
                        FailureKind::ClientDisconnected,
                        "client disconnected mid-stream".to_string(),
                    ));
                }
                item = tokio::time::timeout(ctx.options.model_idle_timeout, stream.next()) => item,
            };

            let event = match next {
                Ok(Some(Ok(event))) => event,
                Ok(Some(Err(e))) => {
                    return Err((FailureKind::ModelError, e.to_string()));
                }
                Ok(None) => break,
                Err(_) => {
                    let e = ModelError::Timeout(ctx.options.model_idle_timeout.as_secs());
                    return Err((FailureKind::ModelError, e.to_string()));
                }
            };

            match event {
                ModelEvent::Chunk(text) => {
                    builder.final_text.push_str(&text);
                    iteration_text.push_str(&text);
                    builder.steps.push(Step::Content { text: text.clone() });
                    emitter.emit(TurnEvent::Content { text }).await;
                }
                ModelEvent::ToolUse(calls) => {
                    pending_calls = calls;
                }
                ModelEvent::Done { usage } => {
                    if let Some(u) = usage {
                        builder.usage.fold(&u);
                    }
                    break;
                }
            }
        }

        if pending_calls.is_empty() {
            return Ok(());
        }

        // ToolPending: dispatch each call, record steps, feed results back.
        let assistant_calls = assign_call_ids(pending_calls);
        let assistant_text = (!iteration_text.is_empty()).then_some(iteration_text);
        messages.push(Message::assistant_tool_calls(
            assistant_text,
            assistant_calls.clone(),
        ));

        for call in assistant_calls {
            builder.steps.push(Step::ToolCall {
                call_id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
            emitter
                .emit(TurnEvent::ToolCall {
                    name: call.name.clone(),
                    input: call.input.clone(),
                })
                .await;

            if cancel.is_cancelled() {
                // Pair the recorded call with a synthetic result so the
                // failed turn never carries an unanswered tool call.
                builder.steps.push(Step::ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    output: None,
                    error: Some("skipped: client disconnected".to_string()),
                });
                return Err((
                    FailureKind::ClientDisconnected,
                    "client disconnected before tool dispatch".to_string(),
                ));
            }

            // Tools are not force-killed: the dispatched call runs to its
            // own completion or timeout even if the client goes away.
            let result = ctx.dispatcher.invoke(&call.name, &call.input).await;

            let (output, error, feedback) = match result {
                Ok(value) => {
                    let feedback = value.to_string();
                    (Some(value), None, feedback)
                }
                Err(e) => {
                    let text = e.to_string();
                    (None, Some(text.clone()), format!("Error: {text}"))
                }
            };

            builder.steps.push(Step::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                output: output.clone(),
                error: error.clone(),
            });
            messages.push(Message::tool_result(&call.id, feedback));

            if cancel.is_cancelled() {
                // The tool ran to completion; its result is recorded in the
                // turn but never delivered to the gone client.
                return Err((
                    FailureKind::ClientDisconnected,
                    "client disconnected during tool execution".to_string(),
                ));
            }

            emitter
                .emit(TurnEvent::ToolResult {
                    name: call.name.clone(),
                    output: match (output, error) {
                        (Some(value), _) => Ok(value),
                        (None, Some(e)) => Err(e),
                        (None, None) => Err("tool produced no output".to_string()),
                    },
                })
                .await;
        }
        // Back to ModelPending with the augmented conversation.
    }
}

/// Start the model stream, retrying transient failures with bounded backoff.
async fn start_stream(
    ctx: &TurnContext,
    cancel: &CancellationToken,
    request: ChatRequest,
) -> Result<crate::llm::ModelStream, (FailureKind, String)> {
    let mut attempt = 0u32;
    loop {
        match ctx.provider.chat_stream(request.clone()).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.is_transient() && attempt < MODEL_START_RETRIES => {
                attempt += 1;
                let delay = match &e {
                    ModelError::RateLimit {
                        retry_after: Some(secs),
                    } => *secs,
                    _ => 2u64.pow(attempt),
                };
                warn!(attempt, delay_secs = delay, error = %e, "transient model error, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err((
                            FailureKind::ClientDisconnected,
                            "client disconnected while awaiting retry".to_string(),
                        ));
                    }
                    _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                }
            }
            Err(e) => return Err((FailureKind::ModelError, e.to_string())),
        }
    }
}

/// Tool calls from a scripted or live model may arrive without IDs; give
/// every call a unique one so results pair up unambiguously.
fn assign_call_ids(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.is_empty() {
                call.id = format!("{}{}", CALL_ID_PREFIX, Ulid::new());
            }
            call
        })
        .collect()
}

/// Emit the terminal event and append the finished turn to the session.
async fn finalize(
    ctx: &TurnContext,
    handle: &SessionHandle,
    emitter: &Emitter,
    builder: TurnBuilder,
    outcome: Result<(), (FailureKind, String)>,
) {
    let turn = match outcome {
        Ok(()) => {
            let turn = builder.finish(TurnOutcome::Completed, &ctx.pricing);
            emitter
                .emit(TurnEvent::Completed {
                    usage: turn.usage.clone(),
                })
                .await;
            turn
        }
        Err((kind, message)) => {
            warn!(session_id = %handle.id(), kind = kind.as_str(), %message, "turn failed");
            let turn = builder.finish(
                TurnOutcome::Failed {
                    failure: TurnFailure {
                        kind: kind.as_str().to_string(),
                        message: message.clone(),
                    },
                },
                &ctx.pricing,
            );
            emitter.emit(TurnEvent::Failed { kind, message }).await;
            turn
        }
    };

    // Every terminal state is observable in history, partial turns included.
    if let Err(e) = handle.append_turn(turn).await {
        warn!(session_id = %handle.id(), error = %e, "failed to append finished turn");
    }
}
