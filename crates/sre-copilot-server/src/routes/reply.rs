use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{self, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use serde_json::Value;
use sre_copilot::{
    a2ui,
    client::A2UI_EXTENSION,
    models::content::join_text,
    models::message::{Message, MessageContent},
    models::role::Role,
    protocol::{format_sse, ChatMessage, ChatRequest, ChatResponse, StreamEvent},
};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

const NO_USER_MESSAGE: &str = "No user message provided";
const HEARTBEAT: Duration = Duration::from_millis(500);

pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = axum::body::Body::from_stream(self);

        http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .header("X-Accel-Buffering", "no")
            .body(body)
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build event stream response: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            })
    }
}

/// The client's transcript as agent messages; roles other than user and assistant are dropped
fn convert_messages(incoming: &[ChatMessage]) -> Vec<Message> {
    incoming
        .iter()
        .filter_map(|msg| match msg.role.as_str() {
            "user" => Some(Message::user().with_text(&msg.content)),
            "assistant" if !msg.content.is_empty() => {
                Some(Message::assistant().with_text(&msg.content))
            }
            "assistant" => None,
            _ => {
                tracing::warn!("Unknown role: {}", msg.role);
                None
            }
        })
        .collect()
}

/// Tool output as it appears in `TOOL_CALL_END`: the JSON mapping when the tool returned one
fn tool_result_value(message_text: &str) -> Value {
    serde_json::from_str(message_text)
        .unwrap_or_else(|_| Value::String(message_text.to_string()))
}

/// Translates agent messages of one turn into stream events
struct TurnEmitter {
    tx: mpsc::Sender<String>,
    thread_id: String,
    message_id: String,
    full_response: String,
}

impl TurnEmitter {
    fn new(tx: mpsc::Sender<String>, thread_id: String) -> Self {
        Self {
            tx,
            thread_id,
            message_id: Uuid::new_v4().to_string(),
            full_response: String::new(),
        }
    }

    async fn send(&self, event: StreamEvent) -> Result<(), mpsc::error::SendError<String>> {
        self.tx.send(format_sse(&event)).await
    }

    async fn text(&mut self, delta: String) -> Result<(), mpsc::error::SendError<String>> {
        self.full_response.push_str(&delta);
        self.send(StreamEvent::TextMessageContent {
            message_id: self.message_id.clone(),
            delta,
            thread_id: self.thread_id.clone(),
        })
        .await
    }

    /// Failures are shown to the user but are not part of the answer
    async fn error(&self, error: &anyhow::Error) -> Result<(), mpsc::error::SendError<String>> {
        self.send(StreamEvent::TextMessageContent {
            message_id: self.message_id.clone(),
            delta: format!("\n\nError: {}", error),
            thread_id: self.thread_id.clone(),
        })
        .await
    }

    async fn message(&mut self, message: Message) -> Result<(), mpsc::error::SendError<String>> {
        for content in message.content {
            match (message.role, content) {
                (Role::Assistant, MessageContent::Text(text)) => {
                    if text.text.is_empty() {
                        continue;
                    }
                    // keep answers from separate model calls apart
                    let delta = if self.full_response.is_empty() {
                        text.text
                    } else {
                        format!("\n\n{}", text.text)
                    };
                    self.text(delta).await?;
                }
                (Role::Assistant, MessageContent::ToolRequest(request)) => {
                    let (tool_name, args) = match request.tool_call {
                        Ok(call) => (call.name, call.arguments),
                        Err(_) => (
                            "invalid_tool_call".to_string(),
                            Value::Object(Default::default()),
                        ),
                    };
                    self.send(StreamEvent::ToolCallStart {
                        tool_call_id: request.id.clone(),
                        tool_name,
                        thread_id: self.thread_id.clone(),
                    })
                    .await?;
                    self.send(StreamEvent::ToolCallArgs {
                        tool_call_id: request.id,
                        args,
                        thread_id: self.thread_id.clone(),
                    })
                    .await?;
                }
                (Role::User, MessageContent::ToolResponse(response)) => {
                    let (result, error) = match response.tool_result {
                        Ok(contents) => (Some(tool_result_value(&join_text(&contents))), None),
                        Err(e) => (None, Some(e.to_string())),
                    };
                    self.send(StreamEvent::ToolCallEnd {
                        tool_call_id: response.id,
                        result,
                        error,
                        thread_id: self.thread_id.clone(),
                    })
                    .await?;
                }
                _ => continue,
            }
        }
        Ok(())
    }
}

/// Run one chat turn and publish it on `tx`.
///
/// The event order is fixed: RUN_START, TEXT_MESSAGE_START, text and tool events,
/// TEXT_MESSAGE_END, the declarative surface when requested, RUN_END.
async fn run_turn(
    state: AppState,
    thread_id: String,
    transcript: Vec<Message>,
    user_message: String,
    use_a2ui: bool,
    tx: mpsc::Sender<String>,
) {
    let mut emitter = TurnEmitter::new(tx, thread_id.clone());

    let run_start = StreamEvent::RunStart {
        thread_id: thread_id.clone(),
        run_id: Uuid::new_v4().to_string(),
    };
    let message_start = StreamEvent::TextMessageStart {
        message_id: emitter.message_id.clone(),
        thread_id: thread_id.clone(),
    };
    if emitter.send(run_start).await.is_err() || emitter.send(message_start).await.is_err() {
        tracing::info!(thread_id = %thread_id, "client disconnected before the turn started");
        return;
    }

    // the thread only changes when the turn reaches its end
    let mut turn = state
        .threads
        .begin_turn(&thread_id, transcript, Message::user().with_text(user_message))
        .await;

    match state.agent.reply(turn.conversation()).await {
        Ok(mut stream) => loop {
            match timeout(HEARTBEAT, stream.next()).await {
                Ok(Some(Ok(message))) => {
                    turn.record(message.clone());
                    if let Err(e) = emitter.message(message).await {
                        tracing::error!("Error sending message through channel: {}", e);
                        return;
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::error!(thread_id = %thread_id, "Error processing message: {}", e);
                    if emitter.error(&e).await.is_err() {
                        return;
                    }
                    break;
                }
                Ok(None) => break,
                // Heartbeat, used to detect disconnected clients and then end running tools.
                Err(_) => {
                    if emitter.tx.is_closed() {
                        tracing::info!(thread_id = %thread_id, "client disconnected, stopping turn");
                        return;
                    }
                }
            }
        },
        Err(e) => {
            tracing::error!(thread_id = %thread_id, "Failed to start reply stream: {}", e);
            if emitter.error(&e).await.is_err() {
                return;
            }
        }
    }
    state.threads.commit(turn).await;

    let _ = emitter
        .send(StreamEvent::TextMessageEnd {
            message_id: emitter.message_id.clone(),
            thread_id: thread_id.clone(),
        })
        .await;

    if use_a2ui && !emitter.full_response.is_empty() {
        for a2ui in a2ui::generate(&emitter.full_response) {
            let _ = emitter
                .send(StreamEvent::A2ui {
                    a2ui,
                    thread_id: thread_id.clone(),
                })
                .await;
        }
    }

    let _ = emitter.send(StreamEvent::RunEnd { thread_id }).await;
}

async fn stream_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, ApiError> {
    let user_message = request
        .last_user_message()
        .ok_or_else(|| ApiError::BadRequest(NO_USER_MESSAGE.to_string()))?
        .to_string();
    let thread_id = request
        .thread_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let use_a2ui = request.wants_extension(A2UI_EXTENSION);
    let transcript = convert_messages(&request.messages);

    let threads = state.threads.len().await;
    tracing::info!(
        thread_id = %thread_id,
        use_a2ui,
        threads,
        "starting streamed turn"
    );

    let (tx, rx) = mpsc::channel(100);
    tokio::spawn(run_turn(
        state,
        thread_id,
        transcript,
        user_message,
        use_a2ui,
        tx,
    ));

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

// non streaming variant, answers with the assistant's final text
async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let user_message = request
        .last_user_message()
        .ok_or_else(|| ApiError::BadRequest(NO_USER_MESSAGE.to_string()))?
        .to_string();
    let thread_id = request
        .thread_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut turn = state
        .threads
        .begin_turn(
            &thread_id,
            convert_messages(&request.messages),
            Message::user().with_text(user_message),
        )
        .await;

    let mut answer = String::new();
    match state.agent.reply(turn.conversation()).await {
        Ok(mut stream) => {
            while let Some(response) = stream.next().await {
                match response {
                    Ok(message) => {
                        if message.role == Role::Assistant {
                            let text = message.text();
                            if !text.is_empty() {
                                answer = text;
                            }
                        }
                        turn.record(message);
                    }
                    Err(e) => {
                        tracing::error!(thread_id = %thread_id, "Error processing chat message: {}", e);
                        answer = format!("Error: {}", e);
                        break;
                    }
                }
            }
        }
        Err(e) => {
            tracing::error!(thread_id = %thread_id, "Failed to start reply stream: {}", e);
            answer = format!("Error: {}", e);
        }
    }
    state.threads.commit(turn).await;

    Ok(Json(ChatResponse {
        message: answer,
        thread_id,
    }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/stream", post(stream_handler))
        .route("/chat", post(chat_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use crate::testing::{app_state, ScriptedProvider};
    use axum::body::Body;
    use http_body_util::BodyExt;
    use serde_json::json;
    use sre_copilot::client::{ConversationView, SseDecoder, ToolStatus};
    use sre_copilot::models::tool::ToolCall;
    use tower::ServiceExt;

    const TABLE_ANSWER: &str =
        "Pods in default:\n\n| Pod | Status |\n|---|---|\n| api-1 | Running |\n| api-2 | Pending |";

    fn post(path: &str, body: Value) -> http::Request<Body> {
        http::Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Event kinds in arrival order plus the folded view
    fn replay(body: &str) -> (Vec<&'static str>, ConversationView) {
        let mut decoder = SseDecoder::new();
        let mut view = ConversationView::new();
        let mut kinds = Vec::new();
        for payload in decoder.push(body.as_bytes()) {
            if let Some(event) = view.apply_payload(&payload) {
                kinds.push(event.kind());
            }
        }
        (kinds, view)
    }

    #[test]
    fn test_convert_messages() {
        let messages = convert_messages(&[
            ChatMessage::user("pods?"),
            ChatMessage::assistant(""),
            ChatMessage {
                role: "system".into(),
                content: "ignored".into(),
            },
            ChatMessage::assistant("two pods"),
        ]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].text(), "two pods");
    }

    #[test]
    fn test_tool_result_value() {
        assert_eq!(tool_result_value("{\"count\": 1}"), json!({"count": 1}));
        assert_eq!(tool_result_value("plain"), json!("plain"));
    }

    #[tokio::test]
    async fn test_stream_requires_user_message() {
        let app = routes::configure(app_state(ScriptedProvider::new(vec![]), false));
        let response = app
            .oneshot(post(
                "/stream",
                json!({"messages": [{"role": "assistant", "content": "hi"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body, json!({"detail": "No user message provided"}));
    }

    #[tokio::test]
    async fn test_stream_turn_with_tool_call_and_surface() {
        let provider = ScriptedProvider::new(vec![
            Ok(Message::assistant().with_tool_request(
                "call-1",
                Ok(ToolCall::new(
                    "kubernetes__lookup",
                    json!({"namespace": "default"}),
                )),
            )),
            Ok(Message::assistant().with_text(TABLE_ANSWER)),
        ]);
        let app = routes::configure(app_state(provider, true));

        let response = app
            .oneshot(post(
                "/stream",
                json!({
                    "messages": [{"role": "user", "content": "list pods"}],
                    "thread_id": "t-1",
                    "extensions": ["a2ui"]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");

        let body = body_string(response).await;
        let (kinds, view) = replay(&body);
        assert_eq!(
            kinds,
            vec![
                "RUN_START",
                "TEXT_MESSAGE_START",
                "TOOL_CALL_START",
                "TOOL_CALL_ARGS",
                "TOOL_CALL_END",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_END",
                "A2UI_MESSAGE",
                "A2UI_MESSAGE",
                "RUN_END",
            ]
        );

        assert_eq!(view.thread_id.as_deref(), Some("t-1"));
        assert_eq!(view.text, TABLE_ANSWER);

        let tool = view.tool("call-1").unwrap();
        assert_eq!(tool.name, "kubernetes__lookup");
        assert_eq!(tool.status, ToolStatus::Success);
        assert_eq!(tool.result.as_ref().unwrap()["pods"], json!(["api-1", "api-2"]));

        let surface = view.surface().unwrap();
        assert_eq!(surface.children[0].component.id, "title_pods");
        assert_eq!(surface.children[1].component.kind, "table");
    }

    #[tokio::test]
    async fn test_stream_without_a2ui_extension() {
        let provider =
            ScriptedProvider::new(vec![Ok(Message::assistant().with_text(TABLE_ANSWER))]);
        let app = routes::configure(app_state(provider, false));

        let response = app
            .oneshot(post(
                "/stream",
                json!({"messages": [{"role": "user", "content": "list pods"}]}),
            ))
            .await
            .unwrap();

        let body = body_string(response).await;
        let (kinds, view) = replay(&body);
        assert!(!kinds.contains(&"A2UI_MESSAGE"));
        assert!(view.surface().is_none());
        // a thread id is assigned when the client sends none
        assert!(view.thread_id.is_some());
    }

    #[tokio::test]
    async fn test_stream_reports_model_failure_as_text() {
        let provider = ScriptedProvider::new(vec![Err("Server error: 529".to_string())]);
        let app = routes::configure(app_state(provider, false));

        let response = app
            .oneshot(post(
                "/stream",
                json!({
                    "messages": [{"role": "user", "content": "any alerts?"}],
                    "extensions": ["a2ui"]
                }),
            ))
            .await
            .unwrap();

        let body = body_string(response).await;
        let (kinds, view) = replay(&body);
        assert_eq!(view.text, "\n\nError: Server error: 529");
        // the error text never becomes a surface
        assert!(!kinds.contains(&"A2UI_MESSAGE"));
        assert_eq!(kinds.last(), Some(&"RUN_END"));
    }

    #[tokio::test]
    async fn test_chat_remembers_thread() {
        let provider = ScriptedProvider::new(vec![
            Ok(Message::assistant().with_text("No monitors are alerting.")),
            Ok(Message::assistant().with_text("There are no open incidents.")),
        ]);
        let seen = provider.seen();
        let app = routes::configure(app_state(provider, false));

        let first = app
            .clone()
            .oneshot(post(
                "/chat",
                json!({"messages": [{"role": "user", "content": "any alerts?"}], "thread_id": "t-9"}),
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first: Value = serde_json::from_str(&body_string(first).await).unwrap();
        assert_eq!(
            first,
            json!({"message": "No monitors are alerting.", "thread_id": "t-9"})
        );

        let second = app
            .oneshot(post(
                "/chat",
                json!({"messages": [{"role": "user", "content": "and incidents?"}], "thread_id": "t-9"}),
            ))
            .await
            .unwrap();
        let second: Value = serde_json::from_str(&body_string(second).await).unwrap();
        assert_eq!(second["message"], "There are no open incidents.");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // question, answer, follow-up
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[1][2].text(), "and incidents?");
    }

    #[tokio::test]
    async fn test_disconnect_during_tool_keeps_thread_usable() {
        let provider = ScriptedProvider::new(vec![
            Ok(Message::assistant().with_text("Two pods are running.")),
            Ok(Message::assistant()
                .with_tool_request("call-1", Ok(ToolCall::new("kubernetes__wait", json!({}))))),
            Ok(Message::assistant().with_text("Both pods are still running.")),
        ]);
        let seen = provider.seen();
        let state = app_state(provider, true);
        let app = routes::configure(state.clone());

        let first = app
            .clone()
            .oneshot(post(
                "/chat",
                json!({"messages": [{"role": "user", "content": "any pods?"}], "thread_id": "t-5"}),
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        // leave once the tool is running
        let response = app
            .clone()
            .oneshot(post(
                "/stream",
                json!({
                    "messages": [{"role": "user", "content": "wait for the rollout"}],
                    "thread_id": "t-5"
                }),
            ))
            .await
            .unwrap();
        let mut body = response.into_body();
        let mut received = String::new();
        while let Some(frame) = body.frame().await {
            if let Ok(data) = frame.unwrap().into_data() {
                received.push_str(&String::from_utf8_lossy(&data));
            }
            if received.contains("TOOL_CALL_ARGS") {
                break;
            }
        }
        assert!(received.contains("TOOL_CALL_ARGS"));
        drop(body);
        tokio::time::sleep(HEARTBEAT * 3).await;
        assert_eq!(state.threads.len().await, 1);

        let third = app
            .oneshot(post(
                "/chat",
                json!({"messages": [{"role": "user", "content": "and now?"}], "thread_id": "t-5"}),
            ))
            .await
            .unwrap();
        let third: Value = serde_json::from_str(&body_string(third).await).unwrap();
        assert_eq!(third["message"], "Both pods are still running.");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        let texts: Vec<String> = seen[2].iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["any pods?", "Two pods are running.", "and now?"]);
        assert!(seen[2]
            .iter()
            .flat_map(|m| m.content.iter())
            .all(|c| !matches!(c, MessageContent::ToolRequest(_))));
    }

    #[tokio::test]
    async fn test_chat_requires_user_message() {
        let app = routes::configure(app_state(ScriptedProvider::new(vec![]), false));
        let response = app
            .oneshot(post("/chat", json!({"messages": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
