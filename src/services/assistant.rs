//! assistant.rs
//!
//! Этот модуль реализует сервисный слой для взаимодействия с внешним шлюзом
//! chat completions и оркестрацию одного хода диалога.
//!
//! Ключевые компоненты:
//! 1.  **CircuitBreaker**: защита от постоянных запросов к неработающему
//!     шлюзу; после серии сбоев запросы временно блокируются.
//! 2.  **AssistantClient**: HTTP-клиент шлюза. Первый запрос хода уходит со
//!     списком инструментов (tool_choice=auto), второй - уже без них, так
//!     что больше одного раунда инструментов за ход не бывает по построению.
//! 3.  **process_user_turn**: машина состояний одного хода: сохранить
//!     сообщение пользователя -> окно истории -> первый запрос -> выполнить
//!     tool calls -> второй запрос -> сохранить ответ -> push в WebSocket.
//!     Любой сбой шлюза деградирует в фиксированный ответ, ход не падает.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, OpenAiConfig};
use crate::middleware::AuthUser;
use crate::models::Message;
use crate::services::tools::{self, ToolError};
use crate::AppState;

/// Отправитель всех сообщений ассистента.
pub const ASSISTANT_SENDER: &str = "AI";

/// Фиксированный ответ при любом сбое шлюза.
pub const FALLBACK_REPLY: &str = "Error processing request";

/// Сколько последних сообщений чата уходит в контекст модели.
const HISTORY_WINDOW: i64 = 10;

/// Состояния Circuit Breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    /// Нормальный режим, запросы разрешены.
    Closed,
    /// Блокировка после серии сбоев.
    Open,
    /// Пробный запрос после таймаута блокировки.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
            failure_threshold,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let timed_out = inner
                    .last_failure
                    .is_some_and(|t| t.elapsed() >= self.timeout);
                if timed_out {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                }
                timed_out
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed if inner.failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    inner.failures, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("Circuit breaker is open - chat completions gateway temporarily unavailable")]
    CircuitOpen,
    #[error("Chat completions gateway error: {0}")]
    Gateway(#[from] reqwest::Error),
    #[error("Chat completions response contained no choices")]
    EmptyResponse,
}

#[derive(Debug, thiserror::Error)]
enum TurnError {
    #[error(transparent)]
    Assistant(#[from] AssistantError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("assistant returned an empty reply")]
    EmptyReply,
}

// --- Wire-модели chat completions API ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Ответ модели с tool calls, возвращаемый в транскрипт перед
    /// результатами инструментов.
    fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    /// Результат одного tool call, привязанный к его идентификатору.
    fn tool(tool_call_id: String, name: String, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: Some(tool_call_id),
            name: Some(name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Аргументы приходят JSON-строкой, недоверенной по определению
    pub arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Клиент шлюза chat completions.
#[derive(Clone)]
pub struct AssistantClient {
    api_key: String,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl AssistantClient {
    /// Создает и конфигурирует клиент на основе настроек приложения.
    pub fn from_config(openai: &OpenAiConfig, breaker: &CircuitBreakerConfig) -> Self {
        Self {
            api_key: openai.api_key.clone(),
            base_url: openai.base_url.trim_end_matches('/').to_string(),
            model: openai.model.clone(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            circuit_breaker: Arc::new(CircuitBreaker::new(
                breaker.failure_threshold,
                breaker.timeout_seconds,
            )),
        }
    }

    /// Выполняет асинхронную операцию, пропуская её через Circuit Breaker.
    async fn execute_with_circuit_breaker<F, T>(&self, operation: F) -> Result<T, AssistantError>
    where
        F: std::future::Future<Output = Result<T, reqwest::Error>>,
    {
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking chat completions request");
            return Err(AssistantError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                error!("Chat completions request failed: {:?}", e);
                self.circuit_breaker.record_failure();
                Err(AssistantError::Gateway(e))
            }
        }
    }

    /// Один запрос completion. tools = None на втором раунде хода.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<Vec<Value>>,
    ) -> Result<ResponseMessage, AssistantError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            tools: tools.as_deref(),
            tool_choice: tools.is_some().then_some("auto"),
        };

        let operation = async {
            self.http_client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json::<ChatCompletionResponse>()
                .await
        };

        let response = self.execute_with_circuit_breaker(operation).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(AssistantError::EmptyResponse)
    }

    pub fn circuit_breaker_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }
}

pub fn system_prompt() -> String {
    let current_date = chrono::Utc::now().format("%Y-%m-%d, %A");
    format!(
        "Today is {current_date}. \
         You are a virtual assistant for booking theater tickets. \
         Standard evening time is 7:00 PM. One performance per day. \
         You work with a real database and can perform the following actions via tools: \
         viewing performances, booking, viewing, and canceling bookings.\n\n\
         Seat format: XX-Y, XX in [1..20], Y in [A..Q]. Examples: 3-B, 17-H. \
         Do not allow booking of already taken seats or non-existent codes.\n\
         Save information to the database for further interaction.\n"
    )
}

/// Один ход диалога (см. док модуля). Возвращает сохранённое сообщение
/// ассистента; ошибки БД при сохранении пробрасываются, сбои шлюза - нет.
pub async fn process_user_turn(
    state: &AppState,
    user: &AuthUser,
    chat_id: i64,
    content: &str,
) -> Result<Message, sqlx::Error> {
    let pool = &state.db.pool;

    // Сообщение пользователя сохраняется ДО похода к модели: упавший ход
    // теряет максимум ответ ассистента, но не ввод пользователя
    sqlx::query(
        "INSERT INTO messages (chat_id, sender, content) VALUES ($1, $2, $3)",
    )
    .bind(chat_id)
    .bind(&user.username)
    .bind(content)
    .execute(pool)
    .await?;

    let transcript = build_transcript(state, user, chat_id).await?;

    let reply = match run_tool_loop(state, user, transcript).await {
        Ok(text) => text,
        Err(TurnError::Database(e)) => return Err(e),
        Err(e) => {
            error!("Assistant turn failed: {}", e);
            FALLBACK_REPLY.to_string()
        }
    };

    let assistant_message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages (chat_id, sender, content) VALUES ($1, $2, $3)
         RETURNING id, chat_id, sender, content, timestamp",
    )
    .bind(chat_id)
    .bind(ASSISTANT_SENDER)
    .bind(&reply)
    .fetch_one(pool)
    .await?;

    let envelope = json!({
        "type": "new_message",
        "message": assistant_message,
    });
    state.connections.push(chat_id, envelope.to_string()).await;

    Ok(assistant_message)
}

/// Системная инструкция + последние HISTORY_WINDOW сообщений чата,
/// старые -> новые. Сообщения самого пользователя получают роль user,
/// всё остальное (включая метку ассистента) - assistant.
async fn build_transcript(
    state: &AppState,
    user: &AuthUser,
    chat_id: i64,
) -> Result<Vec<ChatMessage>, sqlx::Error> {
    let mut recent = sqlx::query_as::<_, Message>(
        "SELECT id, chat_id, sender, content, timestamp
         FROM messages
         WHERE chat_id = $1
         ORDER BY timestamp DESC, id DESC
         LIMIT $2",
    )
    .bind(chat_id)
    .bind(HISTORY_WINDOW)
    .fetch_all(&state.db.pool)
    .await?;
    recent.reverse();

    let mut transcript = vec![ChatMessage::system(system_prompt())];
    transcript.extend(recent.into_iter().map(|m| {
        if m.sender == user.username {
            ChatMessage::user(m.content)
        } else {
            ChatMessage::assistant(m.content)
        }
    }));
    Ok(transcript)
}

/// Двухраундовый протокол: первый запрос с инструментами; если модель их
/// вызвала - выполнить по порядку и отправить второй запрос без
/// инструментов. Неизвестный инструмент или битые аргументы фатальны
/// только для своего вызова: текст ошибки уходит в транскрипт как результат.
async fn run_tool_loop(
    state: &AppState,
    user: &AuthUser,
    mut transcript: Vec<ChatMessage>,
) -> Result<String, TurnError> {
    let first = state
        .assistant
        .chat(&transcript, Some(tools::tool_configs()))
        .await?;

    let tool_calls = match first.tool_calls {
        Some(calls) if !calls.is_empty() => calls,
        _ => return first.content.ok_or(TurnError::EmptyReply),
    };

    transcript.push(ChatMessage::assistant_tool_calls(
        first.content,
        tool_calls.clone(),
    ));

    for call in &tool_calls {
        let result = match tools::dispatch_tool_call(
            &state.db.pool,
            user.id,
            &call.function.name,
            &call.function.arguments,
        )
        .await
        {
            Ok(text) => text,
            Err(ToolError::Database(e)) => return Err(e.into()),
            Err(e) => {
                warn!("Tool call {} rejected: {}", call.function.name, e);
                e.to_string()
            }
        };

        transcript.push(ChatMessage::tool(
            call.id.clone(),
            call.function.name.clone(),
            result,
        ));
    }

    let second = state.assistant.chat(&transcript, None).await?;
    second.content.ok_or(TurnError::EmptyReply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, 60);
        assert!(breaker.can_execute());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn breaker_half_opens_after_timeout_and_recovers() {
        let breaker = CircuitBreaker::new(1, 0);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Нулевой таймаут: следующий же запрос пробный
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn breaker_reopens_on_failed_probe() {
        let breaker = CircuitBreaker::new(1, 0);
        breaker.record_failure();
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn parses_tool_call_response() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "book_ticket",
                            "arguments": "{\"performance_id\": 7, \"seat_code\": \"3-B\"}"
                        }
                    }]
                }
            }]
        }"#;

        let response: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        let message = &response.choices[0].message;
        assert!(message.content.is_none());

        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "book_ticket");
        assert_eq!(calls[0].id, "call_abc");
    }

    #[test]
    fn parses_plain_content_response() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"}}]}"#;
        let response: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some("Hello!")
        );
        assert!(response.choices[0].message.tool_calls.is_none());
    }

    #[test]
    fn tool_message_carries_call_id() {
        let msg = ChatMessage::tool("call_1".into(), "book_ticket".into(), "done".into());
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
        assert_eq!(value["name"], "book_ticket");
    }

    #[test]
    fn plain_messages_skip_tool_fields() {
        let value = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        let map = value.as_object().unwrap();
        assert!(!map.contains_key("tool_calls"));
        assert!(!map.contains_key("tool_call_id"));
        assert!(!map.contains_key("name"));
    }

    #[test]
    fn system_prompt_pins_the_domain() {
        let prompt = system_prompt();
        assert!(prompt.contains("theater tickets"));
        assert!(prompt.contains("XX-Y"));
        assert!(prompt.contains("3-B, 17-H"));
        assert!(prompt.contains("One performance per day"));
    }
}
