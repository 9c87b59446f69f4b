//! Интеграционные тесты клиента шлюза chat completions поверх wiremock.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use theater_assistant::config::{CircuitBreakerConfig, OpenAiConfig};
use theater_assistant::services::assistant::{
    AssistantClient, AssistantError, ChatMessage, CircuitState,
};
use theater_assistant::services::tools;

fn client_for(server: &MockServer, failure_threshold: u32) -> AssistantClient {
    AssistantClient::from_config(
        &OpenAiConfig {
            api_key: "test-key".to_string(),
            base_url: server.uri(),
            model: "gpt-4.1-mini".to_string(),
        },
        &CircuitBreakerConfig {
            failure_threshold,
            timeout_seconds: 60,
        },
    )
}

#[tokio::test]
async fn returns_first_choice_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Good evening!"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 5);
    let reply = client
        .chat(&[ChatMessage::user("hello")], None)
        .await
        .unwrap();

    assert_eq!(reply.content.as_deref(), Some("Good evening!"));
    assert!(reply.tool_calls.is_none());
}

#[tokio::test]
async fn first_round_advertises_tools() {
    let server = MockServer::start().await;
    // tool_choice уходит только вместе со списком инструментов
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"tool_choice": "auto"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {
                        "name": "list_performances",
                        "arguments": "{}"
                    }
                }]
            }}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 5);
    let reply = client
        .chat(
            &[ChatMessage::user("what is playing this week?")],
            Some(tools::tool_configs()),
        )
        .await
        .unwrap();

    let calls = reply.tool_calls.unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].function.name, "list_performances");
}

#[tokio::test]
async fn gateway_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server, 5);
    let err = client
        .chat(&[ChatMessage::user("hello")], None)
        .await
        .unwrap_err();

    assert!(matches!(err, AssistantError::Gateway(_)));
}

#[tokio::test]
async fn breaker_blocks_after_repeated_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let messages = [ChatMessage::user("hello")];

    assert!(client.chat(&messages, None).await.is_err());
    assert!(client.chat(&messages, None).await.is_err());
    assert_eq!(client.circuit_breaker_state(), CircuitState::Open);

    // Третий запрос блокируется выключателем и не доходит до шлюза
    let err = client.chat(&messages, None).await.unwrap_err();
    assert!(matches!(err, AssistantError::CircuitOpen));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn empty_choices_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let client = client_for(&server, 5);
    let err = client
        .chat(&[ChatMessage::user("hello")], None)
        .await
        .unwrap_err();

    assert!(matches!(err, AssistantError::EmptyResponse));
}
