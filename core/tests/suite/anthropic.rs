use pretty_assertions::assert_eq;
use trellis_core::Provider;
use trellis_core::providers::anthropic::AnthropicProvider;
use trellis_protocol::ContentBlock;
use trellis_protocol::ErrorCategory;
use trellis_protocol::FinishReason;
use trellis_protocol::StreamEvent;
use trellis_protocol::Usage;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;

use crate::suite::common::collect_events;
use crate::suite::common::sse_response;
use crate::suite::common::text_request;

fn provider_against(server: &MockServer) -> AnthropicProvider {
    AnthropicProvider::new("sk-ant-test").with_base_url(server.uri())
}

#[tokio::test]
async fn streams_a_text_message() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-X\",\"usage\":{\"input_tokens\":0,\"output_tokens\":0}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello, world!\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":6}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let stream = provider
        .stream(&text_request("claude-X", "hello"))
        .await
        .expect("stream handshake");
    let events = collect_events(stream).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Start {
                model: Some("claude-X".to_string())
            },
            StreamEvent::TextDelta {
                index: 0,
                text: "Hello, world!".to_string()
            },
            StreamEvent::Done {
                finish_reason: FinishReason::Stop,
                usage: Usage {
                    input_tokens: 0,
                    output_tokens: 6,
                    thinking_tokens: 0,
                    cached_tokens: 0,
                    total_tokens: 6,
                },
                provider_data: None,
            },
        ]
    );
}

#[tokio::test]
async fn completes_non_streaming_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{
                "id": "msg_1",
                "model": "claude-sonnet-4-5",
                "content": [{"type": "text", "text": "Hi"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 5, "output_tokens": 1}
            }"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let response = provider
        .complete(&text_request("claude-sonnet-4-5", "ping"))
        .await
        .expect("complete");

    assert_eq!(
        response.content,
        vec![ContentBlock::Text {
            text: "Hi".to_string()
        }]
    );
    assert_eq!(response.usage.total_tokens, 6);
}

#[tokio::test]
async fn overloaded_body_maps_to_server_category() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_raw(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let provider = provider_against(&server).with_max_retries(0);
    let err = provider
        .complete(&text_request("claude-X", "ping"))
        .await
        .expect_err("must fail");
    assert_eq!(err.category(), ErrorCategory::Server);
    assert!(err.to_string().contains("Overloaded"));
}

#[tokio::test]
async fn stream_error_event_is_terminal() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: message_start\n",
        "data: {\"message\":{\"model\":\"claude-X\"}}\n\n",
        "event: error\n",
        "data: {\"type\":\"error\",\"error\":{\"type\":\"rate_limit_error\",\"message\":\"busy\"}}\n\n",
        "event: message_stop\n",
        "data: {}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let stream = provider
        .stream(&text_request("claude-X", "hello"))
        .await
        .expect("stream handshake");
    let events = collect_events(stream).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Start {
                model: Some("claude-X".to_string())
            },
            StreamEvent::Error {
                category: ErrorCategory::RateLimit,
                message: "busy".to_string(),
            },
        ]
    );
}
