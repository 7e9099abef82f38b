use pretty_assertions::assert_eq;
use trellis_core::Provider;
use trellis_core::providers::google::GoogleProvider;
use trellis_protocol::ContentBlock;
use trellis_protocol::ErrorCategory;
use trellis_protocol::FinishReason;
use trellis_protocol::StreamEvent;
use trellis_protocol::Usage;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

use crate::suite::common::collect_events;
use crate::suite::common::sse_response;
use crate::suite::common::text_request;

fn provider_against(server: &MockServer) -> GoogleProvider {
    GoogleProvider::new("g-test-key").with_base_url(server.uri())
}

#[tokio::test]
async fn streams_chunked_json_with_usage_terminator() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"modelVersion\":\"gemini-2.5-flash\"}\n\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hello\"}]}}]}\n\n",
        "data: {\"candidates\":[{\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":10,\"candidatesTokenCount\":5,\"totalTokenCount\":15}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path(
            "/v1beta/models/gemini-2.5-flash:streamGenerateContent",
        ))
        .and(query_param("key", "g-test-key"))
        .and(query_param("alt", "sse"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let stream = provider
        .stream(&text_request("gemini-2.5-flash", "hello"))
        .await
        .expect("stream handshake");
    let events = collect_events(stream).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Start {
                model: Some("gemini-2.5-flash".to_string())
            },
            StreamEvent::TextDelta {
                index: 0,
                text: "Hello".to_string()
            },
            StreamEvent::Done {
                finish_reason: FinishReason::Stop,
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                    thinking_tokens: 0,
                    cached_tokens: 0,
                    total_tokens: 15,
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
        .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
        .and(query_param("key", "g-test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{
                "modelVersion": "gemini-2.5-flash",
                "candidates": [{
                    "content": {"parts": [{"text": "Hello"}], "role": "model"},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 1,
                                  "totalTokenCount": 5}
            }"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let response = provider
        .complete(&text_request("gemini-2.5-flash", "ping"))
        .await
        .expect("complete");

    assert_eq!(
        response.content,
        vec![ContentBlock::Text {
            text: "Hello".to_string()
        }]
    );
    assert_eq!(response.model.as_deref(), Some("gemini-2.5-flash"));
}

#[tokio::test]
async fn rate_limited_with_retry_delay_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_raw(
            r#"{"error":{"code":429,"message":"Rate limit exceeded","status":"RESOURCE_EXHAUSTED"},"retryDelay":"30s"}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let provider = provider_against(&server).with_max_retries(0);
    let err = provider
        .complete(&text_request("gemini-2.5-flash", "ping"))
        .await
        .expect_err("must fail");

    assert_eq!(err.category(), ErrorCategory::RateLimit);
    assert_eq!(err.retry_after(), Some(30));
}

#[tokio::test]
async fn streamed_function_call_closes_at_usage_metadata() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"modelVersion\":\"gemini-2.5-flash\"}\n\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"functionCall\":{\"name\":\"get_weather\",\"args\":{\"city\":\"Boston\"}}}]}}]}\n\n",
        "data: {\"candidates\":[{\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"totalTokenCount\":3}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path(
            "/v1beta/models/gemini-2.5-flash:streamGenerateContent",
        ))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let stream = provider
        .stream(&text_request("gemini-2.5-flash", "weather?"))
        .await
        .expect("stream handshake");
    let events = collect_events(stream).await;

    assert_eq!(events.len(), 5);
    assert!(matches!(events[1], StreamEvent::ToolCallStart { .. }));
    assert!(matches!(events[2], StreamEvent::ToolCallDelta { .. }));
    assert_eq!(events[3], StreamEvent::ToolCallDone { index: 0 });
    assert!(matches!(events[4], StreamEvent::Done { .. }));
}
