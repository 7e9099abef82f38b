use pretty_assertions::assert_eq;
use trellis_core::Provider;
use trellis_core::providers::openai::OpenAiProvider;
use trellis_protocol::ContentBlock;
use trellis_protocol::ErrorCategory;
use trellis_protocol::FinishReason;
use trellis_protocol::StreamEvent;
use trellis_protocol::Usage;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_string_contains;
use wiremock::matchers::method;
use wiremock::matchers::path;

use crate::suite::common::collect_events;
use crate::suite::common::sse_response;
use crate::suite::common::text_request;

fn provider_against(server: &MockServer) -> OpenAiProvider {
    OpenAiProvider::new("sk-test").with_base_url(server.uri())
}

#[tokio::test]
async fn streams_chat_completions_over_http() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"model\":\"gpt-4\",\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("\"stream\":true"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let stream = provider
        .stream(&text_request("gpt-4", "hello"))
        .await
        .expect("stream handshake");
    let events = collect_events(stream).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Start {
                model: Some("gpt-4".to_string())
            },
            StreamEvent::TextDelta {
                index: 0,
                text: "Hi".to_string()
            },
            StreamEvent::Done {
                finish_reason: FinishReason::Stop,
                usage: Usage::default(),
                provider_data: None,
            },
        ]
    );
}

#[tokio::test]
async fn completes_non_streaming_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{
                "model": "gpt-4o",
                "choices": [{
                    "message": {"role": "assistant", "content": "All good"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 8, "completion_tokens": 2, "total_tokens": 10}
            }"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let response = provider
        .complete(&text_request("gpt-4o", "ping"))
        .await
        .expect("complete");

    assert_eq!(
        response.content,
        vec![ContentBlock::Text {
            text: "All good".to_string()
        }]
    );
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.usage.total_tokens, 10);
}

#[tokio::test]
async fn reasoning_models_use_the_responses_endpoint() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"type\":\"response.created\",\"response\":{\"id\":\"r1\",\"model\":\"o3-mini\"}}\n\n",
        "data: {\"type\":\"response.output_text.delta\",\"output_index\":0,\"delta\":\"Sure\"}\n\n",
        "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"r1\",\"status\":\"completed\",",
        "\"usage\":{\"input_tokens\":3,\"output_tokens\":1,\"total_tokens\":4}}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let stream = provider
        .stream(&text_request("o3-mini", "hello"))
        .await
        .expect("stream handshake");
    let events = collect_events(stream).await;

    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0],
        StreamEvent::Start {
            model: Some("o3-mini".to_string())
        }
    );
    assert!(matches!(events[2], StreamEvent::Done { .. }));
}

#[tokio::test]
async fn http_500_with_rate_limit_body_overrides_category() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(500)
                .insert_header("Retry-After", "60")
                .set_body_raw(
                    r#"{"error":{"type":"rate_limit_error","message":"please wait"}}"#,
                    "application/json",
                ),
        )
        .mount(&server)
        .await;

    let provider = provider_against(&server).with_max_retries(0);
    let err = provider
        .complete(&text_request("gpt-4o", "ping"))
        .await
        .expect_err("must fail");

    assert_eq!(err.category(), ErrorCategory::RateLimit);
    assert_eq!(err.retry_after(), Some(60));
}

#[tokio::test]
async fn transient_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"choices":[{"message":{"role":"assistant","content":"recovered"},
                "finish_reason":"stop"}]}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let provider = provider_against(&server).with_max_retries(2);
    let response = provider
        .complete(&text_request("gpt-4o", "ping"))
        .await
        .expect("retry then succeed");
    assert_eq!(
        response.content,
        vec![ContentBlock::Text {
            text: "recovered".to_string()
        }]
    );
}

#[tokio::test]
async fn stream_handshake_failure_surfaces_synchronously() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_raw(
            r#"{"error":{"type":"authentication_error","message":"bad key"}}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let err = provider
        .stream(&text_request("gpt-4o", "ping"))
        .await
        .expect_err("must fail");
    assert_eq!(err.category(), ErrorCategory::Auth);
}

#[tokio::test]
async fn truncated_stream_reports_a_network_error() {
    let server = MockServer::start().await;
    // Stream ends without [DONE].
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let stream = provider
        .stream(&text_request("gpt-4", "hello"))
        .await
        .expect("stream handshake");
    let events = collect_events(stream).await;

    match events.last() {
        Some(StreamEvent::Error { category, message }) => {
            assert_eq!(*category, ErrorCategory::Network);
            assert_eq!(message, "stream closed before completion");
        }
        other => panic!("expected trailing error event, got {other:?}"),
    }
}

#[tokio::test]
async fn second_stream_is_allowed_after_the_first_finishes() {
    let server = MockServer::start().await;
    let body = "data: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = provider_against(&server);
    let first = provider
        .stream(&text_request("gpt-4", "one"))
        .await
        .expect("first stream");
    let _ = collect_events(first).await;

    // The pump marks itself finished once the terminal event is out.
    provider
        .stream(&text_request("gpt-4", "two"))
        .await
        .expect("second stream");
}
