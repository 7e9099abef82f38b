use futures::StreamExt;
use trellis_core::EventStream;
use trellis_protocol::Message;
use trellis_protocol::Request;
use trellis_protocol::StreamEvent;

/// Drain an event stream to completion.
pub async fn collect_events(mut stream: EventStream) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

pub fn text_request(model: &str, text: &str) -> Request {
    Request {
        model: model.to_string(),
        messages: vec![Message::user(text)],
        ..Default::default()
    }
}

/// Wrap SSE body text in a 200 response with the event-stream content
/// type.
pub fn sse_response(body: &str) -> wiremock::ResponseTemplate {
    wiremock::ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}
