// ABOUTME: Axum HTTP testing utilities for integration tests
// ABOUTME: Drives routers with tower oneshot and reads SSE responses event by event

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use eventsource_stream::{Event, EventStream, Eventsource};
use futures_util::StreamExt;
use std::str;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tower::ServiceExt;

/// Helper to build and execute HTTP requests against Axum routers
pub struct AxumTestRequest {
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
}

impl AxumTestRequest {
    /// Create a new GET request
    pub fn get(uri: &str) -> Self {
        Self {
            method: Method::GET,
            uri: uri.to_owned(),
            headers: Vec::new(),
        }
    }

    /// Create a new DELETE request
    #[allow(dead_code)]
    pub fn delete(uri: &str) -> Self {
        Self {
            method: Method::DELETE,
            uri: uri.to_owned(),
            headers: Vec::new(),
        }
    }

    /// Add a header to the request
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Send the caller's session id the way the host session layer would
    pub fn session(self, session_id: &str) -> Self {
        self.header("x-session-id", session_id)
    }

    async fn execute(self, app: Router) -> Response {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        for (key, value) in self.headers {
            builder = builder.header(key, value);
        }
        let request = builder
            .body(Body::empty())
            .expect("Failed to build request");

        app.oneshot(request)
            .await
            .expect("Failed to execute request")
    }

    /// Execute the request and read the whole body
    pub async fn send(self, app: Router) -> AxumTestResponse {
        let response = self.execute(app).await;
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body")
            .to_vec();
        AxumTestResponse { status, body }
    }

    /// Execute a streaming request, returning a reader over its SSE events
    #[allow(dead_code)]
    pub async fn send_sse(self, app: Router) -> SseTestStream {
        let response = self.execute(app).await;
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        SseTestStream {
            status,
            content_type,
            events: response.into_body().into_data_stream().eventsource(),
        }
    }

    /// Execute a streaming request, returning the undecoded body chunks
    #[allow(dead_code)]
    pub async fn send_raw(self, app: Router) -> RawBodyStream {
        let response = self.execute(app).await;
        RawBodyStream {
            chunks: response.into_body().into_data_stream(),
        }
    }
}

/// Wrapper around Axum HTTP response for testing
pub struct AxumTestResponse {
    status: StatusCode,
    body: Vec<u8>,
}

impl AxumTestResponse {
    /// Get the response status code as u16 for easy assertion
    pub const fn status(&self) -> u16 {
        self.status.as_u16()
    }

    /// Get the response body as a JSON value
    pub fn json<T: serde::de::DeserializeOwned>(self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to deserialize JSON response")
    }

    /// Get the response body as a string
    #[allow(dead_code)]
    pub fn text(self) -> String {
        String::from_utf8(self.body).expect("Failed to decode response as UTF-8")
    }
}

/// Open SSE response read one event at a time
pub struct SseTestStream {
    pub status: StatusCode,
    pub content_type: String,
    events: EventStream<axum::body::BodyDataStream>,
}

impl SseTestStream {
    /// Next named event, panicking if none arrives within two seconds
    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(2), self.events.next())
            .await
            .expect("Timed out waiting for SSE event")
            .expect("SSE stream ended")
            .expect("Malformed SSE event")
    }

    /// Next `message` event body parsed as JSON
    pub async fn next_message(&mut self) -> serde_json::Value {
        let event = self.next_event().await;
        assert_eq!(event.event, "message", "expected a message event, got {event:?}");
        serde_json::from_str(&event.data).expect("Message event data is not JSON")
    }

    /// Whether the stream stays silent for a short period
    pub async fn is_quiet(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(100), self.events.next())
            .await
            .is_err()
    }
}

/// Open response body read as raw text, comment lines included
#[allow(dead_code)]
pub struct RawBodyStream {
    chunks: axum::body::BodyDataStream,
}

#[allow(dead_code)]
impl RawBodyStream {
    /// Collect whatever the server writes during `window`
    pub async fn read_for(&mut self, window: Duration) -> String {
        let mut text = String::new();
        let deadline = Instant::now() + window;
        while let Ok(Some(chunk)) = timeout_at(deadline, self.chunks.next()).await {
            let chunk = chunk.expect("Failed to read body chunk");
            text.push_str(str::from_utf8(&chunk).expect("Body chunk is not UTF-8"));
        }
        text
    }
}
