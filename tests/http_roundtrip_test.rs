use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wirecast::*;

async fn complete(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none")
        .to_string();
    let turns = body["messages"].as_array().map(Vec::len).unwrap_or(0);
    let last = body["messages"][turns.saturating_sub(1)]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    Json(json!({
        "choices": [{"message": {"content": format!("{} | {} turns | {}", auth, turns, last)}}]
    }))
}

fn sse_response(body: Body) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn stream_events() -> Response {
    let events = vec![
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n",
    ];
    let body = stream::iter(
        events
            .into_iter()
            .map(|e| Ok::<_, std::io::Error>(Bytes::from_static(e.as_bytes()))),
    );
    sse_response(Body::from_stream(body))
}

async fn stream_forever() -> Response {
    let first = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
        b"data: {\"choices\":[{\"delta\":{\"content\":\"tick\"}}]}\n\n",
    ))]);
    sse_response(Body::from_stream(first.chain(stream::pending())))
}

async fn fail() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/v1/complete", post(complete))
        .route("/v1/stream", post(stream_events))
        .route("/v1/forever", post(stream_forever))
        .route("/v1/fail", post(fail));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn pipeline() -> StreamingPipeline {
    let settings = PipelineSettings::default();
    let transport = ReqwestTransport::from_settings(&settings).unwrap();
    StreamingPipeline::new(Arc::new(transport), settings)
}

fn invocation(addr: SocketAddr, route: &str, streaming: bool, path: &str) -> ChatInvocation {
    let template = format!(
        r#"curl http://{}/v1/{} -H "Authorization: Bearer {{{{API_KEY}}}}" -H "Content-Type: application/json" -d '{{"model": "m", "messages": [{{"role": "user", "content": "{{{{TEXT}}}}"}}]}}'"#,
        addr, route
    );
    let provider = ProviderConfig {
        id: "local".into(),
        request_template: template,
        streaming,
        response_content_path: path.into(),
    };
    let vars = [("API_KEY".to_string(), "secret".to_string())]
        .into_iter()
        .collect();
    let mut inv = ChatInvocation::new(provider, vars);
    inv.user_message = "ping".into();
    inv
}

async fn collect(stream: TextStream) -> Vec<String> {
    stream.map(TextChunk::into_inner).collect().await
}

#[tokio::test]
async fn test_whole_body_over_http() {
    let addr = spawn_server().await;
    let mut inv = invocation(addr, "complete", false, "choices[0].message.content");
    inv.history = vec![Message::user("a"), Message::assistant("b")];

    let stream = pipeline().stream(&inv, CancellationToken::new()).unwrap();
    assert_eq!(collect(stream).await, vec!["Bearer secret | 3 turns | ping"]);
}

#[tokio::test]
async fn test_event_stream_over_http() {
    let addr = spawn_server().await;
    let inv = invocation(addr, "stream", true, "choices[0].delta.content");
    let stream = pipeline().stream(&inv, CancellationToken::new()).unwrap();
    assert_eq!(collect(stream).await.concat(), "Hello");
}

#[tokio::test]
async fn test_server_error_over_http() {
    let addr = spawn_server().await;
    let inv = invocation(addr, "fail", true, "choices[0].delta.content");
    let stream = pipeline().stream(&inv, CancellationToken::new()).unwrap();
    let out = collect(stream).await;
    assert_eq!(out.len(), 1);
    assert!(out[0].contains("500"));
    assert!(out[0].contains("boom"));
}

#[tokio::test]
async fn test_cancel_open_http_stream() {
    let addr = spawn_server().await;
    let inv = invocation(addr, "forever", true, "choices[0].delta.content");
    let cancel = CancellationToken::new();
    let mut stream = pipeline().stream(&inv, cancel.clone()).unwrap();

    assert_eq!(stream.next().await, Some(TextChunk::from("tick")));
    cancel.cancel();
    let rest = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next())
        .await
        .expect("stream should end promptly after cancellation");
    assert_eq!(rest, None);
}

#[tokio::test]
async fn test_connection_refused_in_band() {
    // Bind then drop to get a port with nothing listening
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let inv = invocation(addr, "complete", false, "text");
    let stream = pipeline().stream(&inv, CancellationToken::new()).unwrap();
    let out = collect(stream).await;
    assert_eq!(out.len(), 1);
    assert!(out[0].starts_with("Network error"));
}
