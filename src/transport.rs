//! The outbound HTTP seam. The pipeline needs only
//! (method, url, headers, body) → (status, headers, byte stream).

use crate::config::PipelineSettings;
use crate::types::{FormPart, RequestBody, RequestDescriptor, WirecastError};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::time::Duration;

pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, WirecastError>>;

pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Dropping the stream releases the underlying connection.
    pub body: ByteStream,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

pub trait HttpTransport: Send + Sync {
    fn send(
        &self,
        request: RequestDescriptor,
    ) -> BoxFuture<'static, std::result::Result<TransportResponse, WirecastError>>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn from_settings(settings: &PipelineSettings) -> crate::types::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|e| WirecastError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::new(client))
    }

    fn build(&self, request: RequestDescriptor) -> std::result::Result<reqwest::RequestBuilder, WirecastError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| WirecastError::Network(format!("Invalid HTTP method {:?}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            Some(RequestBody::Json(value)) => {
                let has_content_type = request
                    .headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
                let payload = serde_json::to_vec(&value)?;
                if has_content_type {
                    builder.body(payload)
                } else {
                    builder.header("Content-Type", "application/json").body(payload)
                }
            }
            Some(RequestBody::Raw(text)) => builder.body(text),
            Some(RequestBody::Form(parts)) => builder.body(FormPart::join(&parts)),
            None => builder,
        };
        Ok(builder)
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(
        &self,
        request: RequestDescriptor,
    ) -> BoxFuture<'static, std::result::Result<TransportResponse, WirecastError>> {
        let built = self.build(request);
        Box::pin(async move {
            let response = built?.send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
                .collect();
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| WirecastError::StreamRead(e.to_string())))
                .boxed();
            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        })
    }
}
