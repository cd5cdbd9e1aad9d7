use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub String);

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl ConversationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

/// One fragment of generated text. Concatenating chunks in emission order
/// reconstructs the response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct TextChunk(pub String);

impl TextChunk {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for TextChunk {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TextChunk {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for TextChunk {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TextChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The output contract shared by the HTTP pipeline and every agent backend.
pub type TextStream = std::pin::Pin<Box<dyn futures_util::Stream<Item = TextChunk> + Send>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(alias = "curl", alias = "requestTemplate")]
    pub request_template: String,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default, alias = "responseContentPath")]
    pub response_content_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectedProviderInstance {
    #[serde(alias = "providerId")]
    pub provider_id: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Base64-encoded images, optionally already in `data:` URL form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// One `&`-joined piece of a form body. Values substituted into a part
/// with `encode_values` set are URL-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub text: String,
    pub encode_values: bool,
}

impl FormPart {
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            encode_values: false,
        }
    }

    pub fn encoded(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            encode_values: true,
        }
    }

    pub fn join(parts: &[FormPart]) -> String {
        parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Raw(String),
    /// Built from `--data-urlencode`; becomes `Raw` once substituted.
    Form(Vec<FormPart>),
}

/// A concrete HTTP request decomposed from a provider template.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl RequestDescriptor {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header_if_absent(&mut self, name: &str, value: &str) {
        if self.header(name).is_none() {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    pub fn json_body(&self) -> Option<&serde_json::Value> {
        match &self.body {
            Some(RequestBody::Json(v)) => Some(v),
            _ => None,
        }
    }
}

/// Everything a caller supplies for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct ChatInvocation {
    /// `None` is only valid for agent providers, which have no template.
    pub provider: Option<ProviderConfig>,
    pub instance: SelectedProviderInstance,
    pub system_prompt: Option<String>,
    pub history: Vec<Message>,
    pub user_message: String,
    pub images: Vec<String>,
    pub conversation_id: Option<ConversationId>,
}

impl ChatInvocation {
    pub fn new(provider: ProviderConfig, variables: HashMap<String, String>) -> Self {
        Self {
            instance: SelectedProviderInstance {
                provider_id: provider.id.clone(),
                variables,
            },
            provider: Some(provider),
            ..Default::default()
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.instance.provider_id
    }
}

#[derive(Error, Debug)]
pub enum WirecastError {
    #[error("Missing required variable: {name}")]
    MissingVariable { name: String },

    #[error("This provider does not accept image input ({count} image(s) supplied)")]
    UnsupportedImageInput { count: usize },

    #[error("Failed to parse request template: {0}")]
    TemplateParse(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("No agent executor registered for provider: {0}")]
    AgentUnavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API request failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Stream read error: {0}")]
    StreamRead(String),

    #[error("Failed to parse response: {0}")]
    ResponseParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WirecastError {
    pub fn http_status(status: u16, body: &str) -> Self {
        let body = body.trim();
        WirecastError::HttpStatus {
            status,
            body: if body.is_empty() {
                "(empty response body)".to_string()
            } else {
                body.to_string()
            },
        }
    }

    /// Errors raised before any network call is committed.
    pub fn is_pre_request(&self) -> bool {
        matches!(
            self,
            WirecastError::MissingVariable { .. }
                | WirecastError::UnsupportedImageInput { .. }
                | WirecastError::TemplateParse(_)
                | WirecastError::UnknownProvider(_)
                | WirecastError::AgentUnavailable(_)
                | WirecastError::Config(_)
        )
    }

    /// The in-band chunk shown to the user once a request has been sent.
    pub fn to_chunk(&self) -> TextChunk {
        TextChunk(self.to_string())
    }
}

impl From<reqwest::Error> for WirecastError {
    fn from(e: reqwest::Error) -> Self {
        WirecastError::Network(e.to_string())
    }
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: WirecastError,
    pub span_trace: SpanTrace,
}

impl fmt::Display for ObservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<WirecastError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_message_includes_body() {
        let err = WirecastError::http_status(500, "boom");
        let text = err.to_chunk().into_inner();
        assert!(text.contains("500"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn test_http_status_message_without_body() {
        let err = WirecastError::http_status(404, "  ");
        assert_eq!(
            err.to_string(),
            "API request failed with status 404: (empty response body)"
        );
    }

    #[test]
    fn test_provider_config_accepts_curl_alias() {
        let cfg: ProviderConfig = serde_json::from_value(serde_json::json!({
            "id": "custom",
            "curl": "curl https://example.com",
            "responseContentPath": "text"
        }))
        .unwrap();
        assert_eq!(cfg.request_template, "curl https://example.com");
        assert_eq!(cfg.response_content_path, "text");
        assert!(!cfg.streaming);
    }

    #[test]
    fn test_pre_request_classification() {
        assert!(WirecastError::MissingVariable {
            name: "API_KEY".into()
        }
        .is_pre_request());
        assert!(!WirecastError::Network("reset".into()).is_pre_request());
    }

    #[test]
    fn test_observed_error_keeps_inner() {
        let err: ObservedError = WirecastError::TemplateParse("bad quote".into()).into();
        match err.inner {
            WirecastError::TemplateParse(msg) => assert_eq!(msg, "bad quote"),
            other => panic!("Expected TemplateParse, got {:?}", other),
        }
    }
}
