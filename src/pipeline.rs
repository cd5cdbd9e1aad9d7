//! One chat invocation end to end: validate and build the request, send it,
//! and expose the response as a lazy, cancellable stream of text chunks.

use crate::agent::{build_agent_request, AgentExecutor, AgentProvider};
use crate::config::PipelineSettings;
use crate::consumer::{consume_response, ResponseMode};
use crate::content_path::ContentPath;
use crate::logging::ChunkMetric;
use crate::messages::{apply_message_sequence, check_image_capability, locate_user_slot};
use crate::redaction::redact_descriptor;
use crate::substitution::{substitute_descriptor, unresolved_placeholders, SubstitutionContext};
use crate::template::parse_template;
use crate::transport::HttpTransport;
use crate::types::{
    ChatInvocation, ProviderConfig, RequestBody, RequestDescriptor, Result, TextStream,
    WirecastError,
};
use crate::variables::{validate_required, VariableSet};
use futures_util::StreamExt;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Validating,
    Requesting,
    WholeBody,
    EventStream,
    Done,
    Aborted,
    Errored,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Validating => "validating",
            PipelineState::Requesting => "requesting",
            PipelineState::WholeBody => "whole-body",
            PipelineState::EventStream => "event-stream",
            PipelineState::Done => "done",
            PipelineState::Aborted => "aborted",
            PipelineState::Errored => "errored",
        };
        f.write_str(name)
    }
}

impl From<ResponseMode> for PipelineState {
    fn from(mode: ResponseMode) -> Self {
        match mode {
            ResponseMode::WholeBody => PipelineState::WholeBody,
            ResponseMode::EventStream => PipelineState::EventStream,
        }
    }
}

fn transition(provider_id: &str, state: PipelineState) {
    tracing::debug!(provider = %provider_id, state = %state, "Pipeline state");
}

/// Builds the concrete request for an HTTP provider. No I/O.
pub fn prepare_request(
    provider: &ProviderConfig,
    invocation: &ChatInvocation,
) -> Result<RequestDescriptor> {
    transition(&provider.id, PipelineState::Validating);
    let template = provider.request_template.as_str();
    let vars = VariableSet::from_map(&invocation.instance.variables);

    validate_required(template, &vars)?;
    check_image_capability(template, &invocation.images)?;
    let parsed = parse_template(template)?;

    let vars = vars.with_reserved(invocation.system_prompt.as_deref(), &invocation.user_message);
    let ctx = SubstitutionContext::new(&vars, &invocation.images);
    let user_slot = parsed
        .body
        .as_ref()
        .and_then(|body| locate_user_slot(body, &vars));
    let mut descriptor = substitute_descriptor(&parsed, &ctx);

    if let Some(RequestBody::Json(body)) = descriptor.body.as_mut() {
        let rebuilt = apply_message_sequence(
            body,
            &invocation.history,
            &invocation.user_message,
            user_slot,
        );
        if !rebuilt && !invocation.history.is_empty() {
            tracing::debug!(
                "Body of {} has no conversation array; {} history message(s) not sent",
                provider.id,
                invocation.history.len()
            );
        }
    }

    let leftover = unresolved_placeholders(&descriptor);
    if !leftover.is_empty() {
        tracing::warn!(
            "Request for {} still contains unresolved placeholders: {}",
            provider.id,
            leftover.join(", ")
        );
    }

    tracing::debug!("Prepared request: {:?}", redact_descriptor(&descriptor));
    Ok(descriptor)
}

pub struct StreamingPipeline {
    transport: Arc<dyn HttpTransport>,
    agents: Option<Arc<dyn AgentExecutor>>,
    settings: PipelineSettings,
}

impl StreamingPipeline {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: PipelineSettings) -> Self {
        Self {
            transport,
            agents: None,
            settings,
        }
    }

    pub fn with_agents(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        self.agents = Some(executor);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn prepare_request(&self, invocation: &ChatInvocation) -> Result<RequestDescriptor> {
        let provider = invocation
            .provider
            .as_ref()
            .ok_or_else(|| WirecastError::UnknownProvider(invocation.provider_id().to_string()))?;
        prepare_request(provider, invocation)
    }

    /// Errors returned here happen before anything is sent. Once the stream
    /// is handed out, failures arrive as a single trailing chunk and
    /// cancellation simply ends the stream.
    pub fn stream(
        &self,
        invocation: &ChatInvocation,
        cancel: CancellationToken,
    ) -> Result<TextStream> {
        let provider_id = invocation.provider_id().to_string();
        transition(&provider_id, PipelineState::Idle);

        if cancel.is_cancelled() {
            transition(&provider_id, PipelineState::Aborted);
            return Ok(Box::pin(futures_util::stream::empty()));
        }

        if let Some(agent) = AgentProvider::from_id(&provider_id) {
            match &self.agents {
                Some(executor) if executor.is_agent_provider(&provider_id) => {
                    tracing::info!("Delegating {} to agent executor", provider_id);
                    let request = build_agent_request(agent, invocation, cancel);
                    return Ok(executor.execute(request));
                }
                Some(_) => {}
                None => return Err(WirecastError::AgentUnavailable(provider_id).into()),
            }
        }

        let provider = invocation
            .provider
            .as_ref()
            .ok_or_else(|| WirecastError::UnknownProvider(provider_id.clone()))?;

        let descriptor = match prepare_request(provider, invocation) {
            Ok(d) => d,
            Err(e) => {
                transition(&provider_id, PipelineState::Errored);
                return Err(e);
            }
        };

        let transport = Arc::clone(&self.transport);
        let settings = self.settings.clone();
        let mode = ResponseMode::from_streaming(provider.streaming);
        let path = ContentPath::parse(&provider.response_content_path);

        Ok(Box::pin(async_stream::stream! {
            let mut metric = ChunkMetric::new(&provider_id);
            transition(&provider_id, PipelineState::Requesting);

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = transport.send(descriptor) => Some(result),
            };

            let response = match sent {
                Some(Ok(response)) => response,
                Some(Err(e)) => {
                    if cancel.is_cancelled() {
                        transition(&provider_id, PipelineState::Aborted);
                        metric.log_summary(true);
                        return;
                    }
                    tracing::error!("Request to {} failed: {}", provider_id, e);
                    transition(&provider_id, PipelineState::Errored);
                    let chunk = e.to_chunk();
                    metric.record_chunk(&chunk);
                    yield chunk;
                    metric.log_summary(false);
                    return;
                }
                None => {
                    tracing::debug!("Cancelled while waiting on {}", provider_id);
                    transition(&provider_id, PipelineState::Aborted);
                    metric.log_summary(true);
                    return;
                }
            };

            tracing::debug!("{} responded with status {}", provider_id, response.status);
            transition(&provider_id, mode.into());

            let mut chunks = consume_response(response, mode, path, settings, cancel.clone());
            while let Some(chunk) = chunks.next().await {
                metric.record_chunk(&chunk);
                yield chunk;
            }

            let cancelled = cancel.is_cancelled();
            transition(
                &provider_id,
                if cancelled { PipelineState::Aborted } else { PipelineState::Done },
            );
            metric.log_summary(cancelled);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use serde_json::json;
    use std::collections::HashMap;

    fn provider(template: &str) -> ProviderConfig {
        ProviderConfig {
            id: "custom".into(),
            request_template: template.into(),
            streaming: false,
            response_content_path: "text".into(),
        }
    }

    fn invocation(template: &str, vars: &[(&str, &str)]) -> ChatInvocation {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut inv = ChatInvocation::new(provider(template), vars);
        inv.user_message = "What's \"new\"?".into();
        inv
    }

    const CHAT: &str = r#"curl https://api.test/v1/chat -H "Authorization: Bearer {{API_KEY}}" -d '{"model": "{{MODEL}}", "messages": [{"role": "system", "content": "{{SYSTEM_PROMPT}}"}, {"role": "user", "content": "{{TEXT}}"}]}'"#;

    #[test]
    fn test_prepare_substitutes_and_rebuilds() {
        let mut inv = invocation(CHAT, &[("API_KEY", "k1"), ("model", "m1")]);
        inv.system_prompt = Some("be terse".into());
        inv.history = vec![Message::user("q1"), Message::assistant("a1")];

        let provider = inv.provider.clone().unwrap();
        let req = prepare_request(&provider, &inv).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.header("authorization"), Some("Bearer k1"));
        let body = req.json_body().unwrap();
        assert_eq!(body["model"], json!("m1"));
        assert_eq!(
            body["messages"],
            json!([
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "q1"},
                {"role": "assistant", "content": "a1"},
                {"role": "user", "content": "What's \"new\"?"}
            ])
        );
        assert!(unresolved_placeholders(&req).is_empty());
    }

    #[test]
    fn test_prepare_drops_empty_system_prompt() {
        let inv = invocation(CHAT, &[("API_KEY", "k1"), ("MODEL", "m1")]);
        let provider = inv.provider.clone().unwrap();
        let req = prepare_request(&provider, &inv).unwrap();
        let messages = req.json_body().unwrap()["messages"].as_array().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], json!("user"));
    }

    #[test]
    fn test_prepare_validation_order() {
        // Missing variables are reported before image capability
        let mut inv = invocation(CHAT, &[("API_KEY", "k1")]);
        inv.images = vec!["AAAA".into()];
        let provider = inv.provider.clone().unwrap();
        let err = prepare_request(&provider, &inv).unwrap_err();
        assert!(matches!(err.inner, WirecastError::MissingVariable { ref name } if name == "MODEL"));

        let inv = {
            let mut inv = invocation(CHAT, &[("API_KEY", "k1"), ("MODEL", "m")]);
            inv.images = vec!["AAAA".into()];
            inv
        };
        let err = prepare_request(&provider, &inv).unwrap_err();
        assert!(matches!(err.inner, WirecastError::UnsupportedImageInput { count: 1 }));
    }

    #[test]
    fn test_raw_body_without_conversation() {
        let template = r#"curl https://api.test/gen -d '{"prompt": "{{TEXT}}", "max_tokens": {{MAX}}}'"#;
        let inv = invocation(template, &[("MAX", "64")]);
        let provider = inv.provider.clone().unwrap();
        let req = prepare_request(&provider, &inv).unwrap();
        assert_eq!(
            req.json_body(),
            Some(&json!({"prompt": "What's \"new\"?", "max_tokens": 64}))
        );
    }

    #[test]
    fn test_missing_provider_config() {
        let pipeline = StreamingPipeline::new(
            Arc::new(crate::transport::ReqwestTransport::new(reqwest::Client::new())),
            PipelineSettings::default(),
        );
        let mut inv = invocation(CHAT, &[]);
        inv.provider = None;
        let err = pipeline.prepare_request(&inv).unwrap_err();
        assert!(matches!(err.inner, WirecastError::UnknownProvider(ref id) if id == "custom"));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(PipelineState::from(ResponseMode::EventStream).to_string(), "event-stream");
        assert_eq!(PipelineState::Aborted.to_string(), "aborted");
    }
}
