//! Routing boundary for providers backed by a local coding-agent tool
//! rather than an HTTP template. Execution lives behind [`AgentExecutor`].

use crate::constants::{GENERIC_API_KEY_VAR, MODEL_VAR};
use crate::types::{ChatInvocation, TextChunk, TextStream};
use crate::variables::VariableSet;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentProvider {
    ClaudeCode,
    Codex,
    GeminiCli,
}

impl AgentProvider {
    pub const ALL: [AgentProvider; 3] = [
        AgentProvider::ClaudeCode,
        AgentProvider::Codex,
        AgentProvider::GeminiCli,
    ];

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    pub fn id(&self) -> &'static str {
        match self {
            AgentProvider::ClaudeCode => "claude-code",
            AgentProvider::Codex => "codex",
            AgentProvider::GeminiCli => "gemini-cli",
        }
    }

    /// Executable the backend shells out to.
    pub fn tool_name(&self) -> &'static str {
        match self {
            AgentProvider::ClaudeCode => "claude",
            AgentProvider::Codex => "codex",
            AgentProvider::GeminiCli => "gemini",
        }
    }

    /// ClaudeCode resumes its own session on the tool side, so prior turns
    /// are not resent.
    pub fn injects_history(&self) -> bool {
        !matches!(self, AgentProvider::ClaudeCode)
    }

    pub fn api_key_variable(&self) -> &'static str {
        match self {
            AgentProvider::ClaudeCode => "ANTHROPIC_API_KEY",
            AgentProvider::Codex => "OPENAI_API_KEY",
            AgentProvider::GeminiCli => "GOOGLE_API_KEY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHistoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct AgentExecutionRequest {
    pub provider_id: String,
    pub user_message: String,
    pub system_prompt: Option<String>,
    pub history: Option<Vec<AgentHistoryEntry>>,
    pub session_id: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub cancel: CancellationToken,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn build_agent_request(
    provider: AgentProvider,
    invocation: &ChatInvocation,
    cancel: CancellationToken,
) -> AgentExecutionRequest {
    let vars = VariableSet::from_map(&invocation.instance.variables);

    let history = provider.injects_history().then(|| {
        invocation
            .history
            .iter()
            .map(|m| AgentHistoryEntry {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    });

    let session_id = invocation
        .conversation_id
        .clone()
        .unwrap_or_default()
        .0;

    let api_key = vars
        .get_non_empty(provider.api_key_variable())
        .or_else(|| vars.get_non_empty(GENERIC_API_KEY_VAR))
        .map(str::to_string);

    AgentExecutionRequest {
        provider_id: provider.id().to_string(),
        user_message: invocation.user_message.clone(),
        system_prompt: non_empty(invocation.system_prompt.as_deref()),
        history,
        session_id,
        api_key,
        model: non_empty(vars.get(MODEL_VAR)),
        cancel,
    }
}

pub trait AgentExecutor: Send + Sync {
    fn is_agent_provider(&self, provider_id: &str) -> bool {
        AgentProvider::from_id(provider_id).is_some()
    }

    /// Must observe `request.cancel` and end the stream once it fires.
    fn execute(&self, request: AgentExecutionRequest) -> TextStream;

    /// For settings screens; the pipeline never calls this.
    fn is_tool_installed(&self, tool_name: &str) -> BoxFuture<'static, bool>;
}

/// Adapts a channel fed by a backend task into the pipeline's stream type.
pub fn channel_stream(rx: mpsc::Receiver<TextChunk>) -> TextStream {
    Box::pin(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationId, Message, SelectedProviderInstance};
    use futures_util::StreamExt;
    use std::collections::HashMap;

    fn invocation(provider_id: &str, vars: &[(&str, &str)]) -> ChatInvocation {
        ChatInvocation {
            provider: None,
            instance: SelectedProviderInstance {
                provider_id: provider_id.to_string(),
                variables: vars
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<HashMap<_, _>>(),
            },
            system_prompt: Some("  ".into()),
            history: vec![Message::user("q1"), Message::assistant("a1")],
            user_message: "q2".into(),
            images: Vec::new(),
            conversation_id: None,
        }
    }

    #[test]
    fn test_identifiers_round_trip() {
        for p in AgentProvider::ALL {
            assert_eq!(AgentProvider::from_id(p.id()), Some(p));
        }
        assert_eq!(AgentProvider::from_id("openai"), None);
        assert_eq!(AgentProvider::GeminiCli.tool_name(), "gemini");
    }

    #[test]
    fn test_history_injection_per_provider() {
        let inv = invocation("codex", &[]);
        let req = build_agent_request(AgentProvider::Codex, &inv, CancellationToken::new());
        assert_eq!(req.history.as_ref().map(Vec::len), Some(2));
        assert_eq!(req.history.unwrap()[1].role, "assistant");

        let req = build_agent_request(AgentProvider::ClaudeCode, &inv, CancellationToken::new());
        assert!(req.history.is_none());
    }

    #[test]
    fn test_credentials_and_model() {
        let inv = invocation("gemini-cli", &[("api_key", "generic"), ("model", "")]);
        let req = build_agent_request(AgentProvider::GeminiCli, &inv, CancellationToken::new());
        assert_eq!(req.api_key.as_deref(), Some("generic"));
        assert_eq!(req.model, None);
        assert_eq!(req.system_prompt, None);

        let inv = invocation(
            "gemini-cli",
            &[("API_KEY", "generic"), ("GOOGLE_API_KEY", "specific"), ("MODEL", "pro")],
        );
        let req = build_agent_request(AgentProvider::GeminiCli, &inv, CancellationToken::new());
        assert_eq!(req.api_key.as_deref(), Some("specific"));
        assert_eq!(req.model.as_deref(), Some("pro"));
    }

    #[test]
    fn test_session_id() {
        let mut inv = invocation("codex", &[]);
        let fresh = build_agent_request(AgentProvider::Codex, &inv, CancellationToken::new());
        assert!(uuid::Uuid::parse_str(&fresh.session_id).is_ok());

        inv.conversation_id = Some(ConversationId::from("conv-1".to_string()));
        let kept = build_agent_request(AgentProvider::Codex, &inv, CancellationToken::new());
        assert_eq!(kept.session_id, "conv-1");
    }

    #[tokio::test]
    async fn test_channel_stream_drains() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(TextChunk::from("a")).await.unwrap();
        tx.send(TextChunk::from("b")).await.unwrap();
        drop(tx);
        let out: Vec<TextChunk> = channel_stream(rx).collect().await;
        assert_eq!(out, vec![TextChunk::from("a"), TextChunk::from("b")]);
    }
}
