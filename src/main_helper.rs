use crate::config::{find_provider, load_providers};
use crate::constants::{DEFAULT_IMAGE_MIME, ENV_VAR_PREFIX};
use crate::str_utils::normalize_var_name;
use crate::types::*;
use crate::variables::required_variables;
use base64::Engine;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream a chat completion through a curl-style provider template", long_about = None)]
pub struct Args {
    /// JSON array of provider definitions
    #[arg(long, default_value = "providers.json")]
    pub providers: PathBuf,
    /// Provider id from the providers file. The agent ids (`claude-code`,
    /// `codex`, `gemini-cli`) only run inside a host that registers an
    /// `AgentExecutor`; this binary registers none, so they work here only
    /// when the providers file also gives them an HTTP template.
    #[arg(long)]
    pub provider: String,
    /// Template variable, repeatable (`--var API_KEY=...`)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,
    #[arg(long)]
    pub system: Option<String>,
    /// JSON array of `{role, content}` prior messages
    #[arg(long)]
    pub history: Option<PathBuf>,
    /// Image file attached to the message, repeatable
    #[arg(long = "image")]
    pub images: Vec<PathBuf>,
    #[arg(long)]
    pub conversation_id: Option<String>,
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    pub message: String,
}

/// Extra guidance printed with a rejected request.
pub fn rejection_hint(err: &WirecastError) -> Option<&'static str> {
    match err {
        WirecastError::AgentUnavailable(_) => Some(
            "agent providers need an embedding host with an AgentExecutor; \
             add an HTTP template for this id to the providers file to use it here",
        ),
        WirecastError::UnknownProvider(_) => Some("check --provider against the providers file"),
        _ => None,
    }
}

pub fn parse_var(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((normalize_var_name(k), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}

/// `--var` values win; placeholders left unset fall back to
/// `WIRECAST_VAR_<NAME>` from the environment.
pub fn collect_variables<F>(
    template: Option<&str>,
    cli_vars: &[(String, String)],
    lookup: F,
) -> HashMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut vars: HashMap<String, String> = cli_vars.iter().cloned().collect();
    let wanted = match template {
        Some(t) => required_variables(t),
        // Agent providers have no template; offer their credential and model
        None => vec!["API_KEY".to_string(), "MODEL".to_string()],
    };
    for name in wanted {
        if vars.contains_key(&name) {
            continue;
        }
        if let Some(value) = lookup(&format!("{}{}", ENV_VAR_PREFIX, name)) {
            vars.insert(name, value);
        }
    }
    vars
}

pub fn load_history(path: &std::path::Path) -> Result<Vec<Message>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        WirecastError::Config(format!("Invalid history file {}: {}", path.display(), e)).into()
    })
}

fn image_mime(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => DEFAULT_IMAGE_MIME,
    }
}

/// Reads an image file as a `data:` URL.
pub fn load_image(path: &std::path::Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", image_mime(path), encoded))
}

pub fn build_invocation<F>(args: &Args, lookup: F) -> Result<ChatInvocation>
where
    F: Fn(&str) -> Option<String>,
{
    let is_agent = crate::agent::AgentProvider::from_id(&args.provider).is_some();
    let provider = if args.providers.exists() {
        let providers = load_providers(&args.providers)?;
        find_provider(&providers, &args.provider).cloned()
    } else {
        None
    };
    if provider.is_none() && !is_agent {
        return Err(WirecastError::UnknownProvider(args.provider.clone()).into());
    }

    let variables = collect_variables(
        provider.as_ref().map(|p| p.request_template.as_str()),
        &args.vars,
        lookup,
    );
    let history = match &args.history {
        Some(path) => load_history(path)?,
        None => Vec::new(),
    };
    let images = args
        .images
        .iter()
        .map(|p| load_image(p.as_path()))
        .collect::<Result<Vec<_>>>()?;

    Ok(ChatInvocation {
        provider,
        instance: SelectedProviderInstance {
            provider_id: args.provider.clone(),
            variables,
        },
        system_prompt: args.system.clone(),
        history,
        user_message: args.message.clone(),
        images,
        conversation_id: args.conversation_id.clone().map(ConversationId::from),
    })
}
