/// Placeholder filled with the caller's system prompt
pub const SYSTEM_PROMPT_VAR: &str = "SYSTEM_PROMPT";

/// Placeholder filled with the new user message text
pub const TEXT_VAR: &str = "TEXT";

/// Placeholder filled with the attached images
pub const IMAGE_VAR: &str = "IMAGE";

/// Placeholders supplied by the pipeline itself, never by the caller
pub const RESERVED_VARS: &[&str] = &[SYSTEM_PROMPT_VAR, TEXT_VAR, IMAGE_VAR];

/// Body keys recognized as the conversation array
pub const MESSAGES_KEYS: &[&str] = &["messages", "conversation", "history"];

/// Template roles preserved ahead of the rebuilt conversation
pub const PRESERVED_TEMPLATE_ROLES: &[&str] = &["system", "developer"];

/// Event-stream framing
pub const SSE_DATA_PREFIX: &str = "data:";
pub const SSE_TERMINATORS: &[&str] = &["[DONE]"];

/// MIME type for image files without a recognized extension
pub const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Pipeline defaults
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_STREAM_LINES: usize = 100_000;
pub const DEFAULT_MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Longest error body echoed back in a diagnostic chunk
pub const MAX_ERROR_BODY_CHARS: usize = 2_000;

/// Headers whose values never reach the logs
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "x-api-key",
    "api-key",
    "x-goog-api-key",
    "cookie",
];

/// Variable names carrying credentials for agent backends
pub const GENERIC_API_KEY_VAR: &str = "API_KEY";
pub const MODEL_VAR: &str = "MODEL";

/// Environment prefix for settings and CLI variable fallbacks
pub const ENV_PREFIX: &str = "WIRECAST_";
pub const ENV_VAR_PREFIX: &str = "WIRECAST_VAR_";
