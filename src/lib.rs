#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]

pub mod agent;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod content_path;
pub mod logging;
pub mod main_helper;
pub mod messages;
pub mod pipeline;
pub mod redaction;
pub mod str_utils;
pub mod substitution;
pub mod template;
pub mod transport;
pub mod types;
pub mod variables;

pub use types::*;

pub use agent::{AgentExecutionRequest, AgentExecutor, AgentProvider};
pub use config::PipelineSettings;
pub use main_helper::Args;
pub use pipeline::StreamingPipeline;
pub use transport::{HttpTransport, ReqwestTransport, TransportResponse};
