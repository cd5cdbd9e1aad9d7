use crate::redaction::RedactingWriter;
use crate::types::TextChunk;
use chrono::{DateTime, Utc};
use std::panic;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "wirecast=info";

#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    /// Daily-rolling log file; stderr when unset.
    pub log_file: Option<PathBuf>,
    /// Used when `RUST_LOG` is not set.
    pub default_filter: Option<String>,
}

fn split_log_path(path: &std::path::Path) -> (PathBuf, String) {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "wirecast.log".to_string());
    (dir, file)
}

/// Installs the global subscriber. The returned guard must outlive all
/// logging when a log file is used; dropping it flushes the writer.
pub fn init_tracing(settings: &LogSettings) -> Option<WorkerGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => settings
            .default_filter
            .as_deref()
            .unwrap_or(DEFAULT_LOG_FILTER)
            .into(),
    };

    let (file_layer, guard) = match &settings.log_file {
        Some(path) => {
            let (dir, file) = split_log_path(path);
            let appender = tracing_appender::rolling::daily(dir, file);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(move || RedactingWriter::new(non_blocking.clone()))
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = settings.log_file.is_none().then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(|| RedactingWriter::new(std::io::stderr()))
            .with_target(false)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .with(tracing_error::ErrorLayer::default())
        .try_init();
    if installed.is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
    guard
}

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Per-invocation output accounting, summarized once the stream ends.
#[derive(Debug, Clone)]
pub struct ChunkMetric {
    pub provider_id: String,
    pub started_at: DateTime<Utc>,
    pub chunks: usize,
    pub text_chars: usize,
}

impl ChunkMetric {
    pub fn new(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            started_at: Utc::now(),
            chunks: 0,
            text_chars: 0,
        }
    }

    pub fn record_chunk(&mut self, chunk: &TextChunk) {
        self.chunks += 1;
        self.text_chars += chunk.as_str().chars().count();
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    pub fn log_summary(&self, cancelled: bool) {
        info!(
            target: "wirecast::stream",
            "[STREAM END] Provider: {} | Chunks: {} | Text: {} chars | {} ms{}",
            self.provider_id,
            self.chunks,
            self.text_chars,
            self.elapsed_ms(),
            if cancelled { " | cancelled" } else { "" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_counts_chars_not_bytes() {
        let mut metric = ChunkMetric::new("echo");
        metric.record_chunk(&TextChunk::from("héllo"));
        metric.record_chunk(&TextChunk::from(""));
        assert_eq!(metric.chunks, 2);
        assert_eq!(metric.text_chars, 5);
        assert!(metric.elapsed_ms() >= 0);
    }

    #[test]
    fn test_split_log_path() {
        let (dir, file) = split_log_path(std::path::Path::new("wirecast.log"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(file, "wirecast.log");
        let (dir, file) = split_log_path(std::path::Path::new("/tmp/logs/run.log"));
        assert_eq!(dir, PathBuf::from("/tmp/logs"));
        assert_eq!(file, "run.log");
    }
}
