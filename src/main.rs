use clap::Parser;
use colored::*;
use futures_util::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wirecast::config::PipelineSettings;
use wirecast::logging::{init_tracing, setup_panic_hook, LogSettings};
use wirecast::main_helper::{build_invocation, rejection_hint, Args};
use wirecast::pipeline::StreamingPipeline;
use wirecast::transport::ReqwestTransport;

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{} {}: {}", "error:".bold().red(), context, err);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _guard = init_tracing(&LogSettings {
        log_file: args.log_file.clone(),
        default_filter: None,
    });
    setup_panic_hook();

    let settings = match PipelineSettings::from_env() {
        Ok(s) => s,
        Err(e) => fail("invalid settings", e),
    };
    let transport = match ReqwestTransport::from_settings(&settings) {
        Ok(t) => t,
        Err(e) => fail("could not build HTTP client", e),
    };
    let invocation = match build_invocation(&args, |k| std::env::var(k).ok()) {
        Ok(inv) => inv,
        Err(e) => fail("could not prepare invocation", e),
    };

    let pipeline = StreamingPipeline::new(Arc::new(transport), settings);
    let cancel = CancellationToken::new();

    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "cancelled".yellow());
            ctrl_c_token.cancel();
        }
    });

    let mut chunks = match pipeline.stream(&invocation, cancel.clone()) {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("Request rejected: {:?}", e.span_trace);
            if let Some(hint) = rejection_hint(&e.inner) {
                eprintln!("{} {}", "hint:".bold().yellow(), hint);
            }
            fail("request rejected", e)
        }
    };

    let mut stdout = std::io::stdout();
    while let Some(chunk) = chunks.next().await {
        if write!(stdout, "{}", chunk).and_then(|_| stdout.flush()).is_err() {
            cancel.cancel();
            break;
        }
    }
    // Output ends without a trailing newline when streamed; add one for the shell
    println!();

    if cancel.is_cancelled() {
        std::process::exit(130);
    }
}
