use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use website_cloner::{
    CloneOptions, CloneReport, CloneState, ConsoleSink, LogSink, MirrorCommand, ProgressSink,
    WebsiteMirror,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = MirrorCommand::parse();
    setup_logging(args.verbose, args.quiet);

    let options = CloneOptions::new(args.url.clone())
        .output_root(args.output_dir.clone())
        .follow_all(args.follow_all());

    // The spinner would garble piped JSON output.
    let progress = (!args.json && console::user_attended()).then(|| Arc::new(ProgressSink::new()));
    let sink: Arc<dyn LogSink> = match &progress {
        Some(progress) => progress.clone() as Arc<dyn LogSink>,
        None if args.json => Arc::new(ConsoleSink::stderr()),
        None => Arc::new(ConsoleSink::new()),
    };

    let handle = WebsiteMirror::new(options).with_log_sink(sink.clone()).spawn();
    let cancel = handle.cancel_token();
    let wait = handle.wait();
    tokio::pin!(wait);

    let report = tokio::select! {
        report = &mut wait => report,
        _ = tokio::signal::ctrl_c() => {
            sink.log("⚠️  Interrupted, stopping after the current page...");
            cancel.cancel();
            wait.await
        }
    };

    if let Some(progress) = &progress {
        progress.finish(summary(&report));
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    match report.state {
        CloneState::Completed => Ok(()),
        _ => {
            if let Some(error) = &report.error {
                tracing::error!(%error, "clone did not complete");
            }
            std::process::exit(1);
        }
    }
}

fn summary(report: &CloneReport) -> &'static str {
    match report.state {
        CloneState::Completed => "✅ Website cloned",
        CloneState::Cancelled => "⚠️  Clone cancelled",
        _ => "❌ Clone failed",
    }
}

/// Sets up the tracing subscriber from `RUST_LOG`, or from the verbosity flags
/// when it is unset.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("website_cloner=warn,warn"),
                1 => EnvFilter::new("website_cloner=debug,info"),
                2 => EnvFilter::new("website_cloner=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
