// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gleaner::events::EventBus;
use gleaner::pipelines::{self, qa, reviews};
use gleaner::scheduler::StdoutScheduler;
use gleaner::session;
use gleaner::view::chromium::{find_chromium, ChromiumBrowser};
use gleaner::view::ViewTree;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "gleaner",
    about = "Gleaner — lazy-content extraction and continuation planning",
    version,
    after_help = "Run 'gleaner <command> --help' for details on each command."
)]
struct Cli {
    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one unit of work against a live page
    Run {
        /// Handler to run ("bar_qa" or "foo_reviews")
        handler: String,
        /// Path to the unit's input value as JSON (defaults to {})
        #[arg(long)]
        input: Option<PathBuf>,
        /// Page URL (derived from the input for foo_reviews when omitted)
        #[arg(long)]
        url: Option<String>,
        /// Navigation timeout in milliseconds
        #[arg(long, default_value = "30000")]
        timeout: u64,
    },
    /// Check environment and diagnose issues
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "gleaner=debug" } else { "gleaner=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.parse().unwrap()),
        )
        .init();

    match cli.command {
        Commands::Run {
            handler,
            input,
            url,
            timeout,
        } => run(&handler, input, url, Duration::from_millis(timeout)).await,
        Commands::Doctor => doctor(),
    }
}

async fn run(
    handler: &str,
    input: Option<PathBuf>,
    url: Option<String>,
    timeout: Duration,
) -> Result<()> {
    let value: Value = match input {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read input file {}", path.display()))?;
            serde_json::from_str(&raw).context("input file is not valid JSON")?
        }
        None => Value::Object(Default::default()),
    };

    let url = match url {
        Some(url) => url,
        None if handler == pipelines::REVIEWS_HANDLER => reviews::review_url(&value),
        None => bail!("--url is required for handler '{handler}'"),
    };

    let browser = ChromiumBrowser::launch().await?;
    let tree = browser.new_tree().await?;

    // Session bootstrap: cookies from the input, then navigation.
    let jar = value
        .get("cookies")
        .cloned()
        .and_then(session::jar_from_json)
        .unwrap_or_default();
    session::bootstrap(&tree, &jar, &url, timeout).await?;

    let document = tree.document().await?;
    let events = EventBus::new(64);

    let result = match handler {
        pipelines::QA_HANDLER => {
            let pipeline = qa::QaPipeline { events };
            pipeline.run(&document, value).await?
        }
        pipelines::REVIEWS_HANDLER => {
            let pipeline = reviews::ReviewsPipeline {
                scheduler: Arc::new(StdoutScheduler),
                events,
            };
            pipeline.run(&document, value).await?
        }
        pipelines::TRENDS_HANDLER => {
            // The trends pipeline reads live client-framework state through
            // the ViewState capability, which only an embedding host can
            // provide.
            bail!("handler 'foo_trends' requires a host-provided ViewState; it cannot run standalone");
        }
        other => bail!("unknown handler '{other}'"),
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn doctor() -> Result<()> {
    match find_chromium() {
        Some(path) => println!("  ok  Chromium: {}", path.display()),
        None => {
            println!("  !!  Chromium not found.");
            println!("      Set GLEANER_CHROMIUM_PATH or install a system Chrome.");
        }
    }
    println!("  ok  gleaner v{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
