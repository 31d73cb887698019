mod config;
mod extract;
mod gifts;
mod llm;
mod pipeline;
mod server;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Settings;
use gifts::{read_requests, write_results, OutputLayout};
use llm::{ChatClient, LlmProvider};
use pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(
    name = "gift-riddler",
    version,
    about = "Turns a gift list CSV into festive riddles (and best-deal lookups)"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Process a gift list file into a results file (the default)
    Run {
        /// Input CSV (defaults to INPUT_CSV)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Output CSV (defaults to OUTPUT_CSV)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Skip the deal lookup and write the 4-column riddle table
        #[arg(long)]
        riddles_only: bool,
    },
    /// Run one deal lookup on a sample gift and print the result
    Test,
    /// Start the upload server
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Reads `input`, processes every row and writes `output` in one go, so an
/// I/O failure never leaves a partial results file behind.
async fn run_file(
    pipeline: &Pipeline,
    input: &Path,
    output: &Path,
    layout: OutputLayout,
) -> Result<usize> {
    info!("Reading from: {}", input.display());
    let file =
        File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let requests = read_requests(BufReader::new(file))
        .with_context(|| format!("Failed to read {}", input.display()))?;
    info!("Found {} recipients", requests.len());

    let rows = pipeline.process(requests, layout).await;

    let mut buf = Vec::new();
    write_results(&mut buf, &rows, layout)?;
    std::fs::write(output, buf)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!("Results saved to: {}", output.display());
    info!("Processed {} gifts!", rows.len());
    Ok(rows.len())
}

async fn smoke_test(pipeline: &Pipeline) -> Result<()> {
    info!("Testing deal lookup with a single gift...");
    let result = pipeline
        .search_best_deal("Noise-cancelling headphones", Some(100.0))
        .await;
    println!("\nFull result: {}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    let client = ChatClient::new(
        &settings.api_url,
        &settings.api_key,
        Duration::from_secs(settings.timeout_secs),
    )?;
    info!(
        "LLM endpoint: {} ({:?}), model: {}, API key: {}",
        client.endpoint(),
        client.mode(),
        settings.model,
        if settings.api_key.is_empty() { "not set" } else { "set" }
    );
    let provider: Arc<dyn LlmProvider> = Arc::new(client);

    let pipeline = Pipeline::new(provider, settings.model.clone())
        .with_search_tools(settings.search_tools.clone())
        .with_concurrency(settings.concurrency);

    let command = cli.command.unwrap_or(Command::Run {
        input: None,
        output: None,
        riddles_only: false,
    });

    match command {
        Command::Run {
            input,
            output,
            riddles_only,
        } => {
            let input = input.unwrap_or_else(|| settings.input_csv.clone());
            let output = output.unwrap_or_else(|| settings.output_csv.clone());
            let layout = if riddles_only {
                OutputLayout::Riddles
            } else {
                OutputLayout::Deals
            };
            run_file(&pipeline, &input, &output, layout).await?;
            Ok(())
        }
        Command::Test => smoke_test(&pipeline).await,
        Command::Serve => server::serve(settings, pipeline)
            .await
            .context("HTTP server failed"),
    }
}
