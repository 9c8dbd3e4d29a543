//! `aegis` - run a staged reasoning analysis from the command line

mod config;
mod output;

use aegis_core::{synthesize_explanation, AnalysisService, ContextMap, InMemoryMemory, InMemoryRepository};
use aegis_gateway::OpenRouterClient;
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use config::{AegisConfig, LogConfig};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "aegis", about = "Staged reasoning pipeline for go/no-go decisions")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "AEGIS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a problem statement and print the verdict
    Analyze(AnalyzeArgs),
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Problem or idea to analyze (20-5000 characters)
    problem: String,

    /// Additional context as key=value, repeatable
    #[arg(long = "context", value_parser = parse_context_pair)]
    context: Vec<(String, String)>,

    /// Print the full record as JSON
    #[arg(long)]
    json: bool,

    /// Also print the synthesized explanation
    #[arg(long)]
    explain: bool,
}

fn parse_context_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_env("AEGIS_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| log.level.clone().into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn analyze(config: AegisConfig, args: AnalyzeArgs) -> anyhow::Result<()> {
    tracing::debug!(model = %config.gateway.model, base_url = %config.gateway.base_url, "using gateway");
    let inference = OpenRouterClient::new(config.gateway.clone()).context("creating inference client")?;
    let service = AnalysisService::new(
        config.pipeline,
        Arc::new(inference),
        Arc::new(InMemoryRepository::new()),
    )
    .with_memory(Arc::new(InMemoryMemory::new()));

    let context: ContextMap = args
        .context
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    let record = service.run(&args.problem, context).await?;
    let Some(aggregate) = record.result.as_ref() else {
        tracing::error!(
            analysis_id = %record.id,
            status = ?record.status,
            error = record.error.as_deref().unwrap_or_default(),
            "analysis ended without a result"
        );
        bail!(
            "analysis {} ended {:?}: {}",
            record.id,
            record.status,
            record.error.as_deref().unwrap_or("no result")
        );
    };

    tracing::info!(
        analysis_id = %record.id,
        verdict = %aggregate.verdict.verdict,
        confidence = aggregate.verdict.confidence,
        tokens = aggregate.tokens_used,
        duration_ms = aggregate.total_duration_ms,
        "analysis finished"
    );

    let explanation = synthesize_explanation(&aggregate.verdict, &aggregate.trace);
    if args.json {
        let mut body = json!({ "record": record });
        if args.explain {
            body["explanation"] = serde_json::to_value(&explanation)?;
        }
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print!("{}", output::render_aggregate(aggregate));
        if args.explain {
            println!();
            print!("{}", output::render_explanation(&explanation));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AegisConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log);

    match cli.command {
        Commands::Analyze(args) => analyze(config, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn context_pairs_parse() {
        assert_eq!(
            parse_context_pair("budget = 50k").unwrap(),
            ("budget".to_string(), "50k".to_string())
        );
        assert_eq!(
            parse_context_pair("url=https://a.b/?x=1").unwrap(),
            ("url".to_string(), "https://a.b/?x=1".to_string())
        );
        assert!(parse_context_pair("novalue").is_err());
        assert!(parse_context_pair("=value").is_err());
    }

    #[test]
    fn analyze_flags_parse() {
        let cli = Cli::try_parse_from([
            "aegis",
            "analyze",
            "A marketplace for refurbished lab equipment",
            "--context",
            "region=EU",
            "--context",
            "budget=small",
            "--explain",
        ])
        .unwrap();

        let Commands::Analyze(args) = cli.command;
        assert_eq!(args.context.len(), 2);
        assert!(args.explain);
        assert!(!args.json);
    }
}
