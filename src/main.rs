use anyhow::{Context, Result};
use clap::Parser;
use dataset_register::{
    AppState, CliArgs, Command, LoggingConfig, RegisterConfig, Source, allow_list, init_logging,
    run_server, shutdown_telemetry,
};
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let logging_config = LoggingConfig::from_env();
    let _guard = init_logging(logging_config)?;

    let cli = CliArgs::parse();
    let config = RegisterConfig::from_args(&cli)?;
    config.validate()?;

    let result = run(cli.command.unwrap_or(Command::Serve), config).await;

    // Ensure traces are flushed before exit
    shutdown_telemetry();

    result
}

async fn run(command: Command, config: RegisterConfig) -> Result<ExitCode> {
    let state = match command {
        Command::Serve => {
            run_server(config).await?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => AppState::new(Arc::new(config)).await?,
    };

    match command {
        Command::Serve => Ok(ExitCode::SUCCESS),
        Command::Ingest { url } => {
            let report = state.registry().ingest(&url).await?;
            print_json(&report)?;
            Ok(exit_code(report.accepted))
        }
        Command::Validate { source, media_type } => {
            let source = read_source(&source, media_type).await?;
            let outcome = state.registry().validate_only(source).await?;
            print_json(&outcome)?;
            Ok(exit_code(outcome.is_valid()))
        }
        Command::Crawl => {
            let summary = state.crawl_now().await?;
            print_json(&summary)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats => {
            print_json(&state.stats().await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Allow { domain } => {
            anyhow::ensure!(
                allow_list::is_registrable(&domain),
                "{domain:?} is not a registrable domain"
            );
            state.registry().allow_list().allow(&domain).await?;
            print_json(&serde_json::json!({ "allowed": domain }))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// A URL stays a URL; anything else is read as a local file.
async fn read_source(source: &str, media_type: Option<String>) -> Result<Source> {
    if source.starts_with("http://") || source.starts_with("https://") {
        return Ok(Source::Url(source.to_owned()));
    }
    let path = Path::new(source);
    let media_type = match media_type {
        Some(media_type) => media_type,
        None => media_type_for(path)
            .with_context(|| format!("cannot tell the media type of {source}, pass --media-type"))?
            .to_owned(),
    };
    let body = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {source}"))?;
    Ok(Source::Inline { body, media_type })
}

fn media_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match extension.as_str() {
        "ttl" => "text/turtle",
        "jsonld" | "json" => "application/ld+json",
        "nt" => "application/n-triples",
        "nq" => "application/n-quads",
        "trig" => "application/trig",
        "rdf" | "xml" | "owl" => "application/rdf+xml",
        "html" | "htm" => "text/html",
        _ => return None,
    })
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
