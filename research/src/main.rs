use agent::callbacks::ProgressLogger;
use agent::llm::OpenAI;
use agent::report;
use agent::search::TimeLimit;
use clap::{Args, Parser, Subcommand};
use research::config::ResearchConfig;
use research::pipeline::{RunOptions, StoredResearch, build_pipeline};
use research::runner::JobRunner;
use research::server::{self, AppState};
use research::store::ReportStore;
use research::{Error, Result};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Generate search queries with a local LLM, search the web, scrape the
/// results and compile them into a markdown report.
#[derive(Parser)]
#[command(name = "research", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Research a topic in the foreground and write the report to a file.
    Run(RunArgs),
    /// Start the web UI and job API.
    Serve(ServeArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Research topic. Prompted for when omitted.
    topic: Option<String>,

    /// Output path for the report.
    #[arg(short, long, env = "OUTPUT_FILE", default_value = "final_report.md")]
    output: PathBuf,

    /// Ollama model name (default: $OLLAMA_MODEL).
    #[arg(short, long)]
    model: Option<String>,

    /// Ollama server URL (default: $OLLAMA_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Number of search queries to generate.
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=10))]
    num_queries: Option<u8>,

    /// Results per search query.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    top: Option<u8>,

    /// Restrict results to the last day, week, month or year.
    #[arg(short, long, value_parser = parse_timelimit)]
    timelimit: Option<TimeLimit>,

    /// Debug logging for the research and agent crates.
    #[arg(short, long, env = "VERBOSE")]
    verbose: bool,
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address (default: $WEB_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (default: $WEB_PORT).
    #[arg(short, long)]
    port: Option<u16>,

    /// Debug logging for the research and agent crates.
    #[arg(short, long, env = "VERBOSE")]
    verbose: bool,
}

fn parse_timelimit(s: &str) -> std::result::Result<TimeLimit, String> {
    s.parse()
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "research=debug,agent=debug,tower_http=debug"
    } else {
        "research=info,agent=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn resolve_topic(topic: Option<String>) -> Result<String> {
    let raw = match topic {
        Some(topic) => topic,
        None => {
            print!("\nEnter research topic: ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            line
        }
    };

    let topic = raw.trim();
    if topic.is_empty() {
        return Err(Error::InvalidInput("No topic provided".to_string()));
    }
    Ok(topic.to_string())
}

async fn run(args: RunArgs, mut config: ResearchConfig) -> Result<()> {
    let topic = resolve_topic(args.topic)?;

    if let Some(host) = args.host {
        config.ollama_host = host;
    }
    if args.timelimit.is_some() {
        config.search.timelimit = args.timelimit;
    }
    let options = RunOptions {
        model: args.model,
        num_queries: args.num_queries.map(usize::from),
        results_per_query: args.top.map(usize::from),
    };
    let model = options.model.as_deref().unwrap_or(&config.ollama_model);
    let num_queries = options.num_queries.unwrap_or(config.search.num_queries);
    let per_query = options
        .results_per_query
        .unwrap_or(config.search.results_per_query);

    let rule = "=".repeat(64);
    println!("\n{rule}");
    println!("  RESEARCH AGENT");
    println!("  Topic   : {}", topic);
    println!("  Model   : {}", model);
    println!("  Queries : {} x {} results each", num_queries, per_query);
    println!("{rule}\n");

    let pipeline = build_pipeline(&config, &options)?;
    let logger = ProgressLogger::new(std::io::stdout());
    let outcome = pipeline.run(&topic, &logger).await?;

    let markdown = report::render(&outcome);
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&args.output, &markdown)?;
    let saved = std::fs::canonicalize(&args.output).unwrap_or(args.output);

    println!("\n{rule}");
    println!("  PIPELINE COMPLETE");
    println!("  Total time    : {:.0} ms", outcome.elapsed_ms);
    println!("  URLs found    : {}", outcome.urls.len());
    println!("  Pages scraped : {}", outcome.scraped.len());
    println!("  Failed        : {}", outcome.errors.len());
    println!("  Report chars  : {}", markdown.chars().count());
    println!("  Saved to      : {}", saved.display());
    println!("{rule}\n");

    if !outcome.errors.is_empty() {
        println!("  Failed URLs:");
        for (url, err) in &outcome.errors {
            println!("    - {}: {}", url, err);
        }
        println!();
    }

    Ok(())
}

async fn serve(args: ServeArgs, mut config: ResearchConfig) -> Result<()> {
    if let Some(host) = args.host {
        config.web_host = host;
    }
    if let Some(port) = args.port {
        config.web_port = port;
    }

    let store = ReportStore::new(config.reports_dir.clone());
    let llm = OpenAI::ollama(
        config.ollama_model.clone(),
        &config.ollama_host,
        config.ollama_timeout,
    )?;
    let pipeline = Arc::new(StoredResearch::new(config.clone(), store.clone()));
    let runner = JobRunner::start(pipeline, config.runner.clone());

    let app = server::router(AppState {
        runner: runner.clone(),
        store,
        llm,
    });

    let addr: SocketAddr = format!("{}:{}", config.web_host, config.web_port)
        .parse()
        .map_err(|e| Error::InvalidInput(format!("invalid bind address: {}", e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, reports_dir = %config.reports_dir.display(), "web server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped, waiting for the running job");
    runner.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Command::Run(args) => args.verbose,
        Command::Serve(args) => args.verbose,
    };
    init_tracing(verbose);
    let config = ResearchConfig::from_env();

    let result = match cli.command {
        Command::Run(args) => run(args, config).await,
        Command::Serve(args) => serve(args, config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "research failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_flag_parses_for_both_commands() {
        let cli = Cli::try_parse_from(["research", "serve", "-v", "--port", "9000"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Serve(ServeArgs {
                verbose: true,
                port: Some(9000),
                ..
            })
        ));

        let cli = Cli::try_parse_from(["research", "run", "tidal power", "--verbose"]).unwrap();
        assert!(matches!(cli.command, Command::Run(RunArgs { verbose: true, .. })));
    }

    #[test]
    fn test_query_count_is_bounded() {
        assert!(Cli::try_parse_from(["research", "run", "x", "-n", "11"]).is_err());
    }
}
