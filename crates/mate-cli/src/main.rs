//! mate - multi-agent trail explorer CLI

mod config;
mod render;
mod tools;

use anyhow::{Context as _, anyhow};
use clap::Parser;
use futures::StreamExt;
use mate_agent::{
    CatalogFactory, EngineConfig, NoHydrator, Request, RetryConfig, Router, RouterBuilder,
    SessionManager, SpecialistFactory, engine::DEFAULT_MAX_TURNS,
};
use mate_ai::{Backend, Model, providers::provider_for};
use render::{OutputFormat, Renderer};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// mate - multi-agent trail explorer
#[derive(Parser, Debug)]
#[command(name = "mate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend (gemini, openrouter)
    #[arg(short, long)]
    backend: Option<String>,

    /// Model to use for the router and every specialist
    #[arg(short, long)]
    model: Option<String>,

    /// Run a single query and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Latitude of the user
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    /// Longitude of the user
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// User id for the session
    #[arg(long, default_value = "local")]
    user: String,

    /// Display name passed to the router
    #[arg(long)]
    name: Option<String>,

    /// Chat id for the session
    #[arg(long, default_value = "cli")]
    chat: String,

    /// Turn ceiling per agent run
    #[arg(long)]
    max_turns: Option<u32>,

    /// Print events as newline-delimited JSON
    #[arg(long)]
    json: bool,

    /// Verbose logging on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("MATE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "mate=info" } else { "mate=warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.init_config {
        let path = config::Config::init().context("creating config file")?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = config::Config::load();

    // CLI flags take precedence over the config file
    let backend = match args.backend.as_deref() {
        Some(name) => Backend::parse(name).ok_or_else(|| anyhow!("unknown backend '{}'", name))?,
        None => cfg.backend().unwrap_or(Backend::Gemini),
    };
    let model_id = args
        .model
        .clone()
        .or(cfg.model.clone())
        .unwrap_or_else(|| config::default_model(backend).to_string());

    let Some(api_key) = cfg.api_key(backend) else {
        eprintln!("Error: No API key found for {}", backend.name());
        eprintln!();
        eprintln!("Set your API key with: export {}=your-key", backend.api_key_env_var());
        eprintln!("Or add it to config file: mate --init-config");
        std::process::exit(1);
    };

    let model = Model::new(backend, &model_id)
        .with_temperature(cfg.temperature.unwrap_or(config::DEFAULT_TEMPERATURE));
    let engine_config = EngineConfig {
        max_turns: args.max_turns.or(cfg.max_turns).unwrap_or(DEFAULT_MAX_TURNS),
        retry: RetryConfig::default().with_max_attempts(cfg.max_retries.unwrap_or(3)),
    };
    let rates = cfg.rates_for(&model_id);
    if rates.is_none() {
        info!(model = %model_id, "No pricing configured, cost reported as 0");
    }

    let provider = provider_for(backend, api_key);
    let tools = tools::registry(tools::http_client()?, cfg.serpapi_key());
    let factory: Arc<dyn SpecialistFactory> = Arc::new(CatalogFactory::new(
        provider.clone(),
        model.clone(),
        engine_config.clone(),
        tools,
        rates.clone(),
    )?);

    let builder: RouterBuilder = Arc::new(move || {
        Ok(Router::new(
            model.clone(),
            provider.clone(),
            factory.clone(),
            Arc::new(NoHydrator),
            engine_config.clone(),
            rates.clone(),
        ))
    });
    let sessions = SessionManager::in_memory(
        builder,
        Duration::from_secs(cfg.session_timeout_secs.unwrap_or(3600)),
        cfg.session_capacity.unwrap_or(100),
    );

    let format = if args.json {
        OutputFormat::Json
    } else {
        OutputFormat::Pretty
    };
    let mut renderer = Renderer::new(format);

    if let Some(command) = args.command.as_deref() {
        return run_query(&sessions, &args, command, &mut renderer).await;
    }
    run_interactive(&sessions, &args, &model_id, &mut renderer).await
}

async fn run_query(
    sessions: &SessionManager,
    args: &Args,
    query: &str,
    renderer: &mut Renderer,
) -> anyhow::Result<()> {
    let mut request = Request::new(query, &args.user);
    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        request = request.with_location(lat, lon);
    }
    if let Some(name) = &args.name {
        request = request.with_user_name(name);
    }

    let mut events = sessions.stream(&args.chat, request)?;
    while let Some(event) = events.next().await {
        renderer.render(&event)?;
    }
    Ok(())
}

async fn run_interactive(
    sessions: &SessionManager,
    args: &Args,
    model_id: &str,
    renderer: &mut Renderer,
) -> anyhow::Result<()> {
    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!("mate ({}) session: {}:{}", model_id, args.user, args.chat);
        eprintln!("Type /reset to start over, /exit to quit.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        match input.trim() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reset" => {
                sessions.reset(&args.user, &args.chat).await;
                println!("Cleared conversation.");
            }
            query => {
                run_query(sessions, args, query, renderer).await?;
                println!();
            }
        }
    }

    Ok(())
}
