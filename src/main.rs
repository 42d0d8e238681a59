use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use request_scheduler::{
    ApiClient, Config, MemoryTokenStore, ReqwestTransport, RequestConfig, Response, Scheduler,
    TokenStore,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "request-scheduler", version, about = "Send API requests through the rate-aware scheduler")]
struct Cli {
    /// Override API_BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// GET a path, optionally several times concurrently
    Get {
        path: String,
        /// Query parameter as key=value
        #[arg(short, long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
        /// Number of identical concurrent requests
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
    /// POST a JSON document
    Post {
        path: String,
        #[arg(long)]
        data: String,
    },
    /// PUT a JSON document
    Put {
        path: String,
        #[arg(long)]
        data: String,
    },
    /// DELETE a path
    Delete { path: String },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("request_scheduler={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let base_url = cli.base_url.clone().unwrap_or_else(|| config.api_base_url.clone());
    let scheduler_config = config.scheduler_config();
    tracing::info!(
        base_url = %base_url,
        max_concurrent = scheduler_config.max_concurrent,
        dispatch_spacing_ms = scheduler_config.dispatch_spacing.as_millis() as u64,
        "Starting request scheduler"
    );

    let transport = ReqwestTransport::new(&base_url, scheduler_config.request_timeout)
        .context("Failed to create HTTP transport")?;
    let scheduler = Scheduler::new(Arc::new(transport), scheduler_config)
        .context("Failed to create scheduler")?;
    let _sweeper = scheduler.spawn_cache_sweeper();

    let tokens = Arc::new(MemoryTokenStore::new());
    if let Some(token) = cli.token {
        tokens.store(token);
    }
    let client = ApiClient::new(scheduler, tokens);

    match cli.command {
        Command::Get {
            path,
            params,
            repeat,
        } => {
            let request_config = params
                .into_iter()
                .fold(RequestConfig::new(), |config, (key, value)| config.param(key, value));

            let mut requests = JoinSet::new();
            for _ in 0..repeat.max(1) {
                let client = client.clone();
                let path = path.clone();
                let request_config = request_config.clone();
                requests.spawn(async move { client.get(&path, request_config).await });
            }
            while let Some(joined) = requests.join_next().await {
                print_response(joined.context("Request task panicked")??)?;
            }
        }
        Command::Post { path, data } => {
            let body = parse_json(&data)?;
            print_response(client.post(&path, body, RequestConfig::new()).await?)?;
        }
        Command::Put { path, data } => {
            let body = parse_json(&data)?;
            print_response(client.put(&path, body, RequestConfig::new()).await?)?;
        }
        Command::Delete { path } => {
            print_response(client.delete(&path, RequestConfig::new()).await?)?;
        }
    }

    let stats = serde_json::to_string(&client.stats())?;
    tracing::info!(stats = %stats, "Scheduler statistics");

    Ok(())
}

fn parse_json(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON body: {}", raw))
}

fn print_response(response: Response) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
