use clap::Parser;
use monoxide::bson::extjson;
use monoxide::client::Client;
use monoxide::config::Config;
use monoxide::reactor::TokioReactor;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env first so clap's env fallbacks see variables
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Attempt to load config before initializing logs to pick up log_level from file
    let cfg_file_res = Config::load_from_file(cli.config.as_deref());
    let cfg_file = match &cfg_file_res {
        Ok(c) => c.clone(),
        Err(_) => Config::default(),
    };

    // Determine log filter precedence: CLI (--log-level / MONOXIDE_LOG_LEVEL)
    // > RUST_LOG (env) > config.toml log_level > default("info")
    let filter_spec = if let Some(ref lvl) = cli.log_level {
        lvl.clone()
    } else if let Ok(env_spec) = std::env::var("RUST_LOG") {
        env_spec
    } else if let Some(ref lvl) = cfg_file.log_level {
        lvl.clone()
    } else {
        "info".to_string()
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter_spec))
        .compact()
        .init();

    if let Err(e) = cfg_file_res.as_ref() {
        tracing::warn!(error = %format!("{e:?}"), "invalid config; using defaults");
    }

    // Load from config file (if present), then override with CLI/env.
    let cfg = cfg_file.with_overrides(
        cli.uri.clone(),
        cli.db.clone(),
        cli.log_level.clone(),
        cli.connect_timeout_ms,
        cli.request_timeout_ms,
        cli.app_name.clone(),
    );
    cfg.validate()?;

    tracing::info!(uri = %cfg.uri, "connecting");
    let reactor = Arc::new(TokioReactor::new());
    let client = Client::connect(reactor, cfg.client_options()).await?;

    match cli.command {
        Command::Hello => {
            let hello = client.server_hello();
            println!("{}", extjson::doc_to_json(hello.as_view())?);
        }
        Command::Ping => {
            client.ping().await?;
            println!("ok");
        }
        Command::Count { collection } => {
            let db = cfg.db.clone().unwrap_or_else(|| "test".to_string());
            let n = client.database(db).collection(collection).count().await?;
            println!("{n}");
        }
    }

    Ok(())
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "monoxide",
    version,
    about = "Async MongoDB client: run a command against a server"
)]
struct Cli {
    /// Path to config TOML file
    #[arg(short = 'c', long = "config", env = "MONOXIDE_CONFIG")]
    config: Option<String>,

    /// Server address (e.g., 127.0.0.1:27017)
    #[arg(long = "uri", env = "MONOXIDE_URI")]
    uri: Option<String>,

    /// Database name for commands that need one
    #[arg(long = "db", env = "MONOXIDE_DB")]
    db: Option<String>,

    /// Log level or filter spec (e.g., info or info,monoxide=trace)
    #[arg(long = "log-level", env = "MONOXIDE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Connect deadline in milliseconds
    #[arg(long = "connect-timeout-ms", env = "MONOXIDE_CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: Option<u64>,

    /// Per-command deadline in milliseconds
    #[arg(long = "request-timeout-ms", env = "MONOXIDE_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,

    /// Application name reported in the handshake
    #[arg(long = "app-name", env = "MONOXIDE_APP_NAME")]
    app_name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::Subcommand)]
enum Command {
    /// Print the server's handshake reply
    Hello,
    /// Round-trip a ping
    Ping,
    /// Count documents in a collection
    Count { collection: String },
}
