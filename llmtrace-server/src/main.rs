use clap::Parser;
use llmtrace_core::LlmTraceConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "llmtrace.toml")]
    config: String,

    /// Connect, run migrations, print the SQLite version and exit.
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match LlmTraceConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match llmtrace_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database {}: {}", config.database.url, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = llmtrace_core::db::run_migrations(&pool).await {
        eprintln!("Failed to run migrations: {}", e);
        std::process::exit(1);
    }

    if args.health {
        match llmtrace_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ SQLite connected: {}", v),
            Err(e) => {
                println!("❌ SQLite connection failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ llmtrace health check passed");
        return Ok(());
    }

    let providers = llmtrace_core::ProviderRegistry::from_config(&config);
    if providers.is_empty() {
        tracing::warn!("No providers configured; replays will be rejected");
    } else {
        tracing::info!(count = providers.len(), "Providers loaded");
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    llmtrace_server::http::start_http_server(pool, config, providers, tx.subscribe()).await?;

    Ok(())
}
