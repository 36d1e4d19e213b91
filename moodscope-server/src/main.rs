use std::sync::Arc;

use clap::Parser;
use moodscope_core::{
    AnalysisStore, FaceEmotionClassifier, MoodscopeConfig, OnnxEmotionClassifier,
    OpenRouterClient, TextModelSettings, UnavailableClassifier,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use moodscope_server::http;
use moodscope_server::router::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "moodscope.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match MoodscopeConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    // Open the store
    let pool = match moodscope_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to open database {}: {}", config.database.url, e);
            std::process::exit(1);
        }
    };
    moodscope_core::db::init_schema(&pool).await?;

    if args.health {
        match moodscope_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ SQLite available: {}", v),
            Err(e) => {
                println!("❌ SQLite check failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Moodscope health check passed");
        return Ok(());
    }

    // Remote text model; the key is required before serving anything
    let api_key = match config.text_model.api_key() {
        Ok(k) => k,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let text_analyzer = OpenRouterClient::new(TextModelSettings::new(api_key, &config.text_model))?;
    tracing::info!(model = text_analyzer.model(), "Text sentiment backend ready");

    // Local face classifier; failures surface per request
    let face_classifier: Arc<dyn FaceEmotionClassifier> =
        match OnnxEmotionClassifier::from_config(&config.face_model) {
            Ok(c) => {
                tracing::info!("Face emotion classifier loaded");
                Arc::new(c)
            }
            Err(e) => {
                tracing::warn!("Face emotion classifier unavailable: {}", e);
                Arc::new(UnavailableClassifier::new(e.to_string()))
            }
        };

    let upload_dir = config.uploads.resolved_dir();
    tokio::fs::create_dir_all(&upload_dir).await?;

    let state = AppState::new(
        AnalysisStore::new(pool),
        Arc::new(text_analyzer),
        face_classifier,
        upload_dir,
    )
    .with_body_limit(config.uploads.max_bytes);

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

    http::start_http_server(state, &config.http, tx.subscribe()).await?;

    Ok(())
}
